use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::subscription_repository::SubscriptionRepository;
use crate::models::subscription::{
    NewSubscriptionHistoryEntry, SubscriptionHistoryEntry, SubscriptionProfile, SubscriptionUpdate,
};

/// In-memory stand-in for the profiles and history tables.
#[derive(Default)]
pub struct MockDb {
    pub profiles: Mutex<HashMap<Uuid, SubscriptionProfile>>,
    pub history: Mutex<Vec<SubscriptionHistoryEntry>>,
    /// Fail every call, reads included.
    pub should_fail: bool,
    /// Fail only writes, so a transition can resolve its profile then error.
    pub fail_writes: bool,
    pub apply_calls: Mutex<usize>,
}

impl MockDb {
    pub fn with_profiles(profiles: impl IntoIterator<Item = SubscriptionProfile>) -> Self {
        let db = Self::default();
        {
            let mut guard = db.profiles.lock().unwrap();
            for profile in profiles {
                guard.insert(profile.user_id, profile);
            }
        }
        db
    }

    pub fn profile(&self, user_id: Uuid) -> Option<SubscriptionProfile> {
        self.profiles.lock().unwrap().get(&user_id).cloned()
    }

    pub fn history_for(&self, user_id: Uuid) -> Vec<SubscriptionHistoryEntry> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .cloned()
            .collect()
    }

    fn check_read(&self) -> Result<(), sqlx::Error> {
        if self.should_fail {
            return Err(sqlx::Error::Protocol("Mock DB failure".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), sqlx::Error> {
        self.check_read()?;
        if self.fail_writes {
            return Err(sqlx::Error::Protocol("Mock DB write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepository for MockDb {
    async fn find_profile(
        &self,
        user_id: Uuid,
    ) -> Result<Option<SubscriptionProfile>, sqlx::Error> {
        self.check_read()?;
        Ok(self.profile(user_id))
    }

    async fn find_profile_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<SubscriptionProfile>, sqlx::Error> {
        self.check_read()?;
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .values()
            .find(|p| p.external_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn set_external_customer_id_if_absent(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> Result<bool, sqlx::Error> {
        self.check_write()?;
        let mut guard = self.profiles.lock().unwrap();
        match guard.get_mut(&user_id) {
            Some(profile) if profile.external_customer_id.is_none() => {
                profile.external_customer_id = Some(customer_id.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn replace_external_customer_id(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> Result<(), sqlx::Error> {
        self.check_write()?;
        if let Some(profile) = self.profiles.lock().unwrap().get_mut(&user_id) {
            profile.external_customer_id = Some(customer_id.to_string());
        }
        Ok(())
    }

    async fn apply_transition(
        &self,
        user_id: Uuid,
        update: &SubscriptionUpdate,
        history: Option<&NewSubscriptionHistoryEntry>,
    ) -> Result<bool, sqlx::Error> {
        *self.apply_calls.lock().unwrap() += 1;
        self.check_write()?;

        let mut guard = self.profiles.lock().unwrap();
        let Some(profile) = guard.get_mut(&user_id) else {
            return Ok(false);
        };
        if let Some(event_at) = update.last_event_at {
            if profile.is_stale(event_at) {
                return Ok(false);
            }
        }
        update.apply_to(profile);

        if let Some(entry) = history {
            self.history
                .lock()
                .unwrap()
                .push(SubscriptionHistoryEntry::from_new(Uuid::new_v4(), entry));
        }
        Ok(true)
    }

    async fn list_history(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<SubscriptionHistoryEntry>, sqlx::Error> {
        self.check_read()?;
        let mut entries = self.history_for(user_id);
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(usize::try_from(limit.max(0)).unwrap_or(0));
        Ok(entries)
    }
}
