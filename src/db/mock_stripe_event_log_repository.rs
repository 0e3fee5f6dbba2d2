use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

use crate::db::stripe_event_log_repository::{ProcessedStripeEvent, StripeEventLogRepository};

#[derive(Clone, Default)]
pub struct MockStripeEventLogRepository {
    log: Arc<Mutex<HashMap<String, ProcessedStripeEvent>>>,
    /// Number of `record_event` calls, including ones that lost the race.
    pub inserts: Arc<Mutex<usize>>,
    pub fail_lookups: bool,
}

impl MockStripeEventLogRepository {
    pub fn with_processed(event_id: &str) -> Self {
        let repo = Self::default();
        repo.log.lock().unwrap().insert(
            event_id.to_string(),
            ProcessedStripeEvent {
                event_id: event_id.to_string(),
                event_type: "checkout.session.completed".to_string(),
                outcome: "applied".to_string(),
                processed_at: OffsetDateTime::now_utc(),
            },
        );
        repo
    }

    pub fn failing_lookups() -> Self {
        Self {
            fail_lookups: true,
            ..Self::default()
        }
    }

    pub fn outcome_for(&self, event_id: &str) -> Option<String> {
        self.log
            .lock()
            .unwrap()
            .get(event_id)
            .map(|entry| entry.outcome.clone())
    }
}

#[async_trait]
impl StripeEventLogRepository for MockStripeEventLogRepository {
    async fn find_processed_event(
        &self,
        event_id: &str,
    ) -> Result<Option<ProcessedStripeEvent>, sqlx::Error> {
        if self.fail_lookups {
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(self.log.lock().unwrap().get(event_id).cloned())
    }

    async fn record_event(
        &self,
        event_id: &str,
        event_type: &str,
        outcome: &str,
    ) -> Result<bool, sqlx::Error> {
        *self.inserts.lock().unwrap() += 1;
        let mut log = self.log.lock().unwrap();
        if log.contains_key(event_id) {
            return Ok(false);
        }
        log.insert(
            event_id.to_string(),
            ProcessedStripeEvent {
                event_id: event_id.to_string(),
                event_type: event_type.to_string(),
                outcome: outcome.to_string(),
                processed_at: OffsetDateTime::now_utc(),
            },
        );
        Ok(true)
    }
}
