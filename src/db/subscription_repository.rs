use async_trait::async_trait;
use uuid::Uuid;

use crate::models::subscription::{
    NewSubscriptionHistoryEntry, SubscriptionHistoryEntry, SubscriptionProfile, SubscriptionUpdate,
};

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn find_profile(&self, user_id: Uuid)
        -> Result<Option<SubscriptionProfile>, sqlx::Error>;

    async fn find_profile_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<SubscriptionProfile>, sqlx::Error>;

    /// Stores the provider customer id unless one is already on file.
    /// Returns whether the id was written.
    async fn set_external_customer_id_if_absent(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> Result<bool, sqlx::Error>;

    /// Unconditional overwrite, reserved for admin resync.
    async fn replace_external_customer_id(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> Result<(), sqlx::Error>;

    /// Writes `update` and the optional audit row atomically.
    ///
    /// Returns `false` without writing anything when the profile is missing or
    /// its `last_event_at` is newer than `update.last_event_at`.
    async fn apply_transition(
        &self,
        user_id: Uuid,
        update: &SubscriptionUpdate,
        history: Option<&NewSubscriptionHistoryEntry>,
    ) -> Result<bool, sqlx::Error>;

    /// Newest first.
    async fn list_history(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<SubscriptionHistoryEntry>, sqlx::Error>;
}
