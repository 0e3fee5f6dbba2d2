use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;

/// One provider event the webhook has already handled, whatever its outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedStripeEvent {
    pub event_id: String,
    pub event_type: String,
    /// Reconciler outcome label (`applied`, `orphaned`, `stale`, ...).
    pub outcome: String,
    #[serde(with = "time::serde::rfc3339")]
    pub processed_at: OffsetDateTime,
}

#[async_trait]
pub trait StripeEventLogRepository: Send + Sync {
    async fn find_processed_event(
        &self,
        event_id: &str,
    ) -> Result<Option<ProcessedStripeEvent>, sqlx::Error>;

    /// Returns `false` when another delivery of the same event got there first.
    async fn record_event(
        &self,
        event_id: &str,
        event_type: &str,
        outcome: &str,
    ) -> Result<bool, sqlx::Error>;
}
