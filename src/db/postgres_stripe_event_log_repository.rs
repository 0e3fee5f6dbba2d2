use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::db::stripe_event_log_repository::{ProcessedStripeEvent, StripeEventLogRepository};

pub struct PostgresStripeEventLogRepository {
    pub pool: PgPool,
}

#[async_trait]
impl StripeEventLogRepository for PostgresStripeEventLogRepository {
    async fn find_processed_event(
        &self,
        event_id: &str,
    ) -> Result<Option<ProcessedStripeEvent>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT event_id, event_type, outcome, processed_at \
             FROM stripe_event_log WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ProcessedStripeEvent {
                event_id: row.try_get("event_id")?,
                event_type: row.try_get("event_type")?,
                outcome: row.try_get("outcome")?,
                processed_at: row.try_get("processed_at")?,
            })
        })
        .transpose()
    }

    async fn record_event(
        &self,
        event_id: &str,
        event_type: &str,
        outcome: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO stripe_event_log (event_id, event_type, outcome, processed_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(outcome)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
