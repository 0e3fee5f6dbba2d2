use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::subscription_repository::SubscriptionRepository;
use crate::models::{
    plan::PlanTier,
    subscription::{
        NewSubscriptionHistoryEntry, SubscriptionHistoryEntry, SubscriptionProfile,
        SubscriptionStatus, SubscriptionUpdate,
    },
};

pub struct PostgresSubscriptionRepository {
    pub pool: PgPool,
}

const PROFILE_COLUMNS: &str = r#"
    user_id,
    email,
    plan,
    subscription_status,
    stripe_customer_id,
    stripe_subscription_id,
    current_period_start,
    current_period_end,
    country_code,
    ai_tokens_used,
    usage_reset_at,
    last_event_at
"#;

#[derive(Debug, FromRow)]
struct ProfileRow {
    user_id: Uuid,
    email: String,
    plan: String,
    subscription_status: String,
    stripe_customer_id: Option<String>,
    stripe_subscription_id: Option<String>,
    current_period_start: Option<OffsetDateTime>,
    current_period_end: Option<OffsetDateTime>,
    country_code: Option<String>,
    ai_tokens_used: i64,
    usage_reset_at: Option<OffsetDateTime>,
    last_event_at: Option<OffsetDateTime>,
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    id: Uuid,
    user_id: Uuid,
    plan: String,
    status: String,
    amount: i64,
    currency: String,
    event_id: Option<String>,
    event_type: String,
    created_at: OffsetDateTime,
}

fn decode_plan(raw: &str) -> Result<PlanTier, sqlx::Error> {
    PlanTier::from_id(raw)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown plan `{raw}` in profiles").into()))
}

impl TryFrom<ProfileRow> for SubscriptionProfile {
    type Error = sqlx::Error;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        Ok(SubscriptionProfile {
            user_id: row.user_id,
            email: row.email,
            plan: decode_plan(&row.plan)?,
            status: SubscriptionStatus::from_provider(&row.subscription_status),
            external_customer_id: row.stripe_customer_id,
            external_subscription_id: row.stripe_subscription_id,
            period_start: row.current_period_start,
            period_end: row.current_period_end,
            country_code: row.country_code,
            ai_tokens_used: row.ai_tokens_used,
            usage_reset_at: row.usage_reset_at,
            last_event_at: row.last_event_at,
        })
    }
}

impl TryFrom<HistoryRow> for SubscriptionHistoryEntry {
    type Error = sqlx::Error;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(SubscriptionHistoryEntry {
            id: row.id,
            user_id: row.user_id,
            plan: decode_plan(&row.plan)?,
            status: SubscriptionStatus::from_provider(&row.status),
            amount: row.amount,
            currency: row.currency,
            event_id: row.event_id,
            event_type: row.event_type,
            created_at: row.created_at,
        })
    }
}

/// Builds the UPDATE for a transition. Only fields named in `update` are touched.
fn build_update_query(user_id: Uuid, update: &SubscriptionUpdate) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new("UPDATE profiles SET updated_at = now()");

    if let Some(plan) = update.plan {
        qb.push(", plan = ").push_bind(plan.as_str());
    }
    if let Some(status) = &update.status {
        qb.push(", subscription_status = ")
            .push_bind(status.as_str().to_string());
    }
    if let Some(subscription_id) = &update.external_subscription_id {
        qb.push(", stripe_subscription_id = ")
            .push_bind(subscription_id.clone());
    }
    if let Some(period) = update.billing_period {
        qb.push(", current_period_start = ")
            .push_bind(period.start)
            .push(", current_period_end = ")
            .push_bind(period.end);
    }
    if let Some(reset_at) = update.usage_reset_at {
        qb.push(", ai_tokens_used = 0, usage_reset_at = ")
            .push_bind(reset_at);
    }
    if let Some(event_at) = update.last_event_at {
        qb.push(", last_event_at = ").push_bind(event_at);
    }

    qb.push(" WHERE user_id = ").push_bind(user_id);
    if let Some(event_at) = update.last_event_at {
        qb.push(" AND (last_event_at IS NULL OR last_event_at <= ")
            .push_bind(event_at)
            .push(")");
    }
    qb
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn find_profile(
        &self,
        user_id: Uuid,
    ) -> Result<Option<SubscriptionProfile>, sqlx::Error> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = $1");
        sqlx::query_as::<_, ProfileRow>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .map(SubscriptionProfile::try_from)
            .transpose()
    }

    async fn find_profile_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<SubscriptionProfile>, sqlx::Error> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE stripe_customer_id = $1");
        sqlx::query_as::<_, ProfileRow>(&sql)
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?
            .map(SubscriptionProfile::try_from)
            .transpose()
    }

    async fn set_external_customer_id_if_absent(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET stripe_customer_id = $2, updated_at = now()
            WHERE user_id = $1 AND stripe_customer_id IS NULL
            "#,
        )
        .bind(user_id)
        .bind(customer_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn replace_external_customer_id(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE profiles SET stripe_customer_id = $2, updated_at = now() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(customer_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn apply_transition(
        &self,
        user_id: Uuid,
        update: &SubscriptionUpdate,
        history: Option<&NewSubscriptionHistoryEntry>,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let result = build_update_query(user_id, update)
            .build()
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(entry) = history {
            sqlx::query(
                r#"
                INSERT INTO subscription_history
                    (id, user_id, plan, status, amount, currency, event_id, event_type, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(entry.user_id)
            .bind(entry.plan.as_str())
            .bind(entry.status.as_str())
            .bind(entry.amount)
            .bind(&entry.currency)
            .bind(&entry.event_id)
            .bind(&entry.event_type)
            .bind(entry.recorded_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn list_history(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<SubscriptionHistoryEntry>, sqlx::Error> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, user_id, plan, status, amount, currency, event_id, event_type, created_at
            FROM subscription_history
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(SubscriptionHistoryEntry::try_from)
            .collect()
    }
}
