use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::plan::PlanTier;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Cancelled,
    /// Provider status we do not model (e.g. `trialing`, `incomplete`), kept verbatim.
    Other(String),
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Other(raw) => raw.as_str(),
        }
    }

    /// Maps a payment-provider subscription status onto ours.
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim() {
            "active" => SubscriptionStatus::Active,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" | "cancelled" => SubscriptionStatus::Cancelled,
            other => SubscriptionStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for SubscriptionStatus {
    fn from(value: String) -> Self {
        SubscriptionStatus::from_provider(&value)
    }
}

impl From<SubscriptionStatus> for String {
    fn from(value: SubscriptionStatus) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing state stored on a user's profile row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionProfile {
    pub user_id: Uuid,
    pub email: String,
    pub plan: PlanTier,
    pub status: SubscriptionStatus,
    pub external_customer_id: Option<String>,
    pub external_subscription_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub period_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub period_end: Option<OffsetDateTime>,
    pub country_code: Option<String>,
    pub ai_tokens_used: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub usage_reset_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_event_at: Option<OffsetDateTime>,
}

impl SubscriptionProfile {
    /// A profile as created at signup: free plan, no provider records.
    pub fn new_free(user_id: Uuid, email: impl Into<String>, country_code: Option<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
            plan: PlanTier::Free,
            status: SubscriptionStatus::Active,
            external_customer_id: None,
            external_subscription_id: None,
            period_start: None,
            period_end: None,
            country_code,
            ai_tokens_used: 0,
            usage_reset_at: None,
            last_event_at: None,
        }
    }

    /// True when `event_at` predates the last event already applied.
    pub fn is_stale(&self, event_at: OffsetDateTime) -> bool {
        self.last_event_at.is_some_and(|last| event_at < last)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPeriod {
    pub start: Option<OffsetDateTime>,
    pub end: Option<OffsetDateTime>,
}

/// Absolute field overwrites performed by one reconciliation step.
///
/// `None` leaves a field untouched. For `external_subscription_id`,
/// `Some(None)` clears the stored id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionUpdate {
    pub plan: Option<PlanTier>,
    pub status: Option<SubscriptionStatus>,
    pub external_subscription_id: Option<Option<String>>,
    pub billing_period: Option<BillingPeriod>,
    /// Zeroes `ai_tokens_used` and stamps the reset time.
    pub usage_reset_at: Option<OffsetDateTime>,
    pub last_event_at: Option<OffsetDateTime>,
}

impl SubscriptionUpdate {
    pub fn apply_to(&self, profile: &mut SubscriptionProfile) {
        if let Some(plan) = self.plan {
            profile.plan = plan;
        }
        if let Some(status) = &self.status {
            profile.status = status.clone();
        }
        if let Some(subscription_id) = &self.external_subscription_id {
            profile.external_subscription_id = subscription_id.clone();
        }
        if let Some(period) = self.billing_period {
            profile.period_start = period.start;
            profile.period_end = period.end;
        }
        if let Some(reset_at) = self.usage_reset_at {
            profile.ai_tokens_used = 0;
            profile.usage_reset_at = Some(reset_at);
        }
        if let Some(event_at) = self.last_event_at {
            profile.last_event_at = Some(event_at);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSubscriptionHistoryEntry {
    pub user_id: Uuid,
    pub plan: PlanTier,
    pub status: SubscriptionStatus,
    /// Minor currency units (cents).
    pub amount: i64,
    pub currency: String,
    pub event_id: Option<String>,
    pub event_type: String,
    pub recorded_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionHistoryEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan: PlanTier,
    pub status: SubscriptionStatus,
    pub amount: i64,
    pub currency: String,
    pub event_id: Option<String>,
    pub event_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
impl SubscriptionHistoryEntry {
    pub fn from_new(id: Uuid, entry: &NewSubscriptionHistoryEntry) -> Self {
        Self {
            id,
            user_id: entry.user_id,
            plan: entry.plan,
            status: entry.status.clone(),
            amount: entry.amount,
            currency: entry.currency.clone(),
            event_id: entry.event_id.clone(),
            event_type: entry.event_type.clone(),
            created_at: entry.recorded_at,
        }
    }
}
