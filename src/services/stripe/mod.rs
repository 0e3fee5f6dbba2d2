//! Payment provider seam. Handlers and the reconciler only see this trait;
//! the live implementation talks to Stripe through async-stripe.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::plan::PlanTier;

mod live;
#[cfg(test)]
mod mock;

pub use live::LiveStripeService;
#[cfg(test)]
pub use mock::MockStripeService;

#[derive(Debug, thiserror::Error)]
pub enum StripeServiceError {
    #[error("stripe request failed: {0}")]
    Api(#[from] stripe::StripeError),
    #[error("webhook rejected: {0}")]
    Webhook(#[from] stripe::WebhookError),
    #[error("invalid stripe id `{0}`")]
    InvalidId(String),
    #[error("malformed event payload: {0}")]
    Payload(String),
}

/// A monthly subscription checkout for one plan, priced for the buyer's country.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionCheckout {
    pub user_id: Uuid,
    pub customer_id: String,
    pub plan: PlanTier,
    pub product_name: String,
    /// Minor units (cents), already country-adjusted.
    pub monthly_amount: i64,
    pub success_url: String,
    pub cancel_url: String,
}

impl SubscriptionCheckout {
    /// Metadata copied onto both the session and the subscription it creates,
    /// so every later provider event can be traced back to user and plan.
    pub fn metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("userId".to_string(), self.user_id.to_string()),
            ("planId".to_string(), self.plan.as_str().to_string()),
        ])
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

/// Envelope of a verified provider event; `payload` is the full body.
#[derive(Clone, Debug)]
pub struct StripeEvent {
    pub id: String,
    pub event_type: String,
    /// Unix seconds.
    pub created: Option<i64>,
    pub payload: serde_json::Value,
}

impl StripeEvent {
    pub fn from_json(payload: serde_json::Value) -> Result<Self, StripeServiceError> {
        let field = |name: &str| {
            payload
                .get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| StripeServiceError::Payload(format!("event is missing `{name}`")))
        };
        let id = field("id")?;
        let event_type = field("type")?;
        let created = payload.get("created").and_then(|v| v.as_i64());
        Ok(StripeEvent {
            id,
            event_type,
            created,
            payload,
        })
    }

    pub fn from_slice(body: &[u8]) -> Result<Self, StripeServiceError> {
        let value = serde_json::from_slice(body)
            .map_err(|e| StripeServiceError::Payload(e.to_string()))?;
        Self::from_json(value)
    }
}

/// The provider's current view of a customer's subscription.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderSubscription {
    pub id: String,
    pub status: String,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    /// From `metadata.planId`; `None` when absent or not a plan we sell.
    pub plan: Option<PlanTier>,
}

#[async_trait]
pub trait StripeService: Send + Sync {
    /// Returns the new customer id.
    async fn create_customer(&self, email: &str) -> Result<String, StripeServiceError>;

    async fn create_subscription_checkout(
        &self,
        checkout: &SubscriptionCheckout,
    ) -> Result<CheckoutSession, StripeServiceError>;

    /// Returns the hosted portal URL.
    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, StripeServiceError>;

    /// Checks the `Stripe-Signature` header against the raw body.
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError>;

    /// The customer's current active, trialing or past-due subscription.
    async fn find_live_subscription(
        &self,
        customer_id: &str,
    ) -> Result<Option<ProviderSubscription>, StripeServiceError>;
}
