use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;

use super::{
    CheckoutSession, ProviderSubscription, StripeEvent, StripeService, StripeServiceError,
    SubscriptionCheckout,
};
use crate::config::StripeSettings;
use crate::models::plan::get_plan;

pub struct LiveStripeService {
    client: stripe::Client,
    webhook_secret: String,
}

impl LiveStripeService {
    pub fn new(secret_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            client: stripe::Client::new(secret_key),
            webhook_secret: webhook_secret.into(),
        }
    }

    pub fn from_settings(settings: &StripeSettings) -> Self {
        Self::new(settings.secret_key.clone(), settings.webhook_secret.clone())
    }

    /// Verifies the signature against `now` (unix seconds), then flattens the
    /// typed event back into JSON for the reconciler.
    fn construct_event_at(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: i64,
    ) -> Result<StripeEvent, StripeServiceError> {
        let payload =
            std::str::from_utf8(payload).map_err(|e| StripeServiceError::Payload(e.to_string()))?;
        let event = stripe::Webhook::construct_event_with_timestamp(
            payload,
            signature_header,
            &self.webhook_secret,
            now,
        )?;
        let value =
            serde_json::to_value(&event).map_err(|e| StripeServiceError::Payload(e.to_string()))?;
        StripeEvent::from_json(value)
    }
}

fn customer_id(raw: &str) -> Result<stripe::CustomerId, StripeServiceError> {
    raw.parse::<stripe::CustomerId>()
        .map_err(|_| StripeServiceError::InvalidId(raw.to_string()))
}

fn monthly_line_item(checkout: &SubscriptionCheckout) -> stripe::CreateCheckoutSessionLineItems {
    stripe::CreateCheckoutSessionLineItems {
        quantity: Some(1),
        price_data: Some(stripe::CreateCheckoutSessionLineItemsPriceData {
            currency: stripe::Currency::USD,
            product_data: Some(stripe::CreateCheckoutSessionLineItemsPriceDataProductData {
                name: checkout.product_name.clone(),
                ..Default::default()
            }),
            unit_amount: Some(checkout.monthly_amount),
            recurring: Some(stripe::CreateCheckoutSessionLineItemsPriceDataRecurring {
                interval: stripe::CreateCheckoutSessionLineItemsPriceDataRecurringInterval::Month,
                interval_count: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn to_datetime(secs: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(secs).ok()
}

fn is_live(status: &stripe::SubscriptionStatus) -> bool {
    matches!(
        status,
        stripe::SubscriptionStatus::Active
            | stripe::SubscriptionStatus::Trialing
            | stripe::SubscriptionStatus::PastDue
    )
}

#[async_trait]
impl StripeService for LiveStripeService {
    async fn create_customer(&self, email: &str) -> Result<String, StripeServiceError> {
        let mut params = stripe::CreateCustomer::new();
        params.email = Some(email);
        let customer = stripe::Customer::create(&self.client, params).await?;
        Ok(customer.id.to_string())
    }

    async fn create_subscription_checkout(
        &self,
        checkout: &SubscriptionCheckout,
    ) -> Result<CheckoutSession, StripeServiceError> {
        let metadata: HashMap<String, String> = checkout.metadata().into_iter().collect();
        let user_id = checkout.user_id.to_string();

        let mut params = stripe::CreateCheckoutSession::new();
        params.mode = Some(stripe::CheckoutSessionMode::Subscription);
        params.customer = Some(customer_id(&checkout.customer_id)?);
        params.client_reference_id = Some(&user_id);
        params.success_url = Some(&checkout.success_url);
        params.cancel_url = Some(&checkout.cancel_url);
        params.line_items = Some(vec![monthly_line_item(checkout)]);
        params.subscription_data = Some(stripe::CreateCheckoutSessionSubscriptionData {
            metadata: Some(metadata.clone()),
            ..Default::default()
        });
        params.metadata = Some(metadata);

        let session = stripe::CheckoutSession::create(&self.client, params).await?;
        Ok(CheckoutSession {
            id: session.id.to_string(),
            url: session.url,
        })
    }

    async fn create_portal_session(
        &self,
        customer: &str,
        return_url: &str,
    ) -> Result<String, StripeServiceError> {
        let mut params = stripe::CreateBillingPortalSession::new(customer_id(customer)?);
        params.return_url = Some(return_url);
        let session = stripe::BillingPortalSession::create(&self.client, params).await?;
        Ok(session.url)
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError> {
        self.construct_event_at(payload, signature_header, OffsetDateTime::now_utc().unix_timestamp())
    }

    async fn find_live_subscription(
        &self,
        customer: &str,
    ) -> Result<Option<ProviderSubscription>, StripeServiceError> {
        let mut params = stripe::ListSubscriptions::new();
        params.customer = Some(customer_id(customer)?);
        params.limit = Some(10);

        // Default listing excludes canceled subscriptions.
        let subscriptions = stripe::Subscription::list(&self.client, &params).await?;
        Ok(subscriptions
            .data
            .into_iter()
            .find(|sub| is_live(&sub.status))
            .map(|sub| ProviderSubscription {
                id: sub.id.to_string(),
                status: sub.status.as_str().to_string(),
                current_period_start: to_datetime(sub.current_period_start),
                current_period_end: to_datetime(sub.current_period_end),
                plan: sub
                    .metadata
                    .get("planId")
                    .and_then(|raw| get_plan(raw))
                    .map(|plan| plan.id),
            }))
    }
}
