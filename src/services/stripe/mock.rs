use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::{
    CheckoutSession, ProviderSubscription, StripeEvent, StripeService, StripeServiceError,
    SubscriptionCheckout,
};

static SEQ: AtomicU64 = AtomicU64::new(1);

fn next_id(prefix: &str) -> String {
    format!("{prefix}_{}", SEQ.fetch_add(1, Ordering::Relaxed))
}

/// Records every call; webhooks are accepted unsigned unless told otherwise.
#[derive(Clone, Default)]
pub struct MockStripeService {
    pub checkouts: Arc<Mutex<Vec<SubscriptionCheckout>>>,
    /// Emails of created customers.
    pub customers: Arc<Mutex<Vec<String>>>,
    /// `(customer_id, return_url)` per portal session.
    pub portal_sessions: Arc<Mutex<Vec<(String, String)>>>,
    pub live_subscription: Option<ProviderSubscription>,
    pub reject_signatures: bool,
    pub fail_requests: bool,
}

impl MockStripeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting_webhooks() -> Self {
        Self {
            reject_signatures: true,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_requests: true,
            ..Self::default()
        }
    }

    pub fn with_live_subscription(mut self, subscription: ProviderSubscription) -> Self {
        self.live_subscription = Some(subscription);
        self
    }

    fn guard(&self) -> Result<(), StripeServiceError> {
        if self.fail_requests {
            return Err(stripe::StripeError::ClientError("mock outage".into()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl StripeService for MockStripeService {
    async fn create_customer(&self, email: &str) -> Result<String, StripeServiceError> {
        self.guard()?;
        self.customers.lock().unwrap().push(email.to_string());
        Ok(next_id("cus_mock"))
    }

    async fn create_subscription_checkout(
        &self,
        checkout: &SubscriptionCheckout,
    ) -> Result<CheckoutSession, StripeServiceError> {
        self.checkouts.lock().unwrap().push(checkout.clone());
        self.guard()?;
        let id = next_id("cs_mock");
        Ok(CheckoutSession {
            url: Some(format!("https://checkout.example.test/{id}")),
            id,
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, StripeServiceError> {
        self.guard()?;
        self.portal_sessions
            .lock()
            .unwrap()
            .push((customer_id.to_string(), return_url.to_string()));
        Ok(format!("https://billing.example.test/session/{customer_id}"))
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        _signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError> {
        if self.reject_signatures {
            return Err(stripe::WebhookError::BadSignature.into());
        }
        StripeEvent::from_slice(payload)
    }

    async fn find_live_subscription(
        &self,
        _customer_id: &str,
    ) -> Result<Option<ProviderSubscription>, StripeServiceError> {
        self.guard()?;
        Ok(self.live_subscription.clone())
    }
}
