use crate::config::Config;
use crate::db::{
    stripe_event_log_repository::StripeEventLogRepository,
    subscription_repository::SubscriptionRepository,
};
use crate::services::reconciler::SubscriptionReconciler;
use crate::services::stripe::StripeService;
use crate::utils::jwt::{JwtKeyProvider, JwtKeys};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn SubscriptionRepository>,
    pub stripe_events: Arc<dyn StripeEventLogRepository>,
    pub stripe: Arc<dyn StripeService>,
    pub config: Arc<Config>,
    pub jwt_keys: Arc<JwtKeys>,
}

impl AppState {
    pub fn reconciler(&self) -> SubscriptionReconciler {
        SubscriptionReconciler::new(self.db.clone())
    }
}

impl JwtKeyProvider for AppState {
    fn jwt_keys(&self) -> &JwtKeys {
        &self.jwt_keys
    }

    fn jwt_issuer(&self) -> &str {
        &self.config.jwt_issuer
    }

    fn jwt_audience(&self) -> &str {
        &self.config.jwt_audience
    }
}
