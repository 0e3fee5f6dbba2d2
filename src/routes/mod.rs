pub mod admin;
pub mod auth;
pub mod billing;
pub mod plan_limits;
pub mod stripe;

use axum::{
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};

use crate::responses::JsonResponse;
use crate::state::AppState;

async fn root() -> Response {
    JsonResponse::success("Hello, GrantDesk!").into_response()
}

/// Routes that carry no session: the provider webhook and the price list.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/api/stripe/webhook", post(stripe::webhook))
        .route("/api/billing/plans", get(billing::list_plans))
}

/// Session-authenticated billing and admin routes.
pub fn billing_routes() -> Router<AppState> {
    Router::new()
        .route("/api/billing/checkout", post(billing::create_checkout))
        .route("/api/billing/portal", post(billing::create_portal_session))
        .route("/api/billing/subscription", get(billing::get_subscription))
        .route("/api/billing/history", get(billing::list_history))
        .route("/api/billing/limits/check", post(billing::check_plan_limit))
        .route(
            "/api/admin/billing/{user_id}/resync",
            post(admin::resync_subscription),
        )
}

/// The full API without transport layers (rate limiting, CORS, tracing).
#[cfg(test)]
pub fn router(state: AppState) -> Router {
    public_routes().merge(billing_routes()).with_state(state)
}
