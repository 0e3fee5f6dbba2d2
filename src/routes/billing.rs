use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::plan::{
    catalog, get_plan, plan_definition, PlanDefinition, PlanTier, Resource, ResourceLimits,
};
use crate::models::subscription::SubscriptionProfile;
use crate::responses::JsonResponse;
use crate::routes::auth::session::AuthSession;
use crate::routes::plan_limits::plan_limit_error_response;
use crate::services::stripe::{StripeServiceError, SubscriptionCheckout};
use crate::state::AppState;
use crate::utils::plan_limits::{check_limit, ensure_within_limit};
use crate::utils::pricing::{adjusted_price, price_multiplier, to_minor_units};

const DEFAULT_HISTORY_LIMIT: i64 = 20;
const MAX_HISTORY_LIMIT: i64 = 100;
const DEFAULT_COUNTRY: &str = "US";

/// Resolves the caller's profile or the response to send instead.
async fn load_profile(app_state: &AppState, claims_id: &str) -> Result<SubscriptionProfile, Response> {
    let user_id = Uuid::parse_str(claims_id)
        .map_err(|_| JsonResponse::unauthorized("Invalid session").into_response())?;

    match app_state.db.find_profile(user_id).await {
        Ok(Some(profile)) => Ok(profile),
        Ok(None) => Err(JsonResponse::not_found("Profile not found").into_response()),
        Err(err) => {
            error!(?err, %user_id, "failed to load billing profile");
            Err(JsonResponse::server_error("Failed to load billing profile").into_response())
        }
    }
}

fn stripe_error_response(err: StripeServiceError, context: &str) -> Response {
    error!(?err, "{context}");
    JsonResponse::error_with_code(
        StatusCode::BAD_GATEWAY,
        "Payment provider request failed. Please try again.",
        "stripe_error",
    )
    .into_response()
}

fn profile_country(profile: &SubscriptionProfile) -> &str {
    profile.country_code.as_deref().unwrap_or(DEFAULT_COUNTRY)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub plan_id: String,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
}

// POST /api/billing/checkout
pub async fn create_checkout(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Json(body): Json<CheckoutRequest>,
) -> Response {
    let Some(plan) = get_plan(&body.plan_id) else {
        return JsonResponse::error_with_code(StatusCode::NOT_FOUND, "Unknown plan", "unknown_plan")
            .into_response();
    };
    if !plan.id.is_paid() {
        return JsonResponse::bad_request("The free plan does not require checkout").into_response();
    }

    let mut profile = match load_profile(&app_state, &claims.id).await {
        Ok(profile) => profile,
        Err(resp) => return resp,
    };

    let customer_id = match profile.external_customer_id.clone() {
        Some(id) => id,
        None => {
            let created = match app_state.stripe.create_customer(&profile.email).await {
                Ok(id) => id,
                Err(err) => return stripe_error_response(err, "failed to create stripe customer"),
            };
            match app_state
                .db
                .set_external_customer_id_if_absent(profile.user_id, &created)
                .await
            {
                Ok(true) => created,
                Ok(false) => {
                    // A concurrent request attached a customer first; use theirs.
                    match app_state.db.find_profile(profile.user_id).await {
                        Ok(Some(fresh)) => {
                            profile = fresh;
                            profile.external_customer_id.clone().unwrap_or(created)
                        }
                        Ok(None) => created,
                        Err(err) => {
                            error!(?err, user_id = %profile.user_id, "failed to reload profile");
                            return JsonResponse::server_error("Failed to start checkout")
                                .into_response();
                        }
                    }
                }
                Err(err) => {
                    error!(?err, user_id = %profile.user_id, "failed to store stripe customer id");
                    return JsonResponse::server_error("Failed to start checkout").into_response();
                }
            }
        }
    };

    let country = profile_country(&profile);
    let price = adjusted_price(plan.base_price_usd, country);
    let frontend = app_state.config.frontend_origin.trim_end_matches('/');
    let checkout = SubscriptionCheckout {
        user_id: profile.user_id,
        customer_id,
        plan: plan.id,
        product_name: format!("{} plan", plan.name),
        monthly_amount: to_minor_units(price),
        success_url: body
            .success_url
            .unwrap_or_else(|| format!("{frontend}/billing?checkout=success")),
        cancel_url: body
            .cancel_url
            .unwrap_or_else(|| format!("{frontend}/billing?checkout=cancelled")),
    };

    match app_state.stripe.create_subscription_checkout(&checkout).await {
        Ok(session) => {
            info!(
                user_id = %profile.user_id,
                plan = plan.id.as_str(),
                country,
                price,
                session_id = %session.id,
                "checkout session created"
            );
            Json(CheckoutResponse {
                session_id: session.id,
                url: session.url,
            })
            .into_response()
        }
        Err(err) => stripe_error_response(err, "failed to create checkout session"),
    }
}

// POST /api/billing/portal
pub async fn create_portal_session(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
) -> Response {
    let profile = match load_profile(&app_state, &claims.id).await {
        Ok(profile) => profile,
        Err(resp) => return resp,
    };
    let Some(customer_id) = profile.external_customer_id.as_deref() else {
        return JsonResponse::error_with_code(
            StatusCode::NOT_FOUND,
            "No billing account on file",
            "no_billing_account",
        )
        .into_response();
    };

    let return_url = format!(
        "{}/billing",
        app_state.config.frontend_origin.trim_end_matches('/')
    );
    match app_state
        .stripe
        .create_portal_session(customer_id, &return_url)
        .await
    {
        Ok(url) => Json(json!({ "url": url })).into_response(),
        Err(err) => stripe_error_response(err, "failed to create billing portal session"),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub ai_tokens_used: i64,
    pub ai_tokens_limit: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub usage_reset_at: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSummary {
    pub plan: PlanTier,
    pub plan_name: &'static str,
    pub status: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_end: Option<OffsetDateTime>,
    pub has_billing_account: bool,
    pub usage: UsageSummary,
    pub limits: ResourceLimits,
}

impl SubscriptionSummary {
    pub(crate) fn from_profile(profile: &SubscriptionProfile) -> Self {
        let plan = plan_definition(profile.plan);
        Self {
            plan: plan.id,
            plan_name: plan.name,
            status: profile.status.as_str().to_string(),
            current_period_start: profile.period_start,
            current_period_end: profile.period_end,
            has_billing_account: profile.external_customer_id.is_some(),
            usage: UsageSummary {
                ai_tokens_used: profile.ai_tokens_used,
                ai_tokens_limit: plan.limits.ai_tokens_per_month,
                usage_reset_at: profile.usage_reset_at,
            },
            limits: plan.limits,
        }
    }
}

// GET /api/billing/subscription
pub async fn get_subscription(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
) -> Response {
    match load_profile(&app_state, &claims.id).await {
        Ok(profile) => Json(SubscriptionSummary::from_profile(&profile)).into_response(),
        Err(resp) => resp,
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

// GET /api/billing/history
pub async fn list_history(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let Some(user_id) = claims.user_id() else {
        return JsonResponse::unauthorized("Invalid session").into_response();
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    match app_state.db.list_history(user_id, limit).await {
        Ok(entries) => Json(json!({ "success": true, "history": entries })).into_response(),
        Err(err) => {
            error!(?err, %user_id, "failed to list subscription history");
            JsonResponse::server_error("Failed to load billing history").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PlansQuery {
    pub country: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanQuote {
    #[serde(flatten)]
    pub plan: &'static PlanDefinition,
    pub price_usd: u32,
    pub price_multiplier: f64,
}

pub(crate) fn quote_plans(country: &str) -> Vec<PlanQuote> {
    catalog()
        .iter()
        .map(|plan| PlanQuote {
            plan,
            price_usd: adjusted_price(plan.base_price_usd, country),
            price_multiplier: price_multiplier(country),
        })
        .collect()
}

// GET /api/billing/plans
pub async fn list_plans(Query(query): Query<PlansQuery>) -> Response {
    let country = query.country.as_deref().unwrap_or(DEFAULT_COUNTRY);
    Json(json!({ "success": true, "plans": quote_plans(country) })).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitCheckRequest {
    pub resource: Resource,
    pub current_count: i64,
    /// Answer `403 plan_limit_reached` instead of `allowed: false`.
    #[serde(default)]
    pub enforce: bool,
}

// POST /api/billing/limits/check
pub async fn check_plan_limit(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Json(body): Json<LimitCheckRequest>,
) -> Response {
    let profile = match load_profile(&app_state, &claims.id).await {
        Ok(profile) => profile,
        Err(resp) => return resp,
    };
    let plan = plan_definition(profile.plan);

    if body.enforce {
        return match ensure_within_limit(plan, body.resource, body.current_count) {
            Ok(check) => Json(check).into_response(),
            Err(err) => {
                warn!(user_id = %profile.user_id, plan = plan.id.as_str(), %err, "plan limit reached");
                plan_limit_error_response(err)
            }
        };
    }

    Json(check_limit(plan, body.resource, body.current_count)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{mock_db::MockDb, mock_stripe_event_log_repository::MockStripeEventLogRepository};
    use crate::models::subscription::{NewSubscriptionHistoryEntry, SubscriptionStatus};
    use crate::routes::auth::claims::Claims;
    use crate::services::stripe::MockStripeService;
    use crate::state::test_support::{claims_for, test_state};
    use axum::extract::State as AxumState;
    use std::sync::Arc;

    fn setup(
        profile: SubscriptionProfile,
        stripe: MockStripeService,
    ) -> (AppState, Arc<MockDb>, Claims) {
        let claims = claims_for(profile.user_id, None);
        let db = Arc::new(MockDb::with_profiles(vec![profile]));
        let state = test_state(db.clone(), MockStripeEventLogRepository::default(), stripe);
        (state, db, claims)
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn checkout_body(plan_id: &str) -> CheckoutRequest {
        CheckoutRequest {
            plan_id: plan_id.into(),
            success_url: Some("http://localhost:5173/ok".into()),
            cancel_url: Some("http://localhost:5173/cancel".into()),
        }
    }

    #[tokio::test]
    async fn checkout_prices_by_country_and_creates_customer() {
        let profile =
            SubscriptionProfile::new_free(Uuid::new_v4(), "cl@example.com", Some("CL".into()));
        let user_id = profile.user_id;
        let stripe = MockStripeService::new();
        let (state, db, claims) = setup(profile, stripe.clone());

        let resp = create_checkout(
            AxumState(state),
            AuthSession(claims),
            Json(checkout_body("standard")),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert!(json["sessionId"].as_str().unwrap().starts_with("cs_mock_"));

        let checkouts = stripe.checkouts.lock().unwrap();
        let checkout = &checkouts[0];
        // 19 USD * 0.6 rounds to 11
        assert_eq!(checkout.monthly_amount, 1_100);
        assert_eq!(checkout.plan, PlanTier::Standard);
        assert_eq!(checkout.success_url, "http://localhost:5173/ok");
        let meta = checkout.metadata();
        assert_eq!(meta.get("userId"), Some(&user_id.to_string()));
        assert_eq!(meta.get("planId").map(String::as_str), Some("standard"));

        assert_eq!(*stripe.customers.lock().unwrap(), vec!["cl@example.com".to_string()]);
        let stored = db.profile(user_id).unwrap();
        assert_eq!(stored.external_customer_id.as_deref(), Some(checkout.customer_id.as_str()));
    }

    #[tokio::test]
    async fn checkout_reuses_existing_customer() {
        let mut profile = SubscriptionProfile::new_free(Uuid::new_v4(), "us@example.com", None);
        profile.external_customer_id = Some("cus_existing".into());
        let stripe = MockStripeService::new();
        let (state, _db, claims) = setup(profile, stripe.clone());

        let resp =
            create_checkout(AxumState(state), AuthSession(claims), Json(checkout_body("max"))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(stripe.customers.lock().unwrap().is_empty());
        let checkouts = stripe.checkouts.lock().unwrap();
        assert_eq!(checkouts[0].customer_id, "cus_existing");
        assert_eq!(checkouts[0].monthly_amount, 4_900);
    }

    #[tokio::test]
    async fn checkout_rejects_unknown_and_free_plans() {
        let profile = SubscriptionProfile::new_free(Uuid::new_v4(), "a@example.com", None);
        let stripe = MockStripeService::new();
        let (state, _db, claims) = setup(profile, stripe.clone());

        let resp = create_checkout(
            AxumState(state.clone()),
            AuthSession(claims.clone()),
            Json(checkout_body("enterprise")),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["code"], "unknown_plan");

        let resp =
            create_checkout(AxumState(state), AuthSession(claims), Json(checkout_body("free"))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(stripe.checkouts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn checkout_provider_failure_maps_to_bad_gateway() {
        let mut profile = SubscriptionProfile::new_free(Uuid::new_v4(), "a@example.com", None);
        profile.external_customer_id = Some("cus_existing".into());
        let (state, _db, claims) = setup(profile, MockStripeService::failing());

        let resp = create_checkout(
            AxumState(state),
            AuthSession(claims),
            Json(checkout_body("standard")),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(resp).await["code"], "stripe_error");
    }

    #[tokio::test]
    async fn portal_requires_billing_account() {
        let profile = SubscriptionProfile::new_free(Uuid::new_v4(), "a@example.com", None);
        let (state, _db, claims) = setup(profile, MockStripeService::new());

        let resp = create_portal_session(AxumState(state), AuthSession(claims)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn portal_returns_session_url() {
        let mut profile = SubscriptionProfile::new_free(Uuid::new_v4(), "a@example.com", None);
        profile.external_customer_id = Some("cus_42".into());
        let stripe = MockStripeService::new();
        let (state, _db, claims) = setup(profile, stripe.clone());

        let resp = create_portal_session(AxumState(state), AuthSession(claims)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp).await["url"],
            "https://billing.example.test/session/cus_42"
        );
        let portal = stripe.portal_sessions.lock().unwrap();
        assert_eq!(portal[0].1, "http://localhost:5173/billing");
    }

    #[tokio::test]
    async fn subscription_summary_reports_plan_usage_and_limits() {
        let mut profile = SubscriptionProfile::new_free(Uuid::new_v4(), "a@example.com", None);
        profile.plan = PlanTier::Max;
        profile.status = SubscriptionStatus::PastDue;
        profile.ai_tokens_used = 500;
        let (state, _db, claims) = setup(profile, MockStripeService::new());

        let resp = get_subscription(AxumState(state), AuthSession(claims)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["plan"], "max");
        assert_eq!(json["status"], "past_due");
        assert_eq!(json["usage"]["aiTokensUsed"], 500);
        assert_eq!(json["usage"]["aiTokensLimit"], 1_000_000);
        assert_eq!(json["limits"]["maxProjects"], -1);
        assert_eq!(json["hasBillingAccount"], false);
    }

    #[tokio::test]
    async fn missing_profile_is_not_found() {
        let db = Arc::new(MockDb::default());
        let state = test_state(db, MockStripeEventLogRepository::default(), MockStripeService::new());
        let claims = claims_for(Uuid::new_v4(), None);

        let resp = get_subscription(AxumState(state), AuthSession(claims)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn history_is_newest_first_and_clamped() {
        let profile = SubscriptionProfile::new_free(Uuid::new_v4(), "a@example.com", None);
        let user_id = profile.user_id;
        let (state, db, claims) = setup(profile, MockStripeService::new());
        let base = OffsetDateTime::now_utc();
        for i in 0..3 {
            let entry = NewSubscriptionHistoryEntry {
                user_id,
                plan: PlanTier::Standard,
                status: SubscriptionStatus::Active,
                amount: 1_900,
                currency: "usd".into(),
                event_id: Some(format!("evt_{i}")),
                event_type: "invoice.paid".into(),
                recorded_at: base + time::Duration::minutes(i),
            };
            db.history
                .lock()
                .unwrap()
                .push(crate::models::subscription::SubscriptionHistoryEntry::from_new(
                    Uuid::new_v4(),
                    &entry,
                ));
        }

        let resp = list_history(
            AxumState(state.clone()),
            AuthSession(claims.clone()),
            Query(HistoryQuery { limit: Some(2) }),
        )
        .await;
        let json = body_json(resp).await;
        let history = json["history"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["eventId"], "evt_2");

        let resp = list_history(
            AxumState(state),
            AuthSession(claims),
            Query(HistoryQuery { limit: Some(0) }),
        )
        .await;
        assert_eq!(body_json(resp).await["history"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn plans_are_priced_for_country() {
        let resp = list_plans(Query(PlansQuery {
            country: Some("pe".into()),
        }))
        .await;
        let json = body_json(resp).await;
        let plans = json["plans"].as_array().unwrap();
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[2]["id"], "max");
        assert_eq!(plans[2]["basePriceUsd"], 49);
        assert_eq!(plans[2]["priceUsd"], 25);
    }

    #[test]
    fn unknown_country_keeps_base_prices() {
        for quote in quote_plans("ZZ") {
            assert_eq!(quote.price_usd, quote.plan.base_price_usd);
        }
    }

    #[tokio::test]
    async fn limit_check_reports_remaining_and_enforces() {
        let profile = SubscriptionProfile::new_free(Uuid::new_v4(), "a@example.com", None);
        let (state, _db, claims) = setup(profile, MockStripeService::new());

        let resp = check_plan_limit(
            AxumState(state.clone()),
            AuthSession(claims.clone()),
            Json(LimitCheckRequest {
                resource: Resource::Applications,
                current_count: 2,
                enforce: false,
            }),
        )
        .await;
        let json = body_json(resp).await;
        assert_eq!(json["allowed"], true);
        assert_eq!(json["remaining"], 1);

        let resp = check_plan_limit(
            AxumState(state),
            AuthSession(claims),
            Json(LimitCheckRequest {
                resource: Resource::Projects,
                current_count: 1,
                enforce: true,
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(resp).await["code"], "plan_limit_reached");
    }
}
