use axum::body::Bytes;
use axum::Json;
use axum::{extract::State, http::HeaderMap, response::IntoResponse, response::Response};
use serde_json::json;
use tracing::{error, info, warn};

use crate::responses::JsonResponse;
use crate::state::AppState;

fn received() -> Response {
    Json(json!({ "received": true })).into_response()
}

// POST /api/stripe/webhook
pub async fn webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let sig = match headers
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
    {
        Some(s) => s,
        None => return JsonResponse::bad_request("Missing Stripe-Signature").into_response(),
    };

    let evt = match app_state.stripe.verify_webhook(&body, sig) {
        Ok(e) => e,
        Err(err) => {
            warn!(?err, "stripe webhook verification failed");
            return JsonResponse::bad_request("Invalid webhook signature").into_response();
        }
    };

    match app_state.stripe_events.find_processed_event(&evt.id).await {
        Ok(Some(prior)) => {
            info!(
                event_id = %evt.id,
                event_type = %evt.event_type,
                prior_outcome = %prior.outcome,
                "stripe event already processed"
            );
            return received();
        }
        Ok(None) => {}
        Err(err) => {
            error!(?err, event_id = %evt.id, "failed to check stripe event log");
            return JsonResponse::server_error("Failed to process webhook").into_response();
        }
    }

    let outcome = match app_state.reconciler().reconcile(&evt).await {
        Ok(outcome) => outcome,
        Err(err) => {
            // 500 makes the provider redeliver; transitions are safe to replay.
            error!(?err, event_id = %evt.id, event_type = %evt.event_type, "stripe event reconciliation failed");
            return JsonResponse::server_error("Failed to process webhook").into_response();
        }
    };

    match app_state
        .stripe_events
        .record_event(&evt.id, &evt.event_type, outcome.label())
        .await
    {
        Ok(true) => {}
        // A concurrent delivery logged it first; the transition was idempotent.
        Ok(false) => info!(event_id = %evt.id, "stripe event logged by concurrent delivery"),
        Err(err) => {
            error!(?err, event_id = %evt.id, outcome = outcome.label(), "failed to record stripe event");
            return JsonResponse::server_error("Failed to process webhook").into_response();
        }
    }

    received()
}
