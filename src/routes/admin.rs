use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::routes::billing::SubscriptionSummary;
use crate::services::reconciler::ReconcileError;
use crate::{responses::JsonResponse, routes::auth::session::AuthSession, state::AppState};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResyncBody {
    pub external_customer_id: Option<String>,
}

// POST /api/admin/billing/{user_id}/resync
pub async fn resync_subscription(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(user_id): Path<Uuid>,
    body: Bytes,
) -> Response {
    if !claims.is_admin() {
        return JsonResponse::forbidden("Admin only").into_response();
    }
    let body: ResyncBody = if body.is_empty() {
        ResyncBody::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(b) => b,
            Err(_) => return JsonResponse::bad_request("Invalid request body").into_response(),
        }
    };

    if let Some(customer_id) = body
        .external_customer_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    {
        if let Err(err) = app_state
            .db
            .replace_external_customer_id(user_id, customer_id)
            .await
        {
            error!(?err, %user_id, "admin resync: failed to replace customer id");
            return JsonResponse::server_error("Failed to update customer id").into_response();
        }
        info!(admin = %claims.id, %user_id, customer_id, "admin replaced stripe customer id");
    }

    let profile = match app_state.db.find_profile(user_id).await {
        Ok(Some(profile)) => profile,
        Ok(None) => return JsonResponse::not_found("Profile not found").into_response(),
        Err(err) => {
            error!(?err, %user_id, "admin resync: failed to load profile");
            return JsonResponse::server_error("Failed to load profile").into_response();
        }
    };

    let Some(customer_id) = profile.external_customer_id.as_deref() else {
        return JsonResponse::error_with_code(
            StatusCode::NOT_FOUND,
            "No billing account on file",
            "no_billing_account",
        )
        .into_response();
    };

    let subscription = match app_state.stripe.find_live_subscription(customer_id).await {
        Ok(sub) => sub,
        Err(err) => {
            error!(?err, %user_id, customer_id, "admin resync: stripe lookup failed");
            return JsonResponse::error_with_code(
                StatusCode::BAD_GATEWAY,
                "Payment provider request failed. Please try again.",
                "stripe_error",
            )
            .into_response();
        }
    };

    match app_state
        .reconciler()
        .resync(&profile, subscription.as_ref())
        .await
    {
        Ok(updated) => {
            info!(admin = %claims.id, %user_id, "admin resync completed");
            Json(SubscriptionSummary::from_profile(&updated)).into_response()
        }
        Err(ReconcileError::Superseded(_)) => JsonResponse::error_with_code(
            StatusCode::CONFLICT,
            "Subscription changed while resyncing. Please retry.",
            "resync_conflict",
        )
        .into_response(),
        Err(err) => {
            error!(?err, %user_id, "admin resync: failed to apply subscription");
            JsonResponse::server_error("Failed to resync subscription").into_response()
        }
    }
}
