use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::utils::plan_limits::PlanLimitError;

pub(crate) fn plan_limit_error_response(err: PlanLimitError) -> Response {
    match err {
        PlanLimitError::LimitReached { resource, limit } => {
            let message = format!(
                "Your plan allows up to {limit} {}. Upgrade your plan to create more.",
                resource.as_str().replace('_', " ")
            );
            (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "status": "error",
                    "success": false,
                    "message": message,
                    "code": "plan_limit_reached",
                    "resource": resource,
                    "limit": limit,
                })),
            )
                .into_response()
        }
    }
}
