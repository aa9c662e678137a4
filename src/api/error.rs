//! API error bodies.
//!
//! Every failure surfaces as `{code, message, detail?}`. Budget denials map
//! to 403 with code `budget` so clients can tell them apart from auth
//! failures; stale fences map to 409 with the current fence token in
//! `detail`; replay gaps map to 410.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::domain::error::OrchestratorError;
use crate::services::event_bus::GapTooLarge;

/// Error type returned by every handler.
#[derive(Debug)]
pub enum ApiError {
    Domain(OrchestratorError),
    BadRequest(String),
    Unauthorized,
    Gone(GapTooLarge),
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self::Domain(err)
    }
}

impl From<GapTooLarge> for ApiError {
    fn from(err: GapTooLarge) -> Self {
        Self::Gone(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, detail) = match self {
            Self::Domain(err) => {
                let status = match &err {
                    OrchestratorError::AgentNotFound(_) | OrchestratorError::ProjectNotFound(_) => {
                        StatusCode::NOT_FOUND
                    }
                    OrchestratorError::FenceConflict { .. } | OrchestratorError::Conflict(_) => {
                        StatusCode::CONFLICT
                    }
                    OrchestratorError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
                    OrchestratorError::BudgetDenied(_) => StatusCode::FORBIDDEN,
                    OrchestratorError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    OrchestratorError::External(_) => StatusCode::BAD_GATEWAY,
                    OrchestratorError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
                    OrchestratorError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let detail = match &err {
                    OrchestratorError::FenceConflict { current_fence, .. } => {
                        Some(json!({ "current_fence": current_fence }))
                    }
                    _ => None,
                };
                (status, err.code(), err.to_string(), detail)
            }
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, "bad_request", message, None),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing or invalid API key".to_string(),
                None,
            ),
            Self::Gone(gap) => (
                StatusCode::GONE,
                "gap-too-large",
                gap.to_string(),
                Some(json!({ "oldest": gap.oldest, "latest": gap.latest })),
            ),
        };

        let mut body = json!({ "code": code, "message": message });
        if let Some(detail) = detail {
            body["detail"] = detail;
        }
        (status, Json(body)).into_response()
    }
}
