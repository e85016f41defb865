//! Translation of the error taxonomy and outcome vocabulary into HTTP
//! responses. Raw engine status codes never appear here; only named results
//! do.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use dockyard_common::{DockyardError, LifecycleOutcome};

pub struct ApiError(pub DockyardError);

impl From<DockyardError> for ApiError {
    fn from(err: DockyardError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            DockyardError::AccessDenied => (StatusCode::FORBIDDEN, "access_denied"),
            DockyardError::Validation { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
            DockyardError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            DockyardError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            DockyardError::EngineTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "engine_timeout"),
            DockyardError::Engine(_) => (StatusCode::BAD_GATEWAY, "engine"),
            DockyardError::Consistency(_) => (StatusCode::INTERNAL_SERVER_ERROR, "consistency"),
            DockyardError::Store(_) | DockyardError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        let body = Json(json!({
            "error": kind,
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// A lifecycle outcome as an HTTP response: the outcome name always rides in
/// the body, and the status code reflects whether the request took effect.
pub fn outcome_response(outcome: LifecycleOutcome) -> Response {
    let status = match outcome {
        o if o.is_success() => StatusCode::OK,
        LifecycleOutcome::StopBeforeRemoving => StatusCode::CONFLICT,
        LifecycleOutcome::NotFound => StatusCode::NOT_FOUND,
        LifecycleOutcome::BadParameter => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, Json(json!({ "outcome": outcome }))).into_response()
}
