use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::error;

use abode_engine::EngineError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::InvalidTransition { .. } => StatusCode::CONFLICT,
            EngineError::Forbidden { .. } => StatusCode::FORBIDDEN,
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Storage(e) => {
                error!(error = ?e, "storage operation failed");
                return Self::internal("Storage operation failed");
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = ?err, "request failed");
        Self::internal("Internal error")
    }
}

/// Runs blocking database work off the async runtime.
pub async fn blocking<F, T>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::internal("Internal error")
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use abode_types::models::{ActorRole, VisitStatus};

    #[test]
    fn engine_errors_map_to_status_codes() {
        let cases = [
            (EngineError::not_found("visit", "v1"), StatusCode::NOT_FOUND),
            (
                EngineError::InvalidTransition {
                    role: ActorRole::Host,
                    from: VisitStatus::Refused,
                    to: VisitStatus::Confirmed,
                },
                StatusCode::CONFLICT,
            ),
            (EngineError::forbidden("actor", "no"), StatusCode::FORBIDDEN),
            (EngineError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (
                EngineError::DependencyUnavailable("push".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn storage_details_are_not_leaked() {
        let err = ApiError::from(EngineError::Storage(anyhow::anyhow!("disk I/O error at /var/db")));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("/var/db"));
    }

    #[test]
    fn transition_message_names_role() {
        let err = ApiError::from(EngineError::InvalidTransition {
            role: ActorRole::Requester,
            from: VisitStatus::Completed,
            to: VisitStatus::Cancelled,
        });
        assert_eq!(err.message, "requester cannot move a completed visit to cancelled");
    }
}
