use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::relay::RelayError;
use crate::threads::ThreadError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Failed to get response from AI: {0}")]
    UpstreamUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, msg) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::UpstreamUnavailable(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            ApiError::Internal(detail) => {
                error!(error = %detail, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };
        let body = Json(serde_json::json!({ "error": msg }));
        (code, body).into_response()
    }
}

impl From<ThreadError> for ApiError {
    fn from(e: ThreadError) -> Self {
        match e {
            ThreadError::NotFound(_) => ApiError::NotFound(e.to_string()),
            ThreadError::EmptySelection | ThreadError::EmptyTitle => {
                ApiError::BadRequest(e.to_string())
            }
            ThreadError::Unauthorized => ApiError::Unauthorized,
            ThreadError::Storage(_) | ThreadError::Transport(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::Config(detail) => ApiError::Internal(detail),
            other => ApiError::UpstreamUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        let cases = [
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
            (ApiError::NotFound("Thread not found".into()), StatusCode::NOT_FOUND),
            (ApiError::BadRequest("nope".into()), StatusCode::BAD_REQUEST),
            (ApiError::UpstreamUnavailable("503".into()), StatusCode::BAD_GATEWAY),
            (ApiError::Internal("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[test]
    fn thread_errors_map_to_api_errors() {
        assert_eq!(
            ApiError::from(ThreadError::NotFound("Thread")).to_string(),
            "Thread not found"
        );
        assert!(matches!(
            ApiError::from(ThreadError::EmptyTitle),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            ApiError::from(ThreadError::Storage(rusqlite::Error::InvalidQuery)),
            ApiError::Internal(_)
        ));
    }

    #[test]
    fn relay_config_errors_are_internal() {
        assert!(matches!(
            ApiError::from(RelayError::Config("no key".into())),
            ApiError::Internal(_)
        ));
        assert!(matches!(
            ApiError::from(RelayError::UpstreamUnavailable("503".into())),
            ApiError::UpstreamUnavailable(_)
        ));
    }
}
