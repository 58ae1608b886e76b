use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use shelfsync_core::idempotency::StoredResponse;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Request in progress: {0}")]
    InProgress(String),
    #[error("Too many requests: {0}")]
    TooManyRequests(String, u64),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("External dependency error: {0}")]
    External(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn too_many_requests(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::TooManyRequests(message.into(), retry_after_secs)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::InProgress(_) => StatusCode::CONFLICT,
            Self::TooManyRequests(_, _) => StatusCode::TOO_MANY_REQUESTS,
            Self::External(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Shape stored for idempotent replay
    pub fn into_stored(self) -> StoredResponse {
        StoredResponse::new(self.status().as_u16(), json!({ "error": self.to_string() }))
    }
}

impl From<shelfsync_core::Error> for AppError {
    fn from(error: shelfsync_core::Error) -> Self {
        use shelfsync_core::platforms::PlatformError;
        use shelfsync_core::Error;

        match error {
            Error::NotFound(message) => Self::NotFound(message),
            Error::InvalidInput(message) => Self::BadRequest(message),
            Error::Conflict(message) => Self::Conflict(message),
            Error::InProgress(message) => Self::InProgress(message),
            Error::Platform(PlatformError::Config(message)) => Self::Config(message),
            Error::Platform(error) => Self::External(error.to_string()),
            other => {
                tracing::error!(error = %other, "Unhandled core error");
                Self::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = match &self {
            Self::TooManyRequests(_, secs) => Some(*secs),
            _ => None,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use shelfsync_core::platforms::PlatformError;

    #[test]
    fn core_errors_map_to_status_codes() {
        let cases = [
            (shelfsync_core::Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (shelfsync_core::Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (shelfsync_core::Error::Conflict("x".into()), StatusCode::CONFLICT),
            (shelfsync_core::Error::InProgress("x".into()), StatusCode::CONFLICT),
            (
                shelfsync_core::Error::Platform(PlatformError::Timeout),
                StatusCode::BAD_GATEWAY,
            ),
            (
                shelfsync_core::Error::Platform(PlatformError::Config("no token".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                shelfsync_core::Error::Database("disk full".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(AppError::from(error).status(), status);
        }
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let response = AppError::too_many_requests("slow down", 12).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "12");
    }

    #[test]
    fn stored_error_keeps_status_and_message() {
        let stored = AppError::NotFound("inventory item 42".into()).into_stored();
        assert_eq!(stored.status_code, 404);
        assert_eq!(stored.body, json!({ "error": "Not found: inventory item 42" }));
        assert!(stored.is_failure());
    }
}
