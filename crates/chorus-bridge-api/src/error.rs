//! API error handling

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use chorus_bridge_types::BridgeError;

/// Error payload returned to callers
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

/// HTTP-facing error: pipeline errors map 1:1 to statuses
#[derive(Debug)]
pub enum ApiError {
    Bridge(BridgeError),
    NotFound(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Bridge(error) => match error {
                BridgeError::InvalidEnvelope(_) => StatusCode::BAD_REQUEST,
                BridgeError::UnknownInstance(_) | BridgeError::SignatureInvalid => {
                    StatusCode::FORBIDDEN
                }
                BridgeError::DuplicateEnvelope(_) | BridgeError::DuplicateIdempotencyKey(_) => {
                    StatusCode::CONFLICT
                }
                BridgeError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                BridgeError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                BridgeError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                BridgeError::Transport(_)
                | BridgeError::Fatal(_)
                | BridgeError::Store(_)
                | BridgeError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Bridge(error) => error.error_code(),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::NotFound(message) => message.clone(),
            Self::Bridge(error) => error.to_string(),
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(error: BridgeError) -> Self {
        Self::Bridge(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.message(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(BridgeError::InvalidEnvelope("x".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(BridgeError::SignatureInvalid).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(BridgeError::DuplicateEnvelope("fp".into())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(BridgeError::Unauthorized("no".into())).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(BridgeError::RateLimited).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::from(BridgeError::BackendUnavailable("cb".into())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::NotFound("absent".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }
}
