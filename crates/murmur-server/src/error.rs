use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use murmur_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not authenticated")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payload too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(e: tokio::task::JoinError) -> Self {
        ServerError::Internal(format!("Blocking task failed: {e}"))
    }
}

impl From<bcrypt::BcryptError> for ServerError {
    fn from(e: bcrypt::BcryptError) -> Self {
        ServerError::Internal(format!("Password hashing failed: {e}"))
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::TooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            ServerError::Store(StoreError::NotFound) => {
                (StatusCode::NOT_FOUND, "Record not found".to_string())
            }
            ServerError::Store(StoreError::UsernameTaken(_)) => {
                (StatusCode::CONFLICT, "Username already taken".to_string())
            }
            ServerError::Store(e) => {
                tracing::error!(error = %e, "store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            ServerError::Internal(e) => {
                tracing::error!(error = %e, "internal failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Why a live connection was refused at admission. Every variant closes the
/// socket with the policy-violation code before anything is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionDenied {
    #[error("missing session token")]
    MissingToken,

    #[error("unknown session token")]
    UnknownToken,

    #[error("session belongs to another user")]
    UserMismatch,

    #[error("unknown user")]
    UnknownUser,

    #[error("user is banned")]
    Banned,
}

/// A send or close on one connection failed. Scoped to that connection.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,

    #[error("outbound queue full")]
    Backlogged,

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServerError::Unauthorized, StatusCode::UNAUTHORIZED),
            (ServerError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (
                ServerError::Store(StoreError::UsernameTaken("a".into())),
                StatusCode::CONFLICT,
            ),
            (ServerError::Store(StoreError::NotFound), StatusCode::NOT_FOUND),
            (
                ServerError::TooLarge { size: 2, max: 1 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
