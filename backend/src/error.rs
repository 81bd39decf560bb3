use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::negotiation::NegotiationError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    /// State conflicts: already responded, expired.
    #[error("{0}")]
    Conflict(String),
    /// Also covers "exists but not visible to the caller".
    #[error("{0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("database connection failed: {0}")]
    Connection(#[from] diesel::result::ConnectionError),
    #[error("{0}")]
    Internal(String),
}

impl From<NegotiationError> for ApiError {
    fn from(err: NegotiationError) -> Self {
        match err {
            NegotiationError::NotRecipient => ApiError::Forbidden(err.to_string()),
            NegotiationError::AlreadyResponded(_) | NegotiationError::Expired => {
                ApiError::Conflict(err.to_string())
            }
            NegotiationError::InvalidPrice(_) => ApiError::Validation(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Database(diesel::result::Error::NotFound) => {
                (StatusCode::NOT_FOUND, "not found".to_string())
            }
            ApiError::Database(e) => {
                error!("database error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
            ApiError::Connection(e) => {
                error!("database connection failed: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
            ApiError::Internal(msg) => {
                error!("internal error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_errors_map_to_http_classes() {
        assert!(matches!(
            ApiError::from(NegotiationError::NotRecipient),
            ApiError::Forbidden(_)
        ));
        assert!(matches!(
            ApiError::from(NegotiationError::AlreadyResponded("accepted")),
            ApiError::Conflict(_)
        ));
        assert!(matches!(
            ApiError::from(NegotiationError::Expired),
            ApiError::Conflict(_)
        ));
        assert!(matches!(
            ApiError::from(NegotiationError::InvalidPrice("bad".into())),
            ApiError::Validation(_)
        ));
    }

    #[test]
    fn missing_rows_surface_as_not_found() {
        let response = ApiError::Database(diesel::result::Error::NotFound).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
