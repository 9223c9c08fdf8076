use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use farmlink_shared::UserId;
use farmlink_store::StoreError;
use thiserror::Error;

use crate::relay::RelayError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("Too many requests")]
    RateLimited,

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<RelayError> for ServerError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::NotFound(id) => ServerError::UserNotFound(id),
            RelayError::InvalidMessage(reason) => ServerError::BadRequest(reason.to_string()),
            RelayError::Persistence(e) => ServerError::Storage(e),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::UserNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            ServerError::Storage(e) => {
                tracing::error!(error = %e, "Storage failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
