use crate::models::chat::ErrorBody;
use axum::{ http::StatusCode, response::{ IntoResponse, Response }, Json };
use thiserror::Error;

/// Errors surfaced to HTTP callers. 5xx variants carry a fixed message so no
/// internal detail leaks into the body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")] BadRequest(String),
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Failed to process chat request")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorBody { error: self.to_string() })).into_response()
    }
}
