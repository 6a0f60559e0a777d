//! HTTP error mapping. Grounded on the teacher pack's axum adapter error
//! module: one `HttpError` enum with a status code per variant and a JSON
//! body, plus `From` conversions from the crates' own error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use interview_registry::RegistryError;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("session already has an attached socket")]
    Conflict,
    #[error("session not found")]
    NotFound,
}

impl From<RegistryError> for HttpError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyConnected => HttpError::Conflict,
            RegistryError::NotFound => HttpError::NotFound,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match self {
            HttpError::Conflict => StatusCode::CONFLICT,
            HttpError::NotFound => StatusCode::NOT_FOUND,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}
