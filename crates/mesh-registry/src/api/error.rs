//! Error mapping from [`MeshError`] to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use mesh_core::error::MeshError;
use mesh_core::wire::ErrorBody;

/// Wrapper carrying a [`MeshError`] across the handler boundary.
#[derive(Debug)]
pub struct ApiError(pub MeshError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<MeshError> for ApiError {
    fn from(err: MeshError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let hint = match &self.0 {
            MeshError::Conflict(_) => Some("re-register with POST /register".to_string()),
            MeshError::RateLimited(_) => Some("reduce heartbeat frequency".to_string()),
            _ => None,
        };
        let body = ErrorBody {
            error: self.0.to_string(),
            hint,
        };
        (status, Json(body)).into_response()
    }
}
