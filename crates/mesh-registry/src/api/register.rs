//! `POST /register` and `POST /heartbeat`.

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use mesh_core::error::MeshError;
use mesh_core::wire::{RegisterRequest, RegisterResponse};

use super::error::ApiResult;
use super::ApiContext;

pub fn register_routes(context: ApiContext) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/heartbeat", post(heartbeat))
        .with_state(context)
}

/// Decode the body by hand so malformed JSON maps to 400, not axum's
/// default rejection.
fn decode(body: &Bytes) -> Result<RegisterRequest, MeshError> {
    serde_json::from_slice(body)
        .map_err(|e| MeshError::validation(format!("malformed registration document: {}", e)))
}

async fn register(
    State(ctx): State<ApiContext>,
    body: Bytes,
) -> ApiResult<Json<RegisterResponse>> {
    let request = decode(&body)?;
    let response = ctx.service.register(request).await?;
    Ok(Json(response))
}

async fn heartbeat(
    State(ctx): State<ApiContext>,
    body: Bytes,
) -> ApiResult<Json<RegisterResponse>> {
    let request = decode(&body)?;
    let response = ctx.service.heartbeat(request).await?;
    Ok(Json(response))
}
