//! `GET /health`: liveness of the registry itself.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use mesh_core::wire::HealthResponse;

use super::ApiContext;

pub fn health_routes(context: ApiContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(context)
}

async fn health(State(ctx): State<ApiContext>) -> Json<HealthResponse> {
    Json(ctx.service.health())
}
