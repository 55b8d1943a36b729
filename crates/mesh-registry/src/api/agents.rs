//! `GET /agents`, `GET /agents/{id}`, `DELETE /agents/{id}`.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use mesh_core::id::AgentId;
use mesh_core::wire::{AgentsResponse, AgentSummary};

use super::error::ApiResult;
use super::ApiContext;

pub fn agent_routes(context: ApiContext) -> Router {
    Router::new()
        .route("/agents", get(list_agents))
        .route("/agents/{id}", get(get_agent).delete(deregister))
        .with_state(context)
}

async fn list_agents(State(ctx): State<ApiContext>) -> Json<AgentsResponse> {
    Json(ctx.service.list_agents())
}

async fn get_agent(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<AgentSummary>> {
    let summary = ctx.service.get_agent(&AgentId::from(id))?;
    Ok(Json(summary))
}

async fn deregister(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.service.deregister(&AgentId::from(id)).await?;
    Ok(Json(serde_json::json!({"deregistered": true})))
}
