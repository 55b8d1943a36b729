//! `POST /trace` (span reports) and `GET /trace/{id}` (assembled trees).

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use mesh_core::error::MeshError;
use mesh_core::wire::{SpanReport, TraceResponse};

use super::error::ApiResult;
use super::ApiContext;

pub fn trace_routes(context: ApiContext) -> Router {
    Router::new()
        .route("/trace", post(report_spans))
        .route("/trace/{id}", get(get_trace))
        .with_state(context)
}

#[derive(Debug, Default, Deserialize)]
struct TraceQuery {
    /// Keep wrapper spans instead of collapsing them.
    #[serde(default)]
    show_internal: bool,
}

async fn report_spans(State(ctx): State<ApiContext>, body: Bytes) -> ApiResult<StatusCode> {
    let report: SpanReport = serde_json::from_slice(&body)
        .map_err(|e| MeshError::validation(format!("malformed span report: {}", e)))?;
    ctx.service.report_spans(report.into_spans());
    Ok(StatusCode::ACCEPTED)
}

async fn get_trace(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
    Query(query): Query<TraceQuery>,
) -> ApiResult<Json<TraceResponse>> {
    let trace = ctx.service.get_trace(&id, query.show_internal)?;
    Ok(Json(trace))
}
