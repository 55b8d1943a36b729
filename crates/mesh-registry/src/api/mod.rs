//! HTTP surface of the registry.
//!
//! Each route module exports a `*_routes(context)` function returning an
//! axum `Router`; the binary merges them into one application. Handlers
//! stay thin: they decode, call into [`crate::service`], and map errors
//! through [`error::ApiError`].

pub mod agents;
pub mod error;
pub mod health;
pub mod proxy;
pub mod register;
pub mod traces;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::service::RegistryService;

pub use agents::agent_routes;
pub use error::{ApiError, ApiResult};
pub use health::health_routes;
pub use proxy::proxy_routes;
pub use register::register_routes;
pub use traces::trace_routes;

/// Shared state for every handler.
#[derive(Clone)]
pub struct ApiContext {
    pub service: Arc<RegistryService>,
    /// Client for the proxy's outbound leg. No total timeout: the caller's
    /// own deadline bounds the call, and dropping the connection cancels
    /// the outbound request.
    pub proxy_client: reqwest::Client,
}

impl ApiContext {
    pub fn new(service: Arc<RegistryService>) -> Self {
        let proxy_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("default reqwest client");
        Self {
            service,
            proxy_client,
        }
    }
}

/// Assemble the full registry application.
pub fn router(context: ApiContext) -> Router {
    Router::new()
        .merge(register_routes(context.clone()))
        .merge(agent_routes(context.clone()))
        .merge(trace_routes(context.clone()))
        .merge(proxy_routes(context.clone()))
        .merge(health_routes(context))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
