//! The agent's `/mcp` endpoint.
//!
//! A thin JSON-RPC host answering `tools/list` and `tools/call` for the
//! tools the agent declared. Incoming trace headers are continued, the
//! provider-side span is reported to the registry, and handler errors map
//! to JSON-RPC error objects rather than HTTP failures.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tracing::{debug, warn};

use mesh_core::error::{MeshError, Result};
use mesh_core::rpc::{JsonRpcRequest, JsonRpcResponse};
use mesh_core::trace::{SpanRecorder, TraceContext, HEADER_PARENT_SPAN, HEADER_TRACE_ID};

use crate::runtime::{AgentRuntime, CallContext};

/// User-supplied implementation of one declared tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value, ctx: &CallContext) -> Result<Value>;
}

/// Blanket impl so plain async closures wrapped in a function pointer
/// shape can serve as handlers.
#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Value, CallContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value>> + Send,
{
    async fn call(&self, arguments: Value, ctx: &CallContext) -> Result<Value> {
        (self)(arguments, ctx.clone()).await
    }
}

/// The `/mcp` host: declared tools bound to their handlers.
#[derive(Clone)]
pub struct McpServer {
    runtime: Arc<AgentRuntime>,
    handlers: Arc<HashMap<String, Arc<dyn ToolHandler>>>,
}

impl McpServer {
    pub fn new(runtime: Arc<AgentRuntime>, handlers: HashMap<String, Arc<dyn ToolHandler>>) -> Self {
        Self {
            runtime,
            handlers: Arc::new(handlers),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/mcp", post(handle_mcp))
            .with_state(self.clone())
    }

    /// Run the whole agent: register, heartbeat in the background, and
    /// serve `/mcp` until the process is interrupted.
    pub async fn serve(self, addr: std::net::SocketAddr) -> Result<()> {
        self.runtime.register().await?;
        let cancel = tokio_util::sync::CancellationToken::new();
        let heartbeats = tokio::spawn(
            self.runtime.clone().run_heartbeats(cancel.clone()),
        );

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(
            addr = %addr,
            agent = %self.runtime.declaration().name,
            "agent /mcp endpoint listening"
        );
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;

        cancel.cancel();
        let _ = heartbeats.await;
        Ok(())
    }

    fn tools_list(&self) -> Value {
        let tools: Vec<Value> = self
            .runtime
            .declaration()
            .tools
            .iter()
            .map(|tool| {
                serde_json::json!({
                    "name": tool.spec.function_name,
                    "description": tool.spec.description,
                    "inputSchema": tool.spec.schema.clone().unwrap_or(serde_json::json!({"type": "object"})),
                })
            })
            .collect();
        serde_json::json!({ "tools": tools })
    }

    async fn tools_call(&self, id: Option<Value>, params: Option<Value>, trace: TraceContext) -> JsonRpcResponse {
        let Some(params) = params else {
            return JsonRpcResponse::invalid_params(id, "missing params");
        };
        let Some(name) = params.get("name").and_then(|v| v.as_str()).map(String::from) else {
            return JsonRpcResponse::invalid_params(id, "params.name is required");
        };
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or(Value::Object(Default::default()));

        let Some(handler) = self.handlers.get(&name) else {
            return JsonRpcResponse::method_not_found(id, &name);
        };

        let ctx = CallContext {
            trace: trace.clone(),
            dependencies: self.runtime.table().for_function(&name),
        };

        let recorder = SpanRecorder::start(trace, self.runtime.declaration().name.clone(), name.clone());
        let outcome = handler.call(arguments, &ctx).await;
        let span = recorder.finish(
            outcome.is_ok(),
            outcome.as_ref().err().map(|e| e.to_string()),
        );
        let registry = self.runtime.registry().clone();
        tokio::spawn(async move { registry.report_spans(vec![span]).await });

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(MeshError::Unavailable(capability)) => {
                JsonRpcResponse::dependency_unavailable(id, &capability)
            }
            Err(err) => {
                warn!(tool = %name, error = %err, "tool handler failed");
                JsonRpcResponse::error(id, mesh_core::rpc::INTERNAL_ERROR, err.to_string())
            }
        }
    }
}

async fn handle_mcp(
    State(server): State<McpServer>,
    headers: HeaderMap,
    Json(request): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    let trace = TraceContext::from_headers(
        headers.get(HEADER_TRACE_ID).and_then(|v| v.to_str().ok()),
        headers.get(HEADER_PARENT_SPAN).and_then(|v| v.to_str().ok()),
    );
    debug!(method = %request.method, trace_id = %trace.trace_id, "mcp request");

    let response = match request.method.as_str() {
        "tools/list" => JsonRpcResponse::success(request.id, server.tools_list()),
        "tools/call" => server.tools_call(request.id, request.params, trace).await,
        other => JsonRpcResponse::method_not_found(request.id, other),
    };
    Json(response)
}
