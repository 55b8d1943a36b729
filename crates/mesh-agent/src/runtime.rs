//! The agent-side runtime: heartbeat loop and resolved dependency handles.
//!
//! After every heartbeat the registry returns the agent's resolution
//! table together with a `resolution_epoch`. The runtime swaps in a new
//! [`ResolutionTable`] only when the epoch moves, so user-held handles
//! observe updates without rebuilding on every beat.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mesh_core::error::{MeshError, Result};
use mesh_core::id::AgentId;
use mesh_core::rpc::{self, JsonRpcRequest};
use mesh_core::trace::{SpanRecorder, TraceContext};
use mesh_core::types::ResolvedProvider;
use mesh_core::wire::{RegisterRequest, ResolutionEntry};

use crate::client::RegistryClient;
use crate::declaration::AgentDeclaration;

/// Deadline for outbound dependency calls.
const DEPENDENCY_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// A callable handle for one resolved (or unresolved) dependency slot.
#[derive(Debug, Clone)]
pub struct DependencyHandle {
    capability: String,
    provider: Option<ResolvedProvider>,
    agent_name: String,
    http: reqwest::Client,
    registry: RegistryClient,
}

impl DependencyHandle {
    /// The provider chosen for this slot, if any.
    pub fn provider(&self) -> Option<&ResolvedProvider> {
        self.provider.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.provider.is_some()
    }

    /// Invoke the resolved provider's function over `tools/call`.
    ///
    /// Fails with the `DEPENDENCY_UNAVAILABLE` category when the slot is
    /// unresolved. The given trace context is propagated and the caller
    /// side of the hop is reported as a span.
    pub async fn call(&self, arguments: Value, trace: &TraceContext) -> Result<Value> {
        let Some(provider) = &self.provider else {
            return Err(MeshError::unavailable(self.capability.clone()));
        };

        let child = trace.child();
        let recorder = SpanRecorder::start(child.clone(), self.agent_name.clone(), "dependency_call")
            .capability(provider.capability.clone())
            .target_agent(provider.agent_id.to_string());

        let url = format!("{}/mcp", provider.endpoint.trim_end_matches('/'));
        let request = JsonRpcRequest::tools_call(1, &provider.function_name, arguments);
        let result = self.post_rpc(&url, &request, &child).await;

        let span = recorder.finish(
            result.is_ok(),
            result.as_ref().err().map(|e| e.to_string()),
        );
        let registry = self.registry.clone();
        tokio::spawn(async move { registry.report_spans(vec![span]).await });

        result
    }

    async fn post_rpc(
        &self,
        url: &str,
        request: &JsonRpcRequest,
        trace: &TraceContext,
    ) -> Result<Value> {
        let mut builder = self
            .http
            .post(url)
            .json(request)
            .header("Accept", "application/json, text/event-stream");
        for (name, value) in trace.outbound_headers() {
            builder = builder.header(name, value);
        }
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                MeshError::timeout(e.to_string())
            } else {
                MeshError::transport(e.to_string())
            }
        })?;

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| MeshError::transport(e.to_string()))?;

        let message = rpc::decode_response(&content_type, &body)?;
        match message.error {
            Some(err) => Err(MeshError::internal(format!(
                "tool call failed ({}): {}",
                err.code, err.message
            ))),
            None => Ok(message.result.unwrap_or(Value::Null)),
        }
    }
}

/// The typed resolution table handed to user code.
#[derive(Debug, Clone, Default)]
pub struct ResolutionTable {
    epoch: u64,
    /// Keyed by (function_name, parameter_name).
    handles: HashMap<(String, String), DependencyHandle>,
}

impl ResolutionTable {
    /// Handle for one dependency slot of one function.
    pub fn handle(&self, function_name: &str, parameter_name: &str) -> Option<&DependencyHandle> {
        self.handles
            .get(&(function_name.to_string(), parameter_name.to_string()))
    }

    /// All handles belonging to one function, keyed by parameter name.
    pub fn for_function(&self, function_name: &str) -> HashMap<String, DependencyHandle> {
        self.handles
            .iter()
            .filter(|((function, _), _)| function == function_name)
            .map(|((_, parameter), handle)| (parameter.clone(), handle.clone()))
            .collect()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn resolved_count(&self) -> usize {
        self.handles.values().filter(|h| h.is_resolved()).count()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// What a tool handler receives alongside its arguments.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub trace: TraceContext,
    /// This function's dependency handles, keyed by parameter name.
    pub dependencies: HashMap<String, DependencyHandle>,
}

impl CallContext {
    pub fn dependency(&self, parameter_name: &str) -> Result<&DependencyHandle> {
        self.dependencies
            .get(parameter_name)
            .ok_or_else(|| MeshError::unavailable(format!("undeclared dependency {}", parameter_name)))
    }
}

/// Shared runtime state: registration identity plus the current table.
pub struct AgentRuntime {
    declaration: AgentDeclaration,
    registry: RegistryClient,
    http: reqwest::Client,
    agent_id: RwLock<Option<AgentId>>,
    sequence: RwLock<u64>,
    table: RwLock<Arc<ResolutionTable>>,
    heartbeat_interval: Duration,
}

impl AgentRuntime {
    pub fn new(declaration: AgentDeclaration, registry_url: impl Into<String>) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEPENDENCY_CALL_TIMEOUT)
            .build()
            .expect("default reqwest client");
        Arc::new(Self {
            declaration,
            registry: RegistryClient::new(registry_url),
            http,
            agent_id: RwLock::new(None),
            sequence: RwLock::new(0),
            table: RwLock::new(Arc::new(ResolutionTable::default())),
            heartbeat_interval: mesh_core::env::health_check_interval(),
        })
    }

    pub fn declaration(&self) -> &AgentDeclaration {
        &self.declaration
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    pub fn agent_id(&self) -> Option<AgentId> {
        self.agent_id.read().clone()
    }

    /// The latest resolution table snapshot.
    pub fn table(&self) -> Arc<ResolutionTable> {
        self.table.read().clone()
    }

    fn next_request(&self) -> RegisterRequest {
        let mut sequence = self.sequence.write();
        *sequence += 1;
        RegisterRequest {
            agent: self.declaration.agent_info(self.agent_id.read().clone()),
            sequence: *sequence,
            capabilities: self.declaration.capabilities(),
        }
    }

    fn absorb(&self, agent_id: AgentId, epoch: u64, entries: Vec<ResolutionEntry>) {
        *self.agent_id.write() = Some(agent_id);
        let current = self.table.read().epoch();
        if epoch == current && !self.table.read().is_empty() {
            return;
        }
        let mut handles = HashMap::new();
        for entry in entries {
            let capability = entry
                .provider
                .as_ref()
                .map(|p| p.capability.clone())
                .unwrap_or_else(|| entry.parameter_name.clone());
            handles.insert(
                (entry.function_name.clone(), entry.parameter_name.clone()),
                DependencyHandle {
                    capability,
                    provider: entry.provider,
                    agent_name: self.declaration.name.clone(),
                    http: self.http.clone(),
                    registry: self.registry.clone(),
                },
            );
        }
        *self.table.write() = Arc::new(ResolutionTable { epoch, handles });
        debug!(epoch, "resolution table rebuilt");
    }

    /// Register with the registry, installing the first resolution table.
    pub async fn register(&self) -> Result<()> {
        let request = self.next_request();
        let response = self.registry.register(&request).await?;
        info!(agent_id = %response.agent_id, epoch = response.resolution_epoch, "registered with mesh");
        self.absorb(response.agent_id, response.resolution_epoch, response.resolutions);
        Ok(())
    }

    /// One heartbeat; re-registers transparently on a 409.
    pub async fn beat(&self) -> Result<()> {
        let request = self.next_request();
        match self.registry.heartbeat(&request).await {
            Ok(response) => {
                self.absorb(response.agent_id, response.resolution_epoch, response.resolutions);
                Ok(())
            }
            Err(MeshError::Conflict(_)) => {
                warn!("registry lost our id; re-registering");
                *self.agent_id.write() = None;
                self.register().await
            }
            Err(err) => Err(err),
        }
    }

    /// Run the heartbeat loop until cancelled. Jitter of up to ±10% keeps
    /// a restarted fleet from beating in lockstep.
    pub async fn run_heartbeats(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let jitter = {
                let base = self.heartbeat_interval.as_millis() as i64;
                let spread = (base / 10).max(1);
                rand::rng().random_range(-spread..=spread)
            };
            let sleep_for =
                Duration::from_millis((self.heartbeat_interval.as_millis() as i64 + jitter).max(100) as u64);
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("heartbeat loop stopped");
                    return;
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
            if let Err(err) = self.beat().await {
                warn!(error = %err, "heartbeat failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::types::ResolvedProvider;

    fn entry(function: &str, parameter: &str, resolved: bool) -> ResolutionEntry {
        ResolutionEntry {
            function_name: function.to_string(),
            parameter_name: parameter.to_string(),
            provider: resolved.then(|| ResolvedProvider {
                agent_id: AgentId::from("p-1"),
                function_name: "get_date".to_string(),
                endpoint: "http://provider:8080".to_string(),
                capability: "date_service".to_string(),
                version: "1.0.0".to_string(),
            }),
        }
    }

    fn runtime() -> Arc<AgentRuntime> {
        AgentRuntime::new(
            AgentDeclaration::new("hello", "http://localhost:9090"),
            "http://localhost:8000",
        )
    }

    #[test]
    fn test_absorb_builds_table() {
        let runtime = runtime();
        runtime.absorb(
            AgentId::from("a-1"),
            3,
            vec![entry("say_hello", "date_service", true), entry("say_hello", "weather", false)],
        );
        let table = runtime.table();
        assert_eq!(table.epoch(), 3);
        assert_eq!(table.len(), 2);
        assert_eq!(table.resolved_count(), 1);
        assert!(table.handle("say_hello", "date_service").unwrap().is_resolved());
        assert!(!table.handle("say_hello", "weather").unwrap().is_resolved());
    }

    #[test]
    fn test_absorb_skips_same_epoch() {
        let runtime = runtime();
        runtime.absorb(AgentId::from("a-1"), 1, vec![entry("f", "x", true)]);
        // Same epoch, different rows: the table must not be rebuilt.
        runtime.absorb(AgentId::from("a-1"), 1, vec![]);
        assert_eq!(runtime.table().len(), 1);

        runtime.absorb(AgentId::from("a-1"), 2, vec![]);
        assert_eq!(runtime.table().len(), 0);
    }

    #[test]
    fn test_for_function_filters() {
        let runtime = runtime();
        runtime.absorb(
            AgentId::from("a-1"),
            1,
            vec![entry("f1", "a", true), entry("f2", "b", true)],
        );
        let table = runtime.table();
        let deps = table.for_function("f1");
        assert_eq!(deps.len(), 1);
        assert!(deps.contains_key("a"));
    }

    #[tokio::test]
    async fn test_unresolved_handle_fails_unavailable() {
        let runtime = runtime();
        runtime.absorb(AgentId::from("a-1"), 1, vec![entry("f", "dep", false)]);
        let table = runtime.table();
        let handle = table.handle("f", "dep").unwrap();
        let err = handle
            .call(serde_json::json!({}), &TraceContext::new_root())
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::Unavailable(_)));
    }

    #[test]
    fn test_sequence_increments() {
        let runtime = runtime();
        let first = runtime.next_request();
        let second = runtime.next_request();
        assert_eq!(first.sequence + 1, second.sequence);
    }
}
