//! Tool invocation: discovery, dispatch and trace propagation.
//!
//! The caller discovers the provider's endpoint from the registry (unless
//! given one explicitly), POSTs the JSON-RPC `tools/call`, accepts plain
//! JSON or SSE responses, reports its span to the registry, and prints
//! the result. Three dispatch modes share the same semantics: direct to
//! the agent, through the registry's `/proxy`, or through an ingress
//! router selected by `Host` header.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use mesh_core::error::{MeshError, Result};
use mesh_core::id::TraceId;
use mesh_core::rpc::{self, JsonRpcRequest, JsonRpcResponse};
use mesh_core::trace::{SpanRecorder, TraceContext};
use mesh_core::wire::{AgentsResponse, AgentSummary, TraceResponse};

/// Deadline for CLI tool calls.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for registry lookups.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// How the request reaches the provider.
#[derive(Debug, Clone)]
pub enum DispatchMode {
    /// POST straight to the provider's endpoint.
    Direct,
    /// POST to `<registry>/proxy/<host:port>/mcp`.
    Proxy,
    /// POST to one ingress URL, routing by `Host: <agent>.<domain>`.
    Ingress { domain: String, url: String },
}

/// A parsed `[agent:]tool` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolTarget {
    pub agent: Option<String>,
    pub tool: String,
}

impl ToolTarget {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MeshError::validation("tool name must not be empty"));
        }
        match raw.split_once(':') {
            Some((agent, tool)) if !agent.is_empty() && !tool.is_empty() => Ok(Self {
                agent: Some(agent.to_string()),
                tool: tool.to_string(),
            }),
            Some(_) => Err(MeshError::validation(format!(
                "invalid target {:?}; expected [agent:]tool",
                raw
            ))),
            None => Ok(Self {
                agent: None,
                tool: raw.to_string(),
            }),
        }
    }
}

/// The provider chosen by discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredTool {
    pub agent_name: String,
    pub endpoint: String,
    pub function_name: String,
}

/// Pick the provider for a target from the agent listing.
///
/// A capability or function name matches exactly first; prefix matches
/// are accepted only when unambiguous, and an ambiguous name fails with
/// the candidate list rather than guessing.
pub fn select_tool(listing: &AgentsResponse, target: &ToolTarget) -> Result<DiscoveredTool> {
    let mut exact: Vec<DiscoveredTool> = Vec::new();
    let mut prefix: Vec<DiscoveredTool> = Vec::new();

    for agent in &listing.agents {
        if let Some(wanted) = &target.agent {
            if &agent.name != wanted {
                continue;
            }
        }
        if agent.status == mesh_core::types::AgentStatus::Expired {
            continue;
        }
        for capability in &agent.capabilities {
            let candidate = DiscoveredTool {
                agent_name: agent.name.clone(),
                endpoint: agent.endpoint.clone(),
                function_name: capability.function_name.clone(),
            };
            if capability.function_name == target.tool || capability.capability == target.tool {
                exact.push(candidate);
            } else if capability.function_name.starts_with(&target.tool)
                || capability.capability.starts_with(&target.tool)
            {
                prefix.push(candidate);
            }
        }
    }

    let pool = if exact.is_empty() { prefix } else { exact };
    match pool.len() {
        0 => Err(MeshError::not_found("tool", &target.tool)),
        1 => Ok(pool.into_iter().next().expect("length checked")),
        _ => {
            let mut candidates: Vec<String> = pool
                .iter()
                .map(|c| format!("{}:{}", c.agent_name, c.function_name))
                .collect();
            candidates.sort();
            candidates.dedup();
            Err(MeshError::validation(format!(
                "ambiguous tool {:?}; candidates: {}",
                target.tool,
                candidates.join(", ")
            )))
        }
    }
}

/// Outcome of one CLI call.
#[derive(Debug)]
pub struct CallOutcome {
    pub result: JsonRpcResponse,
    pub trace_id: TraceId,
    pub agent_name: String,
}

/// The caller: a thin registry + agent HTTP client.
pub struct Caller {
    registry_url: String,
    http: reqwest::Client,
    lookup: reqwest::Client,
}

impl Caller {
    pub fn new(registry_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .expect("default reqwest client");
        let lookup = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .expect("default reqwest client");
        Self {
            registry_url: registry_url.into().trim_end_matches('/').to_string(),
            http,
            lookup,
        }
    }

    fn map_err(err: reqwest::Error) -> MeshError {
        if err.is_timeout() {
            MeshError::timeout(err.to_string())
        } else {
            MeshError::transport(err.to_string())
        }
    }

    /// `GET /agents`, optionally through the ingress router.
    pub async fn list_agents(&self, mode: &DispatchMode) -> Result<AgentsResponse> {
        let request = match mode {
            DispatchMode::Ingress { domain, url } => self
                .lookup
                .get(format!("{}/agents", url.trim_end_matches('/')))
                .header("Host", format!("registry.{}", domain)),
            _ => self.lookup.get(format!("{}/agents", self.registry_url)),
        };
        let response = request.send().await.map_err(Self::map_err)?;
        if !response.status().is_success() {
            return Err(MeshError::internal(format!(
                "registry returned {}",
                response.status()
            )));
        }
        response
            .json::<AgentsResponse>()
            .await
            .map_err(|e| MeshError::validation(format!("invalid agent listing: {}", e)))
    }

    /// `GET /agents/{id}`.
    pub async fn get_agent(&self, id: &str) -> Result<AgentSummary> {
        let response = self
            .lookup
            .get(format!("{}/agents/{}", self.registry_url, id))
            .send()
            .await
            .map_err(Self::map_err)?;
        match response.status().as_u16() {
            200 => response
                .json::<AgentSummary>()
                .await
                .map_err(|e| MeshError::validation(format!("invalid agent: {}", e))),
            404 => Err(MeshError::not_found("agent", id)),
            other => Err(MeshError::internal(format!("registry returned {}", other))),
        }
    }

    /// `GET /health` on the registry.
    pub async fn registry_health(&self) -> Result<Value> {
        let response = self
            .lookup
            .get(format!("{}/health", self.registry_url))
            .send()
            .await
            .map_err(Self::map_err)?;
        response
            .json::<Value>()
            .await
            .map_err(|e| MeshError::validation(format!("invalid health body: {}", e)))
    }

    /// `GET /trace/{id}`.
    pub async fn get_trace(&self, trace_id: &str, show_internal: bool) -> Result<TraceResponse> {
        let response = self
            .lookup
            .get(format!("{}/trace/{}", self.registry_url, trace_id))
            .query(&[("show_internal", show_internal)])
            .send()
            .await
            .map_err(Self::map_err)?;
        match response.status().as_u16() {
            200 => response
                .json::<TraceResponse>()
                .await
                .map_err(|e| MeshError::validation(format!("invalid trace body: {}", e))),
            404 => Err(MeshError::not_found("trace", trace_id)),
            other => Err(MeshError::internal(format!("registry returned {}", other))),
        }
    }

    /// `DELETE /agents/{id}`.
    pub async fn deregister(&self, id: &str) -> Result<()> {
        let response = self
            .lookup
            .delete(format!("{}/agents/{}", self.registry_url, id))
            .send()
            .await
            .map_err(Self::map_err)?;
        match response.status().as_u16() {
            200 => Ok(()),
            404 => Err(MeshError::not_found("agent", id)),
            other => Err(MeshError::internal(format!("registry returned {}", other))),
        }
    }

    /// Invoke a tool end to end: discover, dispatch, report the span.
    pub async fn call(
        &self,
        target: &ToolTarget,
        arguments: Value,
        mode: &DispatchMode,
        agent_url: Option<&str>,
    ) -> Result<CallOutcome> {
        let (endpoint, function_name, agent_name) = match agent_url {
            Some(url) => (url.to_string(), target.tool.clone(), target
                .agent
                .clone()
                .unwrap_or_else(|| "unknown".to_string())),
            None => {
                let listing = self.list_agents(mode).await?;
                let discovered = select_tool(&listing, target)?;
                (discovered.endpoint, discovered.function_name, discovered.agent_name)
            }
        };

        let trace = TraceContext::new_root();
        let recorder = SpanRecorder::start(trace.clone(), "meshctl", "cli_call")
            .capability(target.tool.clone())
            .target_agent(agent_name.clone());

        let url = self.dispatch_url(&endpoint, mode)?;
        debug!(url = %url, function = %function_name, "dispatching tool call");
        let request = JsonRpcRequest::tools_call(1, &function_name, arguments);
        let outcome = self.post_rpc(&url, &agent_name, &request, &trace, mode).await;

        let span = recorder.finish(
            outcome.as_ref().map(|r| r.is_success()).unwrap_or(false),
            outcome.as_ref().err().map(|e| e.to_string()),
        );
        self.report_span(span).await;

        Ok(CallOutcome {
            result: outcome?,
            trace_id: trace.trace_id,
            agent_name,
        })
    }

    fn dispatch_url(&self, endpoint: &str, mode: &DispatchMode) -> Result<String> {
        match mode {
            DispatchMode::Direct => Ok(format!("{}/mcp", endpoint.trim_end_matches('/'))),
            DispatchMode::Proxy => {
                let authority = endpoint
                    .split("://")
                    .nth(1)
                    .and_then(|rest| rest.split('/').next())
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| {
                        MeshError::validation(format!("cannot proxy endpoint {:?}", endpoint))
                    })?;
                let target = if authority.contains(':') {
                    authority.to_string()
                } else {
                    format!("{}:80", authority)
                };
                Ok(format!("{}/proxy/{}/mcp", self.registry_url, target))
            }
            DispatchMode::Ingress { url, .. } => Ok(format!("{}/mcp", url.trim_end_matches('/'))),
        }
    }

    async fn post_rpc(
        &self,
        url: &str,
        agent_name: &str,
        request: &JsonRpcRequest,
        trace: &TraceContext,
        mode: &DispatchMode,
    ) -> Result<JsonRpcResponse> {
        let mut builder = self
            .http
            .post(url)
            .json(request)
            .header("Accept", "application/json, text/event-stream");
        if let DispatchMode::Ingress { domain, .. } = mode {
            builder = builder.header("Host", format!("{}.{}", agent_name, domain));
        }
        for (name, value) in trace.outbound_headers() {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(Self::map_err)?;
        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_string();
        let body = response.text().await.map_err(Self::map_err)?;

        if !status.is_success() {
            return Err(MeshError::internal(format!(
                "agent returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }
        rpc::decode_response(&content_type, &body)
    }

    /// Fire-and-forget span report.
    async fn report_span(&self, span: mesh_core::trace::Span) {
        let url = format!("{}/trace", self.registry_url);
        if let Err(err) = self.lookup.post(&url).json(&vec![span]).send().await {
            debug!(error = %err, "span report failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mesh_core::id::AgentId;
    use mesh_core::types::{AgentStatus, AgentType, Capability};

    fn capability(function: &str, name: &str) -> Capability {
        Capability {
            function_name: function.to_string(),
            capability: name.to_string(),
            version: "1.0.0".to_string(),
            tags: vec![],
            dependencies: vec![],
            description: None,
            schema: None,
            agent_type_hint: None,
        }
    }

    fn agent(name: &str, caps: Vec<Capability>) -> AgentSummary {
        AgentSummary {
            id: AgentId::from(format!("{}-00000000", name).as_str()),
            name: name.to_string(),
            version: "1.0.0".to_string(),
            endpoint: format!("http://{}:8080", name),
            namespace: "default".to_string(),
            agent_type: AgentType::Tool,
            status: AgentStatus::Healthy,
            last_heartbeat: Utc::now(),
            dependencies_total: 0,
            dependencies_resolved: 0,
            capabilities: caps,
        }
    }

    fn listing(agents: Vec<AgentSummary>) -> AgentsResponse {
        let count = agents.len();
        AgentsResponse { agents, count }
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!(
            ToolTarget::parse("hello:say_hello").unwrap(),
            ToolTarget { agent: Some("hello".to_string()), tool: "say_hello".to_string() }
        );
        assert_eq!(
            ToolTarget::parse("say_hello").unwrap(),
            ToolTarget { agent: None, tool: "say_hello".to_string() }
        );
        assert!(ToolTarget::parse("").is_err());
        assert!(ToolTarget::parse(":tool").is_err());
        assert!(ToolTarget::parse("agent:").is_err());
    }

    #[test]
    fn test_exact_match_wins_over_prefix() {
        let listing = listing(vec![
            agent("a", vec![capability("say", "say")]),
            agent("b", vec![capability("say_hello", "greeting")]),
        ]);
        let chosen = select_tool(&listing, &ToolTarget::parse("say").unwrap()).unwrap();
        assert_eq!(chosen.agent_name, "a");
    }

    #[test]
    fn test_prefix_match_when_unambiguous() {
        let listing = listing(vec![agent("b", vec![capability("say_hello", "greeting")])]);
        let chosen = select_tool(&listing, &ToolTarget::parse("say").unwrap()).unwrap();
        assert_eq!(chosen.function_name, "say_hello");
    }

    #[test]
    fn test_ambiguous_match_lists_candidates() {
        let listing = listing(vec![
            agent("a", vec![capability("info_disk", "info")]),
            agent("b", vec![capability("info_mem", "info")]),
        ]);
        let err = select_tool(&listing, &ToolTarget::parse("info").unwrap()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("a:info_disk"));
        assert!(message.contains("b:info_mem"));
    }

    #[test]
    fn test_agent_qualified_target_disambiguates() {
        let listing = listing(vec![
            agent("a", vec![capability("info_disk", "info")]),
            agent("b", vec![capability("info_mem", "info")]),
        ]);
        let chosen = select_tool(&listing, &ToolTarget::parse("b:info").unwrap()).unwrap();
        assert_eq!(chosen.function_name, "info_mem");
    }

    #[test]
    fn test_unknown_tool_is_not_found() {
        let err = select_tool(&listing(vec![]), &ToolTarget::parse("nope").unwrap()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_expired_agents_skipped() {
        let mut expired = agent("a", vec![capability("f", "svc")]);
        expired.status = AgentStatus::Expired;
        let err = select_tool(&listing(vec![expired]), &ToolTarget::parse("f").unwrap()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_proxy_dispatch_url() {
        let caller = Caller::new("http://registry:8000");
        let url = caller
            .dispatch_url("http://agent-host:9090/", &DispatchMode::Proxy)
            .unwrap();
        assert_eq!(url, "http://registry:8000/proxy/agent-host:9090/mcp");

        let direct = caller
            .dispatch_url("http://agent-host:9090", &DispatchMode::Direct)
            .unwrap();
        assert_eq!(direct, "http://agent-host:9090/mcp");
    }
}
