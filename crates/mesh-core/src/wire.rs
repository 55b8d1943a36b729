//! Request/response envelopes for the registry HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::AgentId;
use crate::trace::Span;
use crate::types::{Agent, AgentInfo, AgentStatus, AgentType, Capability};

/// Body of `POST /register` and `POST /heartbeat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub agent: AgentInfo,
    /// Monotonic per-agent counter so the server can ignore stale retries.
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

/// Liveness thresholds the registry assigned to this agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutsAssigned {
    pub timeout_s: u64,
    pub eviction_s: u64,
}

/// One row of the resolution table returned to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionEntry {
    pub function_name: String,
    pub parameter_name: String,
    /// `None` means the dependency is unresolved; invoking its handle
    /// fails with `DEPENDENCY_UNAVAILABLE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<crate::types::ResolvedProvider>,
}

/// Body of the register/heartbeat response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub agent_id: AgentId,
    /// Increments every time the agent's resolution table changes; agents
    /// rebuild client-side proxies only when it moves.
    pub resolution_epoch: u64,
    pub timeouts: TimeoutsAssigned,
    pub resolutions: Vec<ResolutionEntry>,
}

/// One agent row in `GET /agents`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: AgentId,
    pub name: String,
    pub version: String,
    pub endpoint: String,
    pub namespace: String,
    pub agent_type: AgentType,
    pub status: AgentStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub dependencies_total: usize,
    pub dependencies_resolved: usize,
    pub capabilities: Vec<Capability>,
}

impl AgentSummary {
    pub fn from_agent(agent: &Agent, capabilities: Vec<Capability>) -> Self {
        Self {
            id: agent.id.clone(),
            name: agent.name.clone(),
            version: agent.version.clone(),
            endpoint: agent.endpoint.clone(),
            namespace: agent.namespace.clone(),
            agent_type: agent.agent_type,
            status: agent.status,
            last_heartbeat: agent.last_heartbeat,
            dependencies_total: agent.dependencies_total,
            dependencies_resolved: agent.dependencies_resolved,
            capabilities,
        }
    }
}

/// Body of `GET /agents`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentsResponse {
    pub agents: Vec<AgentSummary>,
    pub count: usize,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_s: u64,
    pub agents_total: usize,
    pub traces_buffered: usize,
}

/// Body of `POST /trace`: one span or a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpanReport {
    Single(Span),
    Batch(Vec<Span>),
}

impl SpanReport {
    pub fn into_spans(self) -> Vec<Span> {
        match self {
            Self::Single(span) => vec![span],
            Self::Batch(spans) => spans,
        }
    }
}

/// One node of an assembled trace tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceNode {
    #[serde(flatten)]
    pub span: Span,
    #[serde(default)]
    pub children: Vec<TraceNode>,
}

/// Body of `GET /trace/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceResponse {
    pub trace_id: String,
    pub span_count: usize,
    pub agent_count: usize,
    /// Duration of the root span, the whole call tree's wall time.
    pub duration_ms: f64,
    pub complete: bool,
    pub roots: Vec<TraceNode>,
}

/// Error body returned by every registry endpoint on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}
