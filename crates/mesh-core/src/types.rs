//! Core entity types for the mesh directory.
//!
//! These are the records the registry owns: agents, the capabilities they
//! expose, and the dependency declarations the resolver matches against.
//! Wire-level request/response envelopes live in [`crate::wire`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::AgentId;

/// What kind of process an agent is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    Tool,
    LlmAgent,
    LlmProvider,
    #[default]
    Unknown,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::LlmAgent => "llm-agent",
            Self::LlmProvider => "llm-provider",
            Self::Unknown => "unknown",
        }
    }
}

/// Liveness state of an agent, driven by heartbeat age.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Healthy,
    Degraded,
    Expired,
}

impl AgentStatus {
    /// Whether the agent is still eligible for dependency resolution.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Expired => "expired",
        }
    }
}

/// Agent metadata as carried in register/heartbeat requests.
///
/// `id` is absent on an agent's very first registration; the registry
/// assigns one and the agent echoes it back from then on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<AgentId>,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub endpoint: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub agent_type: AgentType,
}

pub fn default_namespace() -> String {
    "default".to_string()
}

/// One live agent as the registry tracks it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub endpoint: String,
    pub namespace: String,
    pub agent_type: AgentType,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub last_full_refresh: DateTime<Utc>,
    /// Highest sequence number accepted from this agent; stale retries
    /// carry a lower one and are ignored.
    pub sequence: u64,
    pub dependencies_total: usize,
    pub dependencies_resolved: usize,
}

impl Agent {
    /// Build a fresh record from a registration document.
    pub fn from_info(id: AgentId, info: &AgentInfo, sequence: u64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: info.name.clone(),
            version: info.version.clone(),
            description: info.description.clone(),
            endpoint: info.endpoint.clone(),
            namespace: info.namespace.clone(),
            agent_type: info.agent_type,
            status: AgentStatus::Healthy,
            created_at: now,
            updated_at: now,
            last_heartbeat: now,
            last_full_refresh: now,
            sequence,
            dependencies_total: 0,
            dependencies_resolved: 0,
        }
    }
}

/// One named function/prompt/resource exposed by an agent.
///
/// `function_name` is what `tools/call` uses; `capability` is the logical
/// name other agents depend on. The two often differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub function_name: String,
    pub capability: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type_hint: Option<AgentType>,
}

/// A caller-side declaration of what a function needs injected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub capability: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub parameter_name: String,
}

/// The resolver's choice of a concrete provider for one dependency spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedProvider {
    pub agent_id: AgentId,
    pub function_name: String,
    pub endpoint: String,
    pub capability: String,
    pub version: String,
}
