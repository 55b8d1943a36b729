//! The in-memory mesh directory behind a single writer.
//!
//! All mutations (register, heartbeat, sweeper transitions, deregister)
//! serialize through the write lock; reads clone out of a consistent
//! snapshot. Every mutation ends with one resolution recomputation, and
//! the resolution epoch increments exactly when the table diff is
//! non-empty. The lock is never held across I/O: persistence happens in
//! [`crate::store`] before the corresponding state mutation is applied.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use mesh_core::id::AgentId;
use mesh_core::types::{Agent, AgentStatus, Capability, ResolvedProvider};
use mesh_core::wire::ResolutionEntry;

use crate::resolver::{self, ResolutionTable};

#[derive(Debug, Default)]
struct Directory {
    agents: BTreeMap<AgentId, Agent>,
    capabilities: BTreeMap<AgentId, Vec<Capability>>,
    resolutions: ResolutionTable,
    epoch: u64,
}

impl Directory {
    /// Recompute the resolution table and derived counters; bump the epoch
    /// iff the table changed.
    fn recompute(&mut self) {
        let next = resolver::resolve_all(&self.agents, &self.capabilities);
        if next != self.resolutions {
            self.epoch += 1;
            for cycle in resolver::find_cycles(&next) {
                tracing::debug!(
                    agents = %cycle
                        .iter()
                        .map(|id| id.as_str())
                        .collect::<Vec<_>>()
                        .join(" -> "),
                    "dependency cycle present"
                );
            }
        }
        let counters = resolver::dependency_counters(&next);
        for (id, agent) in self.agents.iter_mut() {
            let (total, resolved) = counters.get(id).copied().unwrap_or((0, 0));
            agent.dependencies_total = total;
            agent.dependencies_resolved = resolved;
        }
        self.resolutions = next;
    }
}

/// Shared handle to the directory. Cheap to clone; all clones observe the
/// same state.
#[derive(Clone, Default)]
pub struct MeshState {
    inner: std::sync::Arc<RwLock<Directory>>,
}

/// One status transition decided by the liveness sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    pub agent_id: AgentId,
    pub from: AgentStatus,
    pub to: AgentStatus,
}

impl MeshState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or refresh an agent together with its capability list.
    pub fn upsert_agent(&self, agent: Agent, capabilities: Vec<Capability>) {
        let mut dir = self.inner.write();
        dir.capabilities.insert(agent.id.clone(), capabilities);
        dir.agents.insert(agent.id.clone(), agent);
        dir.recompute();
    }

    /// Apply a batch of sweeper transitions and drop garbage-collected ids.
    ///
    /// Transitions are idempotent: an agent whose status already matches is
    /// skipped. One recomputation covers the whole batch.
    pub fn apply_sweep(&self, transitions: &[StatusTransition], gc: &[AgentId]) {
        if transitions.is_empty() && gc.is_empty() {
            return;
        }
        let mut dir = self.inner.write();
        let mut dirty = false;
        for transition in transitions {
            if let Some(agent) = dir.agents.get_mut(&transition.agent_id) {
                if agent.status != transition.to {
                    agent.status = transition.to;
                    agent.updated_at = chrono::Utc::now();
                    dirty = true;
                }
            }
        }
        for id in gc {
            dirty |= dir.agents.remove(id).is_some();
            dir.capabilities.remove(id);
        }
        if dirty {
            dir.recompute();
        }
    }

    /// Soft-delete: mark the agent expired so it drops out of resolution;
    /// the record lingers for observability until the sweeper GCs it.
    pub fn expire_agent(&self, id: &AgentId) -> bool {
        let mut dir = self.inner.write();
        let Some(agent) = dir.agents.get_mut(id) else {
            return false;
        };
        if agent.status != AgentStatus::Expired {
            agent.status = AgentStatus::Expired;
            agent.updated_at = chrono::Utc::now();
            dir.recompute();
        }
        true
    }

    /// Record a liveness-only heartbeat touch (no declaration change).
    pub fn touch_heartbeat(&self, id: &AgentId, sequence: u64) -> bool {
        let mut dir = self.inner.write();
        let Some(agent) = dir.agents.get_mut(id) else {
            return false;
        };
        let now = chrono::Utc::now();
        agent.last_heartbeat = now;
        agent.updated_at = now;
        agent.sequence = sequence;
        let was_down = agent.status != AgentStatus::Healthy;
        agent.status = AgentStatus::Healthy;
        if was_down {
            // A revived agent re-enters the candidate set immediately.
            dir.recompute();
        }
        true
    }

    pub fn get_agent(&self, id: &AgentId) -> Option<Agent> {
        self.inner.read().agents.get(id).cloned()
    }

    pub fn agent_sequence(&self, id: &AgentId) -> Option<u64> {
        self.inner.read().agents.get(id).map(|a| a.sequence)
    }

    /// Consistent snapshot of every agent with its capabilities.
    pub fn list_agents(&self) -> Vec<(Agent, Vec<Capability>)> {
        let dir = self.inner.read();
        dir.agents
            .values()
            .map(|agent| {
                (
                    agent.clone(),
                    dir.capabilities.get(&agent.id).cloned().unwrap_or_default(),
                )
            })
            .collect()
    }

    pub fn agent_count(&self) -> usize {
        self.inner.read().agents.len()
    }

    pub fn epoch(&self) -> u64 {
        self.inner.read().epoch
    }

    /// The resolution rows belonging to one agent, in declaration order of
    /// its capabilities.
    pub fn resolutions_for(&self, id: &AgentId) -> Vec<ResolutionEntry> {
        let dir = self.inner.read();
        let Some(caps) = dir.capabilities.get(id) else {
            return Vec::new();
        };
        let mut entries = Vec::new();
        for capability in caps {
            for spec in &capability.dependencies {
                let key = resolver::ResolutionKey {
                    agent_id: id.clone(),
                    function_name: capability.function_name.clone(),
                    parameter_name: spec.parameter_name.clone(),
                };
                let provider: Option<ResolvedProvider> =
                    dir.resolutions.get(&key).cloned().flatten();
                entries.push(ResolutionEntry {
                    function_name: capability.function_name.clone(),
                    parameter_name: spec.parameter_name.clone(),
                    provider,
                });
            }
        }
        entries
    }

    /// Whether `host:port` belongs to a currently known, non-expired agent
    /// endpoint. The proxy refuses targets outside the directory.
    pub fn endpoint_authorized(&self, host_port: &str) -> bool {
        let dir = self.inner.read();
        dir.agents.values().any(|agent| {
            agent.status != AgentStatus::Expired
                && endpoint_host_port(&agent.endpoint)
                    .map(|hp| hp == host_port)
                    .unwrap_or(false)
        })
    }
}

/// Extract `host:port` from an endpoint URL, defaulting the port by scheme.
fn endpoint_host_port(endpoint: &str) -> Option<String> {
    let rest = endpoint.split("://").nth(1).unwrap_or(endpoint);
    let authority = rest.split('/').next()?;
    if authority.is_empty() {
        return None;
    }
    if authority.contains(':') {
        Some(authority.to_string())
    } else {
        let port = if endpoint.starts_with("https://") { 443 } else { 80 };
        Some(format!("{}:{}", authority, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mesh_core::types::{AgentType, DependencySpec};

    fn agent(id: &str, name: &str) -> Agent {
        let now = Utc::now();
        Agent {
            id: AgentId::from(id),
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: None,
            endpoint: format!("http://{}:8080", name),
            namespace: "default".to_string(),
            agent_type: AgentType::Tool,
            status: AgentStatus::Healthy,
            created_at: now,
            updated_at: now,
            last_heartbeat: now,
            last_full_refresh: now,
            sequence: 1,
            dependencies_total: 0,
            dependencies_resolved: 0,
        }
    }

    fn provider_cap() -> Capability {
        Capability {
            function_name: "get_date".to_string(),
            capability: "date_service".to_string(),
            version: "1.0.0".to_string(),
            tags: vec!["system".to_string()],
            dependencies: vec![],
            description: None,
            schema: None,
            agent_type_hint: None,
        }
    }

    fn depending_cap() -> Capability {
        Capability {
            function_name: "say_hello".to_string(),
            capability: "greeting".to_string(),
            version: "1.0.0".to_string(),
            tags: vec![],
            dependencies: vec![DependencySpec {
                capability: "date_service".to_string(),
                tags: vec!["system".to_string()],
                version: None,
                namespace: None,
                parameter_name: "date_service".to_string(),
            }],
            description: None,
            schema: None,
            agent_type_hint: None,
        }
    }

    #[test]
    fn test_epoch_bumps_only_on_resolution_change() {
        let state = MeshState::new();
        assert_eq!(state.epoch(), 0);

        // A provider alone declares no dependencies: table stays empty.
        state.upsert_agent(agent("a-1", "date-agent"), vec![provider_cap()]);
        assert_eq!(state.epoch(), 0);

        // A depender arrives; its slot resolves and the table changes.
        state.upsert_agent(agent("b-1", "hello-agent"), vec![depending_cap()]);
        assert_eq!(state.epoch(), 1);

        // Re-registering the same declaration changes nothing.
        state.upsert_agent(agent("b-1", "hello-agent"), vec![depending_cap()]);
        assert_eq!(state.epoch(), 1);
    }

    #[test]
    fn test_counters_follow_resolution() {
        let state = MeshState::new();
        state.upsert_agent(agent("b-1", "hello-agent"), vec![depending_cap()]);
        let b = state.get_agent(&AgentId::from("b-1")).unwrap();
        assert_eq!((b.dependencies_total, b.dependencies_resolved), (1, 0));

        state.upsert_agent(agent("a-1", "date-agent"), vec![provider_cap()]);
        let b = state.get_agent(&AgentId::from("b-1")).unwrap();
        assert_eq!((b.dependencies_total, b.dependencies_resolved), (1, 1));
    }

    #[test]
    fn test_sweep_expiry_unresolves_dependents() {
        let state = MeshState::new();
        state.upsert_agent(agent("a-1", "date-agent"), vec![provider_cap()]);
        state.upsert_agent(agent("b-1", "hello-agent"), vec![depending_cap()]);
        let epoch = state.epoch();

        state.apply_sweep(
            &[StatusTransition {
                agent_id: AgentId::from("a-1"),
                from: AgentStatus::Healthy,
                to: AgentStatus::Expired,
            }],
            &[],
        );
        assert!(state.epoch() > epoch);
        let rows = state.resolutions_for(&AgentId::from("b-1"));
        assert_eq!(rows.len(), 1);
        assert!(rows[0].provider.is_none());
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let state = MeshState::new();
        state.upsert_agent(agent("a-1", "date-agent"), vec![provider_cap()]);
        let transition = StatusTransition {
            agent_id: AgentId::from("a-1"),
            from: AgentStatus::Healthy,
            to: AgentStatus::Degraded,
        };
        state.apply_sweep(std::slice::from_ref(&transition), &[]);
        let epoch = state.epoch();
        state.apply_sweep(std::slice::from_ref(&transition), &[]);
        assert_eq!(state.epoch(), epoch);
    }

    #[test]
    fn test_gc_removes_record() {
        let state = MeshState::new();
        state.upsert_agent(agent("a-1", "date-agent"), vec![provider_cap()]);
        state.apply_sweep(&[], &[AgentId::from("a-1")]);
        assert!(state.get_agent(&AgentId::from("a-1")).is_none());
        assert_eq!(state.agent_count(), 0);
    }

    #[test]
    fn test_endpoint_authorization() {
        let state = MeshState::new();
        state.upsert_agent(agent("a-1", "date-agent"), vec![]);
        assert!(state.endpoint_authorized("date-agent:8080"));
        assert!(!state.endpoint_authorized("evil-host:9999"));

        state.expire_agent(&AgentId::from("a-1"));
        assert!(!state.endpoint_authorized("date-agent:8080"));
    }

    #[test]
    fn test_endpoint_host_port_parsing() {
        assert_eq!(
            endpoint_host_port("http://host:8080/mcp"),
            Some("host:8080".to_string())
        );
        assert_eq!(endpoint_host_port("http://host"), Some("host:80".to_string()));
        assert_eq!(
            endpoint_host_port("https://host/path"),
            Some("host:443".to_string())
        );
        assert_eq!(endpoint_host_port("http://"), None);
    }
}
