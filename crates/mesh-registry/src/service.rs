//! Registration and heartbeat orchestration.
//!
//! The service sits between the HTTP surface and the store/state pair:
//! it validates registration documents, assigns ids, enforces the
//! per-agent heartbeat rate cap, ignores stale retries by sequence
//! number, persists before mutating the in-memory directory, and builds
//! the resolution-table responses agents consume.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use mesh_core::error::{MeshError, Result};
use mesh_core::id::AgentId;
use mesh_core::trace::Span;
use mesh_core::types::{Agent, AgentStatus};
use mesh_core::wire::{
    AgentsResponse, AgentSummary, HealthResponse, RegisterRequest, RegisterResponse,
    TraceResponse,
};

use crate::liveness::LivenessConfig;
use crate::state::MeshState;
use crate::store::SqliteStore;
use crate::traces::TraceStore;

/// Maximum heartbeats accepted per agent per second.
const HEARTBEAT_RATE_CAP: u32 = 10;

#[derive(Debug)]
struct RateWindow {
    window_start: Instant,
    count: u32,
}

/// The registry's application core, shared across HTTP handlers.
#[derive(Clone)]
pub struct RegistryService {
    store: SqliteStore,
    state: MeshState,
    traces: TraceStore,
    liveness: LivenessConfig,
    heartbeat_rate: Arc<DashMap<AgentId, RateWindow>>,
    started_at: Instant,
}

impl RegistryService {
    pub fn new(
        store: SqliteStore,
        state: MeshState,
        traces: TraceStore,
        liveness: LivenessConfig,
    ) -> Self {
        Self {
            store,
            state,
            traces,
            liveness,
            heartbeat_rate: Arc::new(DashMap::new()),
            started_at: Instant::now(),
        }
    }

    pub fn state(&self) -> &MeshState {
        &self.state
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn traces(&self) -> &TraceStore {
        &self.traces
    }

    pub fn liveness(&self) -> &LivenessConfig {
        &self.liveness
    }

    /// Rebuild the in-memory directory from the database on startup.
    pub async fn recover(&self) -> Result<usize> {
        let records = self.store.load_all().await?;
        let count = records.len();
        for (agent, capabilities) in records {
            self.state.upsert_agent(agent, capabilities);
        }
        if count > 0 {
            info!(agents = count, "directory recovered from database");
        }
        Ok(count)
    }

    /// Handle `POST /register`: create or refresh an agent.
    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse> {
        validate_request(&request)?;

        let now = Utc::now();
        let agent_id = match &request.agent.id {
            Some(id) => id.clone(),
            None => AgentId::generate(&request.agent.name),
        };

        if let Some(stored_sequence) = self.state.agent_sequence(&agent_id) {
            if request.sequence < stored_sequence {
                debug!(
                    agent_id = %agent_id,
                    stale = request.sequence,
                    current = stored_sequence,
                    "ignoring stale registration retry"
                );
                return Ok(self.build_response(&agent_id));
            }
        }

        let mut agent = Agent::from_info(agent_id.clone(), &request.agent, request.sequence, now);
        if let Some(existing) = self.state.get_agent(&agent_id) {
            agent.created_at = existing.created_at;
        }

        // Persist first; a store failure must leave the snapshot untouched.
        self.store.save_agent(&agent, &request.capabilities).await?;
        self.state.upsert_agent(agent, request.capabilities.clone());

        info!(
            agent_id = %agent_id,
            name = %request.agent.name,
            capabilities = request.capabilities.len(),
            "agent registered"
        );
        Ok(self.build_response(&agent_id))
    }

    /// Handle `POST /heartbeat`: liveness touch plus optional refresh.
    pub async fn heartbeat(&self, request: RegisterRequest) -> Result<RegisterResponse> {
        let Some(agent_id) = request.agent.id.clone() else {
            return Err(MeshError::validation("heartbeat requires agent.id"));
        };
        self.check_heartbeat_rate(&agent_id)?;

        let Some(existing) = self.state.get_agent(&agent_id) else {
            return Err(MeshError::conflict(format!(
                "unknown agent id {}; re-register",
                agent_id
            )));
        };

        if request.sequence < existing.sequence {
            debug!(
                agent_id = %agent_id,
                stale = request.sequence,
                current = existing.sequence,
                "ignoring stale heartbeat"
            );
            return Ok(self.build_response(&agent_id));
        }

        validate_request(&request)?;
        let now = Utc::now();

        let declaration_changed = {
            let current = self
                .state
                .list_agents()
                .into_iter()
                .find(|(a, _)| a.id == agent_id)
                .map(|(_, caps)| caps)
                .unwrap_or_default();
            current != request.capabilities
                || existing.endpoint != request.agent.endpoint
                || existing.namespace != request.agent.namespace
        };

        if declaration_changed {
            let mut agent = Agent::from_info(agent_id.clone(), &request.agent, request.sequence, now);
            agent.created_at = existing.created_at;
            self.store.save_agent(&agent, &request.capabilities).await?;
            self.state.upsert_agent(agent, request.capabilities.clone());
            debug!(agent_id = %agent_id, "heartbeat refreshed declaration");
        } else {
            self.store.touch_agent(&agent_id, now, request.sequence).await?;
            self.state.touch_heartbeat(&agent_id, request.sequence);
        }

        Ok(self.build_response(&agent_id))
    }

    /// Handle `DELETE /agents/{id}`: soft-delete, GC later.
    pub async fn deregister(&self, id: &AgentId) -> Result<()> {
        if self.state.get_agent(id).is_none() {
            return Err(MeshError::not_found("agent", id.to_string()));
        }
        self.store
            .update_statuses(&[(id.clone(), AgentStatus::Expired)])
            .await?;
        self.state.expire_agent(id);
        info!(agent_id = %id, "agent deregistered");
        Ok(())
    }

    /// Handle `GET /agents`.
    pub fn list_agents(&self) -> AgentsResponse {
        let agents: Vec<AgentSummary> = self
            .state
            .list_agents()
            .into_iter()
            .map(|(agent, caps)| AgentSummary::from_agent(&agent, caps))
            .collect();
        let count = agents.len();
        AgentsResponse { agents, count }
    }

    /// Handle `GET /agents/{id}`.
    pub fn get_agent(&self, id: &AgentId) -> Result<AgentSummary> {
        self.state
            .list_agents()
            .into_iter()
            .find(|(agent, _)| &agent.id == id)
            .map(|(agent, caps)| AgentSummary::from_agent(&agent, caps))
            .ok_or_else(|| MeshError::not_found("agent", id.to_string()))
    }

    /// Handle `POST /trace`.
    pub fn report_spans(&self, spans: Vec<Span>) {
        self.traces.ingest(spans);
    }

    /// Handle `GET /trace/{id}`.
    pub fn get_trace(&self, trace_id: &str, show_internal: bool) -> Result<TraceResponse> {
        self.traces
            .assemble(trace_id, show_internal)
            .ok_or_else(|| MeshError::not_found("trace", trace_id))
    }

    /// Handle `GET /health`.
    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "healthy".to_string(),
            service: "mesh-registry".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_s: self.started_at.elapsed().as_secs(),
            agents_total: self.state.agent_count(),
            traces_buffered: self.traces.trace_count(),
        }
    }

    fn build_response(&self, agent_id: &AgentId) -> RegisterResponse {
        let agent_type = self
            .state
            .get_agent(agent_id)
            .map(|a| a.agent_type)
            .unwrap_or_default();
        RegisterResponse {
            agent_id: agent_id.clone(),
            resolution_epoch: self.state.epoch(),
            timeouts: self.liveness.assigned_for(agent_type),
            resolutions: self.state.resolutions_for(agent_id),
        }
    }

    fn check_heartbeat_rate(&self, agent_id: &AgentId) -> Result<()> {
        let now = Instant::now();
        let mut entry = self
            .heartbeat_rate
            .entry(agent_id.clone())
            .or_insert_with(|| RateWindow {
                window_start: now,
                count: 0,
            });
        if now.duration_since(entry.window_start) >= Duration::from_secs(1) {
            entry.window_start = now;
            entry.count = 0;
        }
        entry.count += 1;
        if entry.count > HEARTBEAT_RATE_CAP {
            warn!(agent_id = %agent_id, "heartbeat rate cap exceeded");
            return Err(MeshError::rate_limited(format!(
                "agent {} exceeded {} heartbeats/s",
                agent_id, HEARTBEAT_RATE_CAP
            )));
        }
        Ok(())
    }
}

/// Reject documents the directory cannot represent.
fn validate_request(request: &RegisterRequest) -> Result<()> {
    if request.agent.name.trim().is_empty() {
        return Err(MeshError::validation("agent.name must not be empty"));
    }
    validate_endpoint(&request.agent.endpoint)?;
    let mut seen = std::collections::HashSet::new();
    for capability in &request.capabilities {
        if capability.function_name.trim().is_empty() {
            return Err(MeshError::validation("capability.function_name must not be empty"));
        }
        if capability.capability.trim().is_empty() {
            return Err(MeshError::validation("capability.capability must not be empty"));
        }
        if !seen.insert(capability.function_name.clone()) {
            return Err(MeshError::validation(format!(
                "duplicate function_name {:?}",
                capability.function_name
            )));
        }
        for spec in &capability.dependencies {
            if spec.capability.trim().is_empty() {
                return Err(MeshError::validation("dependency.capability must not be empty"));
            }
            if spec.parameter_name.trim().is_empty() {
                return Err(MeshError::validation("dependency.parameter_name must not be empty"));
            }
            if let Some(version) = &spec.version {
                mesh_core::version::VersionConstraint::parse(version)?;
            }
        }
    }
    Ok(())
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    let rest = endpoint
        .strip_prefix("http://")
        .or_else(|| endpoint.strip_prefix("https://"))
        .ok_or_else(|| {
            MeshError::validation(format!("endpoint must be http(s): {:?}", endpoint))
        })?;
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(MeshError::validation("endpoint is missing a host"));
    }
    if let Some((_, port)) = authority.rsplit_once(':') {
        port.parse::<u16>()
            .map_err(|_| MeshError::validation(format!("invalid endpoint port: {:?}", port)))?;
    }
    Ok(())
}
