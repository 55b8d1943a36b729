//! Heartbeat-driven liveness: healthy → degraded → expired → gone.
//!
//! A background sweeper classifies every agent by heartbeat age on a fixed
//! cadence. Transitions are computed against a read snapshot, persisted,
//! and then applied to the directory as one batch so the resolver runs
//! once per sweep rather than once per agent.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use mesh_core::error::{MeshError, Result};
use mesh_core::types::{AgentStatus, AgentType};
use mesh_core::wire::TimeoutsAssigned;

use crate::state::{MeshState, StatusTransition};
use crate::store::SqliteStore;

/// Multiplier from eviction threshold to garbage collection.
const GC_FACTOR: u32 = 10;

/// Liveness thresholds, with optional per-agent-type overrides.
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    pub timeout: Duration,
    pub eviction: Duration,
    pub sweep_interval: Duration,
    overrides: HashMap<AgentType, (Duration, Duration)>,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            eviction: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(10),
            overrides: HashMap::new(),
        }
    }
}

impl LivenessConfig {
    /// Override the thresholds for one agent type.
    pub fn with_override(mut self, agent_type: AgentType, timeout: Duration, eviction: Duration) -> Self {
        self.overrides.insert(agent_type, (timeout, eviction));
        self
    }

    /// Apply operator-supplied override specs in the
    /// `type=timeout_s:eviction_s` form (see [`parse_override`]).
    pub fn with_override_specs(mut self, specs: &[String]) -> Result<Self> {
        for raw in specs {
            let (agent_type, timeout, eviction) = parse_override(raw)?;
            self = self.with_override(agent_type, timeout, eviction);
        }
        Ok(self)
    }

    /// Thresholds applying to an agent of the given type.
    pub fn thresholds_for(&self, agent_type: AgentType) -> (Duration, Duration) {
        self.overrides
            .get(&agent_type)
            .copied()
            .unwrap_or((self.timeout, self.eviction))
    }

    /// The thresholds as reported back to an agent in heartbeat responses.
    pub fn assigned_for(&self, agent_type: AgentType) -> TimeoutsAssigned {
        let (timeout, eviction) = self.thresholds_for(agent_type);
        TimeoutsAssigned {
            timeout_s: timeout.as_secs(),
            eviction_s: eviction.as_secs(),
        }
    }

    /// How long an expired record lingers before deletion.
    pub fn gc_after(&self, agent_type: AgentType) -> Duration {
        self.thresholds_for(agent_type).1 * GC_FACTOR
    }
}

/// Parse one liveness override: `type=timeout_s:eviction_s`, where
/// `type` is an agent type wire name (`tool`, `llm-agent`,
/// `llm-provider`, `unknown`).
pub fn parse_override(raw: &str) -> Result<(AgentType, Duration, Duration)> {
    let raw = raw.trim();
    let Some((type_name, thresholds)) = raw.split_once('=') else {
        return Err(MeshError::validation(format!(
            "liveness override must be type=timeout_s:eviction_s, got {:?}",
            raw
        )));
    };
    let agent_type = match type_name.trim() {
        "tool" => AgentType::Tool,
        "llm-agent" => AgentType::LlmAgent,
        "llm-provider" => AgentType::LlmProvider,
        "unknown" => AgentType::Unknown,
        other => {
            return Err(MeshError::validation(format!(
                "unknown agent type {:?} in liveness override",
                other
            )));
        }
    };
    let Some((timeout, eviction)) = thresholds.split_once(':') else {
        return Err(MeshError::validation(format!(
            "liveness override thresholds must be timeout_s:eviction_s, got {:?}",
            thresholds
        )));
    };
    let timeout: u64 = timeout.trim().parse().map_err(|_| {
        MeshError::validation(format!("invalid timeout seconds {:?}", timeout))
    })?;
    let eviction: u64 = eviction.trim().parse().map_err(|_| {
        MeshError::validation(format!("invalid eviction seconds {:?}", eviction))
    })?;
    if timeout == 0 || eviction <= timeout {
        return Err(MeshError::validation(format!(
            "liveness override needs 0 < timeout_s < eviction_s, got {}:{}",
            timeout, eviction
        )));
    }
    Ok((
        agent_type,
        Duration::from_secs(timeout),
        Duration::from_secs(eviction),
    ))
}

/// Classify one agent by heartbeat age.
///
/// Exactly at the timeout an agent is still healthy; the degraded band is
/// `(timeout, eviction]`.
pub fn classify(
    last_heartbeat: DateTime<Utc>,
    now: DateTime<Utc>,
    timeout: Duration,
    eviction: Duration,
) -> AgentStatus {
    let elapsed = (now - last_heartbeat)
        .to_std()
        .unwrap_or(Duration::ZERO);
    if elapsed <= timeout {
        AgentStatus::Healthy
    } else if elapsed <= eviction {
        AgentStatus::Degraded
    } else {
        AgentStatus::Expired
    }
}

/// One sweep outcome: status transitions plus ids ready for deletion.
#[derive(Debug, Default)]
pub struct SweepPlan {
    pub transitions: Vec<StatusTransition>,
    pub gc: Vec<mesh_core::id::AgentId>,
}

/// Decide the transitions a sweep should apply, without mutating anything.
pub fn plan_sweep(state: &MeshState, config: &LivenessConfig, now: DateTime<Utc>) -> SweepPlan {
    let mut plan = SweepPlan::default();
    for (agent, _) in state.list_agents() {
        let (timeout, eviction) = config.thresholds_for(agent.agent_type);
        let next = classify(agent.last_heartbeat, now, timeout, eviction);
        if next != agent.status {
            // Expiry is one-way from the sweeper's point of view; only a
            // fresh heartbeat revives an agent.
            if agent.status == AgentStatus::Expired && next != AgentStatus::Expired {
                continue;
            }
            plan.transitions.push(StatusTransition {
                agent_id: agent.id.clone(),
                from: agent.status,
                to: next,
            });
        }
        if agent.status == AgentStatus::Expired {
            let elapsed = (now - agent.last_heartbeat).to_std().unwrap_or(Duration::ZERO);
            if elapsed > config.gc_after(agent.agent_type) {
                plan.gc.push(agent.id.clone());
            }
        }
    }
    plan
}

/// Run the periodic sweeper until cancelled.
///
/// Persistence happens before the in-memory batch is applied; if the store
/// write fails the sweep is skipped and retried next tick with state
/// unchanged.
pub async fn run_sweeper(
    state: MeshState,
    store: SqliteStore,
    config: LivenessConfig,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.sweep_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!(
        interval_s = config.sweep_interval.as_secs(),
        "liveness sweeper started"
    );
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("liveness sweeper stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        let plan = plan_sweep(&state, &config, Utc::now());
        if plan.transitions.is_empty() && plan.gc.is_empty() {
            continue;
        }

        let status_updates: Vec<_> = plan
            .transitions
            .iter()
            .map(|t| (t.agent_id.clone(), t.to))
            .collect();
        if let Err(err) = store.update_statuses(&status_updates).await {
            error!(error = %err, "sweep status persistence failed; retrying next tick");
            continue;
        }
        if let Err(err) = store.delete_agents(&plan.gc).await {
            error!(error = %err, "sweep GC persistence failed; retrying next tick");
            continue;
        }

        for transition in &plan.transitions {
            debug!(
                agent_id = %transition.agent_id,
                from = transition.from.as_str(),
                to = transition.to.as_str(),
                "liveness transition"
            );
        }
        state.apply_sweep(&plan.transitions, &plan.gc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_boundary_exactly_at_timeout_is_healthy() {
        let now = Utc::now();
        let timeout = Duration::from_secs(60);
        let eviction = Duration::from_secs(120);
        let at_timeout = now - TimeDelta::seconds(60);
        assert_eq!(classify(at_timeout, now, timeout, eviction), AgentStatus::Healthy);

        let just_past = now - TimeDelta::milliseconds(60_001);
        assert_eq!(classify(just_past, now, timeout, eviction), AgentStatus::Degraded);
    }

    #[test]
    fn test_boundary_eviction() {
        let now = Utc::now();
        let timeout = Duration::from_secs(60);
        let eviction = Duration::from_secs(120);
        let at_eviction = now - TimeDelta::seconds(120);
        assert_eq!(classify(at_eviction, now, timeout, eviction), AgentStatus::Degraded);

        let past_eviction = now - TimeDelta::milliseconds(120_001);
        assert_eq!(classify(past_eviction, now, timeout, eviction), AgentStatus::Expired);
    }

    #[test]
    fn test_future_heartbeat_is_healthy() {
        // Clock skew: a heartbeat stamped slightly ahead of "now".
        let now = Utc::now();
        let future = now + TimeDelta::seconds(5);
        assert_eq!(
            classify(future, now, Duration::from_secs(60), Duration::from_secs(120)),
            AgentStatus::Healthy
        );
    }

    #[test]
    fn test_per_type_overrides() {
        let config = LivenessConfig::default().with_override(
            AgentType::LlmProvider,
            Duration::from_secs(30),
            Duration::from_secs(60),
        );
        assert_eq!(
            config.thresholds_for(AgentType::Tool),
            (Duration::from_secs(60), Duration::from_secs(120))
        );
        assert_eq!(
            config.thresholds_for(AgentType::LlmProvider),
            (Duration::from_secs(30), Duration::from_secs(60))
        );
        let assigned = config.assigned_for(AgentType::LlmProvider);
        assert_eq!(assigned.timeout_s, 30);
        assert_eq!(assigned.eviction_s, 60);
    }

    #[test]
    fn test_gc_after_is_ten_times_eviction() {
        let config = LivenessConfig::default();
        assert_eq!(config.gc_after(AgentType::Tool), Duration::from_secs(1200));
    }

    #[test]
    fn test_parse_override_valid() {
        let (agent_type, timeout, eviction) = parse_override("llm-provider=30:60").unwrap();
        assert_eq!(agent_type, AgentType::LlmProvider);
        assert_eq!(timeout, Duration::from_secs(30));
        assert_eq!(eviction, Duration::from_secs(60));

        let (agent_type, timeout, eviction) = parse_override(" tool = 90 : 180 ").unwrap();
        assert_eq!(agent_type, AgentType::Tool);
        assert_eq!(timeout, Duration::from_secs(90));
        assert_eq!(eviction, Duration::from_secs(180));
    }

    #[test]
    fn test_parse_override_rejects_malformed() {
        assert!(parse_override("tool").is_err());
        assert!(parse_override("robot=30:60").is_err());
        assert!(parse_override("tool=abc:60").is_err());
        assert!(parse_override("tool=30").is_err());
        // Eviction must exceed the timeout.
        assert!(parse_override("tool=60:60").is_err());
        assert!(parse_override("tool=0:60").is_err());
    }

    #[test]
    fn test_with_override_specs_applies_each_entry() {
        let config = LivenessConfig::default()
            .with_override_specs(&[
                "llm-provider=30:60".to_string(),
                "tool=90:180".to_string(),
            ])
            .unwrap();
        assert_eq!(
            config.thresholds_for(AgentType::LlmProvider),
            (Duration::from_secs(30), Duration::from_secs(60))
        );
        assert_eq!(
            config.thresholds_for(AgentType::Tool),
            (Duration::from_secs(90), Duration::from_secs(180))
        );
        assert_eq!(
            config.thresholds_for(AgentType::LlmAgent),
            (Duration::from_secs(60), Duration::from_secs(120))
        );
    }
}
