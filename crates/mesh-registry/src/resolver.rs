//! Dependency resolution: matching declared dependency specs against the
//! live capability set.
//!
//! Resolution is a pure function of the directory snapshot. Re-running it
//! on unchanged inputs produces an identical table, which is what lets the
//! registry recompute cheaply on every mutation and bump the resolution
//! epoch only when the output actually differs.

use std::collections::BTreeMap;

use mesh_core::id::AgentId;
use mesh_core::tags::TagSet;
use mesh_core::types::{Agent, AgentStatus, Capability, DependencySpec, ResolvedProvider};
use mesh_core::version::{parse_version, VersionConstraint};

/// Identity of one dependency slot: which agent, which function, which
/// parameter receives the resolved handle.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResolutionKey {
    pub agent_id: AgentId,
    pub function_name: String,
    pub parameter_name: String,
}

/// The full resolution table: every dependency slot mapped to its chosen
/// provider, or `None` when no candidate survived filtering.
pub type ResolutionTable = BTreeMap<ResolutionKey, Option<ResolvedProvider>>;

/// Score bonus per satisfied preference tag.
const PREFERENCE_BONUS: i64 = 10;
/// Score bonus for carrying the newest version among surviving candidates.
const NEWEST_VERSION_BONUS: i64 = 5;
/// Score penalty for a degraded provider.
const DEGRADED_PENALTY: i64 = -3;
/// Score bonus for resolving to the depending agent itself.
const SELF_PREFERENCE_BONUS: i64 = 1;

struct Candidate<'a> {
    agent: &'a Agent,
    capability: &'a Capability,
}

/// Compute the resolution table for the whole directory.
pub fn resolve_all(
    agents: &BTreeMap<AgentId, Agent>,
    capabilities: &BTreeMap<AgentId, Vec<Capability>>,
) -> ResolutionTable {
    let mut table = ResolutionTable::new();
    for (agent_id, agent) in agents {
        if agent.status == AgentStatus::Expired {
            continue;
        }
        let Some(caps) = capabilities.get(agent_id) else {
            continue;
        };
        for capability in caps {
            for spec in &capability.dependencies {
                let key = ResolutionKey {
                    agent_id: agent_id.clone(),
                    function_name: capability.function_name.clone(),
                    parameter_name: spec.parameter_name.clone(),
                };
                let chosen = resolve_one(agent, spec, agents, capabilities);
                table.insert(key, chosen);
            }
        }
    }
    table
}

/// Resolve a single dependency spec against the live capability set.
pub fn resolve_one(
    depender: &Agent,
    spec: &DependencySpec,
    agents: &BTreeMap<AgentId, Agent>,
    capabilities: &BTreeMap<AgentId, Vec<Capability>>,
) -> Option<ResolvedProvider> {
    let wanted_namespace = spec.namespace.as_deref().unwrap_or(&depender.namespace);
    let spec_tags = TagSet::parse(&spec.tags);
    // An unparsable constraint can never be satisfied; the slot stays
    // unresolved rather than failing the whole pass.
    let constraint = match spec.version.as_deref() {
        None => VersionConstraint::Any,
        Some(raw) => match VersionConstraint::parse(raw) {
            Ok(constraint) => constraint,
            Err(_) => return None,
        },
    };

    let mut candidates: Vec<Candidate<'_>> = Vec::new();
    for (agent_id, agent) in agents {
        // Expired providers never resolve; degraded ones stay eligible but
        // are deprioritized in scoring.
        if !agent.status.is_live() {
            continue;
        }
        if agent.namespace != wanted_namespace {
            continue;
        }
        let Some(caps) = capabilities.get(agent_id) else {
            continue;
        };
        for capability in caps {
            if capability.capability != spec.capability {
                continue;
            }
            let cap_tags = TagSet::names(&capability.tags);
            if !spec_tags.covered_by(&cap_tags) {
                continue;
            }
            if !constraint.matches_str(&capability.version) {
                continue;
            }
            candidates.push(Candidate { agent, capability });
        }
    }

    if candidates.is_empty() {
        return None;
    }

    let newest = candidates
        .iter()
        .filter_map(|c| parse_version(&c.capability.version).ok())
        .max();

    let mut best: Option<(i64, &Candidate<'_>)> = None;
    for candidate in &candidates {
        let cap_tags = TagSet::names(&candidate.capability.tags);
        let mut score = spec_tags.preference_hits(&cap_tags) as i64 * PREFERENCE_BONUS;
        if let Some(newest) = &newest {
            if parse_version(&candidate.capability.version).ok().as_ref() == Some(newest) {
                score += NEWEST_VERSION_BONUS;
            }
        }
        if candidate.agent.status == AgentStatus::Degraded {
            score += DEGRADED_PENALTY;
        }
        if candidate.agent.id == depender.id {
            score += SELF_PREFERENCE_BONUS;
        }
        let better = match &best {
            None => true,
            Some((best_score, best_candidate)) => {
                score > *best_score
                    || (score == *best_score
                        && (
                            candidate.agent.name.as_str(),
                            candidate.capability.function_name.as_str(),
                        ) < (
                            best_candidate.agent.name.as_str(),
                            best_candidate.capability.function_name.as_str(),
                        ))
            }
        };
        if better {
            best = Some((score, candidate));
        }
    }

    best.map(|(_, c)| ResolvedProvider {
        agent_id: c.agent.id.clone(),
        function_name: c.capability.function_name.clone(),
        endpoint: c.agent.endpoint.clone(),
        capability: c.capability.capability.clone(),
        version: c.capability.version.clone(),
    })
}

/// Find dependency cycles in a resolution table.
///
/// Cycles are legal (an agent may depend on itself or on a peer that
/// depends back); the resolver works on the current snapshot only, so
/// they need no special handling. They are still worth surfacing in
/// logs, which is all this is for.
pub fn find_cycles(table: &ResolutionTable) -> Vec<Vec<AgentId>> {
    let mut edges: BTreeMap<&AgentId, Vec<&AgentId>> = BTreeMap::new();
    for (key, provider) in table {
        if let Some(provider) = provider {
            edges.entry(&key.agent_id).or_default().push(&provider.agent_id);
        }
    }

    let mut cycles = Vec::new();
    let mut done: std::collections::BTreeSet<&AgentId> = Default::default();
    for start in edges.keys().copied() {
        if done.contains(start) {
            continue;
        }
        let mut path: Vec<&AgentId> = Vec::new();
        let mut stack = vec![(start, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            path.truncate(depth);
            if let Some(position) = path.iter().position(|p| *p == node) {
                cycles.push(path[position..].iter().map(|id| (*id).clone()).collect());
                continue;
            }
            if done.contains(node) {
                continue;
            }
            path.push(node);
            done.insert(node);
            for next in edges.get(node).into_iter().flatten() {
                stack.push((next, depth + 1));
            }
        }
    }
    cycles
}

/// Per-agent resolved/total counters derived from a table.
pub fn dependency_counters(table: &ResolutionTable) -> BTreeMap<AgentId, (usize, usize)> {
    let mut counters: BTreeMap<AgentId, (usize, usize)> = BTreeMap::new();
    for (key, provider) in table {
        let entry = counters.entry(key.agent_id.clone()).or_default();
        entry.0 += 1;
        if provider.is_some() {
            entry.1 += 1;
        }
    }
    counters
}
