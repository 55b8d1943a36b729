//! Trace aggregation: span ingestion and call-tree assembly.
//!
//! Traces live in a bounded in-memory window; nothing is persisted. A
//! trace is complete once its root span has been reported and no new span
//! has arrived within the quiescence window. When the window overflows,
//! the completed trace that has been quiet the longest is evicted first;
//! only if nothing has completed yet does the least-recently-touched
//! trace go.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use mesh_core::trace::Span;
use mesh_core::wire::{TraceNode, TraceResponse};

/// Operation prefixes identifying wrapper spans that the assembler
/// collapses unless the caller opts out.
const WRAPPER_PREFIXES: [&str; 2] = ["proxy_call_wrapper", "_internal_"];

/// How long a trace must stay quiet before it is considered complete.
pub const DEFAULT_QUIESCENCE: Duration = Duration::from_secs(2);
/// How many traces the window retains.
pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug)]
struct TraceBuffer {
    spans: Vec<Span>,
    last_seen: Instant,
}

impl TraceBuffer {
    /// Complete means the root span was reported and the trace has been
    /// quiet for the whole quiescence window.
    fn is_complete(&self, quiescence: Duration) -> bool {
        self.last_seen.elapsed() >= quiescence
            && self.spans.iter().any(|s| s.parent_span_id.is_none())
    }
}

#[derive(Debug, Default)]
struct Window {
    traces: HashMap<String, TraceBuffer>,
}

/// Bounded in-memory sink for reported spans.
#[derive(Debug, Clone)]
pub struct TraceStore {
    inner: Arc<Mutex<Window>>,
    capacity: usize,
    quiescence: Duration,
}

impl Default for TraceStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_QUIESCENCE)
    }
}

impl TraceStore {
    pub fn new(capacity: usize, quiescence: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Window::default())),
            capacity: capacity.max(1),
            quiescence,
        }
    }

    /// Append reported spans to their traces, evicting by completion
    /// time when the window overflows.
    pub fn ingest(&self, spans: Vec<Span>) {
        if spans.is_empty() {
            return;
        }
        let mut window = self.inner.lock();
        let now = Instant::now();
        for span in spans {
            let trace_id = span.trace_id.to_string();
            if !window.traces.contains_key(&trace_id) {
                while window.traces.len() >= self.capacity {
                    if !self.evict_one(&mut window) {
                        break;
                    }
                }
            }
            let buffer = window.traces.entry(trace_id).or_insert_with(|| TraceBuffer {
                spans: Vec::new(),
                last_seen: now,
            });
            buffer.spans.push(span);
            buffer.last_seen = now;
        }
    }

    /// Drop one trace: the longest-completed first, falling back to the
    /// least recently touched when nothing has completed yet.
    fn evict_one(&self, window: &mut Window) -> bool {
        let victim = window
            .traces
            .iter()
            .filter(|(_, buffer)| buffer.is_complete(self.quiescence))
            .min_by_key(|(_, buffer)| buffer.last_seen)
            .or_else(|| window.traces.iter().min_by_key(|(_, buffer)| buffer.last_seen))
            .map(|(id, _)| id.clone());
        match victim {
            Some(id) => window.traces.remove(&id).is_some(),
            None => false,
        }
    }

    pub fn trace_count(&self) -> usize {
        self.inner.lock().traces.len()
    }

    /// Assemble the call tree for one trace, or `None` if unknown.
    ///
    /// With `show_internal` false, wrapper spans are collapsed and their
    /// children promoted to the wrapper's parent.
    pub fn assemble(&self, trace_id: &str, show_internal: bool) -> Option<TraceResponse> {
        let (spans, complete) = {
            let window = self.inner.lock();
            let buffer = window.traces.get(trace_id)?;
            (buffer.spans.clone(), buffer.is_complete(self.quiescence))
        };
        Some(build_tree(trace_id, spans, complete, show_internal))
    }
}

/// Build the response tree from a trace's raw spans.
pub fn build_tree(
    trace_id: &str,
    mut spans: Vec<Span>,
    complete: bool,
    show_internal: bool,
) -> TraceResponse {
    spans.sort_by_key(|s| s.start_time);

    let agent_count = spans
        .iter()
        .map(|s| s.agent_name.as_str())
        .collect::<HashSet<_>>()
        .len();

    let present: HashSet<String> = spans.iter().map(|s| s.span_id.to_string()).collect();
    let mut children_of: HashMap<String, Vec<Span>> = HashMap::new();
    let mut roots: Vec<Span> = Vec::new();
    for span in spans {
        match span
            .parent_span_id
            .as_ref()
            .filter(|p| present.contains(p.as_str()))
        {
            // A parent that was never reported makes the span a root.
            Some(parent) => children_of
                .entry(parent.to_string())
                .or_default()
                .push(span),
            None => roots.push(span),
        }
    }

    let mut root_nodes: Vec<TraceNode> = roots
        .into_iter()
        .map(|span| attach_children(span, &mut children_of))
        .collect();

    if !show_internal {
        root_nodes = collapse_wrappers(root_nodes);
    }

    let span_count = count_nodes(&root_nodes);
    let duration_ms = root_nodes
        .iter()
        .map(|n| n.span.duration_ms)
        .fold(0.0_f64, f64::max);

    TraceResponse {
        trace_id: trace_id.to_string(),
        span_count,
        agent_count,
        duration_ms,
        complete,
        roots: root_nodes,
    }
}

fn attach_children(span: Span, children_of: &mut HashMap<String, Vec<Span>>) -> TraceNode {
    let own = children_of
        .remove(span.span_id.as_str())
        .unwrap_or_default();
    TraceNode {
        span,
        children: own
            .into_iter()
            .map(|child| attach_children(child, children_of))
            .collect(),
    }
}

fn is_wrapper(node: &TraceNode) -> bool {
    WRAPPER_PREFIXES
        .iter()
        .any(|prefix| node.span.operation.starts_with(prefix))
}

/// Remove wrapper nodes, promoting their children into their place.
fn collapse_wrappers(nodes: Vec<TraceNode>) -> Vec<TraceNode> {
    let mut out = Vec::with_capacity(nodes.len());
    for mut node in nodes {
        node.children = collapse_wrappers(node.children);
        if is_wrapper(&node) {
            out.extend(node.children);
        } else {
            out.push(node);
        }
    }
    out
}

fn count_nodes(nodes: &[TraceNode]) -> usize {
    nodes.iter().map(|n| 1 + count_nodes(&n.children)).sum()
}
