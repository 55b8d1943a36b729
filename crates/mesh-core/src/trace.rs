//! Distributed-trace context and span records.
//!
//! Callers mint a trace id on the outermost call; every hop mints its own
//! span id, treats the incoming `X-Parent-Span` as its parent, and forwards
//! its span id downstream. Completed spans are reported to the registry,
//! which assembles them into a tree keyed by trace id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{SpanId, TraceId};

/// Header carrying the 128-bit trace id (32 hex chars).
pub const HEADER_TRACE_ID: &str = "X-Trace-ID";
/// Header carrying the caller's span id (16 hex chars).
pub const HEADER_PARENT_SPAN: &str = "X-Parent-Span";

/// The trace position of one hop: who we are and who called us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
}

impl TraceContext {
    /// Start a brand-new trace at the edge.
    pub fn new_root() -> Self {
        Self {
            trace_id: TraceId::generate(),
            span_id: SpanId::generate(),
            parent_span_id: None,
        }
    }

    /// Continue a trace received from an upstream hop.
    ///
    /// Invalid or missing header values fall back to a new root so a single
    /// malformed caller never breaks dispatch.
    pub fn from_headers(trace_id: Option<&str>, parent_span: Option<&str>) -> Self {
        let trace_id = trace_id.and_then(|v| v.parse::<TraceId>().ok());
        let parent = parent_span.and_then(|v| v.parse::<SpanId>().ok());
        match trace_id {
            Some(trace_id) => Self {
                trace_id,
                span_id: SpanId::generate(),
                parent_span_id: parent,
            },
            None => Self::new_root(),
        }
    }

    /// The context a downstream hop should observe: same trace, our span as
    /// its parent.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: SpanId::generate(),
            parent_span_id: Some(self.span_id.clone()),
        }
    }

    /// Header pairs to attach to an outbound request.
    pub fn outbound_headers(&self) -> [(&'static str, String); 2] {
        [
            (HEADER_TRACE_ID, self.trace_id.to_string()),
            (HEADER_PARENT_SPAN, self.span_id.to_string()),
        ]
    }
}

/// One timed unit of work reported by a caller or provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: f64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Builder tracking one in-flight span from start to report.
#[derive(Debug, Clone)]
pub struct SpanRecorder {
    context: TraceContext,
    agent_name: String,
    operation: String,
    capability: Option<String>,
    target_agent: Option<String>,
    started_at: DateTime<Utc>,
}

impl SpanRecorder {
    pub fn start(context: TraceContext, agent_name: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            context,
            agent_name: agent_name.into(),
            operation: operation.into(),
            capability: None,
            target_agent: None,
            started_at: Utc::now(),
        }
    }

    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    pub fn target_agent(mut self, target: impl Into<String>) -> Self {
        self.target_agent = Some(target.into());
        self
    }

    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    /// Close the span, producing the record to report.
    pub fn finish(self, success: bool, error_message: Option<String>) -> Span {
        let end_time = Utc::now();
        let duration_ms = (end_time - self.started_at)
            .num_microseconds()
            .map(|us| us as f64 / 1000.0)
            .unwrap_or_default();
        Span {
            trace_id: self.context.trace_id,
            span_id: self.context.span_id,
            parent_span_id: self.context.parent_span_id,
            agent_name: self.agent_name,
            agent_id: None,
            ip_address: None,
            runtime: Some("rust".to_string()),
            operation: self.operation,
            capability: self.capability,
            target_agent: self.target_agent,
            start_time: self.started_at,
            end_time,
            duration_ms,
            success,
            error_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_context_has_no_parent() {
        let ctx = TraceContext::new_root();
        assert!(ctx.parent_span_id.is_none());
        assert_eq!(ctx.trace_id.as_str().len(), 32);
        assert_eq!(ctx.span_id.as_str().len(), 16);
    }

    #[test]
    fn test_child_links_to_parent() {
        let root = TraceContext::new_root();
        let child = root.child();
        assert_eq!(child.trace_id, root.trace_id);
        assert_eq!(child.parent_span_id.as_ref(), Some(&root.span_id));
        assert_ne!(child.span_id, root.span_id);
    }

    #[test]
    fn test_from_headers_roundtrip() {
        let root = TraceContext::new_root();
        let headers = root.outbound_headers();
        let next = TraceContext::from_headers(Some(&headers[0].1), Some(&headers[1].1));
        assert_eq!(next.trace_id, root.trace_id);
        assert_eq!(next.parent_span_id.as_ref(), Some(&root.span_id));
    }

    #[test]
    fn test_from_headers_garbage_falls_back_to_root() {
        let ctx = TraceContext::from_headers(Some("nonsense"), Some("alsobad"));
        assert!(ctx.parent_span_id.is_none());
        assert_eq!(ctx.trace_id.as_str().len(), 32);
    }

    #[test]
    fn test_recorder_produces_linked_span() {
        let ctx = TraceContext::new_root();
        let span = SpanRecorder::start(ctx.clone(), "meshctl", "tool_call")
            .capability("greeting")
            .finish(true, None);
        assert_eq!(span.trace_id, ctx.trace_id);
        assert_eq!(span.span_id, ctx.span_id);
        assert!(span.success);
        assert!(span.duration_ms >= 0.0);
        assert!(span.end_time >= span.start_time);
    }
}
