//! Terminal output for meshctl: styled messages, tables and JSON mode.

use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use console::style;
use serde::Serialize;
use std::fmt::Display;

use mesh_core::types::AgentStatus;
use mesh_core::wire::{AgentSummary, TraceNode, TraceResponse};

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable formatted output
    #[default]
    Human,
    /// JSON output for scripting
    Json,
}

impl OutputFormat {
    pub fn from_flag(json: bool) -> Self {
        if json { Self::Json } else { Self::Human }
    }
}

/// Print a success message
pub fn success(msg: impl Display) {
    println!("{} {}", style("✓").green().bold(), msg);
}

/// Print an error message
pub fn error(msg: impl Display) {
    eprintln!("{} {}", style("✗").red().bold(), msg);
}

/// Print a warning message
pub fn warning(msg: impl Display) {
    println!("{} {}", style("⚠").yellow().bold(), msg);
}

/// Print an info message
pub fn info(msg: impl Display) {
    println!("{} {}", style("ℹ").blue().bold(), msg);
}

/// Print a key-value pair
pub fn kv(key: impl Display, value: impl Display) {
    println!("  {}: {}", style(key).cyan(), value);
}

/// Serialize a value as pretty JSON to stdout.
pub fn json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(rendered) => println!("{}", rendered),
        Err(err) => error(format!("failed to render JSON: {}", err)),
    }
}

fn status_cell(status: AgentStatus) -> Cell {
    match status {
        AgentStatus::Healthy => Cell::new("healthy").fg(Color::Green),
        AgentStatus::Degraded => Cell::new("degraded").fg(Color::Yellow),
        AgentStatus::Expired => Cell::new("expired").fg(Color::Red),
    }
}

/// Render the `meshctl list` agent table.
pub fn agents_table(agents: &[AgentSummary], wide: bool, with_deps: bool) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let mut header = vec!["NAME", "STATUS", "TYPE", "CAPABILITIES"];
    if with_deps {
        header.push("DEPS");
    }
    if wide {
        header.extend(["ENDPOINT", "NAMESPACE", "ID"]);
    }
    table.set_header(header);

    for agent in agents {
        let capabilities = agent
            .capabilities
            .iter()
            .map(|c| c.capability.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let mut row = vec![
            Cell::new(&agent.name),
            status_cell(agent.status),
            Cell::new(agent.agent_type.as_str()),
            Cell::new(capabilities),
        ];
        if with_deps {
            row.push(Cell::new(format!(
                "{}/{}",
                agent.dependencies_resolved, agent.dependencies_total
            )));
        }
        if wide {
            row.push(Cell::new(&agent.endpoint));
            row.push(Cell::new(&agent.namespace));
            row.push(Cell::new(agent.id.as_str()));
        }
        table.add_row(row);
    }
    table
}

/// One row of the supervised-process table.
pub struct ProcessRow {
    pub name: String,
    pub pid: Option<u32>,
    pub alive: bool,
    pub log_path: String,
}

/// Render the `meshctl status` process table.
pub fn process_table(rows: &[ProcessRow]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["PROCESS", "PID", "STATE", "LOG"]);
    for row in rows {
        let pid = row.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
        let state = if row.alive {
            Cell::new("running").fg(Color::Green)
        } else {
            Cell::new("stopped").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(&row.name),
            Cell::new(pid),
            state,
            Cell::new(&row.log_path),
        ]);
    }
    table
}

/// Render one assembled trace as an indented tree.
pub fn trace_tree(trace: &TraceResponse) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "trace {}  spans={} agents={} duration={:.1}ms complete={}\n",
        trace.trace_id, trace.span_count, trace.agent_count, trace.duration_ms, trace.complete
    ));
    for root in &trace.roots {
        render_node(root, 0, &mut out);
    }
    out
}

fn render_node(node: &TraceNode, depth: usize, out: &mut String) {
    let glyph = if node.span.success { "✓" } else { "✗" };
    let indent = "  ".repeat(depth);
    out.push_str(&format!(
        "{}{} {} [{}] {:.1}ms",
        indent, glyph, node.span.operation, node.span.agent_name, node.span.duration_ms
    ));
    if let Some(err) = &node.span.error_message {
        out.push_str(&format!("  ({})", err));
    }
    out.push('\n');
    for child in &node.children {
        render_node(child, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mesh_core::id::{AgentId, SpanId, TraceId};
    use mesh_core::trace::Span;
    use mesh_core::types::AgentType;

    fn summary(name: &str) -> AgentSummary {
        AgentSummary {
            id: AgentId::from(format!("{}-00000000", name).as_str()),
            name: name.to_string(),
            version: "1.0.0".to_string(),
            endpoint: "http://localhost:9090".to_string(),
            namespace: "default".to_string(),
            agent_type: AgentType::Tool,
            status: AgentStatus::Healthy,
            last_heartbeat: Utc::now(),
            dependencies_total: 2,
            dependencies_resolved: 1,
            capabilities: vec![],
        }
    }

    #[test]
    fn test_agents_table_columns() {
        let table = agents_table(&[summary("hello")], false, true);
        let rendered = table.to_string();
        assert!(rendered.contains("hello"));
        assert!(rendered.contains("1/2"));
        assert!(!rendered.contains("ENDPOINT"));

        let wide = agents_table(&[summary("hello")], true, true).to_string();
        assert!(wide.contains("ENDPOINT"));
        assert!(wide.contains("http://localhost:9090"));
    }

    #[test]
    fn test_trace_tree_rendering() {
        let now = Utc::now();
        let span = Span {
            trace_id: TraceId::generate(),
            span_id: SpanId::generate(),
            parent_span_id: None,
            agent_name: "meshctl".to_string(),
            agent_id: None,
            ip_address: None,
            runtime: None,
            operation: "cli_call".to_string(),
            capability: None,
            target_agent: None,
            start_time: now,
            end_time: now,
            duration_ms: 5.0,
            success: true,
            error_message: None,
        };
        let response = TraceResponse {
            trace_id: span.trace_id.to_string(),
            span_count: 1,
            agent_count: 1,
            duration_ms: 5.0,
            complete: true,
            roots: vec![TraceNode { span, children: vec![] }],
        };
        let rendered = trace_tree(&response);
        assert!(rendered.contains("cli_call"));
        assert!(rendered.contains("spans=1"));
        assert!(rendered.contains('✓'));
    }
}
