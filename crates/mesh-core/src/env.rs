//! Environment variables recognized across the mesh.
//!
//! Both the registry and the controller read the same `MCP_MESH_*`
//! variables. Accessors return typed values with the documented defaults;
//! malformed values fall back to the default rather than aborting startup.

use std::env;
use std::time::Duration;

/// Registry bind/connect host. Default `localhost`.
pub const REGISTRY_HOST: &str = "MCP_MESH_REGISTRY_HOST";
/// Registry bind/connect port. Default `8000`.
pub const REGISTRY_PORT: &str = "MCP_MESH_REGISTRY_PORT";
/// Full registry URL; overrides host/port when set.
pub const REGISTRY_URL: &str = "MCP_MESH_REGISTRY_URL";
/// Registry database path. Default `mcp_mesh_registry.db`.
pub const DB_PATH: &str = "MCP_MESH_DB_PATH";
/// Log level filter. Default `info`.
pub const LOG_LEVEL: &str = "MCP_MESH_LOG_LEVEL";
/// Verbose debug mode toggle.
pub const DEBUG_MODE: &str = "MCP_MESH_DEBUG_MODE";
/// Agent heartbeat interval in seconds. Default `30`.
pub const HEALTH_CHECK_INTERVAL: &str = "MCP_MESH_HEALTH_CHECK_INTERVAL";
/// Per-agent-type liveness thresholds for the registry, comma-separated
/// `type=timeout_s:eviction_s` entries (e.g. `llm-provider=30:60,tool=90:180`).
pub const LIVENESS_OVERRIDES: &str = "MCP_MESH_LIVENESS_OVERRIDES";
/// Seconds to wait for a supervised process to become ready. Default `30`.
pub const STARTUP_TIMEOUT: &str = "MCP_MESH_STARTUP_TIMEOUT";
/// Seconds to wait for graceful shutdown before SIGKILL. Default `10`.
pub const SHUTDOWN_TIMEOUT: &str = "MCP_MESH_SHUTDOWN_TIMEOUT";
/// Makes `meshctl start` detach without the `--detach` flag.
pub const ENABLE_BACKGROUND: &str = "MCP_MESH_ENABLE_BACKGROUND";
/// Explicit PID file path override for a single supervised process.
pub const PID_FILE: &str = "MCP_MESH_PID_FILE";

/// Default file name of the registry database.
pub const DEFAULT_DB_FILE: &str = "mcp_mesh_registry.db";

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    var(name).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn bool_var(name: &str, default: bool) -> bool {
    match var(name) {
        Some(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

pub fn registry_host() -> String {
    var(REGISTRY_HOST).unwrap_or_else(|| "localhost".to_string())
}

pub fn registry_port() -> u16 {
    parse_or(REGISTRY_PORT, 8000)
}

/// The registry URL clients should talk to.
pub fn registry_url() -> String {
    var(REGISTRY_URL)
        .map(|u| u.trim_end_matches('/').to_string())
        .unwrap_or_else(|| format!("http://{}:{}", registry_host(), registry_port()))
}

pub fn db_path() -> String {
    var(DB_PATH).unwrap_or_else(|| DEFAULT_DB_FILE.to_string())
}

pub fn log_level() -> String {
    var(LOG_LEVEL).unwrap_or_else(|| "info".to_string())
}

pub fn debug_mode() -> bool {
    bool_var(DEBUG_MODE, false)
}

pub fn health_check_interval() -> Duration {
    Duration::from_secs(parse_or(HEALTH_CHECK_INTERVAL, 30))
}

pub fn startup_timeout() -> Duration {
    Duration::from_secs(parse_or(STARTUP_TIMEOUT, 30))
}

pub fn shutdown_timeout() -> Duration {
    Duration::from_secs(parse_or(SHUTDOWN_TIMEOUT, 10))
}

pub fn enable_background() -> bool {
    bool_var(ENABLE_BACKGROUND, false)
}

pub fn pid_file() -> Option<String> {
    var(PID_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; keep them to pure parsing of the
    // fallback helpers so they stay order-independent.

    #[test]
    fn test_defaults_without_env() {
        // These variables are not set in the test environment.
        assert_eq!(parse_or("MCP_MESH_TEST_UNSET_PORT", 8000u16), 8000);
        assert!(!bool_var("MCP_MESH_TEST_UNSET_FLAG", false));
        assert!(bool_var("MCP_MESH_TEST_UNSET_FLAG2", true));
    }

    #[test]
    fn test_registry_url_shape() {
        let url = registry_url();
        assert!(url.starts_with("http"));
        assert!(!url.ends_with('/'));
    }
}
