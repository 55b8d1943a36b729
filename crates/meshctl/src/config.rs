//! Controller configuration and the `~/.mcp-mesh` state root.
//!
//! Precedence, lowest to highest: built-in defaults, the config file
//! (`config.yaml` or `config.json` in the state root), then `MCP_MESH_*`
//! environment variables. The loaded value is immutable for the life of
//! the process and passed explicitly to commands.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mesh_core::env;
use mesh_core::error::{MeshError, Result};

use crate::sanitize::sanitize_name;

/// Name of the state directory under the home directory.
pub const STATE_DIR_NAME: &str = ".mcp-mesh";

/// On-disk shape of the optional config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_timeout_s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_timeout_s: Option<u64>,
}

/// Resolved controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub registry_url: String,
    pub log_level: String,
    pub startup_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub state_root: PathBuf,
}

impl ControllerConfig {
    /// Load defaults + config file + environment overrides.
    pub fn load() -> Result<Self> {
        let state_root = default_state_root()?;
        Self::load_from(state_root)
    }

    /// Same as [`load`], with an explicit state root (used by tests).
    pub fn load_from(state_root: PathBuf) -> Result<Self> {
        let file = read_config_file(&state_root)?.unwrap_or_default();

        let registry_url = if std::env::var(env::REGISTRY_URL).is_ok()
            || std::env::var(env::REGISTRY_HOST).is_ok()
            || std::env::var(env::REGISTRY_PORT).is_ok()
        {
            env::registry_url()
        } else {
            file.registry_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(env::registry_url)
        };

        let log_level = std::env::var(env::LOG_LEVEL)
            .ok()
            .or(file.log_level)
            .unwrap_or_else(|| "info".to_string());

        let startup_timeout = file
            .startup_timeout_s
            .map(Duration::from_secs)
            .unwrap_or_else(env::startup_timeout);
        let shutdown_timeout = file
            .shutdown_timeout_s
            .map(Duration::from_secs)
            .unwrap_or_else(env::shutdown_timeout);

        Ok(Self {
            registry_url,
            log_level,
            startup_timeout,
            shutdown_timeout,
            state_root,
        })
    }

    pub fn pids_dir(&self) -> PathBuf {
        self.state_root.join("pids")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_root.join("logs")
    }

    /// PID file for one supervised process.
    ///
    /// `MCP_MESH_PID_FILE` overrides the location for the registry
    /// process only; agents always live under `pids/`.
    pub fn pid_path(&self, name: &str) -> PathBuf {
        if name == "registry" {
            if let Some(path) = env::pid_file() {
                return PathBuf::from(path);
            }
        }
        self.pids_dir().join(format!("{}.pid", sanitize_name(name)))
    }

    /// The registry database file the `--clean` flag removes.
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(env::db_path())
    }

    /// The config file that exists, or the default path for `config path`.
    pub fn config_path(&self) -> PathBuf {
        let yaml = self.state_root.join("config.yaml");
        if yaml.exists() {
            return yaml;
        }
        let json = self.state_root.join("config.json");
        if json.exists() {
            return json;
        }
        yaml
    }

    /// The effective settings as a config-file document.
    pub fn as_file(&self) -> ConfigFile {
        ConfigFile {
            registry_url: Some(self.registry_url.clone()),
            log_level: Some(self.log_level.clone()),
            startup_timeout_s: Some(self.startup_timeout.as_secs()),
            shutdown_timeout_s: Some(self.shutdown_timeout.as_secs()),
        }
    }
}

fn default_state_root() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(STATE_DIR_NAME))
        .ok_or_else(|| MeshError::internal("cannot determine home directory"))
}

fn read_config_file(state_root: &Path) -> Result<Option<ConfigFile>> {
    let yaml = state_root.join("config.yaml");
    if yaml.exists() {
        let raw = std::fs::read_to_string(&yaml)?;
        let parsed = serde_yaml::from_str(&raw)
            .map_err(|e| MeshError::validation(format!("invalid {}: {}", yaml.display(), e)))?;
        return Ok(Some(parsed));
    }
    let json = state_root.join("config.json");
    if json.exists() {
        let raw = std::fs::read_to_string(&json)?;
        let parsed = serde_json::from_str(&raw)
            .map_err(|e| MeshError::validation(format!("invalid {}: {}", json.display(), e)))?;
        return Ok(Some(parsed));
    }
    Ok(None)
}
