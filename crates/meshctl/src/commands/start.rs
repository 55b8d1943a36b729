//! `meshctl start`: launch the registry and agent processes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::sleep;

use mesh_core::error::{MeshError, Result};

use crate::caller::Caller;
use crate::config::ControllerConfig;
use crate::output;
use crate::supervisor::{StartOptions, Supervisor};

/// Start the registry (unless already live) and the given agent scripts.
pub async fn run(
    config: ControllerConfig,
    agents: Vec<PathBuf>,
    registry_only: bool,
    detach: bool,
    log_level: Option<String>,
    env_overrides: Vec<(String, String)>,
) -> Result<()> {
    let detach = detach || mesh_core::env::enable_background();
    if !detach && agents.len() > 1 {
        return Err(MeshError::validation(
            "foreground mode supervises a single agent; add --detach",
        ));
    }
    let supervisor = Supervisor::new(config.clone());
    let options = StartOptions {
        detach,
        log_level,
        env_overrides,
    };

    if !registry_reachable(&config).await {
        // The registry always runs detached; the foreground slot belongs
        // to the agent.
        let registry_options = StartOptions {
            detach: true,
            ..options.clone()
        };
        let record = supervisor.start_registry(&registry_options).await?;
        output::info(format!("registry starting (pid {})", record.pid));
        wait_for_registry(&config).await?;
        output::success(format!("registry ready at {}", config.registry_url));
    } else {
        output::info(format!("registry already running at {}", config.registry_url));
    }

    if registry_only {
        return Ok(());
    }
    if agents.is_empty() {
        return Err(MeshError::validation(
            "no agents given; pass script paths or use --registry-only",
        ));
    }

    for script in &agents {
        let name = agent_name(script);
        let record = supervisor.start_agent(&name, script, &options).await?;
        output::success(format!(
            "{} started (pid {}, log {})",
            name,
            record.pid,
            record.log_path.display()
        ));
    }
    Ok(())
}

/// The process name of an agent script: its file stem.
pub fn agent_name(script: &Path) -> String {
    script
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("agent")
        .to_string()
}

async fn registry_reachable(config: &ControllerConfig) -> bool {
    Caller::new(&config.registry_url).registry_health().await.is_ok()
}

/// Poll the registry's `/health` until it answers or the startup timeout
/// lapses.
async fn wait_for_registry(config: &ControllerConfig) -> Result<()> {
    let caller = Caller::new(&config.registry_url);
    let deadline = tokio::time::Instant::now() + config.startup_timeout;
    while tokio::time::Instant::now() < deadline {
        sleep(Duration::from_millis(500)).await;
        if caller.registry_health().await.is_ok() {
            return Ok(());
        }
    }
    Err(MeshError::timeout(format!(
        "registry did not become ready within {:?}",
        config.startup_timeout
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_name_from_script() {
        assert_eq!(agent_name(Path::new("/tmp/agents/hello_world.py")), "hello_world");
        assert_eq!(agent_name(Path::new("weather.py")), "weather");
    }
}
