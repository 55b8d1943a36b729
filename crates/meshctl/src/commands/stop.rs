//! `meshctl stop`: stop one process, or everything.

use std::time::Duration;

use mesh_core::error::Result;

use crate::config::ControllerConfig;
use crate::output;
use crate::supervisor::Supervisor;

/// Which processes a bare `meshctl stop` targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopScope {
    /// Agents and the registry.
    All,
    /// Registry only.
    Registry,
    /// Agents only.
    Agents,
}

pub async fn run(
    config: ControllerConfig,
    name: Option<String>,
    scope: StopScope,
    force: bool,
    clean: bool,
    timeout: Option<u64>,
) -> Result<()> {
    let timeout = timeout
        .map(Duration::from_secs)
        .unwrap_or(config.shutdown_timeout);
    let supervisor = Supervisor::new(config);

    if let Some(name) = name {
        supervisor.stop(&name, timeout, force).await?;
        output::success(format!("{} stopped", name));
        return Ok(());
    }

    match scope {
        StopScope::Registry => {
            supervisor.stop("registry", timeout, force).await?;
            output::success("registry stopped");
            if clean {
                supervisor.clean_state().await?;
                output::success("state cleaned");
            }
        }
        StopScope::Agents => {
            supervisor.stop_all(true, timeout, force, clean).await?;
            output::success("agents stopped");
        }
        StopScope::All => {
            supervisor.stop_all(false, timeout, force, clean).await?;
            output::success("mesh stopped");
            if clean {
                output::success("state cleaned");
            }
        }
    }
    Ok(())
}
