//! `meshctl status`: registry health plus supervised processes.

use serde_json::json;

use mesh_core::error::Result;

use crate::caller::{Caller, DispatchMode};
use crate::config::ControllerConfig;
use crate::output::{self, OutputFormat};
use crate::supervisor::Supervisor;

pub async fn run(config: ControllerConfig, format: OutputFormat, verbose: bool) -> Result<()> {
    let caller = Caller::new(&config.registry_url);
    let supervisor = Supervisor::new(config.clone());

    let health = caller.registry_health().await.ok();
    let processes = supervisor.list_processes().await;

    if format == OutputFormat::Json {
        let processes: Vec<_> = processes
            .iter()
            .map(|p| {
                json!({
                    "name": p.name,
                    "pid": p.pid,
                    "alive": p.alive,
                    "log": p.log_path,
                })
            })
            .collect();
        output::json(&json!({
            "registry_url": config.registry_url,
            "registry": health,
            "processes": processes,
        }));
        return Ok(());
    }

    match &health {
        Some(body) => {
            output::success(format!("registry healthy at {}", config.registry_url));
            output::kv("agents", body.get("agents_total").cloned().unwrap_or_default());
            output::kv("uptime_s", body.get("uptime_s").cloned().unwrap_or_default());
        }
        None => output::warning(format!("registry unreachable at {}", config.registry_url)),
    }

    if processes.is_empty() {
        output::info("no supervised processes");
    } else {
        println!("{}", output::process_table(&processes));
    }

    if verbose && health.is_some() {
        let listing = caller.list_agents(&DispatchMode::Direct).await?;
        for agent in &listing.agents {
            output::kv(
                &agent.name,
                format!(
                    "{} deps {}/{} endpoint {}",
                    agent.status.as_str(),
                    agent.dependencies_resolved,
                    agent.dependencies_total,
                    agent.endpoint
                ),
            );
        }
    }
    Ok(())
}
