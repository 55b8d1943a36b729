//! `meshctl list`: registered agents with capabilities and counters.

use mesh_core::error::Result;

use crate::caller::{Caller, DispatchMode};
use crate::config::ControllerConfig;
use crate::output::{self, OutputFormat};

pub async fn run(
    config: ControllerConfig,
    filter: Option<String>,
    format: OutputFormat,
    wide: bool,
    no_deps: bool,
) -> Result<()> {
    let caller = Caller::new(&config.registry_url);
    let mut listing = caller.list_agents(&DispatchMode::Direct).await?;

    if let Some(pattern) = &filter {
        let pattern = pattern.to_lowercase();
        listing.agents.retain(|agent| {
            agent.name.to_lowercase().contains(&pattern)
                || agent
                    .capabilities
                    .iter()
                    .any(|c| c.capability.to_lowercase().contains(&pattern))
        });
        listing.count = listing.agents.len();
    }

    match format {
        OutputFormat::Json => output::json(&listing),
        OutputFormat::Human => {
            if listing.agents.is_empty() {
                output::info("no agents registered");
                return Ok(());
            }
            println!("{}", output::agents_table(&listing.agents, wide, !no_deps));
            println!("{} agent(s)", listing.count);
        }
    }
    Ok(())
}
