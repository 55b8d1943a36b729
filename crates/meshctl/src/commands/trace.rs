//! `meshctl trace`: fetch and render one distributed trace.

use mesh_core::error::Result;

use crate::caller::Caller;
use crate::config::ControllerConfig;
use crate::output::{self, OutputFormat};

pub async fn run(
    config: ControllerConfig,
    trace_id: String,
    format: OutputFormat,
    show_internal: bool,
) -> Result<()> {
    let caller = Caller::new(&config.registry_url);
    let trace = caller.get_trace(trace_id.trim(), show_internal).await?;

    match format {
        OutputFormat::Json => output::json(&trace),
        OutputFormat::Human => {
            print!("{}", output::trace_tree(&trace));
            if !trace.complete {
                output::warning("trace is still receiving spans");
            }
        }
    }
    Ok(())
}
