//! `meshctl call`: invoke a tool through the mesh.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use mesh_core::error::{MeshError, Result};

use crate::caller::{Caller, DispatchMode, ToolTarget};
use crate::config::ControllerConfig;
use crate::output::{self, OutputFormat};

#[allow(clippy::too_many_arguments)]
pub async fn run(
    config: ControllerConfig,
    target: String,
    args: Option<String>,
    file: Option<PathBuf>,
    use_proxy: bool,
    agent_url: Option<String>,
    ingress_domain: Option<String>,
    ingress_url: Option<String>,
    show_trace: bool,
    format: OutputFormat,
) -> Result<()> {
    let target = ToolTarget::parse(&target)?;
    let arguments = load_arguments(args, file)?;

    let mode = match (ingress_domain, ingress_url) {
        (Some(domain), Some(url)) => DispatchMode::Ingress { domain, url },
        (Some(_), None) | (None, Some(_)) => {
            return Err(MeshError::validation(
                "--ingress-domain and --ingress-url must be given together",
            ));
        }
        (None, None) if use_proxy => DispatchMode::Proxy,
        (None, None) => DispatchMode::Direct,
    };

    let caller = Caller::new(&config.registry_url);
    let outcome = caller
        .call(&target, arguments, &mode, agent_url.as_deref())
        .await?;

    if let Some(error) = &outcome.result.error {
        output::error(format!("{} (code {})", error.message, error.code));
        if show_trace {
            output::kv("trace", &outcome.trace_id);
        }
        return Err(MeshError::internal(format!(
            "tool call failed: {}",
            error.message
        )));
    }

    let result = outcome.result.result.clone().unwrap_or(Value::Null);
    match format {
        OutputFormat::Json => output::json(&result),
        OutputFormat::Human => match &result {
            Value::String(s) => println!("{}", s),
            other => output::json(other),
        },
    }

    if show_trace {
        output::kv("trace", &outcome.trace_id);
        // Give the provider's span report a moment to land.
        tokio::time::sleep(Duration::from_millis(500)).await;
        if let Ok(trace) = caller.get_trace(outcome.trace_id.as_str(), false).await {
            print!("{}", output::trace_tree(&trace));
        }
    }
    Ok(())
}

/// Arguments come inline as JSON, from a file, or default to `{}`.
fn load_arguments(args: Option<String>, file: Option<PathBuf>) -> Result<Value> {
    if args.is_some() && file.is_some() {
        return Err(MeshError::validation("pass JSON args inline or via --file, not both"));
    }
    let raw = match (args, file) {
        (Some(inline), None) => inline,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .map_err(|_| MeshError::not_found("arguments file", path.display().to_string()))?,
        (None, None) => return Ok(Value::Object(Default::default())),
        (Some(_), Some(_)) => unreachable!("checked above"),
    };
    let parsed: Value = serde_json::from_str(&raw)
        .map_err(|e| MeshError::validation(format!("invalid JSON arguments: {}", e)))?;
    if !parsed.is_object() {
        return Err(MeshError::validation("tool arguments must be a JSON object"));
    }
    Ok(parsed)
}
