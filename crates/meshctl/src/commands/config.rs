//! `meshctl config`: show the effective configuration or its file path.

use mesh_core::error::{MeshError, Result};

use crate::config::ControllerConfig;
use crate::output;

/// Rendering for `config show`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

pub fn show(config: &ControllerConfig, format: ConfigFormat) -> Result<()> {
    let document = config.as_file();
    match format {
        ConfigFormat::Json => output::json(&document),
        ConfigFormat::Yaml => {
            let rendered = serde_yaml::to_string(&document)
                .map_err(|e| MeshError::internal(format!("failed to render yaml: {}", e)))?;
            print!("{}", rendered);
        }
    }
    Ok(())
}

pub fn path(config: &ControllerConfig) -> Result<()> {
    println!("{}", config.config_path().display());
    Ok(())
}
