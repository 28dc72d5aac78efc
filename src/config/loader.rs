use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

use super::HarnessConfig;
use crate::error::{ErrorCode, HarnessError};

/// Load a harness configuration, picking the format from the extension
///
/// `.yaml`/`.yml` (the default), `.json` and `.toml` are accepted.
/// Environment overrides are applied before validation.
pub fn load_config(path: &Path) -> Result<HarnessConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        HarnessError::config_with_code(
            ErrorCode::CONFIG_NOT_FOUND,
            format!("cannot read configuration {}", path.display()),
        )
        .with_source(e)
    })?;

    let mut config = parse_config(&content, path)?;
    config.merge_env_vars()?;
    config.validate()?;

    debug!(
        "Loaded configuration from {} ({} datasets, {} expressions)",
        path.display(),
        config.datasets.len(),
        config.expressions.len()
    );
    Ok(config)
}

/// Parse configuration text in the format implied by `path`
pub fn parse_config(content: &str, path: &Path) -> Result<HarnessConfig> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("yaml")
        .to_ascii_lowercase();

    let config = match extension.as_str() {
        "json" => serde_json::from_str(content).map_err(HarnessError::from),
        "toml" => toml::from_str(content).map_err(HarnessError::from),
        _ => serde_yaml::from_str(content).map_err(HarnessError::from),
    };
    config.with_context(|| format!("Failed to parse {}", path.display()))
}
