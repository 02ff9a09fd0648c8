//! CLI subcommands.

pub mod config;
pub mod list;
pub mod run;

use std::path::{Path, PathBuf};

use zoocheck_core::{discover, HarnessConfig, ModelCase};

/// Default configuration file location.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("zoocheck")
        .join("config.json")
}

/// Load the run configuration.
///
/// An explicit path must exist; the default path is used only if present.
/// Environment switches are applied last.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<HarnessConfig> {
    let mut config = match config_path {
        Some(path) => HarnessConfig::from_file(Path::new(path))
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path, e))?,
        None => {
            let path = default_config_path();
            if path.exists() {
                HarnessConfig::from_file(&path)?
            } else {
                HarnessConfig::default()
            }
        }
    };
    config.apply_env();
    Ok(config)
}

/// Discover cases under `root`, keeping those whose `opset/model` id contains `filter`.
pub fn select_cases(root: &Path, filter: Option<&str>) -> anyhow::Result<Vec<ModelCase>> {
    let cases = discover(root)?;
    Ok(match filter {
        Some(filter) => cases
            .into_iter()
            .filter(|c| c.id().contains(filter))
            .collect(),
        None => cases,
    })
}
