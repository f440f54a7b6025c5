use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use icalevents_core::settings::Settings;

/// Get the config directory path (~/.config/icalevents)
pub fn config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Could not determine config directory")?
        .join("icalevents");
    Ok(config_dir)
}

/// Get the config file path (~/.config/icalevents/config.toml)
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Load settings from `path`, or from the default config file.
/// A missing file leaves every setting at its default.
pub fn load(path: Option<&Path>) -> Result<Settings> {
    let path = match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found at {}", path.display());
            }
            path.to_path_buf()
        }
        None => config_path()?,
    };

    Settings::load(Some(path.as_path()))
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}
