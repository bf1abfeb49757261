//! TOML configuration file loading
//!
//! Reads `~/.config/omni/beacon-voice/config.toml` unless a path is given.

use std::path::{Path, PathBuf};

use super::Config;
use crate::{Error, Result};

/// Load the config file at `path`, or the standard path when `None`
///
/// Returns `Config::default()` if the file doesn't exist. Unlike a missing
/// file, a file that exists but cannot be parsed is an error.
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid configuration
pub fn load_config_file(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return Ok(Config::default());
    };

    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(&path).map_err(|e| {
        Error::Config(format!("failed to read {}: {e}", path.display()))
    })?;

    let config: Config = toml::from_str(&content).map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "failed to parse config file");
        e
    })?;

    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/omni/beacon-voice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon-voice")
            .join("config.toml")
    })
}
