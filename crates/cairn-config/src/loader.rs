//! Configuration file loading and validation
//!
//! - [`load_config`] - strict loader, errors if the file is missing
//! - [`load_config_from_str`] - parse and validate TOML text
//! - [`create_config`] - write the embedded default template

use crate::paths::{default_config_path, ensure_parent_dir, expand_tilde, DEFAULT_CONFIG_FILENAME};
use crate::Config;
use std::path::{Path, PathBuf};
use tracing::debug;

include!(concat!(env!("OUT_DIR"), "/embedded_config.rs"));

/// Errors that can occur during config loading
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum ConfigError {
    #[error("Config file not found: {0}. Run 'cairn init' to create a default config.")]
    NotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for cairn_core::Error {
    fn from(err: ConfigError) -> Self {
        cairn_core::Error::Config(err.to_string())
    }
}

/// Resolve a config path argument.
///
/// An existing path is used as-is. The bare default filename falls back to
/// the cairn home location. `~` is expanded.
pub fn resolve_config_path(path: &Path) -> PathBuf {
    let path = expand_tilde(path);
    if path.exists() {
        return path;
    }
    if path == Path::new(DEFAULT_CONFIG_FILENAME) {
        let home_config = default_config_path();
        debug!(path = %home_config.display(), "Using config from cairn home");
        return home_config;
    }
    path
}

/// Load configuration from a TOML file. Never creates files.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let resolved = resolve_config_path(path);
    if !resolved.exists() {
        return Err(ConfigError::NotFound(resolved));
    }

    debug!(path = %resolved.display(), "Loading config file");
    let content = std::fs::read_to_string(&resolved)?;
    load_config_from_str(&content)
}

/// Load the config at `path` if present, defaults otherwise.
pub fn load_config_or_default(path: &Path) -> Result<Config, ConfigError> {
    match load_config(path) {
        Err(ConfigError::NotFound(missing)) => {
            debug!(path = %missing.display(), "No config file, using defaults");
            Ok(Config::default())
        }
        other => other,
    }
}

/// Write the default template to `path` unless a file already exists there.
pub fn create_config(path: &Path) -> Result<PathBuf, std::io::Error> {
    let path = expand_tilde(path);
    if path.exists() {
        debug!(path = %path.display(), "Config file already exists");
        return Ok(path);
    }
    ensure_parent_dir(&path)?;
    debug!(path = %path.display(), "Writing default config file");
    std::fs::write(&path, DEFAULT_CONFIG)?;
    Ok(path)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut all_errors = config.connection.validate();
    all_errors.extend(config.runner.validate());

    if config.session.observer_channel_capacity == 0 {
        all_errors.push("session.observer_channel_capacity must be greater than 0".to_string());
    }

    if all_errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(all_errors.join("; ")))
    }
}
