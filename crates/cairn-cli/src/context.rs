//! CLI context - configuration shared by the debug commands

use anyhow::{Context, Result};
use cairn_config::paths::{default_breakpoints_path, default_config_path, expand_tilde};
use cairn_config::{constants::ENV_CAIRN_CONFIG, load_config_or_default, Config};
use cairn_logging::{init, init_with_file, LogConfig, LogOutput, WorkerGuard};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CliContext {
    pub config: Arc<Config>,
    pub config_path: PathBuf,
    /// Where `config_path` came from, for diagnostics.
    pub config_source: &'static str,
}

impl CliContext {
    /// Load configuration from `--config`, then `$CAIRN_CONFIG`, then the
    /// cairn home. A missing file means defaults.
    pub fn new(explicit: Option<&Path>) -> Result<Self> {
        let (config_path, config_source) = match explicit {
            Some(path) => (path.to_path_buf(), "--config"),
            None if std::env::var_os(ENV_CAIRN_CONFIG).is_some() => {
                (default_config_path(), ENV_CAIRN_CONFIG)
            }
            None => (default_config_path(), "default"),
        };
        let config = load_config_or_default(&config_path).with_context(|| {
            format!("Failed to load config from {}", config_path.display())
        })?;
        Ok(Self {
            config: Arc::new(config),
            config_path,
            config_source,
        })
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            config_path: PathBuf::new(),
            config_source: "inline",
        }
    }

    /// Install the global subscriber. Logs go to the configured file or to
    /// stderr so that stdout stays with the console.
    pub fn init_logging(&self, debug: bool) -> Result<Option<WorkerGuard>> {
        let log_config = LogConfig::from_config(&self.config.logging)
            .debug(debug)
            .output(LogOutput::Stderr);
        match &self.config.logging.file {
            Some(file) => {
                let guard = init_with_file(log_config, &expand_tilde(file))
                    .context("Failed to open log file")?;
                Ok(Some(guard))
            }
            None => {
                init(log_config);
                Ok(None)
            }
        }
    }

    pub fn breakpoints_path(&self) -> PathBuf {
        self.config
            .session
            .breakpoints_file
            .as_deref()
            .map(expand_tilde)
            .unwrap_or_else(default_breakpoints_path)
    }
}
