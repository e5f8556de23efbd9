//! Root configuration and session/logging sections

use crate::connection::ConnectionConfig;
use crate::constants::{DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_LOG_LEVEL, DEFAULT_PERSIST_DEBOUNCE_MS};
use crate::runner::RunnerConfig;
use cairn_core::PauseOnBreaks;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete cairn configuration (`cairn.toml`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ============================================================================
// Session Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Exception break behavior applied on attach
    #[serde(default)]
    pub pause_on_breaks: PauseOnBreaks,
    /// Delay before breakpoint changes are written to the store (ms)
    #[serde(default = "default_persist_debounce_ms")]
    pub persist_debounce_ms: u64,
    /// Breakpoint store location (default: `~/.cairn/breakpoints.json`)
    #[serde(default)]
    pub breakpoints_file: Option<PathBuf>,
    /// Capacity of each observer channel
    #[serde(default = "default_observer_capacity")]
    pub observer_channel_capacity: usize,
}

fn default_persist_debounce_ms() -> u64 {
    DEFAULT_PERSIST_DEBOUNCE_MS
}

fn default_observer_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pause_on_breaks: PauseOnBreaks::default(),
            persist_debounce_ms: default_persist_debounce_ms(),
            breakpoints_file: None,
            observer_channel_capacity: default_observer_capacity(),
        }
    }
}

// ============================================================================
// Logging Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Write logs to this file (daily rotation) instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub show_target: bool,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            show_target: false,
        }
    }
}
