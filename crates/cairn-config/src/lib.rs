//! Configuration types and loading for cairn
//!
//! - `connection` - transport timeouts, connect retry and reconnect backoff
//! - `runner` - which backend to drive and how to reach it
//! - `types` - the root [`Config`] plus session and logging sections
//!
//! ```rust,ignore
//! use cairn_config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("cairn.toml"))?;
//! println!("request timeout: {}ms", config.connection.request_timeout_ms);
//! ```

mod connection;
mod loader;
mod runner;
mod types;

pub mod constants;
pub mod paths;

pub use connection::{ConnectionConfig, ReconnectConfig};
pub use loader::{
    create_config, load_config, load_config_from_str, load_config_or_default,
    resolve_config_path, ConfigError, DEFAULT_CONFIG,
};
pub use runner::{BackendKind, ConnectionMode, RunnerConfig};
pub use types::{Config, LoggingConfig, SessionConfig};

pub use constants::{
    DEFAULT_TCP_KEEPALIVE_INTERVAL_SECS, DEFAULT_TCP_KEEPALIVE_RETRIES,
    DEFAULT_TCP_KEEPALIVE_TIME_SECS, LOCALHOST_IPV4,
};
