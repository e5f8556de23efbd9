//! Default values for every configuration field
//!
//! Config structs reference these through `#[serde(default = "...")]`
//! functions so that a missing key and `Default::default()` agree.

use std::net::Ipv4Addr;

// ============================================================================
// Environment
// ============================================================================

/// Overrides the cairn home directory (default `~/.cairn`)
pub const ENV_CAIRN_HOME: &str = "CAIRN_HOME";

/// Overrides the config file path
pub const ENV_CAIRN_CONFIG: &str = "CAIRN_CONFIG";

// ============================================================================
// Connection
// ============================================================================

pub const LOCALHOST_IPV4: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);

pub const DEFAULT_BACKEND_HOST: &str = "127.0.0.1";

/// Default port for DAP-speaking backends
pub const DEFAULT_BACKEND_PORT: u16 = 4711;

/// Total time budget for establishing the socket (ms)
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 10_000;

/// Reply timeout for a single backend request (ms)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Initial interval between connect attempts (ms)
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 100;

/// Maximum connect attempts before giving up
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 30;

/// Consecutive "connection refused" results before fast-fail
pub const DEFAULT_MAX_CONNECTION_REFUSED_ATTEMPTS: u32 = 10;

/// How long to wait for a spawned backend's first output line (ms)
pub const DEFAULT_READINESS_TIMEOUT_MS: u64 = 5_000;

/// Time allowed for a graceful backend shutdown (ms)
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 2_000;

/// Capacity of event channels between transport and session
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Consecutive undecodable messages tolerated before the connection is dropped
pub const DEFAULT_MAX_CONSECUTIVE_PARSE_FAILURES: u32 = 8;

pub const DEFAULT_TCP_KEEPALIVE_TIME_SECS: u64 = 30;
pub const DEFAULT_TCP_KEEPALIVE_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_TCP_KEEPALIVE_RETRIES: u32 = 3;

// ============================================================================
// Reconnect
// ============================================================================

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_INITIAL_RECONNECT_DELAY_MS: u64 = 200;
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 5_000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_JITTER_RATIO: f64 = 0.1;

// ============================================================================
// Session
// ============================================================================

/// Delay before a breakpoint mutation is written to the store (ms)
pub const DEFAULT_PERSIST_DEBOUNCE_MS: u64 = 500;

/// Adapter id sent in the DAP initialize request
pub const DEFAULT_ADAPTER_ID: &str = "cairn";

/// Placeholder replaced by the backend port in spawn arguments
pub const PORT_PLACEHOLDER: &str = "{port}";

// ============================================================================
// Logging
// ============================================================================

pub const DEFAULT_LOG_LEVEL: &str = "info";
