//! Backend connection configuration
//!
//! Timeouts, connect retry policy, and reconnection backoff for the
//! transport layer.

use crate::constants::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_EVENT_CHANNEL_CAPACITY,
    DEFAULT_INITIAL_RECONNECT_DELAY_MS, DEFAULT_JITTER_RATIO, DEFAULT_MAX_CONNECTION_REFUSED_ATTEMPTS,
    DEFAULT_MAX_CONNECT_ATTEMPTS, DEFAULT_MAX_CONSECUTIVE_PARSE_FAILURES,
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_MAX_RECONNECT_DELAY_MS, DEFAULT_READINESS_TIMEOUT_MS,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RETRY_INTERVAL_MS, DEFAULT_SHUTDOWN_TIMEOUT_MS,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Connection Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Total time budget for establishing the socket (ms)
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Reply timeout per request (ms). A timeout does not drop the connection.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Initial retry interval when connecting (ms), doubled per attempt
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Upper bound on connect attempts
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,
    /// Maximum "connection refused" attempts before fast-fail.
    /// When nothing is listening on the port, fail quickly instead of waiting for full timeout.
    #[serde(default = "default_max_connection_refused_attempts")]
    pub max_connection_refused_attempts: u32,
    /// Wait for a spawned backend's first output before connecting (ms)
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,
    /// Graceful shutdown budget (ms)
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Capacity of transport event channels
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    /// Undecodable messages tolerated in a row before tearing down
    #[serde(default = "default_max_consecutive_parse_failures")]
    pub max_consecutive_parse_failures: u32,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_connection_timeout_ms() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_MS
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_retry_interval_ms() -> u64 {
    DEFAULT_RETRY_INTERVAL_MS
}

fn default_max_connect_attempts() -> u32 {
    DEFAULT_MAX_CONNECT_ATTEMPTS
}

fn default_max_connection_refused_attempts() -> u32 {
    DEFAULT_MAX_CONNECTION_REFUSED_ATTEMPTS
}

fn default_readiness_timeout_ms() -> u64 {
    DEFAULT_READINESS_TIMEOUT_MS
}

fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

fn default_max_consecutive_parse_failures() -> u32 {
    DEFAULT_MAX_CONSECUTIVE_PARSE_FAILURES
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: default_connection_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            max_connect_attempts: default_max_connect_attempts(),
            max_connection_refused_attempts: default_max_connection_refused_attempts(),
            readiness_timeout_ms: default_readiness_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            event_channel_capacity: default_event_channel_capacity(),
            max_consecutive_parse_failures: default_max_consecutive_parse_failures(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ConnectionConfig {
    pub(crate) fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.request_timeout_ms == 0 {
            errors.push("connection.request_timeout_ms must be greater than 0".to_string());
        }
        if self.max_connect_attempts == 0 {
            errors.push("connection.max_connect_attempts must be greater than 0".to_string());
        }
        if self.event_channel_capacity == 0 {
            errors.push("connection.event_channel_capacity must be greater than 0".to_string());
        }
        if self.max_consecutive_parse_failures == 0 {
            errors.push(
                "connection.max_consecutive_parse_failures must be greater than 0".to_string(),
            );
        }
        errors.extend(self.reconnect.validate());
        errors
    }
}

// ============================================================================
// Reconnect Config
// ============================================================================

/// Reconnection backoff after the host returns from `away`
///
/// - First retry after `initial_delay_ms`
/// - Each retry multiplies the delay by `multiplier`
/// - Delay capped at `max_delay_ms`
/// - `jitter` spreads retries by up to that fraction of the delay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum number of reconnection attempts (0 = unlimited)
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_true() -> bool {
    true
}

fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

fn default_initial_delay_ms() -> u64 {
    DEFAULT_INITIAL_RECONNECT_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_RECONNECT_DELAY_MS
}

fn default_backoff_multiplier() -> f64 {
    DEFAULT_BACKOFF_MULTIPLIER
}

fn default_jitter() -> f64 {
    DEFAULT_JITTER_RATIO
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_attempts: default_max_reconnect_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl ReconnectConfig {
    /// Delay before attempt `attempt` (0-based), without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let factor = self.multiplier.max(1.0).powi(attempt.min(32) as i32);
        let delay = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        delay as u64
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn allows_attempt(&self, attempts: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || attempts < self.max_attempts)
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.multiplier < 1.0 {
            errors.push("connection.reconnect.multiplier must be at least 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            errors.push("connection.reconnect.jitter must be between 0.0 and 1.0".to_string());
        }
        if self.initial_delay_ms > self.max_delay_ms {
            errors.push(
                "connection.reconnect.initial_delay_ms must not exceed max_delay_ms".to_string(),
            );
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_for_attempt_is_capped() {
        let config = ReconnectConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            ..ReconnectConfig::default()
        };
        assert_eq!(config.delay_for_attempt(0), 100);
        assert_eq!(config.delay_for_attempt(1), 200);
        assert_eq!(config.delay_for_attempt(3), 800);
        assert_eq!(config.delay_for_attempt(10), 1_000);
    }

    #[test]
    fn test_allows_attempt() {
        let config = ReconnectConfig {
            max_attempts: 2,
            ..ReconnectConfig::default()
        };
        assert!(config.allows_attempt(1));
        assert!(!config.allows_attempt(2));

        let unlimited = ReconnectConfig {
            max_attempts: 0,
            ..ReconnectConfig::default()
        };
        assert!(unlimited.allows_attempt(1_000));

        let disabled = ReconnectConfig {
            enabled: false,
            ..ReconnectConfig::default()
        };
        assert!(!disabled.allows_attempt(0));
    }

    #[test]
    fn test_validate_rejects_bad_jitter() {
        let config = ConnectionConfig {
            reconnect: ReconnectConfig {
                jitter: 1.5,
                ..ReconnectConfig::default()
            },
            ..ConnectionConfig::default()
        };
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("jitter"));
    }
}
