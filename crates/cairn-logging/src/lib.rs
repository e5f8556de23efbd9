//! Logging setup for cairn
//!
//! Wraps `tracing-subscriber` so that the CLI and the test suites configure
//! logging the same way.
//!
//! ```rust,ignore
//! use cairn_logging::{init, LogConfig, LogOutput};
//!
//! // Console front end: logs go to stderr so stdout stays readable
//! init(LogConfig::new().output(LogOutput::Stderr));
//!
//! // File logging with daily rotation; keep the guard alive
//! let _guard = init_with_file(LogConfig::new(), Path::new("/tmp/cairn.log"))?;
//! ```

use cairn_config::LoggingConfig;
use std::io::IsTerminal;
use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use tracing::{debug, error, info, instrument, trace, warn, Level};

/// Must be held until exit so buffered file logs are flushed.
pub use tracing_appender::non_blocking::WorkerGuard;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    /// Default: the console front end owns stdout.
    #[default]
    Stderr,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimestampFormat {
    #[default]
    Local,
    Utc,
}

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Enable debug-level logging (overrides default_level)
    pub debug: bool,
    /// Default filter when RUST_LOG is not set
    pub default_level: String,
    pub output: LogOutput,
    pub show_target: bool,
    pub timestamp_format: TimestampFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            default_level: cairn_config::constants::DEFAULT_LOG_LEVEL.to_string(),
            output: LogOutput::default(),
            show_target: false,
            timestamp_format: TimestampFormat::default(),
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `[logging]` config section.
    pub fn from_config(config: &LoggingConfig) -> Self {
        Self::new()
            .default_level(config.level.clone())
            .show_target(config.show_target)
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn default_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn show_target(mut self, show: bool) -> Self {
        self.show_target = show;
        self
    }

    pub fn timestamp_format(mut self, format: TimestampFormat) -> Self {
        self.timestamp_format = format;
        self
    }

    pub fn utc(self) -> Self {
        self.timestamp_format(TimestampFormat::Utc)
    }

    fn build_filter(&self) -> EnvFilter {
        if self.debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&self.default_level))
        }
    }
}

/// Initialize console logging.
///
/// `RUST_LOG` overrides the configured level unless `debug` is set.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init(config: LogConfig) {
    use tracing_subscriber::fmt::time::{LocalTime, UtcTime};

    let filter = config.build_filter();

    macro_rules! with_timer_init {
        ($builder:expr, $ts_format:expr) => {
            match $ts_format {
                TimestampFormat::Utc => $builder.with_timer(UtcTime::rfc_3339()).init(),
                TimestampFormat::Local => $builder.with_timer(LocalTime::rfc_3339()).init(),
            }
        };
    }

    match config.output {
        LogOutput::Stdout => {
            let builder = fmt()
                .with_env_filter(filter)
                .with_target(config.show_target)
                .with_ansi(std::io::stdout().is_terminal());
            with_timer_init!(builder, config.timestamp_format);
        }
        LogOutput::Stderr => {
            let builder = fmt()
                .with_env_filter(filter)
                .with_target(config.show_target)
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal());
            with_timer_init!(builder, config.timestamp_format);
        }
    }
}

/// Initialize non-blocking file logging with daily rotation.
///
/// Files are named `{file_name}.YYYY-MM-DD` next to `log_path`.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created.
pub fn init_with_file(config: LogConfig, log_path: &Path) -> std::io::Result<WorkerGuard> {
    use tracing_subscriber::fmt::time::{LocalTime, UtcTime};

    let filter = config.build_filter();

    cairn_config::paths::ensure_parent_dir(log_path)
        .map_err(|e| std::io::Error::other(format!("Failed to create log directory: {}", e)))?;

    let log_dir = log_path.parent().unwrap_or(Path::new("."));
    let log_filename = log_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(cairn_config::paths::DEFAULT_LOG_FILENAME);

    let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(config.show_target)
        .with_writer(non_blocking)
        .with_ansi(false);

    match config.timestamp_format {
        TimestampFormat::Utc => builder.with_timer(UtcTime::rfc_3339()).init(),
        TimestampFormat::Local => builder.with_timer(LocalTime::rfc_3339()).init(),
    }

    Ok(guard)
}

/// Initialize logging for tests. Safe to call more than once.
pub fn init_test() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let section = LoggingConfig {
            level: "warn".to_string(),
            file: None,
            show_target: true,
        };
        let config = LogConfig::from_config(&section);
        assert_eq!(config.default_level, "warn");
        assert!(config.show_target);
        assert_eq!(config.output, LogOutput::Stderr);
    }

    #[test]
    fn test_build_filter_respects_debug_flag() {
        let config = LogConfig::new().default_level("warn").debug(true);
        let filter_str = format!("{:?}", config.build_filter());
        assert!(
            filter_str.contains("debug") || filter_str.contains("DEBUG"),
            "Expected debug level in filter: {}",
            filter_str
        );
    }

    #[test]
    fn test_utc_builder() {
        assert_eq!(LogConfig::new().utc().timestamp_format, TimestampFormat::Utc);
    }

    #[test]
    fn test_init_test_is_idempotent() {
        init_test();
        init_test();
    }
}
