//! Error types for transport and backend operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Protocol state violations and message format expectations
    ///
    /// Use for: malformed headers, unexpected record shapes, missing fields
    /// in a reply the adapter depends on.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON parsing and deserialization failures
    ///
    /// Automatically converted from `serde_json::Error` via `From` impl.
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Process I/O, socket and channel failures
    #[error("Backend communication error: {0}")]
    Communication(String),

    /// No reply within the request timeout. The connection is kept.
    #[error("Request '{command}' timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },

    /// The transport or debug session ended while the request was in flight.
    #[error("Session ended: {0}")]
    SessionEnded(String),

    /// The backend answered with an error.
    #[error("Command failed: {0}")]
    Command(String),

    /// The backend refused to bind a breakpoint.
    #[error("Breakpoint at {path}:{line} not resolved: {reason}")]
    Unresolved {
        path: String,
        line: u32,
        reason: String,
    },
}

impl Error {
    pub fn session_ended(reason: impl Into<String>) -> Self {
        Error::SessionEnded(reason.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidMessage(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Communication(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Protocol(format!("Invalid UTF-8: {}", err))
    }
}

// Enables `?` inside `DebugBackend` impls
impl From<Error> for cairn_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Protocol(msg) | Error::InvalidMessage(msg) => {
                cairn_core::Error::ProtocolParse(msg)
            }
            Error::Communication(msg) => cairn_core::Error::Connection(msg),
            Error::Timeout {
                command,
                timeout_ms,
            } => cairn_core::Error::BackendUnresponsive {
                command,
                timeout_ms,
            },
            Error::SessionEnded(msg) => cairn_core::Error::SessionEnded(msg),
            Error::Command(msg) => cairn_core::Error::Backend(msg),
            Error::Unresolved { path, line, reason } => {
                cairn_core::Error::BreakpointResolutionFailed { path, line, reason }
            }
        }
    }
}
