//! Error types for the cairn debugger core
//!
//! Every failure the session coordinator can observe is expressed as one
//! [`Error`] variant. Callers classify an error with [`Error::disposition`]
//! to decide between retrying, surfacing it to the user, or tearing the
//! session down.

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// How the coordinator reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDisposition {
    /// Logged; the session continues unchanged.
    Recoverable,
    /// Reported to observers; the session continues.
    UserVisible,
    /// The session is reset to disconnected before observers are notified.
    Fatal,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Could not reach or spawn the backend after the bounded retry budget.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A backend request exceeded its reply timeout. The connection is kept.
    #[error("Backend did not answer '{command}' within {timeout_ms}ms")]
    BackendUnresponsive { command: String, timeout_ms: u64 },

    /// The transport or session ended while the request was pending.
    #[error("Session ended: {0}")]
    SessionEnded(String),

    /// The backend refused to bind a breakpoint at the requested location.
    #[error("Breakpoint at {path}:{line} could not be resolved: {reason}")]
    BreakpointResolutionFailed {
        path: String,
        line: u32,
        reason: String,
    },

    /// A frame or record from the backend could not be decoded.
    ///
    /// Use for: malformed headers, invalid JSON bodies, unparseable MI records.
    #[error("Protocol parse error: {0}")]
    ProtocolParse(String),

    #[error("Already attached to a backend")]
    AlreadyAttached,

    #[error("Not attached to a backend")]
    NotAttached,

    /// The backend's feature map does not include the requested capability.
    #[error("Backend does not support {0}")]
    Unsupported(String),

    /// The backend answered but rejected the command.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The command is not valid in the current session state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Loading or saving breakpoints failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Classify this error for the coordinator's propagation policy.
    pub fn disposition(&self) -> ErrorDisposition {
        match self {
            Error::SessionEnded(_) => ErrorDisposition::Fatal,
            Error::ProtocolParse(_) | Error::Persistence(_) => ErrorDisposition::Recoverable,
            Error::Connection(_)
            | Error::BackendUnresponsive { .. }
            | Error::BreakpointResolutionFailed { .. }
            | Error::AlreadyAttached
            | Error::NotAttached
            | Error::Unsupported(_)
            | Error::Backend(_)
            | Error::InvalidState(_)
            | Error::Config(_) => ErrorDisposition::UserVisible,
        }
    }

    /// True when the error means the debug session is over.
    pub fn is_session_end(&self) -> bool {
        matches!(self, Error::SessionEnded(_))
    }

    pub fn unsupported(feature: impl Into<String>) -> Self {
        Error::Unsupported(feature.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ProtocolParse(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Connection(err.to_string())
    }
}
