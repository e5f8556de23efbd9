//! Debugger backend interface
//!
//! Every runtime integration (DAP/V8 style, GDB/MI style, mocks) implements
//! [`DebugBackend`]. The session coordinator only talks to this trait and
//! only learns about pushed state through [`BackendEvent`]s.

use async_trait::async_trait;
use cairn_config::RunnerConfig;
use cairn_core::{
    Breakpoint, Error, Frame, PauseOnBreaks, Result, Scope, Source, StopReason, Variable,
    VariableRef,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Thread-safe reference to a backend
pub type DebugBackendRef = Arc<dyn DebugBackend + Send + Sync>;

// ============================================================================
// Features
// ============================================================================

/// Optional capabilities a backend may lack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
    ConditionalBreakpoints,
    IgnoreCounts,
    SetVariable,
    ExceptionBreaks,
    StepOut,
    Suspend,
    ListBreakpoints,
    Reconnect,
}

impl Feature {
    pub fn name(&self) -> &'static str {
        match self {
            Feature::ConditionalBreakpoints => "conditional breakpoints",
            Feature::IgnoreCounts => "ignore counts",
            Feature::SetVariable => "setting variables",
            Feature::ExceptionBreaks => "breaking on exceptions",
            Feature::StepOut => "step out",
            Feature::Suspend => "suspend",
            Feature::ListBreakpoints => "listing breakpoints",
            Feature::Reconnect => "reconnecting",
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Capability map declared by a backend.
///
/// The coordinator checks it before issuing a command so that a missing
/// feature is reported as [`Error::Unsupported`] without a round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendFeatures {
    pub conditional_breakpoints: bool,
    pub ignore_counts: bool,
    pub set_variable: bool,
    pub exception_breaks: bool,
    pub step_out: bool,
    pub suspend: bool,
    pub list_breakpoints: bool,
    pub reconnect: bool,
}

impl Default for BackendFeatures {
    fn default() -> Self {
        Self::all()
    }
}

impl BackendFeatures {
    pub fn all() -> Self {
        Self {
            conditional_breakpoints: true,
            ignore_counts: true,
            set_variable: true,
            exception_breaks: true,
            step_out: true,
            suspend: true,
            list_breakpoints: true,
            reconnect: true,
        }
    }

    pub fn none() -> Self {
        Self {
            conditional_breakpoints: false,
            ignore_counts: false,
            set_variable: false,
            exception_breaks: false,
            step_out: false,
            suspend: false,
            list_breakpoints: false,
            reconnect: false,
        }
    }

    pub fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::ConditionalBreakpoints => self.conditional_breakpoints,
            Feature::IgnoreCounts => self.ignore_counts,
            Feature::SetVariable => self.set_variable,
            Feature::ExceptionBreaks => self.exception_breaks,
            Feature::StepOut => self.step_out,
            Feature::Suspend => self.suspend,
            Feature::ListBreakpoints => self.list_breakpoints,
            Feature::Reconnect => self.reconnect,
        }
    }

    /// `Ok(())` when supported, `Err(Unsupported)` otherwise.
    pub fn require(&self, feature: Feature) -> Result<()> {
        if self.supports(feature) {
            Ok(())
        } else {
            Err(Error::unsupported(feature.name()))
        }
    }

    /// Feature map keyed by feature name, for display.
    pub fn as_map(&self) -> BTreeMap<Feature, bool> {
        [
            Feature::ConditionalBreakpoints,
            Feature::IgnoreCounts,
            Feature::SetVariable,
            Feature::ExceptionBreaks,
            Feature::StepOut,
            Feature::Suspend,
            Feature::ListBreakpoints,
            Feature::Reconnect,
        ]
        .into_iter()
        .map(|feature| (feature, self.supports(feature)))
        .collect()
    }
}

// ============================================================================
// Events
// ============================================================================

/// Why a backend session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DetachReason {
    /// `detach()` was called.
    Requested,
    /// The debuggee exited.
    Exited { code: Option<i64> },
    /// The backend ended the debug session.
    Terminated,
    /// The backend process died.
    Killed,
    /// The backend reported an unusable environment.
    CorruptEnvironment { message: String },
}

impl std::fmt::Display for DetachReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetachReason::Requested => write!(f, "detached"),
            DetachReason::Exited { code: Some(code) } => write!(f, "exited with code {}", code),
            DetachReason::Exited { code: None } => write!(f, "exited"),
            DetachReason::Terminated => write!(f, "terminated"),
            DetachReason::Killed => write!(f, "killed"),
            DetachReason::CorruptEnvironment { message } => {
                write!(f, "corrupt environment: {}", message)
            }
        }
    }
}

/// State pushed from a backend to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    StateChange {
        running: bool,
    },
    Break {
        reason: StopReason,
        thread_id: Option<i64>,
        hit_breakpoints: Vec<i64>,
    },
    Exception {
        thread_id: Option<i64>,
        message: String,
    },
    Suspend {
        thread_id: Option<i64>,
    },
    /// The backend selected a different frame on its own.
    FrameActivate {
        index: usize,
    },
    Sources(Vec<Source>),
    SourceCompiled(Source),
    /// A breakpoint was resolved, moved, or created on the backend side.
    BreakpointUpdate(Breakpoint),
    BreakpointRemoved {
        id: i64,
    },
    Output {
        category: String,
        text: String,
    },
    /// The transport dropped. The process may still be alive.
    ConnectionLost {
        reason: String,
    },
    Detached {
        reason: DetachReason,
    },
}

/// Result of establishing a backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachOutcome {
    /// The debuggee is executing (false: suspended, e.g. at entry).
    pub running: bool,
}

// ============================================================================
// Backend trait
// ============================================================================

/// A debugger backend.
///
/// Lines and columns are 0-based on both sides of this interface;
/// implementations convert to their wire convention.
#[async_trait]
pub trait DebugBackend: Send + Sync {
    /// Short name for logs ("dap", "mi", ...).
    fn name(&self) -> &str;

    fn features(&self) -> BackendFeatures;

    /// Register for pushed events. Subscriptions survive reconnects.
    async fn subscribe(&self) -> mpsc::Receiver<BackendEvent>;

    /// Connect to the backend. Fails with [`Error::AlreadyAttached`] when a
    /// connection already exists.
    async fn attach(&self, runner: &RunnerConfig) -> Result<AttachOutcome>;

    /// End the session and release the process and socket.
    async fn detach(&self) -> Result<()>;

    /// Host connectivity flag. While away, transport loss is expected.
    async fn set_away(&self, away: bool);

    /// Re-establish the socket to the same backend process.
    async fn reconnect(&self) -> Result<AttachOutcome>;

    /// Current call stack, innermost first.
    async fn get_frames(&self) -> Result<Vec<Frame>>;

    /// Scopes of `frame`. Their variables are fetched with
    /// [`DebugBackend::get_properties`] on the scope reference.
    async fn get_scopes(&self, frame: &Frame) -> Result<Vec<Scope>>;

    /// Children of a scope or structured value.
    async fn get_properties(&self, reference: VariableRef) -> Result<Vec<Variable>>;

    async fn evaluate(&self, expression: &str, frame: Option<&Frame>) -> Result<Variable>;

    /// Assign `value` to the child `name` of `parent`.
    async fn set_variable(
        &self,
        parent: VariableRef,
        name: &str,
        value: &str,
        frame: Option<&Frame>,
    ) -> Result<Variable>;

    /// Create a breakpoint; returns it with the backend id and resolved
    /// location filled in.
    async fn set_breakpoint(&self, breakpoint: &Breakpoint) -> Result<Breakpoint>;

    /// Update condition, ignore count, or enabled state.
    async fn change_breakpoint(&self, breakpoint: &Breakpoint) -> Result<Breakpoint>;

    async fn clear_breakpoint(&self, breakpoint: &Breakpoint) -> Result<()>;

    /// Breakpoints held by the backend.
    async fn list_breakpoints(&self) -> Result<Vec<Breakpoint>>;

    async fn step_into(&self) -> Result<()>;
    async fn step_over(&self) -> Result<()>;
    async fn step_out(&self) -> Result<()>;
    async fn resume(&self) -> Result<()>;
    async fn suspend(&self) -> Result<()>;

    async fn set_break_behavior(&self, behavior: PauseOnBreaks) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_reports_unsupported() {
        let features = BackendFeatures {
            exception_breaks: false,
            ..BackendFeatures::all()
        };
        assert!(features.require(Feature::StepOut).is_ok());
        assert_eq!(
            features.require(Feature::ExceptionBreaks),
            Err(Error::Unsupported("breaking on exceptions".to_string()))
        );
    }

    #[test]
    fn test_as_map_covers_every_feature() {
        let map = BackendFeatures::none().as_map();
        assert_eq!(map.len(), 8);
        assert!(map.values().all(|enabled| !enabled));
    }

    #[test]
    fn test_detach_reason_display() {
        assert_eq!(DetachReason::Exited { code: Some(3) }.to_string(), "exited with code 3");
        assert_eq!(
            DetachReason::CorruptEnvironment {
                message: "bad heap".into()
            }
            .to_string(),
            "corrupt environment: bad heap"
        );
    }
}
