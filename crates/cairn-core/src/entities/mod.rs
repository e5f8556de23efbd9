//! Backend-agnostic debugger entities

mod breakpoint;
mod frame;
mod source;
mod variable;

pub use breakpoint::{collapse_duplicates, Breakpoint, Location, SourceMapPosition};
pub use frame::{Frame, FrameId};
pub use source::Source;
pub use variable::{Scope, ScopeKind, Variable, VariableRef};

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A node of the inspector tree. One key type for frame, scope and
/// variable expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InspectorNode {
    Frame { frame: FrameId },
    Scope { frame: FrameId, index: usize },
    Variable { reference: VariableRef },
}

impl InspectorNode {
    /// Frame this node's contents depend on, if any. Variable handles are
    /// only valid until the next resume, so they are not tied to a frame.
    pub fn frame(&self) -> Option<FrameId> {
        match self {
            InspectorNode::Frame { frame } | InspectorNode::Scope { frame, .. } => Some(*frame),
            InspectorNode::Variable { .. } => None,
        }
    }
}

/// Which exceptions suspend the debuggee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseOnBreaks {
    #[default]
    None,
    Uncaught,
    All,
}

impl FromStr for PauseOnBreaks {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(PauseOnBreaks::None),
            "uncaught" => Ok(PauseOnBreaks::Uncaught),
            "all" => Ok(PauseOnBreaks::All),
            other => Err(crate::Error::Config(format!(
                "unknown pause-on-breaks mode '{}'",
                other
            ))),
        }
    }
}

/// Why the debuggee stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    Breakpoint,
    Step,
    Pause,
    Exception,
    Entry,
    Other(String),
}

impl StopReason {
    pub fn from_label(label: &str) -> Self {
        match label {
            "breakpoint" | "breakpoint-hit" | "function breakpoint" => StopReason::Breakpoint,
            "step" | "end-stepping-range" | "function-finished" | "goto" => StopReason::Step,
            "pause" | "signal-received-interrupt" => StopReason::Pause,
            "exception" | "signal-received" => StopReason::Exception,
            "entry" => StopReason::Entry,
            other => StopReason::Other(other.to_string()),
        }
    }
}
