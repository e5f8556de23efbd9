//! Call-stack frames

use super::{Scope, Variable};
use serde::{Deserialize, Serialize};

/// Session-local frame identity.
///
/// Stays stable across a stop that continues in the same function, so UI
/// state keyed by it (selection, expanded nodes) survives stepping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(pub i64);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One entry of the call stack. Index 0 is the innermost frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub id: FrameId,
    /// Backend handle used for scope and evaluate requests. Unlike `id`
    /// it changes on every stop.
    pub handle: i64,
    pub index: usize,
    pub name: String,
    pub path: String,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<Scope>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<Variable>>,
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Frame {}

impl Frame {
    pub fn new(id: i64, index: usize, name: impl Into<String>, path: impl Into<String>, line: u32) -> Self {
        Self {
            id: FrameId(id),
            handle: id,
            index,
            name: name.into(),
            path: path.into(),
            line,
            column: 0,
            source_id: None,
            scopes: None,
            variables: None,
        }
    }

    pub fn with_source_id(mut self, source_id: i64) -> Self {
        self.source_id = Some(source_id);
        self
    }

    pub fn with_column(mut self, column: u32) -> Self {
        self.column = column;
        self
    }

    pub fn is_top(&self) -> bool {
        self.index == 0
    }

    /// Same function body in the same script: the continuation test for
    /// a new stop.
    pub fn same_source(&self, other: &Frame) -> bool {
        self.path == other.path && self.source_id == other.source_id
    }

    /// Patch this frame with the position of a newer stop in the same
    /// source, keeping identity. Lazily loaded children are dropped because
    /// their values are stale.
    pub fn continue_at(&mut self, newer: &Frame) {
        self.handle = newer.handle;
        self.name = newer.name.clone();
        self.line = newer.line;
        self.column = newer.column;
        self.scopes = None;
        self.variables = None;
    }
}
