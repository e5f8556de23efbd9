//! Breakpoint entity and duplicate-collapsing rules

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A location in a source file (0-based line and column).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl Location {
    pub fn new(path: impl Into<String>, line: u32) -> Self {
        Self {
            path: path.into(),
            line,
            column: None,
        }
    }
}

/// Position in the original (pre-compilation) source when the breakpoint was
/// set through a source map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceMapPosition {
    pub source: String,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

/// A user or backend breakpoint.
///
/// Identity is the backend id once assigned, otherwise the source-map
/// coordinate when both sides have one, otherwise `(path, line)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    /// Backend-assigned id; only valid for the session that assigned it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub path: String,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_count: Option<u32>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Transient "run to here" breakpoint. Never shown or persisted.
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
    /// Created by the backend rather than by the user.
    #[serde(default, skip_serializing_if = "is_false")]
    pub server_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sourcemap: Option<SourceMapPosition>,
    /// Where the backend actually bound the breakpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Location>,
    /// Last resolution failure reported by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Breakpoint {
    pub fn new(path: impl Into<String>, line: u32) -> Self {
        Self {
            id: None,
            path: path.into(),
            line,
            column: None,
            condition: None,
            ignore_count: None,
            enabled: true,
            hidden: false,
            server_only: false,
            sourcemap: None,
            actual: None,
            error: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_ignore_count(mut self, count: u32) -> Self {
        self.ignore_count = Some(count);
        self
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_actual(mut self, actual: Location) -> Self {
        self.actual = Some(actual);
        self
    }

    pub fn with_sourcemap(mut self, source: impl Into<String>, line: u32) -> Self {
        self.sourcemap = Some(SourceMapPosition {
            source: source.into(),
            line,
            column: None,
        });
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Path the backend bound the breakpoint to, falling back to the request.
    pub fn resolved_path(&self) -> &str {
        self.actual
            .as_ref()
            .map(|a| a.path.as_str())
            .unwrap_or(&self.path)
    }

    /// Line the backend bound the breakpoint to, falling back to the request.
    pub fn resolved_line(&self) -> u32 {
        self.actual.as_ref().map(|a| a.line).unwrap_or(self.line)
    }

    /// `(path, line)` after resolution. At most one visible breakpoint may
    /// occupy each key.
    pub fn location_key(&self) -> (String, u32) {
        (self.resolved_path().to_string(), self.resolved_line())
    }

    /// Condition with empty strings normalized away.
    pub fn effective_condition(&self) -> Option<&str> {
        self.condition
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Ignore count with zero normalized away.
    pub fn effective_ignore_count(&self) -> Option<u32> {
        self.ignore_count.filter(|c| *c > 0)
    }

    /// Identity comparison used for no-op detection on insert and for
    /// matching backend notifications to local breakpoints.
    pub fn same_identity(&self, other: &Breakpoint) -> bool {
        if let (Some(a), Some(b)) = (self.id, other.id) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.sourcemap, &other.sourcemap) {
            return a.source == b.source && a.line == b.line;
        }
        (self.path == other.path && self.line == other.line)
            || self.location_key() == other.location_key()
    }

    /// Structural equality used by resync: same resolved location and
    /// same effective condition. Backend ids are ignored.
    pub fn is_equivalent(&self, other: &Breakpoint) -> bool {
        self.resolved_path() == other.resolved_path()
            && self.resolved_line() == other.resolved_line()
            && self.effective_condition() == other.effective_condition()
    }

    /// Fold a duplicate's settings into this breakpoint. The duplicate is
    /// treated as newer: its non-empty condition and ignore count win.
    pub fn absorb(&mut self, newer: &Breakpoint) {
        if let Some(condition) = newer.effective_condition() {
            self.condition = Some(condition.to_string());
        }
        if let Some(count) = newer.effective_ignore_count() {
            self.ignore_count = Some(count);
        }
        if self.id.is_none() {
            self.id = newer.id;
        }
        if self.actual.is_none() {
            self.actual = newer.actual.clone();
        }
    }

    /// Copy of this breakpoint suitable for the persistence store: session
    /// scoped fields (backend id, resolution error) are dropped.
    pub fn persisted(&self) -> Breakpoint {
        Breakpoint {
            id: None,
            error: None,
            ..self.clone()
        }
    }
}

/// Collapse visible breakpoints that share a resolved `(path, line)`.
///
/// The first breakpoint at each location survives in its original position.
/// Duplicates are folded into it in list order, so the last non-empty
/// condition and ignore count win. Hidden breakpoints pass through untouched.
pub fn collapse_duplicates(breakpoints: Vec<Breakpoint>) -> Vec<Breakpoint> {
    let mut survivors: Vec<Breakpoint> = Vec::with_capacity(breakpoints.len());
    let mut by_location: HashMap<(String, u32), usize> = HashMap::new();

    for bp in breakpoints {
        if bp.hidden {
            survivors.push(bp);
            continue;
        }
        match by_location.get(&bp.location_key()) {
            Some(&index) => survivors[index].absorb(&bp),
            None => {
                by_location.insert(bp.location_key(), survivors.len());
                survivors.push(bp);
            }
        }
    }

    survivors
}
