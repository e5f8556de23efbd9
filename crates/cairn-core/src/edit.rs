//! Breakpoint row adjustment for multi-line document edits
//!
//! Shifting breakpoints when lines are inserted or removed is a pure
//! function of the edit and the previous row map. The backend is never
//! consulted; the session re-syncs lines later.

use crate::Breakpoint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditAction {
    Insert,
    Remove,
}

/// A 0-based row/column position in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TextPosition {
    pub row: u32,
    pub column: u32,
}

impl TextPosition {
    pub fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }
}

/// An edit delta as reported by the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentEdit {
    pub action: EditAction,
    pub start: TextPosition,
    pub end: TextPosition,
}

impl DocumentEdit {
    /// Insertion of `lines` line breaks at `(row, column)`.
    pub fn insert(row: u32, column: u32, lines: u32) -> Self {
        Self {
            action: EditAction::Insert,
            start: TextPosition::new(row, column),
            end: TextPosition::new(row.saturating_add(lines), 0),
        }
    }

    /// Removal of the text between `(start_row, start_column)` and `end_row`.
    pub fn remove(start_row: u32, start_column: u32, end_row: u32) -> Self {
        Self {
            action: EditAction::Remove,
            start: TextPosition::new(start_row, start_column),
            end: TextPosition::new(end_row.max(start_row), 0),
        }
    }

    /// Number of line breaks added or removed.
    pub fn span(&self) -> u32 {
        self.end.row.saturating_sub(self.start.row)
    }
}

/// Compute the row map after `edit`.
///
/// Insert: rows at or after the insertion row move down by the span. The
/// insertion row is the row after `start` when the insertion begins mid-line.
///
/// Remove: rows inside `start.row + 1 ..= end.row` are dropped and later rows
/// move up. If `start.row` held nothing, it adopts the last dropped entry
/// (the one closest to the text that joins onto it).
pub fn adjust_rows<T: Clone>(edit: &DocumentEdit, rows: &BTreeMap<u32, T>) -> BTreeMap<u32, T> {
    let span = edit.span();
    if span == 0 {
        return rows.clone();
    }

    match edit.action {
        EditAction::Insert => {
            let first = if edit.start.column > 0 {
                edit.start.row.saturating_add(1)
            } else {
                edit.start.row
            };
            rows.iter()
                .map(|(&row, value)| {
                    let row = if row >= first { row.saturating_add(span) } else { row };
                    (row, value.clone())
                })
                .collect()
        }
        EditAction::Remove => {
            let first = edit.start.row;
            let last_removed = first.saturating_add(span);
            let mut adjusted = BTreeMap::new();
            let mut placeholder = None;

            for (&row, value) in rows {
                if row <= first {
                    adjusted.insert(row, value.clone());
                } else if row <= last_removed {
                    placeholder = Some(value.clone());
                } else {
                    adjusted.insert(row - span, value.clone());
                }
            }

            if let Some(value) = placeholder {
                adjusted.entry(first).or_insert(value);
            }
            adjusted
        }
    }
}

/// Apply `edit` to the visible breakpoints of `path`.
///
/// Breakpoints are keyed by resolved line; a survivor moves its requested and
/// resolved lines by the same delta. Breakpoints of other files and hidden
/// breakpoints are returned unchanged. Order is preserved.
pub fn adjust_breakpoints(edit: &DocumentEdit, path: &str, breakpoints: Vec<Breakpoint>) -> Vec<Breakpoint> {
    if edit.span() == 0 {
        return breakpoints;
    }

    let affected = |bp: &Breakpoint| !bp.hidden && bp.resolved_path() == path;

    let rows: BTreeMap<u32, usize> = breakpoints
        .iter()
        .enumerate()
        .filter(|(_, bp)| affected(bp))
        .map(|(index, bp)| (bp.resolved_line(), index))
        .collect();

    let new_rows: BTreeMap<usize, u32> = adjust_rows(edit, &rows)
        .into_iter()
        .map(|(row, index)| (index, row))
        .collect();

    breakpoints
        .into_iter()
        .enumerate()
        .filter_map(|(index, mut bp)| {
            if !affected(&bp) {
                return Some(bp);
            }
            let new_row = *new_rows.get(&index)?;
            let delta = i64::from(new_row) - i64::from(bp.resolved_line());
            bp.line = shift(bp.line, delta);
            if let Some(actual) = bp.actual.as_mut() {
                actual.line = new_row;
            }
            Some(bp)
        })
        .collect()
}

fn shift(line: u32, delta: i64) -> u32 {
    u32::try_from((i64::from(line) + delta).max(0)).unwrap_or(u32::MAX)
}
