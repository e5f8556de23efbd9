//! The session's breakpoint book
//!
//! Breakpoints are kept in insertion order, which is the order duplicate
//! merging relies on: the oldest breakpoint at a location survives and
//! later ones fold into it.

use cairn_core::{adjust_breakpoints, collapse_duplicates, Breakpoint, DocumentEdit};

/// What [`BreakpointBook::apply_bounds`] did to one file.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BoundsOutcome {
    pub clamped: Vec<Breakpoint>,
    pub removed: Vec<Breakpoint>,
}

impl BoundsOutcome {
    pub fn is_empty(&self) -> bool {
        self.clamped.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default, Clone)]
pub struct BreakpointBook {
    entries: Vec<Breakpoint>,
}

impl BreakpointBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Book holding `breakpoints` with duplicates collapsed.
    pub fn from_list(breakpoints: Vec<Breakpoint>) -> Self {
        Self {
            entries: collapse_duplicates(breakpoints),
        }
    }

    /// Add a breakpoint. Returns false (and changes nothing) when a
    /// breakpoint with the same identity and visibility already exists.
    pub fn insert(&mut self, breakpoint: Breakpoint) -> bool {
        if self.find(&breakpoint).is_some() {
            return false;
        }
        self.entries.push(breakpoint);
        true
    }

    pub fn find(&self, breakpoint: &Breakpoint) -> Option<&Breakpoint> {
        self.position(breakpoint).map(|index| &self.entries[index])
    }

    /// Visible breakpoint requested at or bound to `path:line`.
    pub fn find_at(&self, path: &str, line: u32) -> Option<&Breakpoint> {
        self.entries
            .iter()
            .find(|bp| !bp.hidden && at(bp, path, line))
    }

    pub fn find_by_id(&self, id: i64) -> Option<&Breakpoint> {
        self.entries.iter().find(|bp| bp.id == Some(id))
    }

    /// Replace the entry with the same identity as `breakpoint`. Returns
    /// false when there is none.
    pub fn update(&mut self, breakpoint: Breakpoint) -> bool {
        match self.position(&breakpoint) {
            Some(index) => {
                self.entries[index] = breakpoint;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, breakpoint: &Breakpoint) -> Option<Breakpoint> {
        let index = self.position(breakpoint)?;
        Some(self.entries.remove(index))
    }

    pub fn remove_by_id(&mut self, id: i64) -> Option<Breakpoint> {
        let index = self.entries.iter().position(|bp| bp.id == Some(id))?;
        Some(self.entries.remove(index))
    }

    /// Take every hidden breakpoint out of the book.
    pub fn take_hidden(&mut self) -> Vec<Breakpoint> {
        let (hidden, visible) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|bp| bp.hidden);
        self.entries = visible;
        hidden
    }

    /// Visible breakpoints in insertion order.
    pub fn visible(&self) -> Vec<Breakpoint> {
        self.entries.iter().filter(|bp| !bp.hidden).cloned().collect()
    }

    /// Visible breakpoints as they should be written to the store.
    pub fn persisted(&self) -> Vec<Breakpoint> {
        self.entries
            .iter()
            .filter(|bp| !bp.hidden)
            .map(Breakpoint::persisted)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|bp| !bp.hidden).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Swap in a reconciled visible set. Hidden breakpoints are kept.
    pub fn replace_visible(&mut self, breakpoints: Vec<Breakpoint>) {
        let hidden: Vec<Breakpoint> = self.entries.drain(..).filter(|bp| bp.hidden).collect();
        self.entries = collapse_duplicates(breakpoints);
        self.entries.extend(hidden);
    }

    /// Forget session state: hidden breakpoints go away, backend ids and
    /// resolutions are cleared.
    pub fn reset_session(&mut self) {
        self.entries.retain(|bp| !bp.hidden);
        for bp in &mut self.entries {
            bp.id = None;
            bp.actual = None;
            bp.error = None;
        }
    }

    /// Record a resolution reported by the backend.
    ///
    /// The matching entry takes the backend's id and bound location (a
    /// server-only breakpoint is added when nothing matches). If the new
    /// location coincides with other visible breakpoints they are merged:
    /// the oldest survives, absorbing the others in insertion order, and the
    /// absorbed ones are returned. Nothing is sent to the backend.
    pub fn apply_resolution(&mut self, resolved: &Breakpoint) -> Vec<Breakpoint> {
        let index = match self.position(resolved) {
            Some(index) => {
                let entry = &mut self.entries[index];
                if resolved.id.is_some() {
                    entry.id = resolved.id;
                }
                if resolved.actual.is_some() {
                    entry.actual = resolved.actual.clone();
                }
                entry.error = resolved.error.clone();
                index
            }
            None => {
                self.entries.push(resolved.clone());
                self.entries.len() - 1
            }
        };
        if self.entries[index].hidden {
            return Vec::new();
        }
        self.merge_at(self.entries[index].location_key())
    }

    fn merge_at(&mut self, key: (String, u32)) -> Vec<Breakpoint> {
        let mut overlapping = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, bp)| !bp.hidden && bp.location_key() == key)
            .map(|(index, _)| index);
        let Some(oldest) = overlapping.next() else {
            return Vec::new();
        };
        let later: Vec<usize> = overlapping.collect();
        if later.is_empty() {
            return Vec::new();
        }

        for &index in &later {
            let newer = self.entries[index].clone();
            self.entries[oldest].absorb(&newer);
        }
        let mut merged = Vec::with_capacity(later.len());
        for index in later.into_iter().rev() {
            merged.push(self.entries.remove(index));
        }
        merged.reverse();
        merged
    }

    /// Validate resolved lines of `path` against the document length:
    /// a line equal to the length is clamped to the last line, lines past
    /// it are removed.
    pub fn apply_bounds(&mut self, path: &str, length: u32) -> BoundsOutcome {
        let mut outcome = BoundsOutcome::default();
        let mut kept = Vec::with_capacity(self.entries.len());
        for mut bp in std::mem::take(&mut self.entries) {
            if bp.resolved_path() != path {
                kept.push(bp);
                continue;
            }
            let line = bp.resolved_line();
            if line > length {
                outcome.removed.push(bp);
                continue;
            }
            if line == length && length > 0 {
                let clamped = length - 1;
                match bp.actual.as_mut() {
                    Some(actual) => actual.line = clamped,
                    None => bp.line = clamped,
                }
                outcome.clamped.push(bp.clone());
            }
            kept.push(bp);
        }
        self.entries = kept;
        outcome
    }

    /// Shift breakpoints of `path` for a document edit. Returns true when
    /// anything moved or disappeared.
    pub fn on_document_edit(&mut self, path: &str, edit: &DocumentEdit) -> bool {
        let before = self.entries.clone();
        self.entries = adjust_breakpoints(edit, path, std::mem::take(&mut self.entries));
        self.entries.len() != before.len()
            || self
                .entries
                .iter()
                .zip(&before)
                .any(|(a, b)| a.line != b.line || a.actual != b.actual)
    }

    /// Paths with at least one visible breakpoint.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .entries
            .iter()
            .filter(|bp| !bp.hidden)
            .map(|bp| bp.resolved_path().to_string())
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    fn position(&self, breakpoint: &Breakpoint) -> Option<usize> {
        self.entries
            .iter()
            .position(|bp| bp.hidden == breakpoint.hidden && bp.same_identity(breakpoint))
    }
}

fn at(bp: &Breakpoint, path: &str, line: u32) -> bool {
    (bp.path == path && bp.line == line) || bp.location_key() == (path.to_string(), line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::Location;

    fn bound_to(path: &str, line: u32) -> Location {
        Location::new(path, line)
    }

    #[test]
    fn test_insert_same_identity_is_noop() {
        let mut book = BreakpointBook::new();
        assert!(book.insert(Breakpoint::new("/a.js", 4)));
        assert!(!book.insert(Breakpoint::new("/a.js", 4).with_condition("x")));
        assert_eq!(book.len(), 1);
        assert_eq!(book.visible()[0].condition, None);
    }

    #[test]
    fn test_hidden_breakpoints_stay_out_of_visible_set() {
        let mut book = BreakpointBook::new();
        book.insert(Breakpoint::new("/a.js", 4));
        assert!(book.insert(Breakpoint::new("/a.js", 4).hidden()));
        assert_eq!(book.len(), 1);
        assert_eq!(book.persisted().len(), 1);
        assert_eq!(book.take_hidden().len(), 1);
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_resolution_merges_into_oldest() {
        let mut book = BreakpointBook::new();
        book.insert(Breakpoint::new("/a.js", 10).with_id(1).with_condition("a"));
        book.insert(Breakpoint::new("/a.js", 11).with_id(2).with_condition("b"));
        book.insert(Breakpoint::new("/a.js", 12).with_id(3).with_ignore_count(4));

        let first =
            book.apply_resolution(&Breakpoint::new("/a.js", 11).with_id(2).with_actual(bound_to("/a.js", 10)));
        assert_eq!(first.len(), 1);
        let merged =
            book.apply_resolution(&Breakpoint::new("/a.js", 12).with_id(3).with_actual(bound_to("/a.js", 10)));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, Some(3));

        let visible = book.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, Some(1));
        assert_eq!(visible[0].condition.as_deref(), Some("b"));
        assert_eq!(visible[0].ignore_count, Some(4));
    }

    #[test]
    fn test_unknown_resolution_adds_server_breakpoint() {
        let mut book = BreakpointBook::new();
        let mut remote = Breakpoint::new("/b.js", 3).with_id(9);
        remote.server_only = true;
        assert!(book.apply_resolution(&remote).is_empty());
        assert!(book.find_by_id(9).is_some_and(|bp| bp.server_only));
    }

    #[test]
    fn test_bounds_clamp_and_remove() {
        let mut book = BreakpointBook::new();
        book.insert(Breakpoint::new("/a.js", 3));
        book.insert(Breakpoint::new("/a.js", 20).with_actual(bound_to("/a.js", 10)));
        book.insert(Breakpoint::new("/a.js", 30));
        book.insert(Breakpoint::new("/b.js", 30));

        let outcome = book.apply_bounds("/a.js", 10);
        assert_eq!(outcome.clamped.len(), 1);
        assert_eq!(outcome.clamped[0].resolved_line(), 9);
        assert_eq!(outcome.removed.len(), 1);
        assert_eq!(outcome.removed[0].line, 30);
        assert_eq!(book.len(), 3);
    }

    #[test]
    fn test_document_edit_moves_rows() {
        let mut book = BreakpointBook::new();
        book.insert(Breakpoint::new("/a.js", 5));
        book.insert(Breakpoint::new("/b.js", 5));
        assert!(book.on_document_edit("/a.js", &DocumentEdit::insert(2, 0, 3)));
        assert!(book.find_at("/a.js", 8).is_some());
        assert!(book.find_at("/b.js", 5).is_some());
        assert!(!book.on_document_edit("/a.js", &DocumentEdit::insert(20, 0, 3)));
    }

    #[test]
    fn test_reset_session_drops_ids_and_hidden() {
        let mut book = BreakpointBook::new();
        book.insert(Breakpoint::new("/a.js", 5).with_id(3).with_actual(bound_to("/a.js", 6)));
        book.insert(Breakpoint::new("/a.js", 9).hidden());
        book.reset_session();
        let all = book.visible();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, None);
        assert_eq!(all[0].actual, None);
        assert!(book.take_hidden().is_empty());
    }
}
