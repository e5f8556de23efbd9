//! Call stack held by the session between stops

use cairn_core::{Frame, FrameId};

/// How a fresh stack replaced the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameUpdate {
    /// The top frame kept its id.
    pub continued: bool,
    /// Ids that no longer exist.
    pub dropped: Vec<FrameId>,
}

/// The current frames with session-assigned ids.
///
/// Backends hand out frame handles that are only unique within one stop
/// (GDB reuses levels). The stack assigns its own [`FrameId`]s and keeps
/// them across stops that continue in the same function.
#[derive(Debug, Clone)]
pub struct FrameStack {
    frames: Vec<Frame>,
    /// Frames of the last stop while running; the next stop continues them.
    retired: Vec<Frame>,
    active: usize,
    next_id: i64,
}

impl Default for FrameStack {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            retired: Vec::new(),
            active: 0,
            next_id: 1,
        }
    }
}

impl FrameStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in the stack of a new stop.
    ///
    /// When the new top frame is in the same source as the previous top,
    /// the previous frames are patched in place from the top down for as
    /// long as they keep matching, preserving their ids. Everything else
    /// gets fresh ids. Frame 0 becomes active.
    pub fn replace(&mut self, fresh: Vec<Frame>) -> FrameUpdate {
        let previous = if self.frames.is_empty() {
            std::mem::take(&mut self.retired)
        } else {
            self.retired.clear();
            std::mem::take(&mut self.frames)
        };
        let continued = match (previous.first(), fresh.first()) {
            (Some(old), Some(new)) => old.same_source(new),
            _ => false,
        };

        let mut kept = Vec::new();
        let mut frames = Vec::with_capacity(fresh.len());
        for (index, mut frame) in fresh.into_iter().enumerate() {
            frame.index = index;
            // continuation stops at the first caller that differs
            let reusable = previous.get(index).filter(|old| {
                continued
                    && kept.len() == index
                    && old.same_source(&frame)
                    && (index == 0 || old.name == frame.name)
            });
            match reusable {
                Some(old) => {
                    let mut patched = old.clone();
                    patched.continue_at(&frame);
                    patched.index = index;
                    kept.push(patched.id);
                    frames.push(patched);
                }
                None => {
                    frame.id = self.allocate();
                    frame.scopes = None;
                    frame.variables = None;
                    frames.push(frame);
                }
            }
        }

        let dropped = previous
            .iter()
            .map(|f| f.id)
            .filter(|id| !kept.contains(id))
            .collect();
        self.frames = frames;
        self.active = 0;
        FrameUpdate { continued, dropped }
    }

    /// Make frame `index` active. Fails when it does not exist.
    pub fn select(&mut self, index: usize) -> Option<&Frame> {
        if index >= self.frames.len() {
            return None;
        }
        self.active = index;
        self.frames.get(index)
    }

    pub fn active(&self) -> Option<&Frame> {
        self.frames.get(self.active)
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn get(&self, id: FrameId) -> Option<&Frame> {
        self.frames.iter().find(|f| f.id == id)
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Empty the stack on resume. The frames are remembered so the next
    /// stop can continue them.
    pub fn retire(&mut self) {
        self.active = 0;
        if !self.frames.is_empty() {
            self.retired = std::mem::take(&mut self.frames);
        }
    }

    /// Drop every frame, including retired ones.
    pub fn clear(&mut self) {
        self.active = 0;
        self.frames.clear();
        self.retired.clear();
    }

    fn allocate(&mut self) -> FrameId {
        let id = FrameId(self.next_id);
        self.next_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(handle: i64, name: &str, path: &str, line: u32) -> Frame {
        Frame::new(handle, 0, name, path, line).with_source_id(7)
    }

    #[test]
    fn test_continuation_keeps_frame_id() {
        let mut stack = FrameStack::new();
        stack.replace(vec![frame(100, "inner", "/a.js", 3), frame(101, "main", "/m.js", 9)]);
        let top = stack.frames()[0].id;
        let caller = stack.frames()[1].id;

        let update = stack.replace(vec![frame(200, "inner", "/a.js", 4), frame(201, "main", "/m.js", 9)]);
        assert!(update.continued);
        assert!(update.dropped.is_empty());
        assert_eq!(stack.frames()[0].id, top);
        assert_eq!(stack.frames()[0].line, 4);
        assert_eq!(stack.frames()[0].handle, 200);
        assert_eq!(stack.frames()[1].id, caller);
    }

    #[test]
    fn test_different_source_replaces_all() {
        let mut stack = FrameStack::new();
        stack.replace(vec![frame(1, "inner", "/a.js", 3)]);
        let old = stack.frames()[0].id;

        let update = stack.replace(vec![frame(1, "other", "/b.js", 3)]);
        assert!(!update.continued);
        assert_eq!(update.dropped, vec![old]);
        assert_ne!(stack.frames()[0].id, old);
    }

    #[test]
    fn test_reused_handles_still_get_fresh_ids() {
        // GDB levels repeat across stops
        let mut stack = FrameStack::new();
        stack.replace(vec![Frame::new(0, 0, "f", "/a.c", 1)]);
        let first = stack.frames()[0].id;
        stack.replace(vec![Frame::new(0, 0, "g", "/b.c", 1)]);
        assert_ne!(stack.frames()[0].id, first);
    }

    #[test]
    fn test_select_and_clear() {
        let mut stack = FrameStack::new();
        stack.replace(vec![frame(1, "a", "/a.js", 1), frame(2, "b", "/b.js", 2)]);
        assert!(stack.select(5).is_none());
        assert_eq!(stack.select(1).map(|f| f.name.as_str()), Some("b"));
        assert_eq!(stack.active_index(), 1);
        stack.clear();
        assert!(stack.active().is_none());
    }

    #[test]
    fn test_stop_after_resume_continues_retired_frames() {
        let mut stack = FrameStack::new();
        stack.replace(vec![frame(1, "inner", "/a.js", 3)]);
        let top = stack.frames()[0].id;

        stack.retire();
        assert!(stack.is_empty());
        let update = stack.replace(vec![frame(2, "inner", "/a.js", 5)]);
        assert!(update.continued);
        assert_eq!(stack.frames()[0].id, top);

        stack.clear();
        stack.replace(vec![frame(3, "inner", "/a.js", 6)]);
        assert_ne!(stack.frames()[0].id, top);
    }
}
