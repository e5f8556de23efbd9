//! Editor-side mocks: decoration recording and in-memory persistence

use async_trait::async_trait;
use cairn_core::{Breakpoint, Error, Result};
use cairn_ports::{BreakpointStore, EditorDecorations};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecorationCall {
    Active { path: String, line: u32 },
    Stack { path: String, line: u32 },
    Clear { path: String },
    Open { path: String, line: u32 },
}

/// Decoration sink that records every call. Document lengths are set by
/// the test; unknown documents report `None`.
#[derive(Debug, Default)]
pub struct RecordingDecorations {
    calls: Mutex<Vec<DecorationCall>>,
    lengths: Mutex<HashMap<String, u32>>,
}

impl RecordingDecorations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_length(self, path: &str, lines: u32) -> Self {
        self.lengths.lock().unwrap().insert(path.to_string(), lines);
        self
    }

    pub fn calls(&self) -> Vec<DecorationCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Return and forget the recorded calls.
    pub fn take_calls(&self) -> Vec<DecorationCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn record(&self, call: DecorationCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl EditorDecorations for RecordingDecorations {
    fn mark_active_line(&self, path: &str, line: u32) {
        self.record(DecorationCall::Active {
            path: path.to_string(),
            line,
        });
    }

    fn mark_stack_line(&self, path: &str, line: u32) {
        self.record(DecorationCall::Stack {
            path: path.to_string(),
            line,
        });
    }

    fn clear_marks(&self, path: &str) {
        self.record(DecorationCall::Clear {
            path: path.to_string(),
        });
    }

    fn document_length(&self, path: &str) -> Option<u32> {
        self.lengths.lock().unwrap().get(path).copied()
    }

    fn open_location(&self, path: &str, line: u32, _column: u32) {
        self.record(DecorationCall::Open {
            path: path.to_string(),
            line,
        });
    }
}

/// Breakpoint store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryBreakpointStore {
    saved: Mutex<Vec<Breakpoint>>,
    save_count: AtomicUsize,
    fail: AtomicBool,
}

impl MemoryBreakpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_breakpoints(breakpoints: Vec<Breakpoint>) -> Self {
        Self {
            saved: Mutex::new(breakpoints),
            ..Self::default()
        }
    }

    pub fn saved(&self) -> Vec<Breakpoint> {
        self.saved.lock().unwrap().clone()
    }

    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }

    /// Make every following save fail.
    pub fn fail_saves(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BreakpointStore for MemoryBreakpointStore {
    async fn load_breakpoints(&self) -> Result<Vec<Breakpoint>> {
        Ok(self.saved())
    }

    async fn save_breakpoints(&self, breakpoints: &[Breakpoint]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Persistence("store is read-only".to_string()));
        }
        *self.saved.lock().unwrap() = breakpoints.to_vec();
        self.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
