//! Editor-side contracts: line decorations and breakpoint persistence

use async_trait::async_trait;
use cairn_core::{Breakpoint, Result};
use std::sync::Arc;

pub type EditorDecorationsRef = Arc<dyn EditorDecorations + Send + Sync>;
pub type BreakpointStoreRef = Arc<dyn BreakpointStore + Send + Sync>;

/// Highlighting of the execution position in editor documents.
///
/// Called synchronously from the session; implementations must not block.
pub trait EditorDecorations: Send + Sync {
    /// Current execution line of the active frame.
    fn mark_active_line(&self, path: &str, line: u32);

    /// Call site of a caller frame when a non-top frame is active.
    fn mark_stack_line(&self, path: &str, line: u32);

    fn clear_marks(&self, path: &str);

    /// Number of lines in the document, if it is open.
    fn document_length(&self, path: &str) -> Option<u32>;

    /// Reveal a location; editors without navigation ignore it.
    fn open_location(&self, _path: &str, _line: u32, _column: u32) {}
}

/// Decorations sink that renders nothing and knows no documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDecorations;

impl EditorDecorations for NullDecorations {
    fn mark_active_line(&self, _path: &str, _line: u32) {}
    fn mark_stack_line(&self, _path: &str, _line: u32) {}
    fn clear_marks(&self, _path: &str) {}
    fn document_length(&self, _path: &str) -> Option<u32> {
        None
    }
}

/// Storage for the user's breakpoint list between sessions.
#[async_trait]
pub trait BreakpointStore: Send + Sync {
    async fn load_breakpoints(&self) -> Result<Vec<Breakpoint>>;
    async fn save_breakpoints(&self, breakpoints: &[Breakpoint]) -> Result<()>;
}

/// Store that never holds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBreakpointStore;

#[async_trait]
impl BreakpointStore for NullBreakpointStore {
    async fn load_breakpoints(&self) -> Result<Vec<Breakpoint>> {
        Ok(Vec::new())
    }

    async fn save_breakpoints(&self, _breakpoints: &[Breakpoint]) -> Result<()> {
        Ok(())
    }
}
