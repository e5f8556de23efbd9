//! Mock implementations of the cairn ports

mod backend;
mod editor;

pub use backend::MockBackend;
pub use editor::{DecorationCall, MemoryBreakpointStore, RecordingDecorations};
