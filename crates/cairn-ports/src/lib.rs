//! Port trait definitions for cairn
//!
//! The session coordinator depends only on these contracts:
//! - [`DebugBackend`] - a debugger runtime integration
//! - [`EditorDecorations`] - execution-line highlighting in the editor
//! - [`BreakpointStore`] - breakpoint persistence between sessions
//!
//! Infrastructure crates (`cairn-backend`, the CLI, `cairn-testing`)
//! provide implementations.

mod backend;
mod editor;

pub use backend::{
    AttachOutcome, BackendEvent, BackendFeatures, DebugBackend, DebugBackendRef, DetachReason,
    Feature,
};
pub use editor::{
    BreakpointStore, BreakpointStoreRef, EditorDecorations, EditorDecorationsRef,
    NullBreakpointStore, NullDecorations,
};
