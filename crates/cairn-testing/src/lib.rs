//! Test utilities for cairn
//!
//! # Mocks
//!
//! - [`MockBackend`] - a scripted [`cairn_ports::DebugBackend`] that records
//!   every call and lets tests push backend events
//! - [`RecordingDecorations`] - an editor decoration sink that records marks
//! - [`MemoryBreakpointStore`] - an in-memory breakpoint store
//!
//! # Fixtures
//!
//! - [`fixtures::runner`] - an attach runner configuration
//! - [`fixtures::stack`] - a two-frame call stack
//!
//! # Usage
//!
//! ```no_run
//! use cairn_testing::{fixtures, MockBackend};
//! use cairn_ports::DebugBackend;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = MockBackend::new();
//! backend.set_frames(fixtures::stack());
//! backend.attach(&fixtures::runner()).await?;
//! assert_eq!(backend.call_count("attach"), 1);
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
mod mocks;
pub mod proptest_config;

pub use mocks::{DecorationCall, MemoryBreakpointStore, MockBackend, RecordingDecorations};
