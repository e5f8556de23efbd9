//! Cairn console front end
//!
//! Library half of the `cairn` binary: command implementations plus the
//! editor-side adapters a terminal needs (decorations printed to stdout,
//! breakpoints persisted as JSON).

pub mod commands;
pub mod console;
pub mod context;
pub mod decorations;
pub mod render;
pub mod store;

pub use console::{ConsoleCommand, Flow, ParseError};
pub use context::CliContext;
pub use decorations::TerminalDecorations;
pub use store::JsonFileStore;
