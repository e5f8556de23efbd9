//! Cairn core - debugger entities and pure state rules
//!
//! This crate holds the backend-agnostic model shared by every other cairn
//! crate:
//! - Entities: [`Breakpoint`], [`Frame`], [`Scope`], [`Variable`], [`Source`]
//! - The error taxonomy ([`Error`], [`ErrorDisposition`])
//! - Pure rules that never touch a backend: duplicate collapsing and
//!   breakpoint row adjustment for document edits ([`edit`])

pub mod edit;
pub mod entities;
pub mod error;

pub use edit::{adjust_breakpoints, adjust_rows, DocumentEdit, EditAction, TextPosition};
pub use entities::*;
pub use error::{Error, ErrorDisposition, Result};
