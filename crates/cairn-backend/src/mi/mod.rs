//! GDB/MI line protocol and backend
//!
//! - [`value`] - result value grammar and C-string quoting
//! - [`record`] - classification of output lines
//! - [`channel`] - token-correlated command channel
//! - [`backend`] - [`MiBackend`], the `DebugBackend` built on the channel

pub mod backend;
pub mod channel;
pub mod record;
pub mod value;

pub use backend::MiBackend;
pub use channel::MiChannel;
pub use record::{AsyncKind, AsyncRecord, MiRecord, ResultClass, ResultRecord, StreamKind};
pub use value::{parse_cstring, quote, MiResults, MiValue};
