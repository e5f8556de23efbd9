//! Cairn backend - transports and debugger protocol adapters
//!
//! # Layers
//!
//! - [`transport`] - spawning or dialing the backend, reconnect with backoff
//! - [`framing`] - `Content-Length` framing with a restartable decoder
//! - [`link`] - sequence correlation, the disconnected queue and reply timeouts
//! - [`broker`] - DAP request/response/event plumbing over a link
//! - [`mi`] - the GDB/MI line protocol over a link
//! - [`dap`] / [`mi::MiBackend`] - the `DebugBackend` implementations
//! - [`factory`] - adapter selection from configuration

pub mod broker;
pub mod constants;
pub mod dap;
pub mod error;
pub mod ext;
pub mod factory;
pub mod framing;
pub mod link;
pub mod mi;
pub mod protocol;
pub mod subscribers;
pub mod transport;

pub use broker::DapBroker;
pub use dap::DapBackend;
pub use error::{Error, Result};
pub use ext::DebugResult;
pub use factory::{create_backend, BackendFactory};
pub use framing::{encode_frame, Decoded, FrameDecoder};
pub use link::Link;
pub use mi::{MiBackend, MiChannel};
pub use subscribers::Subscribers;
pub use transport::{ConnectionState, LinkStatus, Streams, Transport};
