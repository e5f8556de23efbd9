//! Cairn session coordinator
//!
//! [`Session`] ties a [`cairn_ports::DebugBackend`] to the editor contracts
//! and owns all mutable debugger state:
//! - the breakpoint book and its reconciliation with the backend
//!   ([`breakpoints`], [`reconcile`])
//! - the frame stack with continuation across stops ([`frames`])
//! - lazily expanded scopes and variables ([`variables`])
//! - watch expressions ([`watches`])
//! - debounced persistence ([`persistence`])

pub mod breakpoints;
pub mod events;
pub mod frames;
pub mod persistence;
pub mod reconcile;
mod session;
pub mod variables;
pub mod watches;

pub use breakpoints::{BoundsOutcome, BreakpointBook};
pub use events::{Observers, SessionEvent, SessionState};
pub use frames::{FrameStack, FrameUpdate};
pub use persistence::PersistScheduler;
pub use reconcile::{plan, resync, ResyncOutcome, ResyncPlan, SyncedPair};
pub use session::{Expansion, Session};
pub use variables::ExpansionCache;
pub use watches::{Watch, WatchList};
