//! Session state and the events observers receive

use crate::watches::Watch;
use cairn_core::{Breakpoint, Frame, InspectorNode, PauseOnBreaks, Source, StopReason, Variable};
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Attaching,
    Running,
    Stopped,
    Detaching,
}

impl SessionState {
    pub fn is_attached(&self) -> bool {
        matches!(self, SessionState::Running | SessionState::Stopped)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Attaching => "attaching",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
            SessionState::Detaching => "detaching",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// Reconciliation finished; commands are accepted from here on.
    Attached {
        breakpoints: Vec<Breakpoint>,
        failed: Vec<Breakpoint>,
    },
    Stopped {
        reason: StopReason,
        message: Option<String>,
        frames: Vec<Frame>,
    },
    FrameActivated {
        index: usize,
        frame: Frame,
    },
    BreakpointsChanged(Vec<Breakpoint>),
    BreakpointFailed {
        breakpoint: Breakpoint,
        reason: String,
    },
    VariableChanged {
        parent: InspectorNode,
        variable: Variable,
    },
    /// An edit was rejected; `previous` is visible again.
    VariableEditFailed {
        parent: InspectorNode,
        previous: Variable,
        error: String,
    },
    WatchesChanged(Vec<Watch>),
    PauseOnBreaksChanged(PauseOnBreaks),
    Sources(Vec<Source>),
    SourceCompiled(Source),
    Output {
        category: String,
        text: String,
    },
    /// The connection dropped while the host was away; it is restored when
    /// the host returns.
    ConnectionSuspended {
        reason: String,
    },
    Reconnected,
    Error {
        message: String,
    },
    Detached {
        reason: String,
    },
}

/// Fan-out of [`SessionEvent`]s to any number of observers.
///
/// Publishing never blocks: a full channel drops the event for that
/// observer and a closed channel removes it.
pub struct Observers {
    senders: Mutex<Vec<mpsc::Sender<SessionEvent>>>,
    capacity: usize,
}

impl Observers {
    pub fn new(capacity: usize) -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> mpsc::Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        if let Ok(mut senders) = self.senders.lock() {
            senders.retain(|existing| !existing.is_closed());
            senders.push(tx);
        }
        rx
    }

    pub fn publish(&self, event: SessionEvent) {
        let Ok(mut senders) = self.senders.lock() else {
            return;
        };
        let mut dropped = 0;
        senders.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                dropped += 1;
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if dropped > 0 {
            warn!("Dropped session event {:?} for {} slow observer(s)", event, dropped);
        }
    }

    pub fn len(&self) -> usize {
        self.senders.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_observers_are_pruned() {
        let observers = Observers::new(4);
        let mut kept = observers.subscribe();
        drop(observers.subscribe());

        observers.publish(SessionEvent::Reconnected);
        assert_eq!(kept.recv().await, Some(SessionEvent::Reconnected));
        assert_eq!(observers.len(), 1);
    }

    #[tokio::test]
    async fn test_full_observer_misses_events() {
        let observers = Observers::new(1);
        let mut rx = observers.subscribe();
        observers.publish(SessionEvent::StateChanged(SessionState::Running));
        observers.publish(SessionEvent::StateChanged(SessionState::Stopped));
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::StateChanged(SessionState::Running))
        );
        assert!(rx.try_recv().is_err());
    }
}
