//! Debounced breakpoint persistence
//!
//! Every visible breakpoint mutation schedules a save of the latest list.
//! A background task waits until no new list has arrived for the debounce
//! interval and then writes once. [`PersistScheduler::flush`] writes the
//! pending list immediately (used on detach).

use cairn_core::Breakpoint;
use cairn_ports::BreakpointStoreRef;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Pending = Arc<Mutex<Option<Vec<Breakpoint>>>>;

pub struct PersistScheduler {
    store: BreakpointStoreRef,
    pending: Pending,
    kick_tx: mpsc::Sender<()>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PersistScheduler {
    /// Must be called inside a tokio runtime; the debounce task is spawned
    /// immediately.
    pub fn new(store: BreakpointStoreRef, debounce: Duration) -> Self {
        let pending: Pending = Arc::new(Mutex::new(None));
        let (kick_tx, kick_rx) = mpsc::channel(1);
        let task = Self::spawn_debounce_task(store.clone(), pending.clone(), kick_rx, debounce);
        Self {
            store,
            pending,
            kick_tx,
            task: std::sync::Mutex::new(Some(task)),
        }
    }

    /// Queue `breakpoints` as the next list to save, replacing any list
    /// still waiting.
    pub async fn schedule(&self, breakpoints: Vec<Breakpoint>) {
        *self.pending.lock().await = Some(breakpoints);
        // a full channel means a kick is already queued
        let _ = self.kick_tx.try_send(());
    }

    /// Save the pending list now, if there is one.
    pub async fn flush(&self) {
        Self::save_pending(&self.store, &self.pending).await;
    }

    pub async fn has_pending(&self) -> bool {
        self.pending.lock().await.is_some()
    }

    fn spawn_debounce_task(
        store: BreakpointStoreRef,
        pending: Pending,
        mut kick_rx: mpsc::Receiver<()>,
        debounce: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            'outer: while kick_rx.recv().await.is_some() {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(debounce) => break,
                        kick = kick_rx.recv() => {
                            if kick.is_none() {
                                debug!("Persist channel closed, performing final save");
                                Self::save_pending(&store, &pending).await;
                                break 'outer;
                            }
                        }
                    }
                }
                Self::save_pending(&store, &pending).await;
            }
            info!("Breakpoint persist task stopped");
        })
    }

    async fn save_pending(store: &BreakpointStoreRef, pending: &Pending) {
        let Some(breakpoints) = pending.lock().await.take() else {
            return;
        };
        match store.save_breakpoints(&breakpoints).await {
            Ok(()) => debug!(count = breakpoints.len(), "Saved breakpoints"),
            Err(e) => warn!(count = breakpoints.len(), "Failed to save breakpoints: {}", e),
        }
    }
}

impl Drop for PersistScheduler {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_testing::MemoryBreakpointStore;

    #[tokio::test]
    async fn test_burst_of_changes_saves_once() {
        let store = Arc::new(MemoryBreakpointStore::new());
        let scheduler = PersistScheduler::new(store.clone(), Duration::from_millis(30));

        for line in 1..=5 {
            scheduler.schedule(vec![Breakpoint::new("/a.js", line)]).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(store.save_count(), 1);
        assert_eq!(store.saved()[0].line, 5);
        assert!(!scheduler.has_pending().await);
    }

    #[tokio::test]
    async fn test_flush_saves_immediately() {
        let store = Arc::new(MemoryBreakpointStore::new());
        let scheduler = PersistScheduler::new(store.clone(), Duration::from_secs(60));

        scheduler.schedule(vec![Breakpoint::new("/a.js", 2)]).await;
        scheduler.flush().await;
        assert_eq!(store.save_count(), 1);

        // nothing pending: a second flush writes nothing
        scheduler.flush().await;
        assert_eq!(store.save_count(), 1);
    }
}
