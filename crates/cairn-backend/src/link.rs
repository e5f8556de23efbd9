//! Sequence-correlated request link
//!
//! [`Link`] is the wire-agnostic half of a broker: it hands out sequence
//! numbers, keeps the registry of requests awaiting a reply, writes frames
//! in submission order, and queues them while no writer is attached.
//!
//! Guarantees:
//! - frames are written in sequence order, across reconnects
//! - a reply timeout starts only once the request has been written
//! - when a transport ends, every written request completes exactly once
//!   with [`Error::SessionEnded`]; unwritten ones stay queued
//! - [`Link::close`] completes everything, written or not

use crate::transport::{ConnectionState, LinkStatus};
use crate::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tracing::{debug, trace, warn};

pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Pending<T> {
    reply: oneshot::Sender<Result<T>>,
    /// Taken (and signalled) once the frame is on the wire.
    written: Option<oneshot::Sender<()>>,
}

struct Outgoing {
    seq: i64,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct Port {
    writer: Option<BoxWriter>,
    outbox: VecDeque<Outgoing>,
    /// Bumped on every attach and on close so stale readers can't tear
    /// down a newer connection.
    generation: u64,
}

/// A request registered with the link.
pub struct Submitted<T> {
    pub seq: i64,
    written: oneshot::Receiver<()>,
    reply: oneshot::Receiver<Result<T>>,
}

pub struct Link<T> {
    next_seq: Arc<Mutex<i64>>,
    pending: Arc<RwLock<HashMap<i64, Pending<T>>>>,
    port: Arc<Mutex<Port>>,
    status: Arc<watch::Sender<LinkStatus>>,
    request_timeout_ms: u64,
}

impl<T> Clone for Link<T> {
    fn clone(&self) -> Self {
        Self {
            next_seq: Arc::clone(&self.next_seq),
            pending: Arc::clone(&self.pending),
            port: Arc::clone(&self.port),
            status: Arc::clone(&self.status),
            request_timeout_ms: self.request_timeout_ms,
        }
    }
}

impl<T: Send + 'static> Link<T> {
    pub fn new(request_timeout_ms: u64) -> Self {
        let (status, _) = watch::channel(LinkStatus::default());
        Self {
            next_seq: Arc::new(Mutex::new(1)),
            pending: Arc::new(RwLock::new(HashMap::new())),
            port: Arc::new(Mutex::new(Port::default())),
            status: Arc::new(status),
            request_timeout_ms,
        }
    }

    pub fn request_timeout_ms(&self) -> u64 {
        self.request_timeout_ms
    }

    pub async fn next_sequence(&self) -> i64 {
        let mut seq = self.next_seq.lock().await;
        let current = *seq;
        *seq += 1;
        current
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    pub fn set_state(&self, next: ConnectionState) {
        self.update_status(next, None);
    }

    pub fn set_away(&self, away: bool) {
        self.status.send_if_modified(|status| {
            let changed = status.away != away;
            status.away = away;
            changed
        });
    }

    fn update_status(&self, next: ConnectionState, error: Option<&str>) {
        self.status.send_modify(|status| {
            if !status.transition(next) {
                warn!(
                    from = %status.state,
                    to = %next,
                    "Ignoring invalid connection state transition"
                );
            }
            if let Some(error) = error {
                status.last_error = Some(error.to_string());
            }
        });
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Register a request and write it, or queue it while disconnected.
    ///
    /// `encode` receives the allocated sequence number. Allocation and
    /// writing happen under one lock, so wire order equals sequence order.
    pub async fn submit<F>(&self, encode: F) -> Result<Submitted<T>>
    where
        F: FnOnce(i64) -> Result<Vec<u8>>,
    {
        if self.status.borrow().closed {
            return Err(Error::session_ended("session closed"));
        }

        let mut port = self.port.lock().await;
        let seq = self.next_sequence().await;
        let bytes = encode(seq)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let (written_tx, written_rx) = oneshot::channel();
        self.pending.write().await.insert(
            seq,
            Pending {
                reply: reply_tx,
                written: Some(written_tx),
            },
        );

        self.enqueue(&mut port, Outgoing { seq, bytes }).await;

        Ok(Submitted {
            seq,
            written: written_rx,
            reply: reply_rx,
        })
    }

    /// Write a message that expects no reply. Queued like requests.
    pub async fn notify<F>(&self, encode: F) -> Result<i64>
    where
        F: FnOnce(i64) -> Result<Vec<u8>>,
    {
        if self.status.borrow().closed {
            return Err(Error::session_ended("session closed"));
        }
        let mut port = self.port.lock().await;
        let seq = self.next_sequence().await;
        let bytes = encode(seq)?;
        self.enqueue(&mut port, Outgoing { seq, bytes }).await;
        Ok(seq)
    }

    /// Wait for the reply to a submitted request. The timeout only starts
    /// once the request has been written.
    #[tracing::instrument(skip(self, submitted), fields(seq = submitted.seq))]
    pub async fn wait(&self, command: &str, submitted: Submitted<T>) -> Result<T> {
        let Submitted {
            seq,
            written,
            reply,
        } = submitted;

        // Err: completed or failed before being written; the reply holds it
        let _ = written.await;

        let timeout_ms = self.request_timeout_ms;
        match tokio::time::timeout(Duration::from_millis(timeout_ms), reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::session_ended("reply channel closed")),
            Err(_) => {
                self.pending.write().await.remove(&seq);
                warn!(timeout_ms, command, "Request timed out");
                Err(Error::Timeout {
                    command: command.to_string(),
                    timeout_ms,
                })
            }
        }
    }

    pub async fn request<F>(&self, command: &str, encode: F) -> Result<T>
    where
        F: FnOnce(i64) -> Result<Vec<u8>>,
    {
        let submitted = self.submit(encode).await?;
        self.wait(command, submitted).await
    }

    /// Route a reply to its waiter. Returns false when nobody waits for `seq`.
    pub async fn complete(&self, seq: i64, result: Result<T>) -> bool {
        match self.pending.write().await.remove(&seq) {
            Some(entry) => {
                if entry.reply.send(result).is_err() {
                    debug!(seq, "Reply receiver dropped");
                }
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Install a writer and flush queued frames in order.
    ///
    /// Returns the generation the matching reader must report in
    /// [`Link::connection_lost`].
    pub async fn attach_writer(&self, writer: BoxWriter) -> Result<u64> {
        if self.status.borrow().closed {
            return Err(Error::session_ended("session closed"));
        }

        let mut port = self.port.lock().await;
        port.generation += 1;
        let generation = port.generation;
        port.writer = Some(writer);
        self.update_status(ConnectionState::Connected, None);

        if let Err(e) = self.flush(&mut port).await {
            self.update_status(ConnectionState::Disconnected, Some(&e.to_string()));
            return Err(e);
        }
        Ok(generation)
    }

    async fn enqueue(&self, port: &mut Port, outgoing: Outgoing) {
        if port.outbox.is_empty() {
            if let Some(writer) = port.writer.as_mut() {
                match write_frame(writer, &outgoing.bytes).await {
                    Ok(()) => {
                        self.mark_written(outgoing.seq).await;
                        return;
                    }
                    Err(e) => {
                        warn!(seq = outgoing.seq, "Write failed, queueing: {}", e);
                        port.writer = None;
                    }
                }
            }
        }
        trace!(
            seq = outgoing.seq,
            queued = port.outbox.len() + 1,
            "Queued while disconnected"
        );
        port.outbox.push_back(outgoing);
    }

    async fn flush(&self, port: &mut Port) -> Result<usize> {
        let mut flushed = 0;
        while let Some(outgoing) = port.outbox.pop_front() {
            let Some(writer) = port.writer.as_mut() else {
                port.outbox.push_front(outgoing);
                break;
            };
            if let Err(e) = write_frame(writer, &outgoing.bytes).await {
                port.outbox.push_front(outgoing);
                port.writer = None;
                return Err(e);
            }
            self.mark_written(outgoing.seq).await;
            flushed += 1;
        }
        if flushed > 0 {
            debug!(flushed, "Flushed queued requests");
        }
        Ok(flushed)
    }

    async fn mark_written(&self, seq: i64) {
        if let Some(entry) = self.pending.write().await.get_mut(&seq) {
            if let Some(tx) = entry.written.take() {
                let _ = tx.send(());
            }
        }
    }

    /// The transport of `generation` ended. Written requests fail with
    /// `SessionEnded`; queued ones wait for the next writer.
    pub async fn connection_lost(&self, generation: u64, reason: &str) -> usize {
        let mut port = self.port.lock().await;
        if port.generation != generation {
            debug!(generation, "Ignoring loss reported by a stale reader");
            return 0;
        }
        port.writer = None;
        let failed = self.fail_pending(|entry| entry.written.is_none(), reason).await;
        self.update_status(ConnectionState::Disconnected, Some(reason));
        drop(port);

        debug!(failed, reason, "Connection lost");
        failed
    }

    /// End the link for good: every pending or queued request fails.
    pub async fn close(&self, reason: &str) -> usize {
        let mut port = self.port.lock().await;
        port.generation += 1;
        if let Some(mut writer) = port.writer.take() {
            let _ = writer.shutdown().await;
        }
        port.outbox.clear();
        let failed = self.fail_pending(|_| true, reason).await;
        self.status.send_modify(|status| {
            status.transition(ConnectionState::Disconnected);
            status.closed = true;
            if status.last_error.is_none() {
                status.last_error = Some(reason.to_string());
            }
        });
        failed
    }

    async fn fail_pending(&self, select: impl Fn(&Pending<T>) -> bool, reason: &str) -> usize {
        let mut pending = self.pending.write().await;
        let seqs: Vec<i64> = pending
            .iter()
            .filter(|(_, entry)| select(entry))
            .map(|(seq, _)| *seq)
            .collect();
        for seq in &seqs {
            if let Some(entry) = pending.remove(seq) {
                let _ = entry.reply.send(Err(Error::session_ended(reason)));
            }
        }
        seqs.len()
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn queued_count(&self) -> usize {
        self.port.lock().await.outbox.len()
    }

    /// Remove entries whose caller gave up (future dropped before reply).
    pub async fn cleanup_orphaned_requests(&self) -> usize {
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|_, entry| !entry.reply.is_closed());
        before - pending.len()
    }
}

async fn write_frame(writer: &mut BoxWriter, bytes: &[u8]) -> Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}
