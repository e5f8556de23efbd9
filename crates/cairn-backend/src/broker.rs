//! DAP Broker - Manages communication with a JSON debug backend
//!
//! The broker handles:
//! - Message framing (Content-Length headers, restartable decoding)
//! - Sequence number generation and request/response correlation
//! - Queueing while disconnected and flushing on (re)attach
//! - Event broadcasting to subscribers
//!
//! A broker outlives its connections: [`DapBroker::attach_streams`] can be
//! called again after a connection loss and queued requests are flushed to
//! the new writer. Subscribers are kept across reconnects.

use crate::framing::{encode_frame, Decoded, FrameDecoder};
use crate::link::{BoxReader, Link};
use crate::protocol::{Event, ProtocolMessage, Request, Response};
use crate::subscribers::Subscribers;
use crate::transport::{LinkStatus, Streams};
use crate::{constants::events, Error, Result};
use cairn_config::ConnectionConfig;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Read buffer size for the frame reader
const READ_CHUNK: usize = 8192;

enum ReaderExit {
    /// Transport ended; the backend may still be alive
    Lost(String),
    /// The backend announced the end of the debug session
    Ended(String),
}

pub struct DapBroker {
    link: Link<Response>,
    subscribers: Subscribers<Event>,
    reader_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    max_parse_failures: u32,
}

impl DapBroker {
    /// Create a disconnected broker. Requests queue until streams attach.
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            link: Link::new(config.request_timeout_ms),
            subscribers: Subscribers::new(config.event_channel_capacity),
            reader_task: std::sync::Mutex::new(None),
            max_parse_failures: config.max_consecutive_parse_failures.max(1),
        }
    }

    /// Create a broker already attached to `streams`.
    pub async fn connected(streams: Streams, config: &ConnectionConfig) -> Result<Self> {
        let broker = Self::new(config);
        broker.attach_streams(streams).await?;
        Ok(broker)
    }

    /// Install a new connection, flush queued requests and start reading.
    pub async fn attach_streams(&self, streams: Streams) -> Result<()> {
        let Streams { reader, writer } = streams;
        let generation = self.link.attach_writer(writer).await?;
        let handle = Self::spawn_reader_task(
            reader,
            generation,
            self.link.clone(),
            self.subscribers.clone(),
            self.max_parse_failures,
        );
        if let Ok(mut slot) = self.reader_task.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
        Ok(())
    }

    pub async fn next_sequence(&self) -> i64 {
        self.link.next_sequence().await
    }

    /// Send a request and wait for its response.
    ///
    /// A response with `success: false` is returned as [`Error::Command`].
    #[tracing::instrument(skip(self, arguments), fields(seq))]
    pub async fn send_request(
        &self,
        command: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<Response> {
        let submitted = self
            .link
            .submit(|seq| encode_request(seq, command, arguments))
            .await?;
        tracing::Span::current().record("seq", submitted.seq);
        debug!(command, "Sending DAP request");

        let response = self.link.wait(command, submitted).await?;
        if response.success {
            Ok(response)
        } else {
            Err(Error::Command(response.message.unwrap_or_else(|| {
                format!("'{}' failed without a message", command)
            })))
        }
    }

    /// Send a request without waiting for its response. Returns its seq.
    pub async fn send_no_wait(
        &self,
        command: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<i64> {
        self.link
            .notify(|seq| encode_request(seq, command, arguments))
            .await
    }

    /// Subscribe to events (bounded; a slow subscriber loses events).
    pub async fn subscribe_events(&self) -> mpsc::Receiver<Event> {
        self.subscribers.subscribe().await
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.len().await
    }

    pub fn status(&self) -> LinkStatus {
        self.link.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.link.watch_status()
    }

    pub fn set_state(&self, state: crate::transport::ConnectionState) {
        self.link.set_state(state);
    }

    pub fn set_away(&self, away: bool) {
        self.link.set_away(away);
    }

    pub async fn pending_request_count(&self) -> usize {
        self.link.pending_count().await
    }

    pub async fn queued_request_count(&self) -> usize {
        self.link.queued_count().await
    }

    pub async fn cleanup_orphaned_requests(&self) -> usize {
        let removed = self.link.cleanup_orphaned_requests().await;
        if removed > 0 {
            debug!("Cleaned up {} orphaned pending request(s)", removed);
        }
        removed
    }

    /// Whether the reader task of the current connection is running.
    pub fn is_alive(&self) -> bool {
        self.reader_task
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// End the session: fail everything pending and stop reading.
    pub async fn close(&self, reason: &str) {
        let failed = self.link.close(reason).await;
        if let Ok(mut slot) = self.reader_task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        info!(failed, reason, "Broker closed");
    }

    fn spawn_reader_task(
        reader: BoxReader,
        generation: u64,
        link: Link<Response>,
        subscribers: Subscribers<Event>,
        max_parse_failures: u32,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!(generation, "Reader task started");
            let exit =
                Self::read_loop(reader, &link, &subscribers, max_parse_failures).await;

            match exit {
                ReaderExit::Lost(reason) => {
                    info!("Backend connection lost: {}", reason);
                    link.connection_lost(generation, &reason).await;
                }
                ReaderExit::Ended(event) => {
                    info!("Received '{}' event - closing connection", event);
                    link.close(&format!("backend sent '{}'", event)).await;
                }
            }
        })
    }

    async fn read_loop(
        mut reader: BoxReader,
        link: &Link<Response>,
        subscribers: &Subscribers<Event>,
        max_parse_failures: u32,
    ) -> ReaderExit {
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; READ_CHUNK];
        let mut failures = 0u32;

        loop {
            let read = match reader.read(&mut buf).await {
                Ok(0) => return ReaderExit::Lost("backend closed the connection".to_string()),
                Ok(n) => n,
                Err(e) => return ReaderExit::Lost(format!("read failed: {}", e)),
            };
            decoder.feed(&buf[..read]);

            while let Some(decoded) = decoder.next_frame() {
                let parsed = match decoded {
                    Decoded::Frame(bytes) => {
                        trace!("Received message: {}", String::from_utf8_lossy(&bytes));
                        serde_json::from_slice::<ProtocolMessage>(&bytes).map_err(Error::from)
                    }
                    Decoded::Garbage { discarded, reason } => Err(Error::Protocol(format!(
                        "discarded {} bytes: {}",
                        discarded, reason
                    ))),
                };

                match parsed {
                    Ok(message) => {
                        failures = 0;
                        if let Some(event) = Self::handle_message(message, link, subscribers).await
                        {
                            return ReaderExit::Ended(event);
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(failures, "Dropping undecodable message: {}", e);
                        if failures >= max_parse_failures {
                            return ReaderExit::Lost(format!(
                                "{} consecutive undecodable messages",
                                failures
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Route a message. Returns the event name when it ends the session.
    async fn handle_message(
        message: ProtocolMessage,
        link: &Link<Response>,
        subscribers: &Subscribers<Event>,
    ) -> Option<String> {
        match message {
            ProtocolMessage::Response(response) => {
                let request_seq = response.request_seq;
                if !link.complete(request_seq, Ok(response)).await {
                    warn!("Received response for unknown request seq: {}", request_seq);
                }
                None
            }
            ProtocolMessage::Event(event) => {
                // The backend may keep the socket open after these
                let ends_session =
                    event.event == events::TERMINATED || event.event == events::EXITED;
                let name = event.event.clone();
                subscribers.publish(event).await;
                ends_session.then_some(name)
            }
            ProtocolMessage::Request(request) => {
                warn!(
                    command = %request.command,
                    "Ignoring reverse request from backend"
                );
                None
            }
        }
    }
}

impl Drop for DapBroker {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.reader_task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

fn encode_request(seq: i64, command: &str, arguments: Option<serde_json::Value>) -> Result<Vec<u8>> {
    let request = Request {
        seq,
        command: command.to_string(),
        arguments,
    };
    let json = serde_json::to_string(&ProtocolMessage::Request(request))?;
    trace!("Sending message: {}", json);
    Ok(encode_frame(&json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ConnectionState;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            request_timeout_ms: 2_000,
            ..ConnectionConfig::default()
        }
    }

    /// Helper to create a pair of in-memory streams for testing
    fn create_test_streams() -> (Streams, DuplexStream) {
        let (client, server) = tokio::io::duplex(8192);
        let (read, write) = tokio::io::split(client);
        (Streams::new(read, write), server)
    }

    /// Reads framed messages on the fake backend side. Keeps one decoder
    /// so frames arriving in the same read are not lost.
    struct MessageReader<R> {
        inner: R,
        decoder: FrameDecoder,
    }

    impl<R: AsyncRead + Unpin> MessageReader<R> {
        fn new(inner: R) -> Self {
            Self {
                inner,
                decoder: FrameDecoder::new(),
            }
        }

        async fn next(&mut self) -> ProtocolMessage {
            let mut buf = [0u8; 1024];
            loop {
                if let Some(Decoded::Frame(bytes)) = self.decoder.next_frame() {
                    return serde_json::from_slice(&bytes).unwrap();
                }
                let n = self.inner.read(&mut buf).await.unwrap();
                assert!(n > 0, "client closed the stream");
                self.decoder.feed(&buf[..n]);
            }
        }
    }

    async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &ProtocolMessage) {
        let json = serde_json::to_string(message).unwrap();
        writer.write_all(&encode_frame(&json)).await.unwrap();
        writer.flush().await.unwrap();
    }

    /// Fake backend answering every request successfully, echoing the command.
    fn spawn_echo_server(server: DuplexStream) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (read, mut write): (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>) =
                tokio::io::split(server);
            let mut read = MessageReader::new(read);
            let mut seq = 100;
            loop {
                let ProtocolMessage::Request(req) = read.next().await else {
                    continue;
                };
                seq += 1;
                let response = Response::success(seq, req.seq, req.command.clone())
                    .with_body(serde_json::json!({"command": req.command}));
                write_message(&mut write, &ProtocolMessage::Response(response)).await;
            }
        })
    }

    #[tokio::test]
    async fn test_sequence_number_generation() {
        let broker = Arc::new(DapBroker::new(&test_config()));

        let mut handles = vec![];
        for _ in 0..10 {
            let broker = broker.clone();
            handles.push(tokio::spawn(async move { broker.next_sequence().await }));
        }

        let mut seqs = vec![];
        for handle in handles {
            seqs.push(handle.await.unwrap());
        }
        seqs.sort();
        assert_eq!(seqs, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_request_response_correlation() {
        let (streams, server) = create_test_streams();
        let broker = DapBroker::connected(streams, &test_config()).await.unwrap();
        spawn_echo_server(server);

        let response = broker.send_request("initialize", None).await.unwrap();
        assert_eq!(response.command, "initialize");
        assert!(response.success);
        assert_eq!(response.body.unwrap()["command"], "initialize");
    }

    #[tokio::test]
    async fn test_error_response_maps_to_command_error() {
        let (streams, server) = create_test_streams();
        let broker = DapBroker::connected(streams, &test_config()).await.unwrap();

        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            if let ProtocolMessage::Request(req) = MessageReader::new(read).next().await {
                let response = Response::error(1, req.seq, req.command, "no such frame");
                write_message(&mut write, &ProtocolMessage::Response(response)).await;
            }
            std::future::pending::<()>().await;
        });

        let err = broker.send_request("scopes", None).await.unwrap_err();
        assert_eq!(err, Error::Command("no such frame".to_string()));
    }

    #[tokio::test]
    async fn test_event_broadcasting() {
        let (streams, mut server) = create_test_streams();
        let broker = DapBroker::connected(streams, &test_config()).await.unwrap();

        let mut sub1 = broker.subscribe_events().await;
        let mut sub2 = broker.subscribe_events().await;

        let event = Event::new(1, "output").with_body(serde_json::json!({"output": "test message"}));
        write_message(&mut server, &ProtocolMessage::Event(event)).await;

        let evt1 = tokio::time::timeout(Duration::from_secs(1), sub1.recv())
            .await
            .unwrap()
            .unwrap();
        let evt2 = tokio::time::timeout(Duration::from_secs(1), sub2.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(evt1.event, "output");
        assert_eq!(evt2.event, "output");
        assert_eq!(evt1.body.unwrap()["output"], "test message");
    }

    #[tokio::test]
    async fn test_request_timeout_keeps_connection() {
        let (streams, _server) = create_test_streams();
        let config = ConnectionConfig {
            request_timeout_ms: 50,
            ..ConnectionConfig::default()
        };
        let broker = DapBroker::connected(streams, &config).await.unwrap();

        let err = broker.send_request("stackTrace", None).await.unwrap_err();
        assert_eq!(
            err,
            Error::Timeout {
                command: "stackTrace".to_string(),
                timeout_ms: 50
            }
        );
        assert!(broker.status().is_connected());
        assert_eq!(broker.pending_request_count().await, 0);
    }

    #[tokio::test]
    async fn test_multiple_pending_requests() {
        let (streams, server) = create_test_streams();
        let broker = Arc::new(DapBroker::connected(streams, &test_config()).await.unwrap());
        spawn_echo_server(server);

        let (r1, r2, r3) = tokio::join!(
            broker.send_request("test1", None),
            broker.send_request("test2", None),
            broker.send_request("test3", None),
        );

        assert_eq!(r1.unwrap().command, "test1");
        assert_eq!(r2.unwrap().command, "test2");
        assert_eq!(r3.unwrap().command, "test3");
    }

    #[tokio::test]
    async fn test_transport_end_completes_in_flight_requests_once() {
        let (streams, server) = create_test_streams();
        let broker = Arc::new(DapBroker::connected(streams, &test_config()).await.unwrap());

        let mut waiters = Vec::new();
        for command in ["threads", "stackTrace", "scopes"] {
            let broker = broker.clone();
            waiters.push(tokio::spawn(async move {
                broker.send_request(command, None).await
            }));
        }

        // Wait until all three are on the wire
        let (read, write) = tokio::io::split(server);
        let mut read = MessageReader::new(read);
        for _ in 0..3 {
            read.next().await;
        }
        drop(read);
        drop(write);

        for waiter in waiters {
            let result = tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(result, Err(Error::SessionEnded(_))), "{:?}", result);
        }
        assert_eq!(broker.pending_request_count().await, 0);
        assert_eq!(broker.status().state, ConnectionState::Disconnected);
        assert!(!broker.status().closed);
    }

    #[tokio::test]
    async fn test_requests_queued_while_disconnected_flush_in_order() {
        let broker = Arc::new(DapBroker::new(&test_config()));

        let mut waiters = Vec::new();
        for command in ["first", "second", "third"] {
            let sender = broker.clone();
            waiters.push(tokio::spawn(async move {
                sender.send_request(command, None).await
            }));
            // Submission order is the spawn order
            while broker.queued_request_count().await < waiters.len() {
                tokio::task::yield_now().await;
            }
        }

        let (streams, server) = create_test_streams();
        let (read, mut write) = tokio::io::split(server);
        let mut read = MessageReader::new(read);
        broker.attach_streams(streams).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            if let ProtocolMessage::Request(req) = read.next().await {
                seen.push((req.seq, req.command.clone()));
                let response = Response::success(0, req.seq, req.command);
                write_message(&mut write, &ProtocolMessage::Response(response)).await;
            }
        }
        assert_eq!(
            seen,
            vec![
                (1, "first".to_string()),
                (2, "second".to_string()),
                (3, "third".to_string())
            ]
        );
        for waiter in waiters {
            assert!(waiter.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn test_reattach_after_loss_keeps_subscribers() {
        let broker = DapBroker::new(&test_config());
        let mut events = broker.subscribe_events().await;

        let (streams, server) = create_test_streams();
        broker.attach_streams(streams).await.unwrap();
        drop(server);

        let mut status = broker.watch_status();
        while status.borrow().is_connected() {
            status.changed().await.unwrap();
        }

        let (streams, mut server) = create_test_streams();
        broker.attach_streams(streams).await.unwrap();
        assert!(broker.status().is_connected());

        write_message(&mut server, &ProtocolMessage::Event(Event::new(1, "output"))).await;
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event, "output");
    }

    #[tokio::test]
    async fn test_terminated_event_closes_session() {
        let (streams, mut server) = create_test_streams();
        let broker = DapBroker::connected(streams, &test_config()).await.unwrap();
        let mut events = broker.subscribe_events().await;

        write_message(&mut server, &ProtocolMessage::Event(Event::new(1, "terminated"))).await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.event, "terminated");

        let mut status = broker.watch_status();
        while !status.borrow().closed {
            status.changed().await.unwrap();
        }
        assert!(matches!(
            broker.send_request("threads", None).await,
            Err(Error::SessionEnded(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_is_skipped_between_frames() {
        let (streams, mut server) = create_test_streams();
        let broker = DapBroker::connected(streams, &test_config()).await.unwrap();
        let mut events = broker.subscribe_events().await;

        server.write_all(b"Debugger listening on ws://...\r\n").await.unwrap();
        write_message(&mut server, &ProtocolMessage::Event(Event::new(1, "output"))).await;

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event, "output");
        assert!(broker.status().is_connected());
    }

    #[tokio::test]
    async fn test_repeated_parse_failures_drop_connection() {
        let (streams, mut server) = create_test_streams();
        let config = ConnectionConfig {
            max_consecutive_parse_failures: 2,
            ..test_config()
        };
        let broker = DapBroker::connected(streams, &config).await.unwrap();

        for _ in 0..2 {
            server.write_all(&encode_frame("{not json")).await.unwrap();
        }

        let mut status = broker.watch_status();
        while status.borrow().is_connected() {
            status.changed().await.unwrap();
        }
        let last_error = broker.status().last_error.unwrap();
        assert!(last_error.contains("undecodable"), "{}", last_error);
    }

    #[tokio::test]
    async fn test_dropped_subscribers_cleaned_on_event() {
        let (streams, mut server) = create_test_streams();
        let broker = DapBroker::connected(streams, &test_config()).await.unwrap();

        let sub1 = broker.subscribe_events().await;
        let sub2 = broker.subscribe_events().await;
        let mut sub3 = broker.subscribe_events().await;
        assert_eq!(broker.subscriber_count().await, 3);

        drop(sub1);
        drop(sub2);

        write_message(&mut server, &ProtocolMessage::Event(Event::new(1, "output"))).await;
        sub3.recv().await.unwrap();

        assert_eq!(broker.subscriber_count().await, 1);
    }
}
