//! DapBackend against a scripted in-memory adapter.

use cairn_backend::framing::{encode_frame, Decoded, FrameDecoder};
use cairn_backend::protocol::{Event, ProtocolMessage, Request, Response};
use cairn_backend::{DapBackend, Streams};
use cairn_config::{BackendKind, ConnectionConfig, RunnerConfig};
use cairn_core::{Breakpoint, Error, Frame, PauseOnBreaks, StopReason};
use cairn_ports::{BackendEvent, DebugBackend, DetachReason};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, WriteHalf};
use tokio::sync::{mpsc, oneshot, Mutex};

type Handler = dyn Fn(&Request) -> Result<Value, String> + Send + Sync;

struct FakeAdapter {
    requests: mpsc::UnboundedReceiver<Request>,
    events: mpsc::UnboundedSender<(String, Value)>,
    hangup: Option<oneshot::Sender<()>>,
}

impl FakeAdapter {
    fn start(server: DuplexStream, handler: Arc<Handler>) -> Self {
        let (request_tx, requests) = mpsc::unbounded_channel();
        let (events, mut event_rx) = mpsc::unbounded_channel::<(String, Value)>();
        let (hangup, mut hangup_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let (mut read, write) = tokio::io::split(server);
            let write: Arc<Mutex<WriteHalf<DuplexStream>>> = Arc::new(Mutex::new(write));
            let seq = Arc::new(AtomicI64::new(1000));

            let forwarder = {
                let write = Arc::clone(&write);
                let seq = Arc::clone(&seq);
                tokio::spawn(async move {
                    while let Some((name, body)) = event_rx.recv().await {
                        let event = Event::new(seq.fetch_add(1, Ordering::SeqCst), name)
                            .with_body(body);
                        send(&write, &ProtocolMessage::Event(event)).await;
                    }
                })
            };

            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = tokio::select! {
                    _ = &mut hangup_rx => break,
                    read = read.read(&mut buf) => match read {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    },
                };
                decoder.feed(&buf[..n]);
                while let Some(decoded) = decoder.next_frame() {
                    let Decoded::Frame(bytes) = decoded else {
                        continue;
                    };
                    let Ok(ProtocolMessage::Request(request)) = serde_json::from_slice(&bytes)
                    else {
                        continue;
                    };
                    let reply_seq = seq.fetch_add(1, Ordering::SeqCst);
                    let response = match handler(&request) {
                        Ok(body) => Response::success(reply_seq, request.seq, &request.command)
                            .with_body(body),
                        Err(message) => {
                            Response::error(reply_seq, request.seq, &request.command, message)
                        }
                    };
                    let _ = request_tx.send(request);
                    send(&write, &ProtocolMessage::Response(response)).await;
                }
            }
            forwarder.abort();
        });

        Self {
            requests,
            events,
            hangup: Some(hangup),
        }
    }

    fn emit(&self, name: &str, body: Value) {
        self.events.send((name.to_string(), body)).unwrap();
    }

    /// Next request with the given command, skipping others.
    async fn expect(&mut self, command: &str) -> Request {
        loop {
            let request = tokio::time::timeout(Duration::from_secs(2), self.requests.recv())
                .await
                .expect("adapter saw no request")
                .expect("adapter stopped");
            if request.command == command {
                return request;
            }
        }
    }

    fn hang_up(&mut self) {
        if let Some(hangup) = self.hangup.take() {
            let _ = hangup.send(());
        }
    }
}

async fn send(write: &Mutex<WriteHalf<DuplexStream>>, message: &ProtocolMessage) {
    let json = serde_json::to_string(message).unwrap();
    let mut write = write.lock().await;
    let _ = write.write_all(&encode_frame(&json)).await;
    let _ = write.flush().await;
}

/// Replies like a V8-style adapter. Line 13 never binds.
fn node_like(request: &Request) -> Result<Value, String> {
    let args = request.arguments.clone().unwrap_or(Value::Null);
    match request.command.as_str() {
        "initialize" => Ok(json!({
            "supportsConfigurationDoneRequest": true,
            "supportsConditionalBreakpoints": true,
            "supportsHitConditionalBreakpoints": true,
            "supportsSetVariable": true,
            "exceptionBreakpointFilters": [
                {"filter": "all", "label": "All Exceptions"},
                {"filter": "uncaught", "label": "Uncaught Exceptions"}
            ]
        })),
        "setBreakpoints" => {
            let path = args["source"]["path"].clone();
            let replies: Vec<Value> = args["breakpoints"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .iter()
                .map(|bp| {
                    let line = bp["line"].as_i64().unwrap_or(0);
                    if line == 13 {
                        json!({"verified": false, "message": "no code at line"})
                    } else {
                        json!({"id": line * 10, "verified": true, "line": line, "source": {"path": path}})
                    }
                })
                .collect();
            Ok(json!({ "breakpoints": replies }))
        }
        "stackTrace" => Ok(json!({
            "stackFrames": [
                {"id": 7, "name": "inner", "line": 5, "column": 3, "source": {"path": "/app/a.js"}},
                {"id": 8, "name": "main", "line": 20, "column": 1, "source": {"path": "/app/main.js"}}
            ]
        })),
        "scopes" => Ok(json!({
            "scopes": [{"name": "Local", "variablesReference": 100, "expensive": false}]
        })),
        "variables" => Ok(json!({
            "variables": [
                {"name": "count", "value": "3", "type": "number", "variablesReference": 0},
                {"name": "user", "value": "Object", "variablesReference": 101}
            ]
        })),
        "evaluate" => Ok(json!({"result": "42", "type": "number", "variablesReference": 0})),
        "setVariable" => Ok(json!({"value": args["value"].clone(), "variablesReference": 0})),
        _ => Ok(json!({})),
    }
}

fn runner() -> RunnerConfig {
    RunnerConfig::attach(BackendKind::Dap, "127.0.0.1", 9229)
}

async fn attached() -> (DapBackend, FakeAdapter) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (read, write) = tokio::io::split(client);
    let adapter = FakeAdapter::start(server, Arc::new(node_like));
    let backend = DapBackend::new(ConnectionConfig {
        request_timeout_ms: 2_000,
        ..ConnectionConfig::default()
    });
    backend
        .attach_streams(Streams::new(read, write), &runner())
        .await
        .unwrap();
    (backend, adapter)
}

async fn next_event(events: &mut mpsc::Receiver<BackendEvent>) -> BackendEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("no backend event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_handshake_order_and_features() {
    let (backend, mut adapter) = attached().await;

    let init = adapter.expect("initialize").await;
    let args = init.arguments.unwrap();
    assert_eq!(args["linesStartAt1"], true);
    assert_eq!(args["pathFormat"], "path");
    let attach = adapter.expect("attach").await;
    let done = adapter.expect("configurationDone").await;
    assert!(init.seq < attach.seq && attach.seq < done.seq);

    let features = backend.features();
    assert!(features.conditional_breakpoints);
    assert!(features.ignore_counts);
    assert!(features.exception_breaks);
}

#[tokio::test]
async fn test_second_attach_is_rejected() {
    let (backend, _adapter) = attached().await;
    let (client, _server) = tokio::io::duplex(1024);
    let (read, write) = tokio::io::split(client);
    let err = backend
        .attach_streams(Streams::new(read, write), &runner())
        .await
        .unwrap_err();
    assert_eq!(err, Error::AlreadyAttached);
}

#[tokio::test]
async fn test_breakpoints_resend_the_whole_file() {
    let (backend, mut adapter) = attached().await;

    let first = backend
        .set_breakpoint(&Breakpoint::new("/app/a.js", 4))
        .await
        .unwrap();
    assert_eq!(first.id, Some(50));
    assert_eq!(first.actual.as_ref().map(|l| l.line), Some(4));

    let second = backend
        .set_breakpoint(&Breakpoint::new("/app/a.js", 9).with_ignore_count(3).disabled())
        .await
        .unwrap();
    // Disabled breakpoints stay local; the backend never saw it
    assert_eq!(second.actual, None);

    let mut sent = Vec::new();
    for _ in 0..2 {
        sent.push(adapter.expect("setBreakpoints").await.arguments.unwrap());
    }
    assert_eq!(sent[0]["breakpoints"], json!([{"line": 5}]));
    assert_eq!(sent[1]["breakpoints"], json!([{"line": 5}]));

    let mut enabled = second.clone();
    enabled.enabled = true;
    backend.change_breakpoint(&enabled).await.unwrap();
    let resent = adapter.expect("setBreakpoints").await.arguments.unwrap();
    assert_eq!(
        resent["breakpoints"],
        json!([{"line": 5}, {"line": 10, "hitCondition": ">3"}])
    );

    backend.clear_breakpoint(&first).await.unwrap();
    let after_clear = adapter.expect("setBreakpoints").await.arguments.unwrap();
    assert_eq!(after_clear["breakpoints"].as_array().unwrap().len(), 1);
    assert_eq!(backend.list_breakpoints().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unbindable_breakpoint_is_reported_and_untracked() {
    let (backend, _adapter) = attached().await;

    let err = backend
        .set_breakpoint(&Breakpoint::new("/app/a.js", 12))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::BreakpointResolutionFailed {
            path: "/app/a.js".to_string(),
            line: 12,
            reason: "no code at line".to_string(),
        }
    );
    assert!(backend.list_breakpoints().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stop_event_and_stack_conversion() {
    let (backend, mut adapter) = attached().await;
    let mut events = backend.subscribe().await;

    adapter.emit(
        "stopped",
        json!({"reason": "breakpoint", "threadId": 4, "hitBreakpointIds": [50]}),
    );
    assert_eq!(
        next_event(&mut events).await,
        BackendEvent::Break {
            reason: StopReason::Breakpoint,
            thread_id: Some(4),
            hit_breakpoints: vec![50],
        }
    );

    let frames = backend.get_frames().await.unwrap();
    let request = adapter.expect("stackTrace").await;
    assert_eq!(request.arguments.unwrap()["threadId"], 4);
    assert_eq!(frames.len(), 2);
    assert_eq!((frames[0].line, frames[0].column), (4, 2));
    assert_eq!(frames[1].path, "/app/main.js");
    assert!(frames[0].is_top());

    let scopes = backend.get_scopes(&frames[0]).await.unwrap();
    assert_eq!(adapter.expect("scopes").await.arguments.unwrap()["frameId"], 7);
    let variables = backend.get_properties(scopes[0].reference).await.unwrap();
    assert_eq!(variables[0].reference, None);
    assert!(variables[1].children);
}

#[tokio::test]
async fn test_exception_stop_and_exit() {
    let (backend, adapter) = attached().await;
    let mut events = backend.subscribe().await;

    adapter.emit(
        "stopped",
        json!({"reason": "exception", "threadId": 1, "text": "TypeError: x is undefined"}),
    );
    assert_eq!(
        next_event(&mut events).await,
        BackendEvent::Exception {
            thread_id: Some(1),
            message: "TypeError: x is undefined".to_string(),
        }
    );

    adapter.emit("exited", json!({"exitCode": 2}));
    assert_eq!(
        next_event(&mut events).await,
        BackendEvent::Detached {
            reason: DetachReason::Exited { code: Some(2) }
        }
    );
}

#[tokio::test]
async fn test_transport_loss_is_reported_once() {
    let (backend, mut adapter) = attached().await;
    let mut events = backend.subscribe().await;
    adapter.expect("configurationDone").await;

    adapter.hang_up();
    loop {
        match next_event(&mut events).await {
            BackendEvent::ConnectionLost { .. } => break,
            BackendEvent::Output { .. } => continue,
            other => panic!("unexpected event {:?}", other),
        }
    }
    // Requests issued while disconnected wait in the queue
    let queued = tokio::time::timeout(Duration::from_millis(100), backend.get_frames()).await;
    assert!(queued.is_err());
}

#[tokio::test]
async fn test_exception_filters_and_evaluate() {
    let (backend, mut adapter) = attached().await;

    backend.set_break_behavior(PauseOnBreaks::All).await.unwrap();
    let request = adapter.expect("setExceptionBreakpoints").await;
    assert_eq!(request.arguments.unwrap()["filters"], json!(["all", "uncaught"]));

    let frame = Frame::new(7, 0, "inner", "/app/a.js", 4);
    let value = backend.evaluate("6 * 7", Some(&frame)).await.unwrap();
    assert_eq!(value.value, "42");
    let request = adapter.expect("evaluate").await;
    assert_eq!(request.arguments.unwrap()["frameId"], 7);
}

#[tokio::test]
async fn test_detach_publishes_requested() {
    let (backend, mut adapter) = attached().await;
    let mut events = backend.subscribe().await;

    backend.detach().await.unwrap();
    let request = adapter.expect("disconnect").await;
    assert_eq!(request.arguments.unwrap()["terminateDebuggee"], false);
    assert_eq!(
        next_event(&mut events).await,
        BackendEvent::Detached {
            reason: DetachReason::Requested
        }
    );
    assert_eq!(backend.get_frames().await.unwrap_err(), Error::NotAttached);
}
