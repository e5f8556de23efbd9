//! DAP backend - V8/Node style JSON debug protocol
//!
//! Wraps a [`DapBroker`] per attach. `setBreakpoints` replaces every
//! breakpoint of a file at once, so the backend keeps the per-file list it
//! last sent and resends it on each change.

use crate::broker::DapBroker;
use crate::constants::{change_reasons, defaults, events, exception_filters, requests};
use crate::ext::DebugResult;
use crate::protocol::{
    self, BreakpointEventBody, Capabilities, ContinuedEventBody, EvaluateArguments,
    EvaluateResponseBody, Event, ExitedEventBody, InitializeRequestArguments,
    LoadedSourceEventBody, LoadedSourcesResponseBody, OutputEventBody, ScopesArguments,
    ScopesResponseBody, SetBreakpointsArguments, SetBreakpointsResponseBody,
    SetExceptionBreakpointsArguments, SetVariableArguments, SetVariableResponseBody,
    SourceBreakpoint, StackTraceArguments, StackTraceResponseBody, StoppedEventBody,
    ThreadArguments, VariablesArguments, VariablesResponseBody,
};
use crate::subscribers::Subscribers;
use crate::transport::{Streams, Transport};
use async_trait::async_trait;
use cairn_config::{ConnectionConfig, RunnerConfig};
use cairn_core::{
    Breakpoint, Error, Frame, Location, PauseOnBreaks, Result, Scope, Source, StopReason,
    Variable, VariableRef,
};
use cairn_ports::{AttachOutcome, BackendEvent, BackendFeatures, DebugBackend, DetachReason, Feature};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

const CLIENT_ID: &str = "cairn";

pub struct DapBackend {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    broker: RwLock<Option<Arc<DapBroker>>>,
    transport: Mutex<Option<Transport>>,
    runner: Mutex<Option<RunnerConfig>>,
    capabilities: RwLock<Capabilities>,
    features: std::sync::RwLock<BackendFeatures>,
    /// Last list sent per file, in wire order
    files: Mutex<HashMap<String, Vec<Breakpoint>>>,
    thread_id: AtomicI64,
    /// Ids handed out when the backend assigns none (negative)
    next_local_id: AtomicI64,
    running: AtomicBool,
    /// A `Detached` event was published for the current session
    detached: AtomicBool,
    events: Subscribers<BackendEvent>,
    pump: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DapBackend {
    pub fn new(config: ConnectionConfig) -> Self {
        let capacity = config.event_channel_capacity;
        Self {
            inner: Arc::new(Inner {
                config,
                broker: RwLock::new(None),
                transport: Mutex::new(None),
                runner: Mutex::new(None),
                capabilities: RwLock::new(Capabilities::default()),
                features: std::sync::RwLock::new(BackendFeatures::all()),
                files: Mutex::new(HashMap::new()),
                thread_id: AtomicI64::new(defaults::THREAD_ID),
                next_local_id: AtomicI64::new(-1),
                running: AtomicBool::new(false),
                detached: AtomicBool::new(false),
                events: Subscribers::new(capacity),
                pump: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Attach over already-open streams (no process or socket owned).
    pub async fn attach_streams(
        &self,
        streams: Streams,
        runner: &RunnerConfig,
    ) -> Result<AttachOutcome> {
        self.inner.ensure_detached().await?;
        self.inner.handshake(streams, runner).await
    }

    async fn broker(&self) -> Result<Arc<DapBroker>> {
        self.inner.broker().await
    }

    async fn thread_request(&self, command: &str) -> Result<()> {
        let broker = self.broker().await?;
        let args = ThreadArguments {
            thread_id: self.inner.thread_id.load(Ordering::SeqCst),
        };
        broker
            .send_request(command, Some(serde_json::to_value(args).map_err(to_parse)?))
            .await?;
        Ok(())
    }

    async fn run_request(&self, command: &str) -> Result<()> {
        self.thread_request(command).await?;
        self.inner.running.store(true, Ordering::SeqCst);
        self.inner
            .publish(BackendEvent::StateChange { running: true })
            .await;
        Ok(())
    }
}

impl Drop for DapBackend {
    fn drop(&mut self) {
        self.inner.stop_pump();
    }
}

// ============================================================================
// Session plumbing
// ============================================================================

impl Inner {
    async fn broker(&self) -> Result<Arc<DapBroker>> {
        self.broker.read().await.clone().ok_or(Error::NotAttached)
    }

    async fn ensure_detached(&self) -> Result<()> {
        if let Some(broker) = self.broker.read().await.as_ref() {
            if !broker.status().closed {
                return Err(Error::AlreadyAttached);
            }
        }
        Ok(())
    }

    async fn publish(&self, event: BackendEvent) {
        trace!(?event, "Publishing backend event");
        self.events.publish(event).await;
    }

    fn stop_pump(&self) {
        if let Ok(mut slot) = self.pump.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    async fn handshake(
        self: &Arc<Self>,
        streams: Streams,
        runner: &RunnerConfig,
    ) -> Result<AttachOutcome> {
        self.stop_pump();
        self.files.lock().await.clear();
        self.detached.store(false, Ordering::SeqCst);
        self.thread_id.store(defaults::THREAD_ID, Ordering::SeqCst);

        let broker = Arc::new(DapBroker::new(&self.config));
        let raw_events = broker.subscribe_events().await;
        broker.attach_streams(streams).await?;

        debug!("Initializing DAP connection for {}", runner.adapter_id);
        let init_args = InitializeRequestArguments {
            client_id: Some(CLIENT_ID.to_string()),
            client_name: Some(CLIENT_ID.to_string()),
            adapter_id: runner.adapter_id.clone(),
            lines_start_at1: Some(true),
            columns_start_at1: Some(true),
            path_format: Some("path".to_string()),
            supports_variable_type: Some(true),
        };
        let response = broker
            .send_request(
                requests::INITIALIZE,
                Some(serde_json::to_value(init_args).map_err(to_parse)?),
            )
            .await?;
        let capabilities: Capabilities = response.parse_body().unwrap_or_else(|e| {
            warn!("Unreadable capabilities, assuming defaults: {}", e);
            Capabilities::default()
        });

        // Some adapters only answer attach after configurationDone
        let attach_args = match &runner.program {
            Some(program) => serde_json::json!({ "program": program }),
            None => serde_json::json!({}),
        };
        broker
            .send_no_wait(requests::ATTACH, Some(attach_args))
            .await?;

        if capabilities.supports_configuration_done_request != Some(false) {
            broker
                .send_request(requests::CONFIGURATION_DONE, None)
                .await?;
        }

        let features = BackendFeatures {
            conditional_breakpoints: capabilities.conditional_breakpoints(),
            ignore_counts: capabilities.hit_conditions(),
            set_variable: capabilities.set_variable(),
            exception_breaks: capabilities.exception_filters(),
            step_out: true,
            suspend: true,
            list_breakpoints: true,
            reconnect: runner.reconnect && runner.connection.supports_reconnect(),
        };
        if let Ok(mut slot) = self.features.write() {
            *slot = features;
        }
        let loads_sources = capabilities.supports_loaded_sources_request == Some(true);
        *self.capabilities.write().await = capabilities;
        *self.runner.lock().await = Some(runner.clone());
        *self.broker.write().await = Some(Arc::clone(&broker));
        self.running.store(true, Ordering::SeqCst);

        let pump = tokio::spawn(run_pump(Arc::clone(self), Arc::clone(&broker), raw_events));
        if let Ok(mut slot) = self.pump.lock() {
            *slot = Some(pump);
        }

        if loads_sources {
            match broker.send_request(requests::LOADED_SOURCES, None).await {
                Ok(response) => {
                    if let Some(body) = response
                        .parse_body::<LoadedSourcesResponseBody>()
                        .debug_ok("Failed to parse loadedSources")
                    {
                        let sources = body.sources.iter().map(to_source).collect();
                        self.publish(BackendEvent::Sources(sources)).await;
                    }
                }
                Err(e) => debug!("loadedSources failed: {}", e),
            }
        }

        info!(features = ?features, "DAP session attached");
        Ok(AttachOutcome { running: true })
    }

    fn allocate_local_id(&self) -> i64 {
        self.next_local_id.fetch_sub(1, Ordering::SeqCst)
    }

    /// Send the enabled breakpoints of `path` and fold the replies back
    /// into `list`. Returns the wire reply for each entry (`None` when
    /// disabled).
    async fn sync_file(
        &self,
        path: &str,
        list: &mut [Breakpoint],
    ) -> Result<Vec<Option<protocol::Breakpoint>>> {
        let broker = self.broker().await?;
        let hit_conditions = self.capabilities.read().await.hit_conditions();

        let wire: Vec<SourceBreakpoint> = list
            .iter()
            .filter(|bp| bp.enabled)
            .map(|bp| {
                let mut sbp = SourceBreakpoint::at_line(bp.line + 1);
                sbp.column = bp.column.map(|c| c + 1);
                sbp.condition = bp.effective_condition().map(str::to_string);
                if hit_conditions {
                    sbp.hit_condition = bp.effective_ignore_count().map(|n| format!(">{}", n));
                }
                sbp
            })
            .collect();
        let sent = wire.len();

        let args = SetBreakpointsArguments {
            source: protocol::Source::from_path(path),
            breakpoints: wire,
            source_modified: None,
        };
        let response = broker
            .send_request(
                requests::SET_BREAKPOINTS,
                Some(serde_json::to_value(args).map_err(to_parse)?),
            )
            .await?;
        let body: SetBreakpointsResponseBody = response.parse_body()?;
        if body.breakpoints.len() != sent {
            warn!(
                path,
                sent,
                received = body.breakpoints.len(),
                "setBreakpoints reply length mismatch"
            );
        }

        let mut replies = body.breakpoints.into_iter();
        let mut results = Vec::with_capacity(list.len());
        for bp in list.iter_mut() {
            if !bp.enabled {
                results.push(None);
                continue;
            }
            let reply = replies.next();
            if let Some(wire) = &reply {
                self.apply_reply(bp, wire);
            }
            results.push(reply);
        }
        Ok(results)
    }

    fn apply_reply(&self, bp: &mut Breakpoint, wire: &protocol::Breakpoint) {
        bp.id = wire.id.or(bp.id).or_else(|| Some(self.allocate_local_id()));
        if wire.verified {
            bp.error = None;
            if let Some(line) = wire.line {
                bp.actual = Some(Location {
                    path: wire
                        .source
                        .as_ref()
                        .and_then(|s| s.path.clone())
                        .unwrap_or_else(|| bp.path.clone()),
                    line: line.saturating_sub(1),
                    column: wire.column.map(|c| c.saturating_sub(1)),
                });
            }
        } else {
            bp.error = wire.message.clone();
        }
    }

    async fn translate(&self, event: Event) {
        trace!("Received DAP event: {}", event.event);
        match event.event.as_str() {
            events::STOPPED => {
                let Some(body) = event
                    .parse_body::<StoppedEventBody>()
                    .debug_ok("Failed to parse stopped event")
                else {
                    return;
                };
                if let Some(thread_id) = body.thread_id {
                    self.thread_id.store(thread_id, Ordering::SeqCst);
                }
                self.running.store(false, Ordering::SeqCst);
                let translated = match StopReason::from_label(&body.reason) {
                    StopReason::Exception => BackendEvent::Exception {
                        thread_id: body.thread_id,
                        message: body
                            .text
                            .or(body.description)
                            .unwrap_or_else(|| "exception".to_string()),
                    },
                    StopReason::Pause => BackendEvent::Suspend {
                        thread_id: body.thread_id,
                    },
                    reason => BackendEvent::Break {
                        reason,
                        thread_id: body.thread_id,
                        hit_breakpoints: body.hit_breakpoint_ids.unwrap_or_default(),
                    },
                };
                self.publish(translated).await;
            }
            events::CONTINUED => {
                if let Some(body) = event
                    .parse_body::<ContinuedEventBody>()
                    .debug_ok("Failed to parse continued event")
                {
                    self.thread_id.store(body.thread_id, Ordering::SeqCst);
                }
                self.running.store(true, Ordering::SeqCst);
                self.publish(BackendEvent::StateChange { running: true }).await;
            }
            events::BREAKPOINT => {
                if let Some(body) = event
                    .parse_body::<BreakpointEventBody>()
                    .debug_ok("Failed to parse breakpoint event")
                {
                    self.on_breakpoint_event(body).await;
                }
            }
            events::LOADED_SOURCE => {
                if let Some(body) = event
                    .parse_body::<LoadedSourceEventBody>()
                    .debug_ok("Failed to parse loadedSource event")
                {
                    if body.reason != change_reasons::REMOVED {
                        self.publish(BackendEvent::SourceCompiled(to_source(&body.source)))
                            .await;
                    }
                }
            }
            events::OUTPUT => {
                if let Some(body) = event
                    .parse_body::<OutputEventBody>()
                    .debug_ok("Failed to parse output event")
                {
                    self.publish(BackendEvent::Output {
                        category: body.category.unwrap_or_else(|| "console".to_string()),
                        text: body.output,
                    })
                    .await;
                }
            }
            events::EXITED => {
                let code = event
                    .parse_body::<ExitedEventBody>()
                    .ok()
                    .map(|body| body.exit_code);
                self.finish(DetachReason::Exited { code }).await;
            }
            events::TERMINATED => self.finish(DetachReason::Terminated).await,
            events::INITIALIZED => debug!("Backend initialized"),
            other => trace!("Ignoring event: {}", other),
        }
    }

    async fn on_breakpoint_event(&self, body: BreakpointEventBody) {
        let wire = body.breakpoint;
        if body.reason == change_reasons::REMOVED {
            if let Some(id) = wire.id {
                let mut files = self.files.lock().await;
                for list in files.values_mut() {
                    list.retain(|bp| bp.id != Some(id));
                }
                drop(files);
                self.publish(BackendEvent::BreakpointRemoved { id }).await;
            }
            return;
        }

        let mut files = self.files.lock().await;
        let tracked = wire.id.and_then(|id| {
            files
                .values_mut()
                .flat_map(|list| list.iter_mut())
                .find(|bp| bp.id == Some(id))
        });
        let updated = match tracked {
            Some(bp) => {
                self.apply_reply(bp, &wire);
                bp.clone()
            }
            None => {
                // Created on the backend side
                let path = wire
                    .source
                    .as_ref()
                    .map(protocol::Source::display_path)
                    .unwrap_or_default();
                let line = wire.line.unwrap_or(1).saturating_sub(1);
                let mut bp = Breakpoint::new(path, line);
                bp.server_only = true;
                self.apply_reply(&mut bp, &wire);
                bp
            }
        };
        drop(files);
        self.publish(BackendEvent::BreakpointUpdate(updated)).await;
    }

    /// Publish the end of the session once.
    async fn finish(&self, reason: DetachReason) {
        if !self.detached.swap(true, Ordering::SeqCst) {
            self.running.store(false, Ordering::SeqCst);
            info!(%reason, "DAP session ended");
            self.publish(BackendEvent::Detached { reason }).await;
        }
    }
}

async fn run_pump(
    inner: Arc<Inner>,
    broker: Arc<DapBroker>,
    mut raw_events: mpsc::Receiver<Event>,
) {
    debug!("DAP event pump started");
    let mut status = broker.watch_status();
    let mut was_connected = status.borrow().is_connected();

    loop {
        tokio::select! {
            event = raw_events.recv() => match event {
                Some(event) => inner.translate(event).await,
                None => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if current.closed {
                    while let Ok(event) = raw_events.try_recv() {
                        inner.translate(event).await;
                    }
                    inner.finish(DetachReason::Terminated).await;
                    break;
                }
                if was_connected && !current.is_connected() {
                    let reason = current
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "connection lost".to_string());
                    inner.publish(BackendEvent::ConnectionLost { reason }).await;
                }
                was_connected = current.is_connected();
            }
        }
    }
    debug!("DAP event pump ended");
}

fn to_parse(err: serde_json::Error) -> Error {
    Error::ProtocolParse(err.to_string())
}

fn to_source(source: &protocol::Source) -> Source {
    let mut converted = Source::new(source.source_reference.unwrap_or(0), source.display_path());
    if let Some(name) = &source.name {
        converted.name = name.clone();
    }
    converted
}

fn to_variable(variable: protocol::Variable) -> Variable {
    let mut converted =
        Variable::new(variable.name, variable.value).with_reference(variable.variables_reference);
    converted.type_name = variable.var_type;
    converted.evaluate_name = variable.evaluate_name;
    converted
}

fn same_target(tracked: &Breakpoint, wanted: &Breakpoint) -> bool {
    match (tracked.id, wanted.id) {
        (Some(a), Some(b)) => a == b,
        _ => tracked.same_identity(wanted),
    }
}

// ============================================================================
// DebugBackend
// ============================================================================

#[async_trait]
impl DebugBackend for DapBackend {
    fn name(&self) -> &str {
        "dap"
    }

    fn features(&self) -> BackendFeatures {
        self.inner
            .features
            .read()
            .map(|features| *features)
            .unwrap_or_else(|_| BackendFeatures::none())
    }

    async fn subscribe(&self) -> mpsc::Receiver<BackendEvent> {
        self.inner.events.subscribe().await
    }

    async fn attach(&self, runner: &RunnerConfig) -> Result<AttachOutcome> {
        self.inner.ensure_detached().await?;

        let mut transport_slot = self.inner.transport.lock().await;
        if let Some(mut stale) = transport_slot.take() {
            stale.shutdown().await;
        }
        let (transport, streams) = Transport::open(&runner.connection, &self.inner.config).await?;
        *transport_slot = Some(transport);
        drop(transport_slot);

        self.inner.handshake(streams, runner).await
    }

    async fn detach(&self) -> Result<()> {
        let broker = self.broker().await?;
        self.inner.detached.store(true, Ordering::SeqCst);
        self.inner.stop_pump();

        if !broker.status().closed {
            let args = serde_json::json!({ "terminateDebuggee": false });
            let goodbye = broker.send_request(requests::DISCONNECT, Some(args));
            let budget = Duration::from_millis(self.inner.config.shutdown_timeout_ms);
            match tokio::time::timeout(budget, goodbye).await {
                Ok(Ok(_)) => debug!("Backend acknowledged disconnect"),
                Ok(Err(e)) => debug!("Disconnect request failed: {}", e),
                Err(_) => debug!("Disconnect request unanswered"),
            }
        }
        broker.close("detached").await;

        if let Some(mut transport) = self.inner.transport.lock().await.take() {
            transport.shutdown().await;
        }
        *self.inner.broker.write().await = None;
        self.inner.files.lock().await.clear();
        self.inner.running.store(false, Ordering::SeqCst);

        self.inner
            .publish(BackendEvent::Detached {
                reason: DetachReason::Requested,
            })
            .await;
        Ok(())
    }

    async fn set_away(&self, away: bool) {
        if let Some(broker) = self.inner.broker.read().await.as_ref() {
            broker.set_away(away);
        }
    }

    async fn reconnect(&self) -> Result<AttachOutcome> {
        self.features().require(Feature::Reconnect)?;
        let broker = self.broker().await?;
        if broker.status().closed {
            return Err(Error::SessionEnded("debug session is over".to_string()));
        }
        if broker.status().is_connected() {
            return Ok(AttachOutcome {
                running: self.inner.running.load(Ordering::SeqCst),
            });
        }

        let streams = {
            let transport = self.inner.transport.lock().await;
            let Some(transport) = transport.as_ref() else {
                return Err(Error::unsupported("reconnecting without an owned transport"));
            };
            transport.reconnect().await?
        };
        broker.attach_streams(streams).await?;
        info!("DAP connection re-established");
        Ok(AttachOutcome {
            running: self.inner.running.load(Ordering::SeqCst),
        })
    }

    async fn get_frames(&self) -> Result<Vec<Frame>> {
        let broker = self.broker().await?;
        let args = StackTraceArguments {
            thread_id: self.inner.thread_id.load(Ordering::SeqCst),
            start_frame: Some(0),
            levels: Some(defaults::STACK_LEVELS),
        };
        let response = broker
            .send_request(
                requests::STACK_TRACE,
                Some(serde_json::to_value(args).map_err(to_parse)?),
            )
            .await?;
        let body: StackTraceResponseBody = response.parse_body()?;

        Ok(body
            .stack_frames
            .into_iter()
            .enumerate()
            .map(|(index, frame)| {
                let path = frame
                    .source
                    .as_ref()
                    .map(protocol::Source::display_path)
                    .unwrap_or_default();
                let line = (frame.line - 1).max(0) as u32;
                let mut converted = Frame::new(frame.id, index, frame.name, path, line)
                    .with_column((frame.column - 1).max(0) as u32);
                if let Some(reference) = frame.source.as_ref().and_then(|s| s.source_reference) {
                    converted = converted.with_source_id(reference);
                }
                converted
            })
            .collect())
    }

    async fn get_scopes(&self, frame: &Frame) -> Result<Vec<Scope>> {
        let broker = self.broker().await?;
        let args = ScopesArguments {
            frame_id: frame.handle,
        };
        let response = broker
            .send_request(
                requests::SCOPES,
                Some(serde_json::to_value(args).map_err(to_parse)?),
            )
            .await?;
        let body: ScopesResponseBody = response.parse_body()?;

        Ok(body
            .scopes
            .into_iter()
            .enumerate()
            .map(|(index, scope)| {
                let mut converted =
                    Scope::new(index, frame.index, scope.name, scope.variables_reference);
                converted.expensive = scope.expensive;
                converted
            })
            .collect())
    }

    async fn get_properties(&self, reference: VariableRef) -> Result<Vec<Variable>> {
        let broker = self.broker().await?;
        let args = VariablesArguments {
            variables_reference: reference.0,
        };
        let response = broker
            .send_request(
                requests::VARIABLES,
                Some(serde_json::to_value(args).map_err(to_parse)?),
            )
            .await?;
        let body: VariablesResponseBody = response.parse_body()?;
        Ok(body.variables.into_iter().map(to_variable).collect())
    }

    async fn evaluate(&self, expression: &str, frame: Option<&Frame>) -> Result<Variable> {
        let broker = self.broker().await?;
        let args = EvaluateArguments {
            expression: expression.to_string(),
            frame_id: frame.map(|f| f.handle),
            context: Some("watch".to_string()),
        };
        let response = broker
            .send_request(
                requests::EVALUATE,
                Some(serde_json::to_value(args).map_err(to_parse)?),
            )
            .await?;
        let body: EvaluateResponseBody = response.parse_body()?;

        let mut variable =
            Variable::new(expression, body.result).with_reference(body.variables_reference);
        variable.type_name = body.result_type;
        variable.evaluate_name = Some(expression.to_string());
        Ok(variable)
    }

    async fn set_variable(
        &self,
        parent: VariableRef,
        name: &str,
        value: &str,
        _frame: Option<&Frame>,
    ) -> Result<Variable> {
        self.features().require(Feature::SetVariable)?;
        let broker = self.broker().await?;
        let args = SetVariableArguments {
            variables_reference: parent.0,
            name: name.to_string(),
            value: value.to_string(),
        };
        let response = broker
            .send_request(
                requests::SET_VARIABLE,
                Some(serde_json::to_value(args).map_err(to_parse)?),
            )
            .await?;
        let body: SetVariableResponseBody = response.parse_body()?;

        let mut variable = Variable::new(name, body.value).with_reference(body.variables_reference);
        variable.type_name = body.var_type;
        Ok(variable)
    }

    async fn set_breakpoint(&self, breakpoint: &Breakpoint) -> Result<Breakpoint> {
        let mut files = self.inner.files.lock().await;
        let list = files.entry(breakpoint.path.clone()).or_default();
        let mut candidate = breakpoint.clone();
        candidate.id = None;
        candidate.actual = None;
        candidate.error = None;
        list.push(candidate);

        let replies = match self.inner.sync_file(&breakpoint.path, list).await {
            Ok(replies) => replies,
            Err(e) => {
                list.pop();
                return Err(e);
            }
        };

        let added = list.len() - 1;
        let verified = replies.get(added).and_then(Option::as_ref).map(|w| w.verified);
        let created = list[added].clone();
        match (verified, created.error.clone()) {
            // Rejected outright
            (Some(false), Some(reason)) => {
                list.remove(added);
                Err(crate::Error::Unresolved {
                    path: breakpoint.path.clone(),
                    line: breakpoint.line,
                    reason,
                }
                .into())
            }
            _ => {
                debug!(id = ?created.id, path = %created.path, line = created.line, "Breakpoint set");
                Ok(created)
            }
        }
    }

    async fn change_breakpoint(&self, breakpoint: &Breakpoint) -> Result<Breakpoint> {
        let mut files = self.inner.files.lock().await;
        let Some(list) = files.get_mut(&breakpoint.path) else {
            return Err(Error::invalid_state(format!(
                "no breakpoints tracked for {}",
                breakpoint.path
            )));
        };
        let Some(index) = list.iter().position(|bp| same_target(bp, breakpoint)) else {
            return Err(Error::invalid_state(format!(
                "breakpoint at {}:{} is not set",
                breakpoint.path, breakpoint.line
            )));
        };

        let previous = list[index].clone();
        {
            let tracked = &mut list[index];
            tracked.condition = breakpoint.condition.clone();
            tracked.ignore_count = breakpoint.ignore_count;
            tracked.enabled = breakpoint.enabled;
        }
        if let Err(e) = self.inner.sync_file(&breakpoint.path, list).await {
            list[index] = previous;
            return Err(e);
        }
        Ok(list[index].clone())
    }

    async fn clear_breakpoint(&self, breakpoint: &Breakpoint) -> Result<()> {
        let mut files = self.inner.files.lock().await;
        let Some(list) = files.get_mut(&breakpoint.path) else {
            return Ok(());
        };
        let before = list.len();
        list.retain(|bp| !same_target(bp, breakpoint));
        if list.len() == before {
            return Ok(());
        }
        self.inner.sync_file(&breakpoint.path, list).await?;
        if list.is_empty() {
            files.remove(&breakpoint.path);
        }
        Ok(())
    }

    async fn list_breakpoints(&self) -> Result<Vec<Breakpoint>> {
        self.broker().await?;
        let files = self.inner.files.lock().await;
        Ok(files.values().flat_map(|list| list.iter().cloned()).collect())
    }

    async fn step_into(&self) -> Result<()> {
        self.run_request(requests::STEP_IN).await
    }

    async fn step_over(&self) -> Result<()> {
        self.run_request(requests::NEXT).await
    }

    async fn step_out(&self) -> Result<()> {
        self.run_request(requests::STEP_OUT).await
    }

    async fn resume(&self) -> Result<()> {
        self.run_request(requests::CONTINUE).await
    }

    async fn suspend(&self) -> Result<()> {
        self.thread_request(requests::PAUSE).await
    }

    async fn set_break_behavior(&self, behavior: PauseOnBreaks) -> Result<()> {
        if behavior != PauseOnBreaks::None {
            self.features().require(Feature::ExceptionBreaks)?;
        }
        let broker = self.broker().await?;
        let wanted: &[&str] = match behavior {
            PauseOnBreaks::None => &[],
            PauseOnBreaks::Uncaught => &[exception_filters::UNCAUGHT],
            PauseOnBreaks::All => &[exception_filters::ALL, exception_filters::UNCAUGHT],
        };
        let capabilities = self.inner.capabilities.read().await;
        let filters: Vec<String> = wanted
            .iter()
            .filter(|f| !capabilities.exception_filters() || capabilities.has_filter(f))
            .map(|f| f.to_string())
            .collect();
        drop(capabilities);

        let args = SetExceptionBreakpointsArguments { filters };
        broker
            .send_request(
                requests::SET_EXCEPTION_BREAKPOINTS,
                Some(serde_json::to_value(args).map_err(to_parse)?),
            )
            .await?;
        Ok(())
    }
}
