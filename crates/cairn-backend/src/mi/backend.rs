//! GDB/MI backend
//!
//! MI has no scope or variable handles. Scopes are synthesized per frame
//! (arguments and locals) and structured values are exposed through
//! var-objects; both get session-local references from a [`RefTable`]
//! that is reset on every stack refresh.

use super::channel::MiChannel;
use super::record::{AsyncKind, AsyncRecord, MiRecord, ResultRecord, StreamKind};
use super::value::{quote, MiResults, MiValue};
use crate::constants::mi::{self as cmd, classes, stop_reasons, streams};
use crate::ext::DebugResult;
use crate::subscribers::Subscribers;
use crate::transport::{Streams, Transport};
use async_trait::async_trait;
use cairn_config::{ConnectionConfig, RunnerConfig};
use cairn_core::{
    Breakpoint, Error, Frame, Location, PauseOnBreaks, Result, Scope, StopReason, Variable,
    VariableRef,
};
use cairn_ports::{AttachOutcome, BackendEvent, BackendFeatures, DebugBackend, DetachReason, Feature};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Placeholder shown for aggregates whose value MI omits.
const AGGREGATE_VALUE: &str = "{...}";

#[derive(Debug, Clone, PartialEq, Eq)]
enum RefTarget {
    Arguments { level: usize },
    Locals { level: usize },
    VarObject(String),
}

#[derive(Debug, Default)]
struct RefTable {
    targets: HashMap<i64, RefTarget>,
    next: i64,
    /// Root var-objects created since the last refresh
    roots: Vec<String>,
}

impl RefTable {
    fn allocate(&mut self, target: RefTarget) -> i64 {
        self.next += 1;
        self.targets.insert(self.next, target);
        self.next
    }

    fn get(&self, reference: VariableRef) -> Option<RefTarget> {
        self.targets.get(&reference.0).cloned()
    }

    /// Forget every reference; returns the var-objects to delete.
    fn reset(&mut self) -> Vec<String> {
        self.targets.clear();
        std::mem::take(&mut self.roots)
    }
}

pub struct MiBackend {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    channel: RwLock<Option<Arc<MiChannel>>>,
    transport: Mutex<Option<Transport>>,
    features: std::sync::RwLock<BackendFeatures>,
    breakpoints: Mutex<HashMap<i64, Breakpoint>>,
    refs: std::sync::Mutex<RefTable>,
    thread_id: AtomicI64,
    /// `-exec-run` was issued (or the target was already live)
    started: AtomicBool,
    detached: AtomicBool,
    events: Subscribers<BackendEvent>,
    pump: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl MiBackend {
    pub fn new(config: ConnectionConfig) -> Self {
        let capacity = config.event_channel_capacity;
        Self {
            inner: Arc::new(Inner {
                config,
                channel: RwLock::new(None),
                transport: Mutex::new(None),
                features: std::sync::RwLock::new(mi_features(false)),
                breakpoints: Mutex::new(HashMap::new()),
                refs: std::sync::Mutex::new(RefTable::default()),
                thread_id: AtomicI64::new(1),
                started: AtomicBool::new(false),
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

    async fn channel(&self) -> Result<Arc<MiChannel>> {
        self.inner.channel().await
    }

    async fn command(&self, command: &str) -> Result<ResultRecord> {
        Ok(self.channel().await?.send_command(command).await?)
    }

    fn thread_frame(&self, level: usize) -> String {
        format!(
            "--thread {} --frame {}",
            self.inner.thread_id.load(Ordering::SeqCst),
            level
        )
    }

    fn allocate(&self, target: RefTarget) -> i64 {
        match self.inner.refs.lock() {
            Ok(mut refs) => refs.allocate(target),
            Err(_) => 0,
        }
    }

    fn target(&self, reference: VariableRef) -> Result<RefTarget> {
        self.inner
            .refs
            .lock()
            .ok()
            .and_then(|refs| refs.get(reference))
            .ok_or_else(|| Error::invalid_state(format!("stale variable reference {}", reference)))
    }

    /// Variable for one `{name, type, value}` entry of an argument or local
    /// listing. Aggregates get a var-object so they can be expanded.
    async fn listed_variable(&self, entry: &MiValue, level: usize) -> Result<Variable> {
        let name = entry.get_str("name").unwrap_or_default().to_string();
        let type_name = entry.get_str("type").map(str::to_string);

        let mut variable = match entry.get_str("value") {
            Some(value) => Variable::new(&name, value),
            None => {
                let created = self
                    .command(&format!(
                        "{} {} - * {}",
                        cmd::VAR_CREATE,
                        self.thread_frame(level),
                        quote(&name)
                    ))
                    .await?;
                let object = created.results.get_str("name").unwrap_or_default().to_string();
                if let Ok(mut refs) = self.inner.refs.lock() {
                    refs.roots.push(object.clone());
                }
                let value = created
                    .results
                    .get_str("value")
                    .unwrap_or(AGGREGATE_VALUE)
                    .to_string();
                let mut variable = Variable::new(&name, value);
                if created.results.get_i64("numchild").unwrap_or(0) > 0 {
                    variable = variable.with_reference(self.allocate(RefTarget::VarObject(object)));
                }
                variable
            }
        };
        variable.type_name = type_name;
        variable.evaluate_name = Some(name);
        Ok(variable)
    }

    async fn scope_variables(&self, target: &RefTarget) -> Result<Vec<Variable>> {
        let (level, entries) = match *target {
            RefTarget::Arguments { level } => {
                let record = self
                    .command(&format!(
                        "{} --thread {} --simple-values {} {}",
                        cmd::STACK_LIST_ARGUMENTS,
                        self.inner.thread_id.load(Ordering::SeqCst),
                        level,
                        level
                    ))
                    .await?;
                let args = record
                    .results
                    .get_list("stack-args")
                    .first()
                    .and_then(|frame| frame.get("args"))
                    .and_then(MiValue::as_list)
                    .map(<[MiValue]>::to_vec)
                    .unwrap_or_default();
                (level, args)
            }
            RefTarget::Locals { level } => {
                let record = self
                    .command(&format!(
                        "{} {} --simple-values",
                        cmd::STACK_LIST_LOCALS,
                        self.thread_frame(level)
                    ))
                    .await?;
                (level, record.results.get_list("locals").to_vec())
            }
            RefTarget::VarObject(_) => return Ok(Vec::new()),
        };

        let mut variables = Vec::with_capacity(entries.len());
        for entry in &entries {
            match self.listed_variable(entry, level).await {
                Ok(variable) => variables.push(variable),
                Err(e) => {
                    let name = entry.get_str("name").unwrap_or("?");
                    variables.push(Variable::failed(name, e.to_string()));
                }
            }
        }
        Ok(variables)
    }

    async fn var_children(&self, object: &str) -> Result<Vec<Variable>> {
        let record = self
            .command(&format!(
                "{} --simple-values {}",
                cmd::VAR_LIST_CHILDREN,
                quote(object)
            ))
            .await?;

        Ok(record
            .results
            .get_list("children")
            .iter()
            .map(|child| {
                let child_object = child.get_str("name").unwrap_or_default().to_string();
                let exp = child.get_str("exp").unwrap_or_default();
                let value = child.get_str("value").unwrap_or(AGGREGATE_VALUE);
                let mut variable = Variable::new(exp, value);
                variable.type_name = child.get_str("type").map(str::to_string);
                let has_children = child
                    .get_str("numchild")
                    .and_then(|n| n.parse::<i64>().ok())
                    .unwrap_or(0)
                    > 0;
                if has_children {
                    variable =
                        variable.with_reference(self.allocate(RefTarget::VarObject(child_object)));
                }
                variable
            })
            .collect())
    }

    async fn exec(&self, command: &str) -> Result<()> {
        let thread = self.inner.thread_id.load(Ordering::SeqCst);
        self.command(&format!("{} --thread {}", command, thread)).await?;
        Ok(())
    }
}

impl Drop for MiBackend {
    fn drop(&mut self) {
        self.inner.stop_pump();
    }
}

fn mi_features(reconnect: bool) -> BackendFeatures {
    BackendFeatures {
        exception_breaks: false,
        reconnect,
        ..BackendFeatures::all()
    }
}

// ============================================================================
// Session plumbing
// ============================================================================

impl Inner {
    async fn channel(&self) -> Result<Arc<MiChannel>> {
        self.channel.read().await.clone().ok_or(Error::NotAttached)
    }

    async fn ensure_detached(&self) -> Result<()> {
        if let Some(channel) = self.channel.read().await.as_ref() {
            if !channel.status().closed && !self.detached.load(Ordering::SeqCst) {
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

    fn reconnectable(&self) -> bool {
        self.features
            .read()
            .map(|features| features.reconnect)
            .unwrap_or(false)
    }

    async fn handshake(
        self: &Arc<Self>,
        streams: Streams,
        runner: &RunnerConfig,
    ) -> Result<AttachOutcome> {
        self.stop_pump();
        self.breakpoints.lock().await.clear();
        if let Ok(mut refs) = self.refs.lock() {
            *refs = RefTable::default();
        }
        self.detached.store(false, Ordering::SeqCst);
        self.thread_id.store(1, Ordering::SeqCst);

        let channel = Arc::new(MiChannel::new(&self.config));
        let records = channel.subscribe_records().await;
        channel.attach_streams(streams).await?;

        // Best effort: older GDBs lack these settings
        channel
            .send_command(&format!("{} mi-async on", cmd::GDB_SET))
            .await
            .debug_ok("mi-async unavailable");
        channel
            .send_command(&format!("{} breakpoint pending on", cmd::GDB_SET))
            .await
            .debug_ok("pending breakpoints unavailable");

        if let Some(program) = &runner.program {
            channel
                .send_command(&format!("{} {}", cmd::FILE_EXEC_AND_SYMBOLS, quote(program)))
                .await?;
        }
        // Without a program the target is already live
        self.started.store(runner.program.is_none(), Ordering::SeqCst);

        let features = mi_features(runner.reconnect && runner.connection.supports_reconnect());
        if let Ok(mut slot) = self.features.write() {
            *slot = features;
        }
        *self.channel.write().await = Some(Arc::clone(&channel));

        let pump = tokio::spawn(run_pump(Arc::clone(self), Arc::clone(&channel), records));
        if let Ok(mut slot) = self.pump.lock() {
            *slot = Some(pump);
        }

        info!(features = ?features, "MI session attached");
        Ok(AttachOutcome { running: false })
    }

    async fn translate(&self, record: MiRecord) {
        match record {
            MiRecord::Async(record) => self.on_async(record).await,
            MiRecord::Stream { kind, text } => {
                let category = match kind {
                    StreamKind::Console => streams::CONSOLE,
                    StreamKind::Target => streams::TARGET,
                    StreamKind::Log => streams::LOG,
                };
                self.publish(BackendEvent::Output {
                    category: category.to_string(),
                    text,
                })
                .await;
            }
            MiRecord::Unrecognized(line) => {
                self.publish(BackendEvent::Output {
                    category: streams::TARGET.to_string(),
                    text: format!("{}\n", line),
                })
                .await;
            }
            MiRecord::Result(_) | MiRecord::Prompt => {}
        }
    }

    async fn on_async(&self, record: AsyncRecord) {
        trace!(class = %record.class, "MI async record");
        match (record.kind, record.class.as_str()) {
            (AsyncKind::Exec, classes::STOPPED) => self.on_stopped(&record.results).await,
            (AsyncKind::Exec, classes::RUNNING) => {
                self.started.store(true, Ordering::SeqCst);
                self.publish(BackendEvent::StateChange { running: true }).await;
            }
            (AsyncKind::Notify, classes::BREAKPOINT_CREATED | classes::BREAKPOINT_MODIFIED) => {
                let Some(bkpt) = record.results.get("bkpt") else {
                    return;
                };
                let Some(reported) = breakpoint_from_mi(bkpt) else {
                    return;
                };
                let Some(id) = reported.id else {
                    return;
                };
                let mut tracked = self.breakpoints.lock().await;
                let updated = match tracked.get_mut(&id) {
                    Some(existing) => {
                        existing.actual = reported.actual;
                        existing.condition = reported.condition;
                        existing.ignore_count = reported.ignore_count;
                        existing.enabled = reported.enabled;
                        existing.clone()
                    }
                    None => {
                        let mut created = reported;
                        created.server_only = true;
                        tracked.insert(id, created.clone());
                        created
                    }
                };
                drop(tracked);
                self.publish(BackendEvent::BreakpointUpdate(updated)).await;
            }
            (AsyncKind::Notify, classes::BREAKPOINT_DELETED) => {
                if let Some(id) = record.results.get_i64("id") {
                    self.breakpoints.lock().await.remove(&id);
                    self.publish(BackendEvent::BreakpointRemoved { id }).await;
                }
            }
            _ => {}
        }
    }

    async fn on_stopped(&self, results: &MiResults) {
        let reason = results.get_str("reason").unwrap_or_default();
        let thread_id = results.get_i64("thread-id");
        if let Some(thread) = thread_id {
            self.thread_id.store(thread, Ordering::SeqCst);
        }

        let event = match reason {
            stop_reasons::EXITED_NORMALLY => {
                return self.finish(DetachReason::Exited { code: Some(0) }).await;
            }
            stop_reasons::EXITED => {
                // GDB prints the exit code in octal
                let code = results
                    .get_str("exit-code")
                    .and_then(|code| i64::from_str_radix(code, 8).ok());
                return self.finish(DetachReason::Exited { code }).await;
            }
            stop_reasons::EXITED_SIGNALLED => {
                return self.finish(DetachReason::Killed).await;
            }
            // No reason: interrupted
            "" => BackendEvent::Suspend { thread_id },
            stop_reasons::SIGNAL_RECEIVED => {
                let signal = results.get_str("signal-name").unwrap_or("signal");
                if signal == "SIGINT" || signal == "0" {
                    BackendEvent::Suspend { thread_id }
                } else {
                    let meaning = results.get_str("signal-meaning").unwrap_or(signal);
                    BackendEvent::Exception {
                        thread_id,
                        message: format!("{}: {}", signal, meaning),
                    }
                }
            }
            stop_reasons::BREAKPOINT_HIT => BackendEvent::Break {
                reason: StopReason::Breakpoint,
                thread_id,
                hit_breakpoints: results.get_i64("bkptno").into_iter().collect(),
            },
            other => BackendEvent::Break {
                reason: StopReason::from_label(other),
                thread_id,
                hit_breakpoints: Vec::new(),
            },
        };
        self.publish(event).await;
    }

    /// Publish the end of the session once.
    async fn finish(&self, reason: DetachReason) {
        if !self.detached.swap(true, Ordering::SeqCst) {
            info!(%reason, "MI session ended");
            self.publish(BackendEvent::Detached { reason }).await;
        }
    }
}

async fn run_pump(
    inner: Arc<Inner>,
    channel: Arc<MiChannel>,
    mut records: mpsc::Receiver<MiRecord>,
) {
    debug!("MI event pump started");
    let mut status = channel.watch_status();
    let mut was_connected = status.borrow().is_connected();

    loop {
        tokio::select! {
            record = records.recv() => match record {
                Some(record) => inner.translate(record).await,
                None => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if current.closed {
                    while let Ok(record) = records.try_recv() {
                        inner.translate(record).await;
                    }
                    inner.finish(DetachReason::Terminated).await;
                    break;
                }
                if was_connected && !current.is_connected() {
                    while let Ok(record) = records.try_recv() {
                        inner.translate(record).await;
                    }
                    let reason = current
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "connection lost".to_string());
                    if inner.reconnectable() {
                        inner.publish(BackendEvent::ConnectionLost { reason }).await;
                    } else {
                        // Pipes to the debugger are gone for good
                        warn!("MI backend went away: {}", reason);
                        inner.finish(DetachReason::Killed).await;
                        break;
                    }
                }
                was_connected = current.is_connected();
            }
        }
    }
    debug!("MI event pump ended");
}

/// Breakpoint from a `bkpt={...}` tuple. Sub-locations (`1.2`) and
/// tuples without a number yield `None`.
fn breakpoint_from_mi(bkpt: &MiValue) -> Option<Breakpoint> {
    let id = bkpt.get_str("number")?.parse::<i64>().ok()?;
    let path = bkpt
        .get_str("fullname")
        .or_else(|| bkpt.get_str("file"))
        .map(str::to_string)
        .or_else(|| {
            bkpt.get_str("original-location")
                .and_then(|loc| loc.rsplit_once(':'))
                .map(|(path, _)| path.trim_start_matches("-source ").to_string())
        })
        .unwrap_or_default();
    let line = bkpt
        .get_str("line")
        .and_then(|line| line.parse::<u32>().ok())
        .map(|line| line.saturating_sub(1));

    let mut breakpoint = Breakpoint::new(&path, line.unwrap_or(0)).with_id(id);
    breakpoint.enabled = bkpt.get_str("enabled") != Some("n");
    breakpoint.condition = bkpt.get_str("cond").map(str::to_string);
    breakpoint.ignore_count = bkpt
        .get_str("ignore")
        .and_then(|n| n.parse::<u32>().ok())
        .filter(|n| *n > 0);
    if let Some(line) = line {
        breakpoint.actual = Some(Location::new(path, line));
    }
    Some(breakpoint)
}

// ============================================================================
// DebugBackend
// ============================================================================

#[async_trait]
impl DebugBackend for MiBackend {
    fn name(&self) -> &str {
        "mi"
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
        let channel = self.channel().await?;
        self.inner.detached.store(true, Ordering::SeqCst);
        self.inner.stop_pump();

        if channel.status().is_connected() {
            channel
                .send_no_wait(cmd::GDB_EXIT)
                .await
                .debug_ok("-gdb-exit failed");
        }
        channel.close("detached").await;
        if let Some(mut transport) = self.inner.transport.lock().await.take() {
            transport.shutdown().await;
        }
        *self.inner.channel.write().await = None;
        self.inner.breakpoints.lock().await.clear();

        self.inner
            .publish(BackendEvent::Detached {
                reason: DetachReason::Requested,
            })
            .await;
        Ok(())
    }

    async fn set_away(&self, away: bool) {
        if let Some(channel) = self.inner.channel.read().await.as_ref() {
            channel.set_away(away);
        }
    }

    async fn reconnect(&self) -> Result<AttachOutcome> {
        self.features().require(Feature::Reconnect)?;
        let channel = self.channel().await?;
        if channel.status().closed {
            return Err(Error::SessionEnded("debug session is over".to_string()));
        }
        if !channel.status().is_connected() {
            let streams = {
                let transport = self.inner.transport.lock().await;
                let Some(transport) = transport.as_ref() else {
                    return Err(Error::unsupported("reconnecting without an owned transport"));
                };
                transport.reconnect().await?
            };
            channel.attach_streams(streams).await?;
            info!("MI connection re-established");
        }
        Ok(AttachOutcome { running: false })
    }

    async fn get_frames(&self) -> Result<Vec<Frame>> {
        let threads = self.command(cmd::THREAD_INFO).await?;
        if let Some(current) = threads.results.get_i64("current-thread-id") {
            self.inner.thread_id.store(current, Ordering::SeqCst);
        }

        let record = self
            .command(&format!(
                "{} --thread {}",
                cmd::STACK_LIST_FRAMES,
                self.inner.thread_id.load(Ordering::SeqCst)
            ))
            .await?;

        // References from the previous stop are dead now
        let stale = match self.inner.refs.lock() {
            Ok(mut refs) => refs.reset(),
            Err(_) => Vec::new(),
        };
        for object in stale {
            self.command(&format!("{} {}", cmd::VAR_DELETE, quote(&object)))
                .await
                .debug_ok("Failed to delete var-object");
        }

        Ok(record
            .results
            .get_list("stack")
            .iter()
            .enumerate()
            .map(|(position, frame)| {
                let level = frame
                    .get_str("level")
                    .and_then(|l| l.parse::<usize>().ok())
                    .unwrap_or(position);
                let name = frame
                    .get_str("func")
                    .or_else(|| frame.get_str("addr"))
                    .unwrap_or("??");
                let path = frame
                    .get_str("fullname")
                    .or_else(|| frame.get_str("file"))
                    .unwrap_or_default();
                let line = frame
                    .get_str("line")
                    .and_then(|l| l.parse::<u32>().ok())
                    .map(|l| l.saturating_sub(1))
                    .unwrap_or(0);
                Frame::new(level as i64, level, name, path, line)
            })
            .collect())
    }

    async fn get_scopes(&self, frame: &Frame) -> Result<Vec<Scope>> {
        let level = frame.handle.max(0) as usize;
        let arguments = self.allocate(RefTarget::Arguments { level });
        let locals = self.allocate(RefTarget::Locals { level });
        Ok(vec![
            Scope::new(0, frame.index, "Arguments", arguments),
            Scope::new(1, frame.index, "Locals", locals),
        ])
    }

    async fn get_properties(&self, reference: VariableRef) -> Result<Vec<Variable>> {
        match self.target(reference)? {
            RefTarget::VarObject(object) => self.var_children(&object).await,
            scope => self.scope_variables(&scope).await,
        }
    }

    async fn evaluate(&self, expression: &str, frame: Option<&Frame>) -> Result<Variable> {
        let level = frame.map(|f| f.handle.max(0) as usize).unwrap_or(0);
        let record = self
            .command(&format!(
                "{} {} {}",
                cmd::DATA_EVALUATE,
                self.thread_frame(level),
                quote(expression)
            ))
            .await?;
        let value = record.results.get_str("value").unwrap_or_default();
        let mut variable = Variable::new(expression, value);
        variable.evaluate_name = Some(expression.to_string());
        Ok(variable)
    }

    async fn set_variable(
        &self,
        parent: VariableRef,
        name: &str,
        value: &str,
        frame: Option<&Frame>,
    ) -> Result<Variable> {
        let assigned = match self.target(parent)? {
            RefTarget::VarObject(object) => {
                let child = format!("{}.{}", object, name);
                self.command(&format!("{} {} {}", cmd::VAR_ASSIGN, quote(&child), quote(value)))
                    .await?
            }
            RefTarget::Arguments { level } | RefTarget::Locals { level } => {
                let level = frame.map(|f| f.handle.max(0) as usize).unwrap_or(level);
                let created = self
                    .command(&format!(
                        "{} {} - * {}",
                        cmd::VAR_CREATE,
                        self.thread_frame(level),
                        quote(name)
                    ))
                    .await?;
                let object = created.results.get_str("name").unwrap_or_default().to_string();
                let assigned = self
                    .command(&format!("{} {} {}", cmd::VAR_ASSIGN, quote(&object), quote(value)))
                    .await;
                self.command(&format!("{} {}", cmd::VAR_DELETE, quote(&object)))
                    .await
                    .debug_ok("Failed to delete var-object");
                assigned?
            }
        };

        let value = assigned.results.get_str("value").unwrap_or(value);
        Ok(Variable::new(name, value))
    }

    async fn set_breakpoint(&self, breakpoint: &Breakpoint) -> Result<Breakpoint> {
        let mut command = format!("{} -f", cmd::BREAK_INSERT);
        if let Some(condition) = breakpoint.effective_condition() {
            command.push_str(&format!(" -c {}", quote(condition)));
        }
        if let Some(count) = breakpoint.effective_ignore_count() {
            command.push_str(&format!(" -i {}", count));
        }
        if !breakpoint.enabled {
            command.push_str(" -d");
        }
        command.push(' ');
        command.push_str(&quote(&format!("{}:{}", breakpoint.path, breakpoint.line + 1)));

        let record = match self.command(&command).await {
            Ok(record) => record,
            Err(Error::Backend(reason)) => {
                return Err(Error::BreakpointResolutionFailed {
                    path: breakpoint.path.clone(),
                    line: breakpoint.line,
                    reason,
                })
            }
            Err(e) => return Err(e),
        };

        let reported = record
            .results
            .get("bkpt")
            .and_then(breakpoint_from_mi)
            .ok_or_else(|| Error::ProtocolParse("-break-insert reply without bkpt".to_string()))?;

        let mut created = breakpoint.clone();
        created.id = reported.id;
        created.actual = reported.actual;
        created.error = None;
        if let Some(id) = created.id {
            self.inner.breakpoints.lock().await.insert(id, created.clone());
        }
        debug!(id = ?created.id, path = %created.path, line = created.line, "Breakpoint set");
        Ok(created)
    }

    async fn change_breakpoint(&self, breakpoint: &Breakpoint) -> Result<Breakpoint> {
        let Some(id) = breakpoint.id else {
            return Err(Error::invalid_state("breakpoint has no backend id"));
        };
        let previous = self
            .inner
            .breakpoints
            .lock()
            .await
            .get(&id)
            .cloned()
            .unwrap_or_else(|| breakpoint.clone());

        if previous.effective_condition() != breakpoint.effective_condition() {
            let condition = breakpoint
                .effective_condition()
                .map(|c| format!(" {}", c))
                .unwrap_or_default();
            self.command(&format!("{} {}{}", cmd::BREAK_CONDITION, id, condition))
                .await?;
        }
        if previous.effective_ignore_count() != breakpoint.effective_ignore_count() {
            let count = breakpoint.effective_ignore_count().unwrap_or(0);
            self.command(&format!("{} {} {}", cmd::BREAK_AFTER, id, count))
                .await?;
        }
        if previous.enabled != breakpoint.enabled {
            let toggle = if breakpoint.enabled {
                cmd::BREAK_ENABLE
            } else {
                cmd::BREAK_DISABLE
            };
            self.command(&format!("{} {}", toggle, id)).await?;
        }

        let mut updated = previous;
        updated.condition = breakpoint.condition.clone();
        updated.ignore_count = breakpoint.ignore_count;
        updated.enabled = breakpoint.enabled;
        self.inner.breakpoints.lock().await.insert(id, updated.clone());
        Ok(updated)
    }

    async fn clear_breakpoint(&self, breakpoint: &Breakpoint) -> Result<()> {
        let id = match breakpoint.id {
            Some(id) => Some(id),
            None => self
                .inner
                .breakpoints
                .lock()
                .await
                .values()
                .find(|tracked| tracked.same_identity(breakpoint))
                .and_then(|tracked| tracked.id),
        };
        let Some(id) = id else {
            return Ok(());
        };
        self.command(&format!("{} {}", cmd::BREAK_DELETE, id)).await?;
        self.inner.breakpoints.lock().await.remove(&id);
        Ok(())
    }

    async fn list_breakpoints(&self) -> Result<Vec<Breakpoint>> {
        let record = self.command(cmd::BREAK_LIST).await?;
        let listed: Vec<Breakpoint> = record
            .results
            .get("BreakpointTable")
            .map(|table| {
                table
                    .get("body")
                    .and_then(MiValue::as_list)
                    .unwrap_or(&[])
                    .iter()
                    .filter_map(breakpoint_from_mi)
                    .collect()
            })
            .unwrap_or_default();

        let tracked = self.inner.breakpoints.lock().await;
        Ok(listed
            .into_iter()
            .map(|reported| match reported.id.and_then(|id| tracked.get(&id)) {
                Some(known) => {
                    let mut merged = known.clone();
                    merged.actual = reported.actual;
                    merged
                }
                None => Breakpoint {
                    server_only: true,
                    ..reported
                },
            })
            .collect())
    }

    async fn step_into(&self) -> Result<()> {
        self.exec(cmd::EXEC_STEP).await
    }

    async fn step_over(&self) -> Result<()> {
        self.exec(cmd::EXEC_NEXT).await
    }

    async fn step_out(&self) -> Result<()> {
        self.exec(cmd::EXEC_FINISH).await
    }

    async fn resume(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            self.exec(cmd::EXEC_CONTINUE).await
        } else {
            match self.command(cmd::EXEC_RUN).await {
                Ok(_) => Ok(()),
                Err(e) => {
                    self.inner.started.store(false, Ordering::SeqCst);
                    Err(e)
                }
            }
        }
    }

    async fn suspend(&self) -> Result<()> {
        self.exec(cmd::EXEC_INTERRUPT).await
    }

    async fn set_break_behavior(&self, behavior: PauseOnBreaks) -> Result<()> {
        match behavior {
            PauseOnBreaks::None => Ok(()),
            _ => self.features().require(Feature::ExceptionBreaks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakpoint_from_mi_tuple() {
        let results = MiResults::parse(
            r#"bkpt={number="3",type="breakpoint",enabled="n",file="main.c",fullname="/src/main.c",line="12",cond="x > 1",ignore="4"}"#,
        )
        .unwrap();
        let bp = breakpoint_from_mi(results.get("bkpt").unwrap()).unwrap();
        assert_eq!(bp.id, Some(3));
        assert_eq!(bp.path, "/src/main.c");
        assert_eq!(bp.line, 11);
        assert!(!bp.enabled);
        assert_eq!(bp.condition.as_deref(), Some("x > 1"));
        assert_eq!(bp.ignore_count, Some(4));
        assert_eq!(bp.actual, Some(Location::new("/src/main.c", 11)));
    }

    #[test]
    fn test_pending_breakpoint_has_no_location() {
        let results = MiResults::parse(
            r#"bkpt={number="5",type="breakpoint",enabled="y",pending="lib.c:40",original-location="lib.c:40"}"#,
        )
        .unwrap();
        let bp = breakpoint_from_mi(results.get("bkpt").unwrap()).unwrap();
        assert_eq!(bp.path, "lib.c");
        assert_eq!(bp.actual, None);
    }

    #[test]
    fn test_sub_location_is_skipped() {
        let results = MiResults::parse(r#"bkpt={number="1.2",enabled="y"}"#).unwrap();
        assert!(breakpoint_from_mi(results.get("bkpt").unwrap()).is_none());
    }

    #[test]
    fn test_ref_table_reset_returns_roots() {
        let mut refs = RefTable::default();
        let a = refs.allocate(RefTarget::Locals { level: 0 });
        let b = refs.allocate(RefTarget::VarObject("var1".into()));
        refs.roots.push("var1".into());
        assert_ne!(a, b);
        assert_eq!(refs.get(VariableRef(b)), Some(RefTarget::VarObject("var1".into())));

        assert_eq!(refs.reset(), vec!["var1".to_string()]);
        assert_eq!(refs.get(VariableRef(a)), None);
        // References keep increasing across resets
        assert!(refs.allocate(RefTarget::Locals { level: 0 }) > b);
    }
}
