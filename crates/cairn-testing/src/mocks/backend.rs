//! Scripted debug backend

use async_trait::async_trait;
use cairn_config::RunnerConfig;
use cairn_core::{
    Breakpoint, Error, Frame, Location, PauseOnBreaks, Result, Scope, Variable, VariableRef,
};
use cairn_ports::{
    AttachOutcome, BackendEvent, BackendFeatures, DebugBackend, DetachReason, Feature,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// A backend whose answers are set up by the test.
///
/// Every trait call is recorded as a short string (`"attach"`,
/// `"set /a.js:4"`, `"properties @3"`, ...). Breakpoints set through it
/// are kept as the backend-held list returned by `list_breakpoints`.
pub struct MockBackend {
    features: Mutex<BackendFeatures>,
    attached: AtomicBool,
    running_on_attach: AtomicBool,
    next_id: AtomicI64,
    remote: Mutex<Vec<Breakpoint>>,
    rejected: Mutex<HashMap<(String, u32), String>>,
    relocations: Mutex<HashMap<(String, u32), u32>>,
    frames: Mutex<Vec<Frame>>,
    frames_error: Mutex<Option<Error>>,
    scopes: Mutex<Vec<Scope>>,
    properties: Mutex<HashMap<VariableRef, Vec<Variable>>>,
    property_delay: Mutex<Duration>,
    property_fetches: AtomicUsize,
    evaluations: Mutex<HashMap<String, Variable>>,
    set_variable_error: Mutex<Option<Error>>,
    change_error: Mutex<Option<Error>>,
    clear_errors: Mutex<HashMap<i64, Error>>,
    reconnect_error: Mutex<Option<Error>>,
    calls: Mutex<Vec<String>>,
    subscribers: Mutex<Vec<mpsc::Sender<BackendEvent>>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            features: Mutex::new(BackendFeatures::all()),
            attached: AtomicBool::new(false),
            running_on_attach: AtomicBool::new(true),
            next_id: AtomicI64::new(1),
            remote: Mutex::new(Vec::new()),
            rejected: Mutex::new(HashMap::new()),
            relocations: Mutex::new(HashMap::new()),
            frames: Mutex::new(Vec::new()),
            frames_error: Mutex::new(None),
            scopes: Mutex::new(Vec::new()),
            properties: Mutex::new(HashMap::new()),
            property_delay: Mutex::new(Duration::ZERO),
            property_fetches: AtomicUsize::new(0),
            evaluations: Mutex::new(HashMap::new()),
            set_variable_error: Mutex::new(None),
            change_error: Mutex::new(None),
            clear_errors: Mutex::new(HashMap::new()),
            reconnect_error: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_features(self, features: BackendFeatures) -> Self {
        *self.features.lock().unwrap() = features;
        self
    }

    /// Breakpoints the backend already holds before attach.
    pub fn with_remote(self, breakpoints: Vec<Breakpoint>) -> Self {
        for bp in &breakpoints {
            if let Some(id) = bp.id {
                self.next_id.fetch_max(id + 1, Ordering::SeqCst);
            }
        }
        *self.remote.lock().unwrap() = breakpoints;
        self
    }

    /// Attach reports a suspended debuggee instead of a running one.
    pub fn stopped_on_attach(self) -> Self {
        self.running_on_attach.store(false, Ordering::SeqCst);
        self
    }

    /// Refuse breakpoints requested at `path:line`.
    pub fn reject_line(&self, path: &str, line: u32, reason: &str) {
        self.rejected
            .lock()
            .unwrap()
            .insert((path.to_string(), line), reason.to_string());
    }

    /// Bind breakpoints requested at `path:line` to line `to` instead.
    pub fn relocate(&self, path: &str, line: u32, to: u32) {
        self.relocations
            .lock()
            .unwrap()
            .insert((path.to_string(), line), to);
    }

    pub fn set_frames(&self, frames: Vec<Frame>) {
        *self.frames.lock().unwrap() = frames;
    }

    pub fn set_scopes(&self, scopes: Vec<Scope>) {
        *self.scopes.lock().unwrap() = scopes;
    }

    pub fn set_properties(&self, reference: i64, variables: Vec<Variable>) {
        self.properties
            .lock()
            .unwrap()
            .insert(VariableRef(reference), variables);
    }

    /// Delay every property fetch, to keep fetches in flight.
    pub fn set_property_delay(&self, delay: Duration) {
        *self.property_delay.lock().unwrap() = delay;
    }

    pub fn set_evaluation(&self, expression: &str, value: &str) {
        self.evaluations
            .lock()
            .unwrap()
            .insert(expression.to_string(), Variable::new(expression, value));
    }

    /// The next `set_variable` fails with `error`.
    pub fn fail_set_variable(&self, error: Error) {
        *self.set_variable_error.lock().unwrap() = Some(error);
    }

    /// The next `get_frames` fails with `error`.
    pub fn fail_frames(&self, error: Error) {
        *self.frames_error.lock().unwrap() = Some(error);
    }

    /// The next `change_breakpoint` fails with `error`.
    pub fn fail_change(&self, error: Error) {
        *self.change_error.lock().unwrap() = Some(error);
    }

    /// Every `clear_breakpoint` of breakpoint `id` fails with `error`.
    pub fn fail_clear(&self, id: i64, error: Error) {
        self.clear_errors.lock().unwrap().insert(id, error);
    }

    pub fn fail_reconnect(&self, error: Error) {
        *self.reconnect_error.lock().unwrap() = Some(error);
    }

    /// Push an event to every subscriber.
    pub async fn emit(&self, event: BackendEvent) {
        let senders: Vec<_> = self.subscribers.lock().unwrap().clone();
        for tx in senders {
            let _ = tx.send(event.clone()).await;
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls starting with `prefix`.
    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn property_fetches(&self) -> usize {
        self.property_fetches.load(Ordering::SeqCst)
    }

    pub fn remote_breakpoints(&self) -> Vec<Breakpoint> {
        self.remote.lock().unwrap().clone()
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn outcome(&self) -> AttachOutcome {
        AttachOutcome {
            running: self.running_on_attach.load(Ordering::SeqCst),
        }
    }

    fn ensure_attached(&self) -> Result<()> {
        if self.is_attached() {
            Ok(())
        } else {
            Err(Error::NotAttached)
        }
    }
}

#[async_trait]
impl DebugBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn features(&self) -> BackendFeatures {
        *self.features.lock().unwrap()
    }

    async fn subscribe(&self) -> mpsc::Receiver<BackendEvent> {
        let (tx, rx) = mpsc::channel(64);
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    async fn attach(&self, _runner: &RunnerConfig) -> Result<AttachOutcome> {
        self.record("attach");
        if self.attached.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyAttached);
        }
        Ok(self.outcome())
    }

    async fn detach(&self) -> Result<()> {
        self.record("detach");
        if !self.attached.swap(false, Ordering::SeqCst) {
            return Err(Error::NotAttached);
        }
        self.emit(BackendEvent::Detached {
            reason: DetachReason::Requested,
        })
        .await;
        Ok(())
    }

    async fn set_away(&self, away: bool) {
        self.record(format!("away {}", away));
    }

    async fn reconnect(&self) -> Result<AttachOutcome> {
        self.record("reconnect");
        self.features().require(Feature::Reconnect)?;
        if let Some(error) = self.reconnect_error.lock().unwrap().take() {
            return Err(error);
        }
        Ok(self.outcome())
    }

    async fn get_frames(&self) -> Result<Vec<Frame>> {
        self.record("frames");
        self.ensure_attached()?;
        if let Some(error) = self.frames_error.lock().unwrap().take() {
            return Err(error);
        }
        Ok(self.frames.lock().unwrap().clone())
    }

    async fn get_scopes(&self, frame: &Frame) -> Result<Vec<Scope>> {
        self.record(format!("scopes {}", frame.handle));
        Ok(self.scopes.lock().unwrap().clone())
    }

    async fn get_properties(&self, reference: VariableRef) -> Result<Vec<Variable>> {
        self.record(format!("properties {}", reference));
        self.property_fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.property_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.properties
            .lock()
            .unwrap()
            .get(&reference)
            .cloned()
            .ok_or_else(|| Error::invalid_state(format!("unknown reference {}", reference)))
    }

    async fn evaluate(&self, expression: &str, _frame: Option<&Frame>) -> Result<Variable> {
        self.record(format!("evaluate {}", expression));
        self.evaluations
            .lock()
            .unwrap()
            .get(expression)
            .cloned()
            .ok_or_else(|| Error::Backend(format!("{} is not defined", expression)))
    }

    async fn set_variable(
        &self,
        parent: VariableRef,
        name: &str,
        value: &str,
        _frame: Option<&Frame>,
    ) -> Result<Variable> {
        self.record(format!("set_variable {} {}={}", parent, name, value));
        if let Some(error) = self.set_variable_error.lock().unwrap().take() {
            return Err(error);
        }
        let mut properties = self.properties.lock().unwrap();
        let child = properties
            .get_mut(&parent)
            .and_then(|children| children.iter_mut().find(|v| v.name == name))
            .ok_or_else(|| Error::invalid_state(format!("no variable {}", name)))?;
        child.value = value.to_string();
        Ok(child.clone())
    }

    async fn set_breakpoint(&self, breakpoint: &Breakpoint) -> Result<Breakpoint> {
        self.record(format!("set {}:{}", breakpoint.path, breakpoint.line));
        let key = (breakpoint.path.clone(), breakpoint.line);
        if let Some(reason) = self.rejected.lock().unwrap().get(&key) {
            return Err(Error::BreakpointResolutionFailed {
                path: breakpoint.path.clone(),
                line: breakpoint.line,
                reason: reason.clone(),
            });
        }
        let line = self
            .relocations
            .lock()
            .unwrap()
            .get(&key)
            .copied()
            .unwrap_or(breakpoint.line);
        let created = Breakpoint {
            id: Some(self.next_id.fetch_add(1, Ordering::SeqCst)),
            actual: Some(Location::new(breakpoint.path.clone(), line)),
            error: None,
            ..breakpoint.clone()
        };
        self.remote.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn change_breakpoint(&self, breakpoint: &Breakpoint) -> Result<Breakpoint> {
        self.record(format!("change {}", breakpoint.id.unwrap_or_default()));
        if let Some(error) = self.change_error.lock().unwrap().take() {
            return Err(error);
        }
        let mut remote = self.remote.lock().unwrap();
        let slot = remote
            .iter_mut()
            .find(|bp| bp.id == breakpoint.id)
            .ok_or_else(|| Error::Backend("unknown breakpoint".to_string()))?;
        slot.condition = breakpoint.condition.clone();
        slot.ignore_count = breakpoint.ignore_count;
        slot.enabled = breakpoint.enabled;
        Ok(slot.clone())
    }

    async fn clear_breakpoint(&self, breakpoint: &Breakpoint) -> Result<()> {
        self.record(format!("clear {}", breakpoint.id.unwrap_or_default()));
        if let Some(error) = breakpoint
            .id
            .and_then(|id| self.clear_errors.lock().unwrap().get(&id).cloned())
        {
            return Err(error);
        }
        self.remote
            .lock()
            .unwrap()
            .retain(|bp| bp.id != breakpoint.id);
        Ok(())
    }

    async fn list_breakpoints(&self) -> Result<Vec<Breakpoint>> {
        self.record("list");
        Ok(self.remote_breakpoints())
    }

    async fn step_into(&self) -> Result<()> {
        self.record("step_into");
        Ok(())
    }

    async fn step_over(&self) -> Result<()> {
        self.record("step_over");
        Ok(())
    }

    async fn step_out(&self) -> Result<()> {
        self.record("step_out");
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.record("resume");
        Ok(())
    }

    async fn suspend(&self) -> Result<()> {
        self.record("suspend");
        Ok(())
    }

    async fn set_break_behavior(&self, behavior: PauseOnBreaks) -> Result<()> {
        self.record(format!("break_behavior {:?}", behavior));
        if behavior != PauseOnBreaks::None {
            self.features().require(Feature::ExceptionBreaks)?;
        }
        Ok(())
    }
}
