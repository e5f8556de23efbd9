//! The debug session coordinator
//!
//! A [`Session`] is the only mutator of the breakpoint book, the frame
//! stack, the expansion caches and the watch list. Backend events are
//! consumed by a listener task; user commands arrive through the public
//! methods. Observers read cloned snapshots or subscribe to
//! [`SessionEvent`]s.
//!
//! Lifecycle: `disconnected → attaching → {running, stopped} → detaching →
//! disconnected`. Step and resume commands wait on an attach gate that only
//! opens once breakpoint reconciliation has finished.

use crate::breakpoints::BreakpointBook;
use crate::events::{Observers, SessionEvent, SessionState};
use crate::frames::FrameStack;
use crate::persistence::PersistScheduler;
use crate::reconcile::{self, ResyncOutcome};
use crate::variables::ExpansionCache;
use crate::watches::{Watch, WatchList};
use cairn_config::{RunnerConfig, SessionConfig};
use cairn_core::{
    Breakpoint, DocumentEdit, Error, ErrorDisposition, Frame, FrameId, InspectorNode,
    PauseOnBreaks, Result, Scope, StopReason, Variable, VariableRef,
};
use cairn_ports::{
    BackendEvent, BreakpointStoreRef, DebugBackendRef, EditorDecorationsRef, Feature,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Children of an inspector node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expansion {
    Scopes(Vec<Scope>),
    Variables(Vec<Variable>),
}

struct Listener {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

struct Inner {
    backend: DebugBackendRef,
    decorations: EditorDecorationsRef,
    store: BreakpointStoreRef,
    state: RwLock<SessionState>,
    book: Mutex<BreakpointBook>,
    frames: RwLock<FrameStack>,
    scopes: ExpansionCache<Vec<Scope>>,
    variables: ExpansionCache<Vec<Variable>>,
    watches: Mutex<WatchList>,
    pause_on_breaks: Mutex<PauseOnBreaks>,
    /// Paths currently carrying execution-line marks.
    marked: Mutex<BTreeSet<String>>,
    /// Open once reconciliation after attach or reconnect has finished.
    gate: watch::Sender<bool>,
    away: AtomicBool,
    lost_while_away: AtomicBool,
    persist: PersistScheduler,
    observers: Observers,
    listener: Mutex<Option<Listener>>,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Must be called inside a tokio runtime.
    pub fn new(
        backend: DebugBackendRef,
        decorations: EditorDecorationsRef,
        store: BreakpointStoreRef,
        config: &SessionConfig,
    ) -> Self {
        let (gate, _) = watch::channel(false);
        let persist = PersistScheduler::new(
            store.clone(),
            Duration::from_millis(config.persist_debounce_ms),
        );
        Self {
            inner: Arc::new(Inner {
                backend,
                decorations,
                store,
                state: RwLock::new(SessionState::Disconnected),
                book: Mutex::new(BreakpointBook::new()),
                frames: RwLock::new(FrameStack::new()),
                scopes: ExpansionCache::new(),
                variables: ExpansionCache::new(),
                watches: Mutex::new(WatchList::new()),
                pause_on_breaks: Mutex::new(config.pause_on_breaks),
                marked: Mutex::new(BTreeSet::new()),
                gate,
                away: AtomicBool::new(false),
                lost_while_away: AtomicBool::new(false),
                persist,
                observers: Observers::new(config.observer_channel_capacity),
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> mpsc::Receiver<SessionEvent> {
        self.inner.observers.subscribe()
    }

    pub fn backend_name(&self) -> String {
        self.inner.backend.name().to_string()
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    pub async fn state(&self) -> SessionState {
        *self.inner.state.read().await
    }

    /// Visible breakpoints in insertion order.
    pub async fn breakpoints(&self) -> Vec<Breakpoint> {
        self.inner.book.lock().await.visible()
    }

    pub async fn frames(&self) -> Vec<Frame> {
        self.inner.frames.read().await.frames().to_vec()
    }

    pub async fn active_frame(&self) -> Option<Frame> {
        self.inner.frames.read().await.active().cloned()
    }

    pub async fn watches(&self) -> Vec<Watch> {
        self.inner.watches.lock().await.snapshot()
    }

    pub async fn pause_on_breaks(&self) -> PauseOnBreaks {
        *self.inner.pause_on_breaks.lock().await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connect the backend, reconcile the breakpoint book with it and open
    /// the attach gate. Returns the reconciled breakpoints.
    #[instrument(skip(self, runner), fields(backend = %self.inner.backend.name()))]
    pub async fn attach(&self, runner: &RunnerConfig) -> Result<Vec<Breakpoint>> {
        {
            let mut state = self.inner.state.write().await;
            if *state != SessionState::Disconnected {
                return Err(Error::AlreadyAttached);
            }
            *state = SessionState::Attaching;
        }
        self.publish(SessionEvent::StateChanged(SessionState::Attaching));

        let events = self.inner.backend.subscribe().await;
        let outcome = match self.inner.backend.attach(runner).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Attach failed: {}", e);
                *self.inner.state.write().await = SessionState::Disconnected;
                self.publish(SessionEvent::StateChanged(SessionState::Disconnected));
                return Err(e);
            }
        };
        self.spawn_event_listener(events).await;

        let reconciled = self.reconcile().await;
        self.apply_break_behavior().await;

        let state = self
            .settle_state(if outcome.running {
                SessionState::Running
            } else {
                SessionState::Stopped
            })
            .await;
        self.inner.gate.send_replace(true);
        info!(
            breakpoints = reconciled.authoritative.len(),
            failed = reconciled.failed_adds.len(),
            %state,
            "Session attached"
        );
        self.publish(SessionEvent::Attached {
            breakpoints: reconciled.authoritative.clone(),
            failed: reconciled.failed_adds.clone(),
        });

        if state == SessionState::Stopped {
            self.on_stop(StopReason::Entry, None).await;
        }
        Ok(reconciled.authoritative)
    }

    /// End the session: the backend is released, pending saves are
    /// flushed and all session state is reset.
    #[instrument(skip(self))]
    pub async fn detach(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write().await;
            if !state.is_attached() && *state != SessionState::Attaching {
                return Err(Error::NotAttached);
            }
            *state = SessionState::Detaching;
        }
        self.publish(SessionEvent::StateChanged(SessionState::Detaching));
        self.stop_listener().await;

        let result = self.inner.backend.detach().await;
        if let Err(e) = &result {
            warn!("Backend detach failed: {}", e);
        }
        self.reset("detached", false).await;
        result
    }

    /// The host lost connectivity. Transport loss from now on is expected
    /// and repaired on [`Session::host_returned`].
    pub async fn host_away(&self) {
        info!("Host away");
        self.inner.away.store(true, Ordering::SeqCst);
        self.inner.backend.set_away(true).await;
    }

    /// The host is back. Returns true when the connection had dropped and
    /// was re-established and resynced.
    pub async fn host_returned(&self) -> Result<bool> {
        info!("Host returned");
        self.inner.away.store(false, Ordering::SeqCst);
        self.inner.backend.set_away(false).await;
        if !self.inner.lost_while_away.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        self.reconnect().await?;
        Ok(true)
    }

    async fn reconnect(&self) -> Result<()> {
        self.inner.gate.send_replace(false);
        let outcome = match self.inner.backend.reconnect().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Reconnect failed: {}", e);
                self.reset(&format!("reconnect failed: {}", e), true).await;
                return Err(e);
            }
        };
        self.reconcile().await;
        let state = self
            .settle_state(if outcome.running {
                SessionState::Running
            } else {
                SessionState::Stopped
            })
            .await;
        self.inner.gate.send_replace(true);
        info!(%state, "Session reconnected");
        self.publish(SessionEvent::Reconnected);
        if state == SessionState::Stopped {
            self.on_stop(StopReason::Other("reconnect".to_string()), None)
                .await;
        }
        Ok(())
    }

    /// Wait for the attach gate. Fails when the session is not attached.
    async fn ready(&self) -> Result<()> {
        let mut gate = self.inner.gate.subscribe();
        loop {
            if *gate.borrow_and_update() {
                return Ok(());
            }
            if *self.inner.state.read().await == SessionState::Disconnected {
                return Err(Error::NotAttached);
            }
            if gate.changed().await.is_err() {
                return Err(Error::NotAttached);
            }
        }
    }

    async fn require_state(&self, expected: SessionState) -> Result<()> {
        let state = *self.inner.state.read().await;
        if state == expected {
            Ok(())
        } else {
            Err(Error::invalid_state(format!(
                "session is {}, expected {}",
                state, expected
            )))
        }
    }

    /// Move from attaching (or an unknown state after reconnect) to
    /// `target`, unless a backend event already settled it.
    async fn settle_state(&self, target: SessionState) -> SessionState {
        let mut state = self.inner.state.write().await;
        if !state.is_attached() {
            *state = target;
            drop(state);
            self.publish(SessionEvent::StateChanged(target));
            return target;
        }
        *state
    }

    async fn attached(&self) -> bool {
        self.inner.state.read().await.is_attached()
    }

    // ========================================================================
    // Execution control
    // ========================================================================

    pub async fn resume(&self) -> Result<()> {
        self.ready().await?;
        self.require_state(SessionState::Stopped).await?;
        self.inner.backend.resume().await?;
        self.mark_running().await;
        Ok(())
    }

    pub async fn step_over(&self) -> Result<()> {
        self.ready().await?;
        self.require_state(SessionState::Stopped).await?;
        self.inner.backend.step_over().await?;
        self.mark_running().await;
        Ok(())
    }

    pub async fn step_into(&self) -> Result<()> {
        self.ready().await?;
        self.require_state(SessionState::Stopped).await?;
        self.inner.backend.step_into().await?;
        self.mark_running().await;
        Ok(())
    }

    pub async fn step_out(&self) -> Result<()> {
        self.ready().await?;
        self.inner.backend.features().require(Feature::StepOut)?;
        self.require_state(SessionState::Stopped).await?;
        self.inner.backend.step_out().await?;
        self.mark_running().await;
        Ok(())
    }

    /// Ask a running debuggee to stop. The stop itself arrives as an event.
    pub async fn suspend(&self) -> Result<()> {
        self.ready().await?;
        self.inner.backend.features().require(Feature::Suspend)?;
        self.require_state(SessionState::Running).await?;
        self.inner.backend.suspend().await
    }

    /// Continue to `path:line` through a hidden breakpoint that is removed
    /// at the next stop.
    pub async fn run_to(&self, path: &str, line: u32) -> Result<()> {
        self.ready().await?;
        self.require_state(SessionState::Stopped).await?;

        let covered = self.inner.book.lock().await.find_at(path, line).is_some();
        if !covered {
            let request = Breakpoint::new(path, line).hidden();
            let created = self.inner.backend.set_breakpoint(&request).await?;
            self.inner.book.lock().await.insert(Breakpoint {
                hidden: true,
                ..created
            });
        }
        self.resume().await
    }

    pub async fn set_break_behavior(&self, behavior: PauseOnBreaks) -> Result<()> {
        if behavior != PauseOnBreaks::None {
            self.inner
                .backend
                .features()
                .require(Feature::ExceptionBreaks)?;
        }
        if self.attached().await {
            self.inner.backend.set_break_behavior(behavior).await?;
        }
        *self.inner.pause_on_breaks.lock().await = behavior;
        self.publish(SessionEvent::PauseOnBreaksChanged(behavior));
        Ok(())
    }

    async fn apply_break_behavior(&self) {
        let behavior = *self.inner.pause_on_breaks.lock().await;
        if behavior == PauseOnBreaks::None {
            return;
        }
        if let Err(e) = self.inner.backend.set_break_behavior(behavior).await {
            self.report(e).await;
        }
    }

    // ========================================================================
    // Breakpoints
    // ========================================================================

    /// Add a breakpoint. An existing breakpoint with the same identity is
    /// returned unchanged. While attached the backend binds it; a refusal
    /// keeps it in the book with `error` set and is returned as an error.
    #[instrument(skip(self, breakpoint), fields(path = %breakpoint.path, line = breakpoint.line))]
    pub async fn set_breakpoint(&self, breakpoint: Breakpoint) -> Result<Breakpoint> {
        let features = self.inner.backend.features();
        if breakpoint.effective_condition().is_some() {
            features.require(Feature::ConditionalBreakpoints)?;
        }
        if breakpoint.effective_ignore_count().is_some() {
            features.require(Feature::IgnoreCounts)?;
        }
        if *self.inner.state.read().await == SessionState::Attaching {
            self.ready().await?;
        }

        {
            let mut book = self.inner.book.lock().await;
            if let Some(existing) = book.find(&breakpoint) {
                debug!("Breakpoint already set");
                return Ok(existing.clone());
            }
            book.insert(breakpoint.clone());
        }

        if !self.attached().await {
            self.breakpoints_changed().await;
            return Ok(breakpoint);
        }

        match self.inner.backend.set_breakpoint(&breakpoint).await {
            Ok(created) => {
                let resolved = {
                    let mut book = self.inner.book.lock().await;
                    // the request placeholder is replaced by the resolved
                    // breakpoint, which may land on an older one
                    book.remove(&breakpoint);
                    let merged = book.apply_resolution(&Breakpoint {
                        condition: breakpoint.condition.clone(),
                        ignore_count: breakpoint.ignore_count,
                        enabled: breakpoint.enabled,
                        ..created.clone()
                    });
                    if !merged.is_empty() {
                        debug!(merged = merged.len(), "Merged overlapping breakpoints");
                    }
                    self.check_bounds(&mut book, created.resolved_path());
                    created
                        .id
                        .and_then(|id| book.find_by_id(id))
                        .or_else(|| book.find_at(created.resolved_path(), created.resolved_line()))
                        .cloned()
                        .unwrap_or(created)
                };
                self.breakpoints_changed().await;
                Ok(resolved)
            }
            Err(e) => {
                let failed = Breakpoint {
                    error: Some(e.to_string()),
                    ..breakpoint
                };
                self.inner.book.lock().await.update(failed.clone());
                self.publish(SessionEvent::BreakpointFailed {
                    breakpoint: failed,
                    reason: e.to_string(),
                });
                self.breakpoints_changed().await;
                Err(e)
            }
        }
    }

    /// Remove the visible breakpoint at `path:line`. The backend is asked
    /// first; a removal it refuses stays in the book.
    pub async fn clear_breakpoint(&self, path: &str, line: u32) -> Result<Breakpoint> {
        let target = self
            .inner
            .book
            .lock()
            .await
            .find_at(path, line)
            .cloned()
            .ok_or_else(|| no_breakpoint(path, line))?;

        if target.id.is_some() && self.attached().await {
            self.inner.backend.clear_breakpoint(&target).await?;
        }
        let removed = self
            .inner
            .book
            .lock()
            .await
            .remove(&target)
            .unwrap_or(target);
        self.breakpoints_changed().await;
        Ok(removed)
    }

    pub async fn enable_breakpoint(&self, path: &str, line: u32) -> Result<Breakpoint> {
        self.change_breakpoint(path, line, |bp| bp.enabled = true)
            .await
    }

    pub async fn disable_breakpoint(&self, path: &str, line: u32) -> Result<Breakpoint> {
        self.change_breakpoint(path, line, |bp| bp.enabled = false)
            .await
    }

    /// Set or (with `None` or an empty string) clear the condition.
    pub async fn set_condition(
        &self,
        path: &str,
        line: u32,
        condition: Option<String>,
    ) -> Result<Breakpoint> {
        let condition = condition.filter(|c| !c.trim().is_empty());
        if condition.is_some() {
            self.inner
                .backend
                .features()
                .require(Feature::ConditionalBreakpoints)?;
        }
        self.change_breakpoint(path, line, move |bp| bp.condition = condition)
            .await
    }

    pub async fn set_ignore_count(&self, path: &str, line: u32, count: u32) -> Result<Breakpoint> {
        if count > 0 {
            self.inner
                .backend
                .features()
                .require(Feature::IgnoreCounts)?;
        }
        self.change_breakpoint(path, line, move |bp| {
            bp.ignore_count = (count > 0).then_some(count)
        })
        .await
    }

    async fn change_breakpoint<F>(&self, path: &str, line: u32, change: F) -> Result<Breakpoint>
    where
        F: FnOnce(&mut Breakpoint),
    {
        let mut updated = self
            .inner
            .book
            .lock()
            .await
            .find_at(path, line)
            .cloned()
            .ok_or_else(|| no_breakpoint(path, line))?;
        change(&mut updated);

        if updated.id.is_none() || !self.attached().await {
            self.inner.book.lock().await.update(updated.clone());
            self.breakpoints_changed().await;
            return Ok(updated);
        }
        // Nothing is committed locally until the backend accepts the change
        let changed = self.inner.backend.change_breakpoint(&updated).await?;
        let current = {
            let mut book = self.inner.book.lock().await;
            book.update(updated.clone());
            book.apply_resolution(&Breakpoint {
                condition: updated.condition.clone(),
                ignore_count: updated.ignore_count,
                enabled: updated.enabled,
                ..changed
            });
            book.find(&updated).cloned().unwrap_or(updated)
        };
        self.breakpoints_changed().await;
        Ok(current)
    }

    /// Load the stored breakpoint list into the book. While attached, new
    /// entries are also set on the backend.
    pub async fn restore_breakpoints(&self) -> Result<Vec<Breakpoint>> {
        let stored = self.inner.store.load_breakpoints().await?;
        info!(count = stored.len(), "Restoring breakpoints");
        if self.attached().await {
            for bp in stored {
                if let Err(e) = self.set_breakpoint(bp).await {
                    debug!("Restored breakpoint not bound: {}", e);
                }
            }
        } else {
            let mut book = self.inner.book.lock().await;
            for bp in stored {
                book.insert(bp.persisted());
            }
        }
        // loading is not a mutation; nothing to save
        let visible = self.inner.book.lock().await.visible();
        self.publish(SessionEvent::BreakpointsChanged(visible.clone()));
        Ok(visible)
    }

    /// Shift breakpoints for an edit of `path`. The backend is not told.
    pub async fn on_document_edit(&self, path: &str, edit: &DocumentEdit) {
        let changed = self.inner.book.lock().await.on_document_edit(path, edit);
        if changed {
            self.breakpoints_changed().await;
        }
    }

    async fn breakpoints_changed(&self) {
        let (visible, persisted) = {
            let book = self.inner.book.lock().await;
            (book.visible(), book.persisted())
        };
        self.inner.persist.schedule(persisted).await;
        self.publish(SessionEvent::BreakpointsChanged(visible));
    }

    async fn reconcile(&self) -> ResyncOutcome {
        let local = self.inner.book.lock().await.visible();
        let remote = if self
            .inner
            .backend
            .features()
            .supports(Feature::ListBreakpoints)
        {
            match self.inner.backend.list_breakpoints().await {
                Ok(remote) => remote,
                Err(e) => {
                    warn!("Could not list backend breakpoints: {}", e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let outcome = reconcile::resync(self.inner.backend.as_ref(), local, remote).await;
        {
            let mut book = self.inner.book.lock().await;
            book.replace_visible(outcome.book());
            for path in book.paths() {
                self.check_bounds(&mut book, &path);
            }
        }
        for failed in &outcome.failed_adds {
            self.publish(SessionEvent::BreakpointFailed {
                breakpoint: failed.clone(),
                reason: failed.error.clone().unwrap_or_default(),
            });
        }
        self.breakpoints_changed().await;
        outcome
    }

    fn check_bounds(&self, book: &mut BreakpointBook, path: &str) {
        let Some(length) = self.inner.decorations.document_length(path) else {
            return;
        };
        let outcome = book.apply_bounds(path, length);
        if !outcome.is_empty() {
            debug!(
                path,
                clamped = outcome.clamped.len(),
                removed = outcome.removed.len(),
                "Breakpoints outside the document"
            );
        }
    }

    // ========================================================================
    // Frames, variables and watches
    // ========================================================================

    /// Make frame `index` active.
    pub async fn select_frame(&self, index: usize) -> Result<Frame> {
        let frame = self
            .inner
            .frames
            .write()
            .await
            .select(index)
            .cloned()
            .ok_or_else(|| Error::invalid_state(format!("no frame {}", index)))?;
        self.activate_frame().await;
        Ok(frame)
    }

    /// Decorate the active frame, tell observers and re-evaluate watches.
    async fn activate_frame(&self) {
        let (top, active) = {
            let stack = self.inner.frames.read().await;
            (stack.frames().first().cloned(), stack.active().cloned())
        };
        let (Some(top), Some(active)) = (top, active) else {
            return;
        };

        {
            let decorations = &self.inner.decorations;
            let mut marked = self.inner.marked.lock().await;
            for path in std::mem::take(&mut *marked) {
                decorations.clear_marks(&path);
            }
            decorations.mark_active_line(&top.path, top.line);
            marked.insert(top.path.clone());
            if !active.is_top() {
                decorations.mark_stack_line(&active.path, active.line);
                marked.insert(active.path.clone());
            }
            decorations.open_location(&active.path, active.line, active.column);
        }

        self.refresh_watches().await;
        self.publish(SessionEvent::FrameActivated {
            index: active.index,
            frame: active,
        });
    }

    /// Scopes of a frame, fetched once per stop.
    pub async fn scopes(&self, frame: FrameId) -> Result<Vec<Scope>> {
        let target = self
            .inner
            .frames
            .read()
            .await
            .get(frame)
            .cloned()
            .ok_or_else(|| Error::invalid_state(format!("unknown frame {}", frame)))?;
        let backend = self.inner.backend.clone();
        self.inner
            .scopes
            .expand(InspectorNode::Frame { frame }, move || async move {
                backend.get_scopes(&target).await
            })
            .await
    }

    /// Children of a scope or variable node. Concurrent calls for the same
    /// node share one backend fetch.
    pub async fn variables(&self, node: InspectorNode) -> Result<Vec<Variable>> {
        let reference = self.reference_of(node).await?;
        let backend = self.inner.backend.clone();
        self.inner
            .variables
            .expand(node, move || async move { backend.get_properties(reference).await })
            .await
    }

    pub async fn expand(&self, node: InspectorNode) -> Result<Expansion> {
        match node {
            InspectorNode::Frame { frame } => self.scopes(frame).await.map(Expansion::Scopes),
            other => self.variables(other).await.map(Expansion::Variables),
        }
    }

    async fn reference_of(&self, node: InspectorNode) -> Result<VariableRef> {
        match node {
            InspectorNode::Frame { frame } => Err(Error::invalid_state(format!(
                "frame {} has scopes, not variables",
                frame
            ))),
            InspectorNode::Scope { frame, index } => self
                .scopes(frame)
                .await?
                .into_iter()
                .find(|s| s.index == index)
                .map(|s| s.reference)
                .ok_or_else(|| Error::invalid_state(format!("frame {} has no scope {}", frame, index))),
            InspectorNode::Variable { reference } => Ok(reference),
        }
    }

    /// Assign `value` to the child `name` of `parent`.
    ///
    /// The new value is shown immediately. On success the parent's children
    /// are fetched again; on failure the previous value is restored and
    /// observers get [`SessionEvent::VariableEditFailed`].
    #[instrument(skip(self, value))]
    pub async fn set_variable(
        &self,
        parent: InspectorNode,
        name: &str,
        value: &str,
    ) -> Result<Variable> {
        self.inner
            .backend
            .features()
            .require(Feature::SetVariable)?;
        self.require_state(SessionState::Stopped).await?;

        let reference = self.reference_of(parent).await?;
        let previous = self
            .variables(parent)
            .await?
            .into_iter()
            .find(|v| v.name == name)
            .ok_or_else(|| Error::invalid_state(format!("no variable '{}'", name)))?;
        let frame = self.frame_for(parent).await;

        let mut optimistic = previous.clone();
        optimistic.value = value.to_string();
        self.replace_child(parent, optimistic);

        match self
            .inner
            .backend
            .set_variable(reference, name, value, frame.as_ref())
            .await
        {
            Ok(assigned) => {
                self.inner.variables.invalidate(&parent);
                let updated = match self.variables(parent).await {
                    Ok(children) => children
                        .into_iter()
                        .find(|v| v.name == name)
                        .unwrap_or(assigned),
                    Err(e) => {
                        debug!("Refetch after edit failed: {}", e);
                        assigned
                    }
                };
                self.publish(SessionEvent::VariableChanged {
                    parent,
                    variable: updated.clone(),
                });
                self.refresh_watches().await;
                Ok(updated)
            }
            Err(e) => {
                self.replace_child(parent, previous.clone());
                self.publish(SessionEvent::VariableEditFailed {
                    parent,
                    previous,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn replace_child(&self, parent: InspectorNode, child: Variable) {
        if let Some(mut children) = self.inner.variables.get(&parent) {
            if let Some(slot) = children.iter_mut().find(|v| v.name == child.name) {
                *slot = child;
                self.inner.variables.set(parent, children);
            }
        }
    }

    async fn frame_for(&self, node: InspectorNode) -> Option<Frame> {
        let stack = self.inner.frames.read().await;
        match node.frame() {
            Some(id) => stack.get(id).cloned(),
            None => stack.active().cloned(),
        }
    }

    /// Evaluate in the active frame (global context when running).
    pub async fn evaluate(&self, expression: &str) -> Result<Variable> {
        self.ready().await?;
        let frame = self.active_frame().await;
        self.inner.backend.evaluate(expression, frame.as_ref()).await
    }

    /// Add a watch expression and evaluate it when stopped.
    pub async fn add_watch(&self, expression: &str) -> Result<Watch> {
        if expression.trim().is_empty() {
            return Err(Error::invalid_state("empty watch expression"));
        }
        let id = self.inner.watches.lock().await.add(expression);
        if *self.inner.state.read().await == SessionState::Stopped {
            let frame = self.active_frame().await;
            let value = self.evaluate_watch(expression.trim(), frame.as_ref()).await;
            self.inner.watches.lock().await.set_value(id, value);
        }
        let (watch, snapshot) = {
            let watches = self.inner.watches.lock().await;
            (watches.get(id).cloned(), watches.snapshot())
        };
        self.publish(SessionEvent::WatchesChanged(snapshot));
        watch.ok_or_else(|| Error::invalid_state("watch vanished"))
    }

    pub async fn remove_watch(&self, id: u64) -> bool {
        let (removed, snapshot) = {
            let mut watches = self.inner.watches.lock().await;
            (watches.remove(id).is_some(), watches.snapshot())
        };
        if removed {
            self.publish(SessionEvent::WatchesChanged(snapshot));
        }
        removed
    }

    async fn refresh_watches(&self) {
        let expressions = self.inner.watches.lock().await.expressions();
        if expressions.is_empty() {
            return;
        }
        let frame = self.active_frame().await;
        let mut values = Vec::with_capacity(expressions.len());
        for (id, expression) in expressions {
            values.push((id, self.evaluate_watch(&expression, frame.as_ref()).await));
        }
        let snapshot = {
            let mut watches = self.inner.watches.lock().await;
            for (id, value) in values {
                watches.set_value(id, value);
            }
            watches.snapshot()
        };
        self.publish(SessionEvent::WatchesChanged(snapshot));
    }

    async fn evaluate_watch(&self, expression: &str, frame: Option<&Frame>) -> Variable {
        match self.inner.backend.evaluate(expression, frame).await {
            Ok(value) => value,
            Err(e) => Variable::failed(expression, e.to_string()),
        }
    }

    // ========================================================================
    // Backend events
    // ========================================================================

    async fn spawn_event_listener(&self, mut events: mpsc::Receiver<BackendEvent>) {
        self.stop_listener().await;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            debug!("Session event listener started");
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => {
                        debug!("Session event listener received shutdown");
                        break;
                    }

                    event = events.recv() => {
                        let Some(event) = event else {
                            debug!("Backend event channel closed");
                            break;
                        };
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        Session { inner }.handle_event(event).await;
                    }
                }
            }
            debug!("Session event listener stopped");
        });

        *self.inner.listener.lock().await = Some(Listener {
            handle,
            shutdown_tx,
        });
    }

    async fn stop_listener(&self) {
        if let Some(listener) = self.inner.listener.lock().await.take() {
            let _ = listener.shutdown_tx.send(true);
            // a listener stopping itself is still inside handle_event
            drop(listener.handle);
        }
    }

    async fn handle_event(&self, event: BackendEvent) {
        debug!(?event, "Backend event");
        match event {
            BackendEvent::StateChange { running: true } => self.mark_running().await,
            // the details of a stop come with Break, Exception or Suspend
            BackendEvent::StateChange { running: false } => {}
            BackendEvent::Break { reason, .. } => self.on_stop(reason, None).await,
            BackendEvent::Exception { message, .. } => {
                self.on_stop(StopReason::Exception, Some(message)).await
            }
            BackendEvent::Suspend { .. } => self.on_stop(StopReason::Pause, None).await,
            BackendEvent::FrameActivate { index } => {
                if let Err(e) = self.select_frame(index).await {
                    self.report(e).await;
                }
            }
            BackendEvent::Sources(sources) => self.publish(SessionEvent::Sources(sources)),
            BackendEvent::SourceCompiled(source) => {
                self.publish(SessionEvent::SourceCompiled(source))
            }
            BackendEvent::BreakpointUpdate(bp) => {
                {
                    let mut book = self.inner.book.lock().await;
                    let merged = book.apply_resolution(&bp);
                    if !merged.is_empty() {
                        debug!(merged = merged.len(), "Merged breakpoints at one location");
                    }
                    self.check_bounds(&mut book, bp.resolved_path());
                }
                self.breakpoints_changed().await;
            }
            BackendEvent::BreakpointRemoved { id } => {
                let removed = self.inner.book.lock().await.remove_by_id(id);
                if removed.is_some() {
                    self.breakpoints_changed().await;
                }
            }
            BackendEvent::Output { category, text } => {
                self.publish(SessionEvent::Output { category, text })
            }
            BackendEvent::ConnectionLost { reason } => self.on_connection_lost(reason).await,
            BackendEvent::Detached { reason } => {
                info!(%reason, "Backend detached");
                self.reset(&reason.to_string(), true).await;
            }
        }
    }

    /// A stop: fetch the stack, apply frame continuity, activate frame 0.
    async fn on_stop(&self, reason: StopReason, message: Option<String>) {
        {
            let mut state = self.inner.state.write().await;
            if *state == SessionState::Disconnected || *state == SessionState::Detaching {
                return;
            }
            let changed = *state != SessionState::Stopped;
            *state = SessionState::Stopped;
            drop(state);
            if changed {
                self.publish(SessionEvent::StateChanged(SessionState::Stopped));
            }
        }

        let hidden = self.inner.book.lock().await.take_hidden();
        for bp in hidden.iter().filter(|bp| bp.id.is_some()) {
            if let Err(e) = self.inner.backend.clear_breakpoint(bp).await {
                debug!("Could not clear run-to breakpoint: {}", e);
            }
        }

        let fresh = match self.inner.backend.get_frames().await {
            Ok(frames) => frames,
            Err(e) => {
                self.report(e).await;
                Vec::new()
            }
        };
        self.inner.scopes.clear();
        self.inner.variables.clear();
        let (frames, update) = {
            let mut stack = self.inner.frames.write().await;
            let update = stack.replace(fresh);
            (stack.frames().to_vec(), update)
        };
        debug!(
            frames = frames.len(),
            continued = update.continued,
            dropped = update.dropped.len(),
            "Frames replaced"
        );

        self.publish(SessionEvent::Stopped {
            reason,
            message,
            frames: frames.clone(),
        });
        if !frames.is_empty() {
            self.activate_frame().await;
        }
    }

    async fn mark_running(&self) {
        {
            let mut state = self.inner.state.write().await;
            if *state != SessionState::Stopped {
                return;
            }
            *state = SessionState::Running;
        }
        self.inner.frames.write().await.retire();
        self.inner.scopes.clear();
        self.inner.variables.clear();
        self.clear_marks().await;
        self.publish(SessionEvent::StateChanged(SessionState::Running));
    }

    async fn on_connection_lost(&self, reason: String) {
        if self.inner.away.load(Ordering::SeqCst) {
            self.hold_for_host(reason);
            return;
        }
        warn!(%reason, "Connection lost");
        self.reset(&format!("connection lost: {}", reason), true)
            .await;
    }

    /// Hold the session until the host returns. Requests failed by the
    /// dropped link can get here ahead of the `ConnectionLost` event.
    fn hold_for_host(&self, reason: String) {
        self.inner.gate.send_replace(false);
        if self.inner.lost_while_away.swap(true, Ordering::SeqCst) {
            debug!(%reason, "Already suspended");
            return;
        }
        info!(%reason, "Connection lost while away; waiting for the host");
        self.publish(SessionEvent::ConnectionSuspended { reason });
    }

    async fn clear_marks(&self) {
        let mut marked = self.inner.marked.lock().await;
        for path in std::mem::take(&mut *marked) {
            self.inner.decorations.clear_marks(&path);
        }
    }

    /// Route an error by its disposition.
    async fn report(&self, error: Error) {
        if error.is_session_end() && self.inner.away.load(Ordering::SeqCst) {
            self.hold_for_host(error.to_string());
            return;
        }
        match error.disposition() {
            ErrorDisposition::Recoverable => warn!("{}", error),
            ErrorDisposition::UserVisible => {
                warn!("{}", error);
                self.publish(SessionEvent::Error {
                    message: error.to_string(),
                });
            }
            ErrorDisposition::Fatal => self.reset(&error.to_string(), true).await,
        }
    }

    /// Tear down all session state, then notify observers. With `release`
    /// the backend is detached as well.
    async fn reset(&self, reason: &str, release: bool) {
        {
            let mut state = self.inner.state.write().await;
            if *state == SessionState::Disconnected {
                return;
            }
            *state = SessionState::Disconnected;
        }
        self.stop_listener().await;
        self.inner.gate.send_replace(false);
        self.inner.lost_while_away.store(false, Ordering::SeqCst);
        if release {
            if let Err(e) = self.inner.backend.detach().await {
                debug!("Backend release after session end: {}", e);
            }
        }

        self.inner.frames.write().await.clear();
        self.inner.scopes.clear();
        self.inner.variables.clear();
        self.inner.watches.lock().await.clear_values();
        self.clear_marks().await;
        let (visible, persisted) = {
            let mut book = self.inner.book.lock().await;
            book.reset_session();
            (book.visible(), book.persisted())
        };
        self.inner.persist.schedule(persisted).await;
        self.inner.persist.flush().await;

        info!(reason, "Session ended");
        self.publish(SessionEvent::StateChanged(SessionState::Disconnected));
        self.publish(SessionEvent::BreakpointsChanged(visible));
        let watches = self.inner.watches.lock().await.snapshot();
        self.publish(SessionEvent::WatchesChanged(watches));
        self.publish(SessionEvent::Detached {
            reason: reason.to_string(),
        });
    }

    fn publish(&self, event: SessionEvent) {
        self.inner.observers.publish(event);
    }
}

fn no_breakpoint(path: &str, line: u32) -> Error {
    Error::invalid_state(format!("no breakpoint at {}:{}", path, line + 1))
}
