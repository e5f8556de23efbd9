//! Lazily expanded inspector nodes
//!
//! Expanding a node with no cached children runs one backend fetch.
//! Concurrent expansions of the same node await that fetch instead of
//! issuing their own. Each [`ExpansionCache::clear`] starts a new
//! generation; fetches from an older generation still answer their
//! callers but are not cached.

use cairn_core::{Error, FrameId, InspectorNode, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use tracing::trace;

type Fetch<V> = Shared<BoxFuture<'static, Result<V>>>;

enum Entry<V: Clone> {
    Loading { generation: u64, fetch: Fetch<V> },
    Ready(V),
}

struct State<V: Clone> {
    generation: u64,
    entries: HashMap<InspectorNode, Entry<V>>,
}

pub struct ExpansionCache<V: Clone> {
    state: Mutex<State<V>>,
}

impl<V: Clone> Default for ExpansionCache<V> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                generation: 0,
                entries: HashMap::new(),
            }),
        }
    }
}

impl<V> ExpansionCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Children of `node`, running `fetch` only when nothing is cached or
    /// in flight. Failed fetches are not cached.
    pub async fn expand<F, Fut>(&self, node: InspectorNode, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (generation, shared) = {
            let mut state = self.lock()?;
            let generation = state.generation;
            match state.entries.get(&node) {
                Some(Entry::Ready(value)) => return Ok(value.clone()),
                Some(Entry::Loading { fetch, .. }) => {
                    trace!(?node, "Joining in-flight expansion");
                    (generation, fetch.clone())
                }
                None => {
                    let shared = fetch().boxed().shared();
                    state.entries.insert(
                        node,
                        Entry::Loading {
                            generation,
                            fetch: shared.clone(),
                        },
                    );
                    (generation, shared)
                }
            }
        };

        let result = shared.await;

        let mut state = self.lock()?;
        let current = matches!(
            state.entries.get(&node),
            Some(Entry::Loading { generation: g, .. }) if *g == generation
        );
        if current {
            match &result {
                Ok(value) => {
                    state.entries.insert(node, Entry::Ready(value.clone()));
                }
                Err(_) => {
                    state.entries.remove(&node);
                }
            }
        }
        result
    }

    pub fn get(&self, node: &InspectorNode) -> Option<V> {
        let state = self.state.lock().ok()?;
        match state.entries.get(node) {
            Some(Entry::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Overwrite the cached children of `node`.
    pub fn set(&self, node: InspectorNode, value: V) {
        if let Ok(mut state) = self.state.lock() {
            state.entries.insert(node, Entry::Ready(value));
        }
    }

    pub fn invalidate(&self, node: &InspectorNode) {
        if let Ok(mut state) = self.state.lock() {
            state.entries.remove(node);
        }
    }

    /// Drop the frame and scope nodes of `frames`.
    pub fn invalidate_frames(&self, frames: &[FrameId]) {
        if frames.is_empty() {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            state
                .entries
                .retain(|node, _| node.frame().map_or(true, |f| !frames.contains(&f)));
        }
    }

    /// Drop everything and start a new generation.
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.generation += 1;
            state.entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State<V>>> {
        self.state
            .lock()
            .map_err(|_| Error::invalid_state("expansion cache poisoned"))
    }
}
