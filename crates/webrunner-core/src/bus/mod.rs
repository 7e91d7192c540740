//! Progress event bus
//!
//! Typed fan-out of [`ProgressEvent`]s to synchronous subscribers, with a
//! bounded ring buffer of recent events for diagnostics and a broadcast
//! feed for async consumers. Callbacks are invoked without holding the
//! subscriber lock, and a panicking listener never prevents the others from
//! running.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::types::{ProgressEvent, ProgressEventKind};

const DEFAULT_HISTORY_CAPACITY: usize = 100;
const BROADCAST_CAPACITY: usize = 1024;

/// Callback invoked synchronously on emission.
pub type EventCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Handle returned by subscribe; pass back to [`ProgressBus::unsubscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: u64,
    kind: Option<ProgressEventKind>,
}

struct BusInner {
    next_id: u64,
    by_kind: HashMap<ProgressEventKind, Vec<(u64, EventCallback)>>,
    wildcard: Vec<(u64, EventCallback)>,
    history: VecDeque<ProgressEvent>,
    capacity: usize,
}

/// In-process progress event bus.
pub struct ProgressBus {
    inner: Mutex<BusInner>,
    tx: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    /// Create a bus with the default history capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Create a bus keeping the last `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Mutex::new(BusInner {
                next_id: 0,
                by_kind: HashMap::new(),
                wildcard: Vec::new(),
                history: VecDeque::with_capacity(capacity),
                capacity,
            }),
            tx,
        }
    }

    /// Subscribe to one event kind.
    pub fn subscribe(
        &self,
        kind: ProgressEventKind,
        callback: impl Fn(&ProgressEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .by_kind
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        Subscription {
            id,
            kind: Some(kind),
        }
    }

    /// Subscribe to every event kind.
    pub fn subscribe_any(
        &self,
        callback: impl Fn(&ProgressEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        inner.next_id += 1;
        let id = inner.next_id;
        inner.wildcard.push((id, Arc::new(callback)));
        Subscription { id, kind: None }
    }

    /// Remove a subscription; safe to call twice.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        match subscription.kind {
            Some(kind) => {
                if let Some(list) = inner.by_kind.get_mut(&kind) {
                    list.retain(|(id, _)| *id != subscription.id);
                }
            }
            None => inner.wildcard.retain(|(id, _)| *id != subscription.id),
        }
    }

    /// Emit one event: record it, then dispatch synchronously to kind
    /// subscribers first and wildcard subscribers second, in subscription
    /// order. The subscriber list is snapshotted so callbacks run without
    /// the lock held.
    pub fn emit(&self, event: ProgressEvent) {
        let callbacks: Vec<EventCallback> = {
            let mut inner = self.inner.lock().expect("bus lock poisoned");
            if inner.history.len() == inner.capacity {
                inner.history.pop_front();
            }
            inner.history.push_back(event.clone());

            let mut snapshot = Vec::new();
            if let Some(list) = inner.by_kind.get(&event.kind) {
                snapshot.extend(list.iter().map(|(_, cb)| cb.clone()));
            }
            snapshot.extend(inner.wildcard.iter().map(|(_, cb)| cb.clone()));
            snapshot
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                tracing::warn!(
                    kind = %event.kind,
                    task_id = %event.task_id,
                    "progress listener panicked; continuing with remaining listeners"
                );
            }
        }

        // Broadcast is best-effort; no receivers is not an error.
        let _ = self.tx.send(event);
    }

    /// Async feed of emitted events.
    pub fn subscribe_channel(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// The most recent events, oldest first, up to `limit`.
    pub fn recent(&self, limit: usize) -> Vec<ProgressEvent> {
        let inner = self.inner.lock().expect("bus lock poisoned");
        let skip = inner.history.len().saturating_sub(limit);
        inner.history.iter().skip(skip).cloned().collect()
    }
}
