#![expect(
    clippy::module_name_repetitions,
    reason = "EventDispatcher is the public name consumers look for"
)]

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::types::{EventKind, StreamEvent};

/// Callback invoked for every published event of the category it subscribed to.
pub type Listener = Arc<dyn Fn(&StreamEvent) + Send + Sync + 'static>;

/// Handle returned by [`EventDispatcher::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Publish/subscribe registry mapping each [`EventKind`] to its listeners.
///
/// Listeners run synchronously on the publishing thread, in subscription order.
/// A listener that panics is logged and skipped; the remaining listeners still run.
pub struct EventDispatcher {
    listeners: DashMap<EventKind, Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<_> = self
            .listeners
            .iter()
            .map(|entry| (*entry.key(), entry.value().len()))
            .collect();
        f.debug_struct("EventDispatcher")
            .field("listeners", &counts)
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove one listener, or every listener of `kind` when `id` is `None`.
    ///
    /// Returns how many listeners were removed.
    pub fn unsubscribe(&self, kind: EventKind, id: Option<ListenerId>) -> usize {
        let Some(id) = id else {
            return self
                .listeners
                .remove(&kind)
                .map_or(0, |(_, listeners)| listeners.len());
        };

        match self.listeners.entry(kind) {
            Entry::Occupied(mut entry) => {
                let listeners = entry.get_mut();
                let before = listeners.len();
                listeners.retain(|(listener_id, _)| *listener_id != id);
                let removed = before - listeners.len();
                if listeners.is_empty() {
                    entry.remove();
                }
                removed
            }
            Entry::Vacant(_) => 0,
        }
    }

    /// Invoke every listener subscribed to `event.kind()`.
    ///
    /// Returns the number of listeners that completed without panicking.
    pub fn publish(&self, event: &StreamEvent) -> usize {
        let kind = event.kind();
        // Snapshot so listeners can (un)subscribe without deadlocking on the shard lock.
        let listeners: Vec<Listener> = self
            .listeners
            .get(&kind)
            .map(|entry| entry.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    #[cfg(feature = "tracing")]
                    tracing::error!(%kind, %reason, "SSE listener panicked");
                    #[cfg(not(feature = "tracing"))]
                    let _ = (&kind, &reason);
                }
            }
        }

        delivered
    }

    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, |entry| entry.len())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
