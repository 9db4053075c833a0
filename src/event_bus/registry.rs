//! Named listener registry with synchronous in-order dispatch.
//!
//! Unlike a broadcast channel, dispatch here is a plain function call:
//! the dispatching step must observe listener side effects (a `load`
//! override, a `set` context rebind) before it continues. Listeners are
//! keyed by event name; unknown names are accepted silently so a
//! listener can be registered before the engine ever emits that event.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::event::{EventEnvelope, SchedulerEvent};

/// A registered event listener.
///
/// Identity for removal is the `Arc` allocation itself
/// ([`Arc::ptr_eq`]); keep a clone of the handle you registered.
pub type Listener = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: FxHashMap<String, Vec<Listener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` under `name`. Names the engine never emits
    /// are accepted silently.
    pub fn add_event_listener(&mut self, name: impl Into<String>, listener: Listener) {
        self.listeners.entry(name.into()).or_default().push(listener);
    }

    /// Remove a previously registered listener. Removing a listener
    /// that was never added, or from an unknown event, is a no-op.
    pub fn remove_event_listener(&mut self, name: &str, listener: &Listener) {
        if let Some(registered) = self.listeners.get_mut(name) {
            registered.retain(|l| !Arc::ptr_eq(l, listener));
        }
    }

    /// Wrap `event` in an envelope and invoke each listener registered
    /// under its name, synchronously, in registration order.
    pub fn dispatch(&self, event: SchedulerEvent) -> EventEnvelope {
        let envelope = EventEnvelope::new(event);
        match &envelope.event {
            SchedulerEvent::Warning { message, url } => {
                tracing::warn!(target: "fluxgraph::events", url = %url, "{message}");
            }
            SchedulerEvent::Error { err } => {
                tracing::error!(
                    target: "fluxgraph::events",
                    vector_id = ?err.vector_id,
                    graph_id = ?err.graph_id,
                    "{}",
                    err.message
                );
            }
            other => {
                tracing::trace!(target: "fluxgraph::events", event = other.name(), "{envelope}");
            }
        }
        if let Some(registered) = self.listeners.get(envelope.name()) {
            // Snapshot so a listener vector reallocation cannot bite us.
            let registered: Vec<Listener> = registered.clone();
            for listener in &registered {
                listener(&envelope);
            }
        }
        envelope
    }

    /// Number of listeners currently registered under `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.get(name).map_or(0, Vec::len)
    }
}
