//! Lifecycle event types dispatched around every step of a traversal.
//!
//! Every dispatched event is wrapped in an [`EventEnvelope`] carrying an
//! RFC-4122 v4 id and a UTC timestamp. The payload is a typed
//! [`SchedulerEvent`]; two payloads carry capability cells that let a
//! listener feed a value back into the dispatching step: `load` exposes
//! [`ValueCell`] (satisfy an artifact load without the network) and
//! `set` exposes [`ContextCell`] (rebind the handler's self-reference).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::artifact::Connector;

/// Event names used for listener registration.
pub mod names {
    pub const BEGIN: &str = "begin";
    pub const END: &str = "end";
    pub const BEGIN_EDGE: &str = "beginedge";
    pub const END_EDGE: &str = "endedge";
    pub const BEGIN_CONNECTOR: &str = "beginconnector";
    pub const END_CONNECTOR: &str = "endconnector";
    pub const SET: &str = "set";
    pub const AFTER_SET: &str = "afterSet";
    pub const LOAD: &str = "load";
    pub const WARNING: &str = "warning";
    pub const ERROR: &str = "error";
}

/// A writable slot a `load` listener uses to satisfy the load without
/// the network. Last write wins; the loader takes the value once the
/// dispatch returns.
#[derive(Clone, Debug, Default)]
pub struct ValueCell {
    slot: Arc<Mutex<Option<Value>>>,
}

impl ValueCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: Value) {
        *self.slot.lock() = Some(value);
    }

    pub fn take(&self) -> Option<Value> {
        self.slot.lock().take()
    }
}

/// A writable slot a `set` listener uses to rebind the context object
/// the handler sees as `context`.
#[derive(Clone, Debug, Default)]
pub struct ContextCell {
    slot: Arc<Mutex<Option<Value>>>,
}

impl ContextCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, context: Value) {
        *self.slot.lock() = Some(context);
    }

    pub fn take(&self) -> Option<Value> {
        self.slot.lock().take()
    }
}

/// The vector-facing view carried by `set`/`afterSet`.
#[derive(Clone, Debug, PartialEq)]
pub struct VectorInterface {
    pub vector_id: String,
    pub graph_id: String,
    pub field: String,
    pub value: Value,
}

/// Context attached to an `error` event.
///
/// `message` is always populated; the ids locate the failure when the
/// error surfaced inside a traversal.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ErrorInfo {
    pub message: String,
    pub vector_id: Option<String>,
    pub graph_id: Option<String>,
    pub field: Option<String>,
    pub url: Option<String>,
}

impl ErrorInfo {
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_vector(mut self, vector_id: impl Into<String>) -> Self {
        self.vector_id = Some(vector_id.into());
        self
    }

    pub fn with_graph(mut self, graph_id: impl Into<String>) -> Self {
        self.graph_id = Some(graph_id.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Typed payload of a lifecycle event.
#[derive(Clone, Debug)]
pub enum SchedulerEvent {
    /// Scheduler entry: `url(...)` was called.
    Begin { url: String },
    /// The top-level chain for a `url(...)` call settled.
    End { url: String, duration: Duration },
    /// A vector is about to execute.
    BeginEdge {
        vector_id: String,
        graph_id: String,
        field: String,
        value: Value,
    },
    /// A vector execution settled, success or failure.
    EndEdge {
        vector_id: String,
        graph_id: String,
        field: String,
        value: Value,
        duration: Duration,
    },
    /// An output-edge write is about to fan out to one connector.
    BeginConnector { connector: Connector, value: Value },
    /// That connector's downstream traversal settled.
    EndConnector {
        connector: Connector,
        value: Value,
        duration: Duration,
    },
    /// Dispatched just before the user handler runs.
    Set {
        interface: VectorInterface,
        set_context: ContextCell,
    },
    /// Dispatched after the handler settled.
    AfterSet {
        interface: VectorInterface,
        return_value: Value,
        err: Option<String>,
    },
    /// The loader is about to resolve a URL.
    Load { url: String, set_value: ValueCell },
    /// Non-fatal condition; the traversal continues.
    Warning { message: String, url: String },
    /// A failure surfaced during traversal.
    Error { err: ErrorInfo },
}

impl SchedulerEvent {
    /// The registration name this payload dispatches under.
    pub fn name(&self) -> &'static str {
        match self {
            SchedulerEvent::Begin { .. } => names::BEGIN,
            SchedulerEvent::End { .. } => names::END,
            SchedulerEvent::BeginEdge { .. } => names::BEGIN_EDGE,
            SchedulerEvent::EndEdge { .. } => names::END_EDGE,
            SchedulerEvent::BeginConnector { .. } => names::BEGIN_CONNECTOR,
            SchedulerEvent::EndConnector { .. } => names::END_CONNECTOR,
            SchedulerEvent::Set { .. } => names::SET,
            SchedulerEvent::AfterSet { .. } => names::AFTER_SET,
            SchedulerEvent::Load { .. } => names::LOAD,
            SchedulerEvent::Warning { .. } => names::WARNING,
            SchedulerEvent::Error { .. } => names::ERROR,
        }
    }
}

/// A dispatched event: payload plus id and timestamp.
#[derive(Clone, Debug)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub time: DateTime<Utc>,
    pub event: SchedulerEvent,
}

impl EventEnvelope {
    pub fn new(event: SchedulerEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            time: Utc::now(),
            event,
        }
    }

    pub fn name(&self) -> &'static str {
        self.event.name()
    }

    /// Export the envelope as a structured JSON value.
    ///
    /// Capability cells are not exported; durations are milliseconds.
    pub fn to_json_value(&self) -> Value {
        let payload = match &self.event {
            SchedulerEvent::Begin { url } => json!({ "url": url }),
            SchedulerEvent::End { url, duration } => json!({
                "url": url,
                "duration": duration.as_millis() as u64,
            }),
            SchedulerEvent::BeginEdge {
                vector_id,
                graph_id,
                field,
                value,
            } => json!({
                "vectorId": vector_id,
                "graphId": graph_id,
                "field": field,
                "value": value,
            }),
            SchedulerEvent::EndEdge {
                vector_id,
                graph_id,
                field,
                value,
                duration,
            } => json!({
                "vectorId": vector_id,
                "graphId": graph_id,
                "field": field,
                "value": value,
                "duration": duration.as_millis() as u64,
            }),
            SchedulerEvent::BeginConnector { connector, value } => json!({
                "connector": serde_json::to_value(connector).unwrap_or(Value::Null),
                "value": value,
            }),
            SchedulerEvent::EndConnector {
                connector,
                value,
                duration,
            } => json!({
                "connector": serde_json::to_value(connector).unwrap_or(Value::Null),
                "value": value,
                "duration": duration.as_millis() as u64,
            }),
            SchedulerEvent::Set { interface, .. } => json!({
                "vectorId": interface.vector_id,
                "graphId": interface.graph_id,
                "field": interface.field,
                "value": interface.value,
            }),
            SchedulerEvent::AfterSet {
                interface,
                return_value,
                err,
            } => json!({
                "vectorId": interface.vector_id,
                "graphId": interface.graph_id,
                "field": interface.field,
                "return": return_value,
                "err": err,
            }),
            SchedulerEvent::Load { url, .. } => json!({ "url": url }),
            SchedulerEvent::Warning { message, url } => json!({
                "message": message,
                "url": url,
            }),
            SchedulerEvent::Error { err } => json!({
                "message": err.message,
                "vectorId": err.vector_id,
                "graphId": err.graph_id,
                "field": err.field,
                "url": err.url,
            }),
        };
        json!({
            "id": self.id.to_string(),
            "time": self.time.to_rfc3339(),
            "event": self.name(),
            "payload": payload,
        })
    }
}

impl fmt::Display for EventEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.event {
            SchedulerEvent::Begin { url } => write!(f, "[begin] {url}"),
            SchedulerEvent::End { url, duration } => {
                write!(f, "[end] {url} ({}ms)", duration.as_millis())
            }
            SchedulerEvent::BeginEdge {
                vector_id, field, ..
            } => write!(f, "[beginedge] {vector_id}.{field}"),
            SchedulerEvent::EndEdge {
                vector_id,
                field,
                duration,
                ..
            } => write!(
                f,
                "[endedge] {vector_id}.{field} ({}ms)",
                duration.as_millis()
            ),
            SchedulerEvent::BeginConnector { connector, .. } => {
                write!(
                    f,
                    "[beginconnector] -> {}.{}",
                    connector.vector_id, connector.field
                )
            }
            SchedulerEvent::EndConnector { connector, .. } => {
                write!(
                    f,
                    "[endconnector] -> {}.{}",
                    connector.vector_id, connector.field
                )
            }
            SchedulerEvent::Set { interface, .. } => {
                write!(f, "[set] {}.{}", interface.vector_id, interface.field)
            }
            SchedulerEvent::AfterSet { interface, err, .. } => match err {
                Some(err) => write!(f, "[afterSet] {} err: {err}", interface.vector_id),
                None => write!(f, "[afterSet] {}", interface.vector_id),
            },
            SchedulerEvent::Load { url, .. } => write!(f, "[load] {url}"),
            SchedulerEvent::Warning { message, url } => {
                write!(f, "[warning] {message} ({url})")
            }
            SchedulerEvent::Error { err } => write!(f, "[error] {}", err.message),
        }
    }
}
