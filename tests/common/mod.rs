#![allow(dead_code)]

//! Shared fixtures for the integration suite: graph builders, an
//! event-capturing listener, and a handler print capture.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value, json};

use fluxgraph::artifact::{Connector, Edge, Graph, Vector, VectorTemplate};
use fluxgraph::event_bus::{EventEnvelope, Listener, SchedulerEvent, names};
use fluxgraph::handler::PrintHook;
use fluxgraph::scheduler::Scheduler;

/// Captures every envelope it sees; register via [`EventLog::listener`].
#[derive(Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<EventEnvelope>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(&self) -> Listener {
        let entries = self.entries.clone();
        Arc::new(move |envelope: &EventEnvelope| {
            entries.lock().push(envelope.clone());
        })
    }

    pub fn envelopes(&self) -> Vec<EventEnvelope> {
        self.entries.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.lock().iter().map(|e| e.name()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.entries.lock().iter().filter(|e| e.name() == name).count()
    }

    pub fn errors(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter_map(|e| match &e.event {
                SchedulerEvent::Error { err } => Some(err.message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter_map(|e| match &e.event {
                SchedulerEvent::Warning { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn after_set_returns(&self) -> Vec<Value> {
        self.entries
            .lock()
            .iter()
            .filter_map(|e| match &e.event {
                SchedulerEvent::AfterSet { return_value, .. } => Some(return_value.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn after_set_errors(&self) -> Vec<Option<String>> {
        self.entries
            .lock()
            .iter()
            .filter_map(|e| match &e.event {
                SchedulerEvent::AfterSet { err, .. } => Some(err.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Register one capture listener for every lifecycle event name.
pub fn observe_all(scheduler: &mut Scheduler, log: &EventLog) {
    for name in [
        names::BEGIN,
        names::END,
        names::BEGIN_EDGE,
        names::END_EDGE,
        names::BEGIN_CONNECTOR,
        names::END_CONNECTOR,
        names::SET,
        names::AFTER_SET,
        names::LOAD,
        names::WARNING,
        names::ERROR,
    ] {
        scheduler.add_event_listener(name, log.listener());
    }
}

/// A print hook that collects handler output.
pub fn print_capture() -> (PrintHook, Arc<Mutex<Vec<String>>>) {
    let captured: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = captured.clone();
    let hook: PrintHook = Arc::new(move |text: &str| {
        sink.lock().push(text.to_string());
    });
    (hook, captured)
}

/// A vector with a handler and no edges.
pub fn vector(id: &str, graph_id: &str, url: &str, set: &str) -> Vector {
    Vector {
        id: id.to_string(),
        graph_id: graph_id.to_string(),
        version: 0,
        url: url.to_string(),
        edges: Vec::new(),
        template: VectorTemplate::new(set),
        data: Value::Null,
        properties: json!({}),
        linked_vector: None,
        linked_graph: None,
    }
}

/// Attach an output edge to a vector.
pub fn with_edge(mut vector: Vector, field: &str, connectors: Vec<Connector>) -> Vector {
    vector.edges.push(Edge {
        field: field.to_string(),
        connectors,
    });
    vector
}

pub fn connector(id: &str, vector_id: &str, field: &str, graph_id: &str, version: u64) -> Connector {
    Connector {
        id: id.to_string(),
        vector_id: vector_id.to_string(),
        field: field.to_string(),
        graph_id: graph_id.to_string(),
        version,
    }
}

pub fn graph(id: &str, vectors: Vec<Vector>) -> Graph {
    Graph {
        id: id.to_string(),
        url: String::new(),
        version: 0,
        properties: json!({}),
        vectors,
    }
}
