//! Script-facing proxy objects handed to set handlers.
//!
//! [`EdgesProxy`] is the write side-effect object: assigning through it
//! records an edge write, and the surrounding invocation replays the
//! recorded writes as connector fan-out after the handler settles.
//! [`SchedulerProxy`] queues re-entrant `url` traversals the same way.
//! Both are cheap clones sharing their queues, because the handler
//! engine passes custom types by value.

use std::sync::Arc;

use parking_lot::Mutex;
use rhai::Dynamic;
use serde_json::Value;

/// One recorded write to an output edge, in author control-flow order.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeWrite {
    pub field: String,
    pub value: Value,
}

/// One queued re-entrant traversal request.
///
/// `scope` names a host vector whose materialized linked-graph instance
/// the URL search is confined to; `None` searches the base graph.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteRequest {
    pub pattern: String,
    pub value: Value,
    pub field: String,
    pub scope: Option<String>,
}

fn dynamic_to_value(dynamic: &Dynamic) -> Value {
    match rhai::serde::from_dynamic::<Value>(dynamic) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(
                target: "fluxgraph::handler",
                "edge value is not serializable, writing null: {err}"
            );
            Value::Null
        }
    }
}

/// The `edges` object a handler writes outputs through.
///
/// Supports both `edges.write("out", v)` and `edges["out"] = v`. Writing
/// a field the vector does not declare is recorded too; the executor
/// emits a warning when the fan-out finds no matching edge.
#[derive(Clone, Debug, Default)]
pub struct EdgesProxy {
    writes: Arc<Mutex<Vec<EdgeWrite>>>,
}

impl EdgesProxy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write. Called from script through the registered
    /// `write` function and index setter.
    pub fn write(&mut self, field: &str, value: Dynamic) {
        self.writes.lock().push(EdgeWrite {
            field: field.to_string(),
            value: dynamic_to_value(&value),
        });
    }

    /// Drain the recorded writes in author order.
    pub fn take_writes(&self) -> Vec<EdgeWrite> {
        std::mem::take(&mut *self.writes.lock())
    }
}

/// The `scheduler` object a handler routes through.
///
/// `scheduler.url(pattern, value)` / `scheduler.url(pattern, value,
/// field)` queue a traversal that runs once the current handler has
/// settled and its edge writes have fanned out. The four-argument form
/// `scheduler.url(pattern, value, field, scopeVector)` confines the URL
/// search to the named host vector's linked-graph instance.
#[derive(Clone, Debug, Default)]
pub struct SchedulerProxy {
    routes: Arc<Mutex<Vec<RouteRequest>>>,
}

impl SchedulerProxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(&mut self, pattern: &str, value: Dynamic, field: &str, scope: Option<&str>) {
        self.routes.lock().push(RouteRequest {
            pattern: pattern.to_string(),
            value: dynamic_to_value(&value),
            field: field.to_string(),
            scope: scope.map(str::to_string),
        });
    }

    /// Drain the queued traversal requests in author order.
    pub fn take_routes(&self) -> Vec<RouteRequest> {
        std::mem::take(&mut *self.routes.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_are_recorded_in_order_and_drained() {
        let mut proxy = EdgesProxy::new();
        let mut alias = proxy.clone();
        proxy.write("out", Dynamic::from(1_i64));
        alias.write("other", Dynamic::from("x"));
        proxy.write("out", Dynamic::from(2_i64));

        let writes = proxy.take_writes();
        assert_eq!(
            writes,
            vec![
                EdgeWrite {
                    field: "out".into(),
                    value: json!(1)
                },
                EdgeWrite {
                    field: "other".into(),
                    value: json!("x")
                },
                EdgeWrite {
                    field: "out".into(),
                    value: json!(2)
                },
            ]
        );
        assert!(proxy.take_writes().is_empty());
    }

    #[test]
    fn routes_share_a_queue_across_clones() {
        let mut proxy = SchedulerProxy::new();
        let mut alias = proxy.clone();
        proxy.url("index", Dynamic::from(true), "input", None);
        alias.url("other", Dynamic::UNIT, "", Some("host"));

        let routes = proxy.take_routes();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].pattern, "index");
        assert_eq!(routes[0].value, json!(true));
        assert_eq!(routes[0].scope, None);
        assert_eq!(routes[1].field, "");
        assert_eq!(routes[1].scope, Some("host".to_string()));
    }
}
