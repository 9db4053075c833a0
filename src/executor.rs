//! Edge and vector execution.
//!
//! The edge executor is the envelope that brackets every vector
//! invocation with `beginedge`/`endedge`, top-level and recursive alike.
//! The vector executor inside it resolves linked artifacts (Step A/B),
//! builds the handler environment (Step C–E), runs the set handler, and
//! replays the handler's recorded edge writes as sequential connector
//! fan-out. Failures never propagate past a vector boundary: every
//! failure path dispatches an `error` (or `warning`) event and returns
//! cleanly.

use std::time::Instant;

use futures_util::future::BoxFuture;
use miette::Diagnostic;
use rhai::{Dynamic, Scope};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{Instrument, instrument};

use crate::artifact::{Graph, GraphKey, LinkedGraph, Vector};
use crate::event_bus::{ContextCell, ErrorInfo, SchedulerEvent, VectorInterface};
use crate::handler::{EdgeWrite, EdgesProxy, SchedulerProxy};
use crate::loader::{LoaderError, artifact_url};
use crate::scheduler::{GraphHandle, InstanceKey, LinkedInstance, Scheduler};

/// Error message dispatched for an empty template without a linked
/// graph.
pub const NO_TEMPLATE_MESSAGE: &str = "No template for set found.";

#[derive(Debug, Error, Diagnostic)]
pub(crate) enum ExecError {
    #[error(transparent)]
    #[diagnostic(code(fluxgraph::executor::load))]
    Loader(#[from] LoaderError),

    #[error("cannot find vector {vector_id} in graph {graph_id}.")]
    #[diagnostic(code(fluxgraph::executor::vector_missing))]
    VectorMissing {
        vector_id: String,
        graph_id: String,
    },

    #[error("graph working copy for {0:?} is not materialized")]
    #[diagnostic(code(fluxgraph::executor::graph_missing))]
    GraphMissing(GraphHandle),
}

/// Execute one vector invocation inside the `beginedge`/`endedge`
/// envelope. Never fails: a rejection from the vector executor is
/// converted into an `error` event before `endedge` fires.
pub(crate) fn execute_edge(
    sched: &mut Scheduler,
    handle: GraphHandle,
    vector_id: String,
    field: String,
    value: Value,
) -> BoxFuture<'_, ()> {
    // Not an `async fn`, so the span is attached to the boxed future
    // instead of an `#[instrument]` attribute.
    let span = tracing::debug_span!("execute_edge", vector_id = %vector_id, field = %field);
    Box::pin(async move {
        let started = Instant::now();
        let Some(graph) = sched.graph(&handle) else {
            sched.bus.dispatch(SchedulerEvent::Error {
                err: ErrorInfo::msg(ExecError::GraphMissing(handle.clone()).to_string())
                    .with_vector(&vector_id),
            });
            return;
        };
        let graph_id = graph.id.clone();
        let Some(vector) = graph.vector(&vector_id).cloned() else {
            sched.bus.dispatch(SchedulerEvent::Error {
                err: ErrorInfo::msg(
                    ExecError::VectorMissing {
                        vector_id: vector_id.clone(),
                        graph_id: graph_id.clone(),
                    }
                    .to_string(),
                )
                .with_vector(&vector_id)
                .with_graph(&graph_id),
            });
            return;
        };

        sched.bus.dispatch(SchedulerEvent::BeginEdge {
            vector_id: vector_id.clone(),
            graph_id: graph_id.clone(),
            field: field.clone(),
            value: value.clone(),
        });

        if let Err(err) = run_vector(sched, handle, vector, &field, value.clone()).await {
            sched.bus.dispatch(SchedulerEvent::Error {
                err: ErrorInfo::msg(err.to_string())
                    .with_vector(&vector_id)
                    .with_graph(&graph_id)
                    .with_field(&field),
            });
        }

        sched.bus.dispatch(SchedulerEvent::EndEdge {
            vector_id,
            graph_id,
            field,
            value,
            duration: started.elapsed(),
        });
    }
    .instrument(span))
}

/// Steps A–E plus fan-out for one vector invocation.
#[instrument(skip(sched, vector, value), err)]
async fn run_vector(
    sched: &mut Scheduler,
    handle: GraphHandle,
    vector: Vector,
    field: &str,
    value: Value,
) -> Result<(), ExecError> {
    let host_id = vector.id.clone();
    let mut effective = vector;
    let mut substituted = false;

    // Step A: linked vector resolution. The linked artifact substitutes
    // for the local vector; the host's data/properties win.
    if let Some(linked) = effective.linked_vector.clone() {
        if linked.loaded {
            if let Some(inner) = linked.vector {
                let mut inner = *inner;
                inner.data = effective.data.clone();
                inner.properties = effective.properties.clone();
                effective = inner;
                substituted = true;
            }
        } else {
            let url = artifact_url(&sched.vector_path, &linked.id, linked.version);
            match sched.vector_loader.load(&url, &sched.bus).await {
                Ok(loaded) => {
                    if let Some(graph) = sched.graph_mut(&handle)
                        && let Some(stored) = graph.vector_mut(&host_id)
                        && let Some(slot) = stored.linked_vector.as_mut()
                    {
                        slot.loaded = true;
                        slot.vector = Some(Box::new(loaded.clone()));
                    }
                    let mut inner = loaded;
                    inner.data = effective.data.clone();
                    inner.properties = effective.properties.clone();
                    effective = inner;
                    substituted = true;
                }
                Err(err) => {
                    // Resolution failure: continue with the local vector.
                    sched.bus.dispatch(SchedulerEvent::Error {
                        err: ErrorInfo::msg(err.to_string())
                            .with_vector(&host_id)
                            .with_url(url),
                    });
                }
            }
        }
    }

    // Step B: linked graph resolution, splicing, and input remap.
    let mut current = handle.clone();
    let mut current_field = field.to_string();
    let mut had_linked_graph = false;

    if let Some(linked) = effective.linked_graph.clone() {
        had_linked_graph = true;
        let host_graph = sched
            .graph(&handle)
            .ok_or_else(|| ExecError::GraphMissing(handle.clone()))?;
        let instance_key =
            InstanceKey::new(host_graph.id.clone(), host_graph.version, host_id.clone());

        if !sched.instances.contains_key(&instance_key) {
            let inner = resolve_linked_graph(sched, &host_id, &linked).await;
            if let Some(mut inner) = inner {
                splice_linked_graph(&mut inner, &effective, &linked);
                mark_linked_graph_loaded(sched, &handle, &host_id, substituted, &inner);
                sched.instances.insert(
                    instance_key.clone(),
                    LinkedInstance {
                        graph: inner,
                        parent: handle.clone(),
                    },
                );
            }
        }

        if sched.instances.contains_key(&instance_key)
            && let Some(target) = linked.fields.inputs.get(field)
        {
            let instance = GraphHandle::Instance(instance_key.clone());
            let inner_graph = sched
                .graph(&instance)
                .ok_or_else(|| ExecError::GraphMissing(instance.clone()))?;
            match inner_graph.vector(&target.id) {
                Some(inner_vector) => {
                    effective = inner_vector.clone();
                    current_field = target.field.clone();
                    current = instance;
                }
                None => {
                    return Err(ExecError::VectorMissing {
                        vector_id: target.id.clone(),
                        graph_id: inner_graph.id.clone(),
                    });
                }
            }
        }
    }

    // Step D: per-vector runtime cache, created on first execution.
    sched
        .vector_cache
        .entry(effective.id.clone())
        .or_insert_with(|| Value::Object(Default::default()));

    // Step E: handler environment and dispatch.
    if effective.template.is_empty() {
        if had_linked_graph {
            // The linked graph acts as a pass-through.
            return Ok(());
        }
        sched.bus.dispatch(SchedulerEvent::Error {
            err: ErrorInfo::msg(NO_TEMPLATE_MESSAGE)
                .with_vector(&effective.id)
                .with_field(&current_field),
        });
        return Ok(());
    }

    let current_graph_id = sched
        .graph(&current)
        .map(|g| g.id.clone())
        .unwrap_or_default();
    let interface = VectorInterface {
        vector_id: effective.id.clone(),
        graph_id: current_graph_id.clone(),
        field: current_field.clone(),
        value: value.clone(),
    };

    let ast = match sched
        .runtime
        .compile(&effective.id, &effective.template.set)
    {
        Ok(ast) => ast,
        Err(err) => {
            sched.bus.dispatch(SchedulerEvent::Error {
                err: ErrorInfo::msg(err.to_string())
                    .with_vector(&effective.id)
                    .with_graph(&current_graph_id)
                    .with_field(&current_field),
            });
            sched.bus.dispatch(SchedulerEvent::AfterSet {
                interface,
                return_value: Value::Null,
                err: Some(err.to_string()),
            });
            return Ok(());
        }
    };

    let set_context = ContextCell::new();
    sched.bus.dispatch(SchedulerEvent::Set {
        interface: interface.clone(),
        set_context: set_context.clone(),
    });
    if let Some(context) = set_context.take() {
        sched.context = context;
    }

    let edges = EdgesProxy::new();
    let scheduler_proxy = SchedulerProxy::new();

    // The scope and its Dynamics stay inside this block so nothing
    // non-Send is held across the fan-out awaits below.
    let (return_value, handler_err) = {
        let mut scope = Scope::new();
        let graph_meta = sched
            .graph(&current)
            .map(|g| {
                json!({
                    "id": g.id,
                    "url": g.url,
                    "version": g.version,
                    "properties": g.properties,
                })
            })
            .unwrap_or(Value::Null);
        scope.push("scheduler", scheduler_proxy.clone());
        scope.push("graph", to_dynamic_or_unit(&graph_meta));
        scope.push(
            "cache",
            to_dynamic_or_unit(
                sched
                    .vector_cache
                    .get(&effective.id)
                    .unwrap_or(&Value::Null),
            ),
        );
        scope.push(
            "vector",
            to_dynamic_or_unit(&serde_json::to_value(&effective).unwrap_or(Value::Null)),
        );
        scope.push("field", current_field.clone());
        scope.push("state", to_dynamic_or_unit(&sched.state));
        scope.push("value", to_dynamic_or_unit(&value));
        scope.push("edges", edges.clone());
        scope.push("data", to_dynamic_or_unit(&effective.data));
        scope.push("properties", to_dynamic_or_unit(&effective.properties));
        scope.push("context", to_dynamic_or_unit(&sched.context));

        let outcome = sched.runtime.eval(&mut scope, &ast);

        // Shared mutable environment flows back after settlement.
        if let Some(state) = scope.get("state").cloned()
            && let Ok(state) = rhai::serde::from_dynamic::<Value>(&state)
        {
            sched.state = state;
        }
        if let Some(cache) = scope.get("cache").cloned()
            && let Ok(cache) = rhai::serde::from_dynamic::<Value>(&cache)
        {
            sched.vector_cache.insert(effective.id.clone(), cache);
        }

        match outcome {
            Ok(returned) => (
                rhai::serde::from_dynamic::<Value>(&returned).unwrap_or(Value::Null),
                None,
            ),
            Err(err) => (Value::Null, Some(err.to_string())),
        }
    };

    if let Some(message) = &handler_err {
        sched.bus.dispatch(SchedulerEvent::Error {
            err: ErrorInfo::msg(message.clone())
                .with_vector(&effective.id)
                .with_graph(&current_graph_id)
                .with_field(&current_field),
        });
    }
    sched.bus.dispatch(SchedulerEvent::AfterSet {
        interface,
        return_value,
        err: handler_err,
    });

    // Recorded edge writes replay in author order, each connector
    // awaited before the next.
    for write in edges.take_writes() {
        fan_out(sched, &current, &effective, &write).await;
    }
    for route in scheduler_proxy.take_routes() {
        sched
            .url_scoped(
                &route.pattern,
                route.value,
                &route.field,
                route.scope.as_deref(),
            )
            .await;
    }

    Ok(())
}

fn to_dynamic_or_unit(value: &Value) -> Dynamic {
    match rhai::serde::to_dynamic(value) {
        Ok(dynamic) => dynamic,
        Err(err) => {
            tracing::warn!(
                target: "fluxgraph::handler",
                "scope value is not representable, passing unit: {err}"
            );
            Dynamic::UNIT
        }
    }
}

/// Produce the inner graph for a linked-graph reference, fetching it
/// when neither embedded nor already loaded. `None` means resolution
/// failed and the error event has been dispatched.
async fn resolve_linked_graph(
    sched: &mut Scheduler,
    host_id: &str,
    linked: &LinkedGraph,
) -> Option<Graph> {
    if let Some(graph) = linked.graph.clone() {
        return Some(*graph);
    }
    if linked.loaded {
        // Marked loaded but carrying no graph: nothing to adopt.
        sched.bus.dispatch(SchedulerEvent::Error {
            err: ErrorInfo::msg(format!(
                "linked graph {}.{} resolved to nothing.",
                linked.id, linked.version
            ))
            .with_vector(host_id),
        });
        return None;
    }
    let url = artifact_url(&sched.graph_path, &linked.id, linked.version);
    match sched.graph_loader.load(&url, &sched.bus).await {
        Ok(graph) => Some(graph),
        Err(err) => {
            sched.bus.dispatch(SchedulerEvent::Error {
                err: ErrorInfo::msg(err.to_string())
                    .with_vector(host_id)
                    .with_url(url),
            });
            None
        }
    }
}

/// Inner-edge splicing: extend the inner graph's mapped output edges
/// with the host vector's connectors (deduplicated by connector id) and
/// apply the linked graph's per-vector data/properties overrides.
fn splice_linked_graph(inner: &mut Graph, host: &Vector, linked: &LinkedGraph) {
    for vector in &mut inner.vectors {
        if let Some(data) = linked.data.get(&vector.id) {
            vector.data = data.clone();
        }
        if let Some(properties) = linked.properties.get(&vector.id) {
            vector.properties = properties.clone();
        }
        for edge in &mut vector.edges {
            for target in linked.fields.outputs.values() {
                if target.id != vector.id || target.field != edge.field {
                    continue;
                }
                let Some(host_edge) = host.edge(&target.field) else {
                    continue;
                };
                for connector in &host_edge.connectors {
                    if !edge.connectors.iter().any(|c| c.id == connector.id) {
                        edge.connectors.push(connector.clone());
                    }
                }
            }
        }
    }
}

/// Flip the stored linked-graph reference to loaded and snapshot the
/// spliced working copy into it. Runs at most once per reference.
fn mark_linked_graph_loaded(
    sched: &mut Scheduler,
    handle: &GraphHandle,
    host_id: &str,
    substituted: bool,
    spliced: &Graph,
) {
    let Some(graph) = sched.graph_mut(handle) else {
        return;
    };
    let Some(stored) = graph.vector_mut(host_id) else {
        return;
    };
    let slot = if substituted {
        stored
            .linked_vector
            .as_mut()
            .and_then(|lv| lv.vector.as_deref_mut())
            .and_then(|v| v.linked_graph.as_mut())
    } else {
        stored.linked_graph.as_mut()
    };
    if let Some(linked) = slot {
        linked.loaded = true;
        linked.graph = Some(Box::new(spliced.clone()));
    }
}

/// Fan one recorded edge write out to its connectors, sequentially in
/// declared order. Each connector failure is contained: wrapped as an
/// `Edge setter error` and dispatched, then the next connector runs.
#[instrument(
    skip(sched, current, effective, write),
    fields(vector_id = %effective.id, field = %write.field)
)]
async fn fan_out(
    sched: &mut Scheduler,
    current: &GraphHandle,
    effective: &Vector,
    write: &EdgeWrite,
) {
    let Some(edge) = effective.edge(&write.field) else {
        sched.bus.dispatch(SchedulerEvent::Warning {
            message: format!(
                "vector {} has no edge named \"{}\".",
                effective.id, write.field
            ),
            url: String::new(),
        });
        return;
    };

    for connector in edge.connectors.clone() {
        let target =
            match resolve_connector_handle(sched, current, &connector.graph_id, connector.version)
                .await
            {
                Ok(target) => target,
                Err(err) => {
                    sched.bus.dispatch(SchedulerEvent::Error {
                        err: ErrorInfo::msg(format!("Edge setter error: {err}"))
                            .with_vector(connector.vector_id.clone())
                            .with_graph(connector.graph_id.clone())
                            .with_field(connector.field.clone()),
                    });
                    continue;
                }
            };

        let exists = sched
            .graph(&target)
            .map(|g| g.vector(&connector.vector_id).is_some())
            .unwrap_or(false);
        if !exists {
            // Dangling connector: skip it, keep fanning out.
            sched.bus.dispatch(SchedulerEvent::Error {
                err: ErrorInfo::msg(format!(
                    "Edge setter error: {}",
                    ExecError::VectorMissing {
                        vector_id: connector.vector_id.clone(),
                        graph_id: connector.graph_id.clone(),
                    }
                ))
                .with_vector(connector.vector_id.clone())
                .with_graph(connector.graph_id.clone())
                .with_field(connector.field.clone()),
            });
            continue;
        }

        let started = Instant::now();
        sched.bus.dispatch(SchedulerEvent::BeginConnector {
            connector: connector.clone(),
            value: write.value.clone(),
        });
        execute_edge(
            sched,
            target,
            connector.vector_id.clone(),
            connector.field.clone(),
            write.value.clone(),
        )
        .await;
        sched.bus.dispatch(SchedulerEvent::EndConnector {
            connector,
            value: write.value.clone(),
            duration: started.elapsed(),
        });
    }
}

/// Map a connector's graph coordinates to a working copy.
///
/// Order: the current graph, then the chain of host graphs above it
/// (covers spliced connectors pointing back out of a linked instance),
/// then already-adopted shared graphs, then a loader fetch. Both id and
/// version are part of graph identity.
#[instrument(skip(sched, current), err)]
async fn resolve_connector_handle(
    sched: &mut Scheduler,
    current: &GraphHandle,
    graph_id: &str,
    version: u64,
) -> Result<GraphHandle, ExecError> {
    let mut cursor = Some(current.clone());
    while let Some(handle) = cursor {
        if let Some(graph) = sched.graph(&handle)
            && graph.id == graph_id
            && graph.version == version
        {
            return Ok(handle);
        }
        cursor = match &handle {
            GraphHandle::Instance(key) => sched.instances.get(key).map(|i| i.parent.clone()),
            GraphHandle::Shared(_) => None,
        };
    }

    let key = GraphKey::new(graph_id, version);
    if sched.graphs.contains_key(&key) {
        return Ok(GraphHandle::Shared(key));
    }

    let url = artifact_url(&sched.graph_path, graph_id, version);
    let graph = sched.graph_loader.load(&url, &sched.bus).await?;
    sched.graphs.insert(key.clone(), graph);
    Ok(GraphHandle::Shared(key))
}
