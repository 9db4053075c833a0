//! Top-level entry point and owner of all traversal state.
//!
//! A [`Scheduler`] is constructed around a base graph and drives every
//! traversal through `&mut self`: the engine is single-threaded
//! cooperative and needs no locking. It owns the graph arena (working
//! copies of the base graph, connector-adopted graphs, and per-host
//! linked-graph instances), the handler context/state, the per-vector
//! runtime cache, both artifact loaders with their mutable URL
//! templates, the listener registry, and the handler runtime.
//!
//! Entry is URL-pattern matching: [`Scheduler::url`] treats the pattern
//! as a regular expression, finds the first vector whose `url` matches,
//! and hands it to the edge executor. A miss with a non-empty pattern is
//! a `warning`, never an error, and `url` itself never fails.

use std::time::Instant;

use regex::Regex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::artifact::{Graph, GraphKey, Vector};
use crate::event_bus::{Listener, ListenerRegistry, SchedulerEvent};
use crate::executor;
use crate::handler::{HandlerRuntime, PrintHook};
use crate::loader::{Fetch, Loader};

/// Default graph artifact URL template.
pub const DEFAULT_GRAPH_PATH: &str = "artifacts/graph/{id}.{version}";
/// Default vector artifact URL template.
pub const DEFAULT_VECTOR_PATH: &str = "artifacts/vectors/{id}.{version}";

/// Environment override for [`DEFAULT_GRAPH_PATH`].
pub const GRAPH_PATH_ENV: &str = "FLUXGRAPH_GRAPH_PATH";
/// Environment override for [`DEFAULT_VECTOR_PATH`].
pub const VECTOR_PATH_ENV: &str = "FLUXGRAPH_VECTOR_PATH";

/// Warning message emitted when a URL pattern matches no vector.
pub const URL_MISS_MESSAGE: &str = "Cannot find vector at the specified URL.";

/// Identity of one linked-graph instance: the host graph coordinates
/// plus the host vector id. Two hosts linking the same sub-graph get
/// distinct instances, so their splices never bleed into each other.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub graph_id: String,
    pub graph_version: u64,
    pub vector_id: String,
}

impl InstanceKey {
    pub fn new(
        graph_id: impl Into<String>,
        graph_version: u64,
        vector_id: impl Into<String>,
    ) -> Self {
        Self {
            graph_id: graph_id.into(),
            graph_version,
            vector_id: vector_id.into(),
        }
    }
}

/// Which working copy of a graph a traversal step executes in.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GraphHandle {
    /// The base graph or a connector-adopted graph, keyed by identity.
    Shared(GraphKey),
    /// A linked-graph instance scoped to its host vector.
    Instance(InstanceKey),
}

/// A linked-graph working copy plus the handle of the graph that hosts
/// it, so spliced host connectors resolve upward without a refetch.
pub(crate) struct LinkedInstance {
    pub graph: Graph,
    pub parent: GraphHandle,
}

/// Builder for [`Scheduler`].
///
/// The base graph is required by construction; everything else has a
/// default. URL templates start from the environment overrides
/// (`FLUXGRAPH_GRAPH_PATH` / `FLUXGRAPH_VECTOR_PATH`) when present.
pub struct SchedulerBuilder {
    graph: Graph,
    context: Value,
    state: Value,
    fetcher: Option<Arc<dyn Fetch>>,
    graph_path: String,
    vector_path: String,
    print_hook: Option<PrintHook>,
}

impl SchedulerBuilder {
    pub fn new(graph: Graph) -> Self {
        Self {
            graph,
            context: Value::Object(Default::default()),
            state: Value::Object(Default::default()),
            fetcher: None,
            graph_path: std::env::var(GRAPH_PATH_ENV)
                .unwrap_or_else(|_| DEFAULT_GRAPH_PATH.to_string()),
            vector_path: std::env::var(VECTOR_PATH_ENV)
                .unwrap_or_else(|_| DEFAULT_VECTOR_PATH.to_string()),
            print_hook: None,
        }
    }

    /// Object handlers see as `context`.
    #[must_use]
    pub fn context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Mutable mapping shared across every handler invocation.
    #[must_use]
    pub fn state(mut self, state: Value) -> Self {
        self.state = state;
        self
    }

    /// Fetch primitive for artifact loads. Without one, a load that
    /// misses both cache and listener override fails with
    /// `Fetch is not defined.`.
    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetch>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    #[must_use]
    pub fn graph_path(mut self, template: impl Into<String>) -> Self {
        self.graph_path = template.into();
        self
    }

    #[must_use]
    pub fn vector_path(mut self, template: impl Into<String>) -> Self {
        self.vector_path = template.into();
        self
    }

    /// Where handler `print`/`debug` output goes. Defaults to tracing.
    #[must_use]
    pub fn print_hook(mut self, hook: PrintHook) -> Self {
        self.print_hook = Some(hook);
        self
    }

    pub fn build(self) -> Scheduler {
        let base_key = self.graph.key();
        let mut graphs = FxHashMap::default();
        graphs.insert(base_key.clone(), self.graph);
        let runtime = HandlerRuntime::new(
            self.print_hook
                .unwrap_or_else(HandlerRuntime::tracing_print_hook),
        );
        Scheduler {
            graphs,
            base_key,
            instances: FxHashMap::default(),
            context: self.context,
            state: self.state,
            vector_cache: FxHashMap::default(),
            bus: ListenerRegistry::new(),
            graph_loader: Loader::new(self.fetcher.clone()),
            vector_loader: Loader::new(self.fetcher),
            graph_path: self.graph_path,
            vector_path: self.vector_path,
            runtime,
            traversals: 0,
        }
    }
}

/// The dataflow engine entry point. See the module docs.
pub struct Scheduler {
    pub(crate) graphs: FxHashMap<GraphKey, Graph>,
    base_key: GraphKey,
    pub(crate) instances: FxHashMap<InstanceKey, LinkedInstance>,
    /// Object handlers see as `context`; a `set` listener may rebind it.
    pub context: Value,
    /// Mutable mapping shared across every handler invocation.
    pub state: Value,
    pub(crate) vector_cache: FxHashMap<String, Value>,
    pub(crate) bus: ListenerRegistry,
    pub(crate) graph_loader: Loader<Graph>,
    pub(crate) vector_loader: Loader<Vector>,
    /// Graph artifact URL template; `{id}` and `{version}` substituted.
    pub graph_path: String,
    /// Vector artifact URL template; `{id}` and `{version}` substituted.
    pub vector_path: String,
    pub(crate) runtime: HandlerRuntime,
    traversals: u64,
}

impl Scheduler {
    /// Build a scheduler with defaults; use [`Scheduler::builder`] to
    /// customize.
    pub fn new(graph: Graph) -> Self {
        Self::builder(graph).build()
    }

    pub fn builder(graph: Graph) -> SchedulerBuilder {
        SchedulerBuilder::new(graph)
    }

    /// Register a listener for the named lifecycle event.
    pub fn add_event_listener(&mut self, name: impl Into<String>, listener: Listener) {
        self.bus.add_event_listener(name, listener);
    }

    /// Remove a previously registered listener; no-op when absent.
    pub fn remove_event_listener(&mut self, name: &str, listener: &Listener) {
        self.bus.remove_event_listener(name, listener);
    }

    /// The base graph handed to the constructor (never fetched).
    pub fn base_graph(&self) -> &Graph {
        &self.graphs[&self.base_key]
    }

    pub(crate) fn base_handle(&self) -> GraphHandle {
        GraphHandle::Shared(self.base_key.clone())
    }

    /// A shared working copy: the base graph or a connector-adopted one.
    pub fn shared_graph(&self, key: &GraphKey) -> Option<&Graph> {
        self.graphs.get(key)
    }

    /// The spliced working copy of a linked-graph instance.
    pub fn linked_instance(&self, key: &InstanceKey) -> Option<&Graph> {
        self.instances.get(key).map(|i| &i.graph)
    }

    /// Resolve a handle to its working copy.
    pub fn graph(&self, handle: &GraphHandle) -> Option<&Graph> {
        match handle {
            GraphHandle::Shared(key) => self.graphs.get(key),
            GraphHandle::Instance(key) => self.linked_instance(key),
        }
    }

    pub(crate) fn graph_mut(&mut self, handle: &GraphHandle) -> Option<&mut Graph> {
        match handle {
            GraphHandle::Shared(key) => self.graphs.get_mut(key),
            GraphHandle::Instance(key) => self.instances.get_mut(key).map(|i| &mut i.graph),
        }
    }

    /// The graph artifact loader; exposed for `clear_cache`.
    pub fn graph_loader_mut(&mut self) -> &mut Loader<Graph> {
        &mut self.graph_loader
    }

    /// The vector artifact loader; exposed for `clear_cache`.
    pub fn vector_loader_mut(&mut self) -> &mut Loader<Vector> {
        &mut self.vector_loader
    }

    /// Per-vector runtime cache created on first execution, living for
    /// the scheduler lifetime.
    pub fn vector_cache(&self, vector_id: &str) -> Option<&Value> {
        self.vector_cache.get(vector_id)
    }

    /// Number of `url(...)` traversals started so far.
    pub fn traversals(&self) -> u64 {
        self.traversals
    }

    /// Start a traversal: match `pattern` against vector URLs in the
    /// base graph and deliver `value` to `field` of the first match.
    pub async fn url(&mut self, pattern: &str, value: Value, field: &str) {
        self.url_scoped(pattern, value, field, None).await;
    }

    /// [`Scheduler::url`] scoped to the linked-graph instance of
    /// `scope_vector` (a base-graph vector id) when that instance is
    /// already materialized; falls back to the base graph otherwise.
    pub async fn url_scoped(
        &mut self,
        pattern: &str,
        value: Value,
        field: &str,
        scope_vector: Option<&str>,
    ) {
        let started = Instant::now();
        self.traversals += 1;
        tracing::debug!(
            target: "fluxgraph::scheduler",
            pattern,
            traversal = self.traversals,
            "traversal begin"
        );
        self.bus.dispatch(SchedulerEvent::Begin {
            url: pattern.to_string(),
        });

        let handle = scope_vector
            .and_then(|vector_id| self.scope_handle(vector_id))
            .unwrap_or_else(|| self.base_handle());

        match Regex::new(pattern) {
            Ok(matcher) => {
                let matched = self.graph(&handle).and_then(|graph| {
                    graph
                        .vectors
                        .iter()
                        .find(|v| matcher.is_match(&v.url))
                        .map(|v| v.id.clone())
                });
                match matched {
                    Some(vector_id) => {
                        executor::execute_edge(
                            self,
                            handle,
                            vector_id,
                            field.to_string(),
                            value,
                        )
                        .await;
                    }
                    None => {
                        if !pattern.is_empty() {
                            self.bus.dispatch(SchedulerEvent::Warning {
                                message: URL_MISS_MESSAGE.to_string(),
                                url: pattern.to_string(),
                            });
                        }
                    }
                }
            }
            Err(err) => {
                // An unparsable pattern cannot match anything: URL miss.
                self.bus.dispatch(SchedulerEvent::Warning {
                    message: format!("{URL_MISS_MESSAGE} Pattern is not a valid expression: {err}"),
                    url: pattern.to_string(),
                });
            }
        }

        self.bus.dispatch(SchedulerEvent::End {
            url: pattern.to_string(),
            duration: started.elapsed(),
        });
    }

    fn scope_handle(&self, vector_id: &str) -> Option<GraphHandle> {
        let host = self.base_graph().vector(vector_id)?;
        host.linked_graph.as_ref()?;
        let key = InstanceKey::new(
            self.base_key.id.clone(),
            self.base_key.version,
            vector_id,
        );
        self.instances
            .contains_key(&key)
            .then_some(GraphHandle::Instance(key))
    }
}
