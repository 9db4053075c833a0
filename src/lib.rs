//! # Fluxgraph: Dataflow Graph Execution Engine
//!
//! Fluxgraph executes declarative dataflow graphs. A graph's vectors
//! carry user-authored set handlers; output edges fan assigned values
//! out to downstream input fields, transitively, across lazily loaded
//! sub-graphs and reusable vector artifacts. Every step is surrounded
//! by lifecycle events, and failures are funneled into the event stream
//! instead of aborting the traversal.
//!
//! ## Core Concepts
//!
//! - **Vectors**: executable units with output edges and a set handler
//! - **Edges & Connectors**: named outputs wired to downstream inputs
//! - **Linked artifacts**: reusable vectors and embedded sub-graphs,
//!   resolved on first use and spliced into the running graph
//! - **Scheduler**: URL-pattern entry point owning all traversal state
//! - **Event bus**: synchronous, name-keyed listeners around each step
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fluxgraph::artifact::Graph;
//! use fluxgraph::scheduler::Scheduler;
//! use serde_json::json;
//!
//! # async fn example() {
//! let graph: Graph = serde_json::from_value(json!({
//!     "id": "g1", "url": "", "version": 0, "properties": {},
//!     "vectors": [{
//!         "id": "n1", "graphId": "g1", "version": 0,
//!         "url": "index",
//!         "edges": [{"field": "out", "connectors": []}],
//!         "template": {"set": "print(value);"},
//!         "data": null, "properties": {}
//!     }]
//! }))
//! .unwrap();
//!
//! let mut scheduler = Scheduler::new(graph);
//! scheduler.url("index", json!("hello"), "input").await;
//! # }
//! ```
//!
//! ## Listening to the lifecycle
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fluxgraph::event_bus::{EventEnvelope, SchedulerEvent};
//! # use fluxgraph::scheduler::Scheduler;
//! # fn example(scheduler: &mut Scheduler) {
//! scheduler.add_event_listener(
//!     "error",
//!     Arc::new(|envelope: &EventEnvelope| {
//!         if let SchedulerEvent::Error { err } = &envelope.event {
//!             eprintln!("traversal error: {}", err.message);
//!         }
//!     }),
//! );
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`artifact`] - Graph/vector/edge/connector data model
//! - [`event_bus`] - Lifecycle events and the listener registry
//! - [`loader`] - URL → artifact loading with cache and overrides
//! - [`handler`] - Set-handler compilation and proxy objects
//! - [`scheduler`] - Entry point and traversal state
//! - [`telemetry`] - Optional tracing setup

pub mod artifact;
pub mod event_bus;
pub(crate) mod executor;
pub mod handler;
pub mod loader;
pub mod scheduler;
pub mod telemetry;

pub use artifact::{Connector, Edge, Graph, GraphKey, LinkedGraph, LinkedVector, Vector};
pub use event_bus::{EventEnvelope, Listener, SchedulerEvent};
pub use loader::{Fetch, HttpFetcher, Loader};
pub use scheduler::{Scheduler, SchedulerBuilder};
