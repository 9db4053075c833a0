//! Lifecycle events and the synchronous listener bus.
//!
//! The module is organised around typed [`SchedulerEvent`] payloads
//! wrapped in identified [`EventEnvelope`]s and a name-keyed
//! [`ListenerRegistry`] dispatching them in registration order.

pub mod event;
pub mod registry;

pub use event::{
    ContextCell, ErrorInfo, EventEnvelope, SchedulerEvent, ValueCell, VectorInterface, names,
};
pub use registry::{Listener, ListenerRegistry};
