//! Set-handler runtime: script compilation, execution, and the proxy
//! objects scripts use to produce side effects.

pub mod edges;
pub mod runtime;

pub use edges::{EdgeWrite, EdgesProxy, RouteRequest, SchedulerProxy};
pub use runtime::{HandlerError, HandlerRuntime, PrintHook};
