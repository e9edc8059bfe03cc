//! # Invocation
//!
//! How a step's `(service, action)` pair becomes an actual call: registered
//! in-process handlers, or a remote HTTP endpoint found in the static service
//! registry.

pub mod handler_registry;
pub mod invoker;
pub mod service_registry;
pub mod transport;

pub use handler_registry::{handler_fn, ActionHandler, ActionPayload, FnHandler, HandlerRegistry};
pub use invoker::{Invoker, ServiceInvoker};
pub use service_registry::{append_path, Route, RouteResolver, ServiceRegistry};
pub use transport::{HttpTransport, RemoteRequest, RemoteResponse, RemoteTransport};
