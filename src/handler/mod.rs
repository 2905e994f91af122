//! Handler module - byte-level handler kinds, registry and call context.
//!
//! Provides:
//! - [`HandlerRegistry`] - maps handler ids (and subroutes) to handlers
//! - [`Context`] - cancellation, deadline, caller and subroute for one call
//!
//! Typed handlers are built on top of these by the [`typed`](crate::typed) adapters.

mod context;
mod registry;

pub use context::{Context, RemoteClient};
pub use registry::{
    BoxFuture, HandlerRegistry, HandlerResult, SingleHandlerFn, StatelessHandler, StatelessHandlerFn,
    StreamHandler, StreamHandlerFn,
};
