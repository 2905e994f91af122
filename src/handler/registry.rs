//! Handler registry for dispatching requests by handler id.
//!
//! Each [`HandlerId`] has one slot per handler kind (single, stateless, stream).
//! Handlers registered under a subroute live in a separate map keyed by
//! [`SubHandlerId`]. The registry is filled at startup and only read afterwards.
//!
//! Registration is rejected when the slot is taken, except for test ids,
//! which may be re-registered.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use gridwire::handler::{HandlerRegistry, HandlerResult, SingleHandlerFn};
//! use gridwire::id::HandlerId;
//!
//! let echo: SingleHandlerFn = Arc::new(|payload: Vec<u8>| -> HandlerResult<Vec<u8>> { Ok(payload) });
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register_single(HandlerId::DISK_INFO, echo, "").unwrap();
//!
//! assert!(registry.has_any(HandlerId::DISK_INFO));
//! assert!(registry.single(HandlerId::DISK_INFO, "").is_some());
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::Context;
use crate::error::{GridError, RemoteErr, Result};
use crate::id::{HandlerId, SubHandlerId, HANDLER_LAST};

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of a byte-level handler.
pub type HandlerResult<T = ()> = std::result::Result<T, RemoteErr>;

/// Handler for one-to-one requests.
///
/// Receives ownership of the request payload buffer and returns the encoded
/// response. An error is returned to the caller as a [`RemoteErr`].
pub type SingleHandlerFn = Arc<dyn Fn(Vec<u8>) -> HandlerResult<Vec<u8>> + Send + Sync>;

/// Handler for one-to-many requests without an input stream.
pub type StatelessHandlerFn =
    Arc<dyn Fn(Context, Vec<u8>, mpsc::Sender<Vec<u8>>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Handler for bidirectional streams.
///
/// Arguments are the call context, the initial payload, the inbound message
/// queue (absent when no input is expected) and the outbound message queue.
/// The handler must keep consuming the inbound queue until it returns.
pub type StreamHandlerFn = Arc<
    dyn Fn(Context, Vec<u8>, Option<mpsc::Receiver<Vec<u8>>>, mpsc::Sender<Vec<u8>>) -> BoxFuture<'static, HandlerResult>
        + Send
        + Sync,
>;

/// Stateless handler with its output capacity.
#[derive(Clone)]
pub struct StatelessHandler {
    /// The handler function.
    pub handle: StatelessHandlerFn,
    /// Output capacity on the caller. Values below 1 mean 1.
    pub out_capacity: usize,
}

/// Streaming handler with flow control settings.
#[derive(Clone)]
pub struct StreamHandler {
    /// The handler function.
    pub handle: StreamHandlerFn,
    /// Static subroute; empty for the default handler.
    pub subroute: String,
    /// Output capacity. Values below 1 mean 1.
    pub out_capacity: usize,
    /// Input capacity. 0 means no input is expected.
    pub in_capacity: usize,
}

/// Registry mapping handler ids (and subroutes) to byte-level handlers.
pub struct HandlerRegistry {
    single: Vec<Option<SingleHandlerFn>>,
    stateless: Vec<Option<StatelessHandler>>,
    streams: Vec<Option<StreamHandler>>,

    sub_single: HashMap<SubHandlerId, SingleHandlerFn>,
    sub_stateless: HashMap<SubHandlerId, StatelessHandler>,
    sub_streams: HashMap<SubHandlerId, StreamHandler>,
}

/// Where a registration lands.
enum Slot {
    Default(usize),
    Sub(SubHandlerId),
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            single: vec![None; HANDLER_LAST],
            stateless: vec![None; HANDLER_LAST],
            streams: vec![None; HANDLER_LAST],
            sub_single: HashMap::new(),
            sub_stateless: HashMap::new(),
            sub_streams: HashMap::new(),
        }
    }

    /// True if any kind of default handler is registered for a valid `id`.
    pub fn has_any(&self, id: HandlerId) -> bool {
        if !id.valid() {
            return false;
        }
        let i = id.index();
        self.single[i].is_some() || self.stateless[i].is_some() || self.streams[i].is_some()
    }

    /// True if any kind of handler is registered under `sub_id`.
    pub fn has_subhandler(&self, sub_id: &SubHandlerId) -> bool {
        self.sub_single.contains_key(sub_id)
            || self.sub_stateless.contains_key(sub_id)
            || self.sub_streams.contains_key(sub_id)
    }

    /// Register a single-call handler. An empty `subroute` registers the default.
    pub fn register_single(&mut self, id: HandlerId, handler: SingleHandlerFn, subroute: &str) -> Result<()> {
        match self.claim(id, subroute)? {
            Slot::Default(i) => self.single[i] = Some(handler),
            Slot::Sub(sub) => {
                self.sub_single.insert(sub, handler);
            }
        }
        tracing::debug!(handler = %id, prefix = id.trace_prefix(), subroute, "registered single handler");
        Ok(())
    }

    /// Register a stateless handler. An empty `subroute` registers the default.
    pub fn register_stateless(&mut self, id: HandlerId, handler: StatelessHandler, subroute: &str) -> Result<()> {
        match self.claim(id, subroute)? {
            Slot::Default(i) => self.stateless[i] = Some(handler),
            Slot::Sub(sub) => {
                self.sub_stateless.insert(sub, handler);
            }
        }
        tracing::debug!(handler = %id, prefix = id.trace_prefix(), subroute, "registered stateless handler");
        Ok(())
    }

    /// Register a streaming handler under its own `subroute` field.
    pub fn register_stream(&mut self, id: HandlerId, handler: StreamHandler) -> Result<()> {
        let slot = self.claim(id, &handler.subroute)?;
        tracing::debug!(
            handler = %id,
            prefix = id.trace_prefix(),
            subroute = %handler.subroute,
            "registered stream handler"
        );
        match slot {
            Slot::Default(i) => self.streams[i] = Some(handler),
            Slot::Sub(sub) => {
                self.sub_streams.insert(sub, handler);
            }
        }
        Ok(())
    }

    /// Look up a single-call handler.
    pub fn single(&self, id: HandlerId, subroute: &str) -> Option<&SingleHandlerFn> {
        match Self::slot(id, subroute)? {
            Slot::Default(i) => self.single[i].as_ref(),
            Slot::Sub(sub) => self.sub_single.get(&sub),
        }
    }

    /// Look up a stateless handler.
    pub fn stateless(&self, id: HandlerId, subroute: &str) -> Option<&StatelessHandler> {
        match Self::slot(id, subroute)? {
            Slot::Default(i) => self.stateless[i].as_ref(),
            Slot::Sub(sub) => self.sub_stateless.get(&sub),
        }
    }

    /// Look up a streaming handler.
    pub fn stream(&self, id: HandlerId, subroute: &str) -> Option<&StreamHandler> {
        match Self::slot(id, subroute)? {
            Slot::Default(i) => self.streams[i].as_ref(),
            Slot::Sub(sub) => self.sub_streams.get(&sub),
        }
    }

    fn slot(id: HandlerId, subroute: &str) -> Option<Slot> {
        if !id.valid() {
            return None;
        }
        if subroute.is_empty() {
            Some(Slot::Default(id.index()))
        } else {
            Some(Slot::Sub(SubHandlerId::new(id, subroute)))
        }
    }

    /// Validate `id` and check the target slot is free.
    fn claim(&self, id: HandlerId, subroute: &str) -> Result<Slot> {
        let slot = Self::slot(id, subroute).ok_or(GridError::UnknownHandler(id))?;
        let taken = match &slot {
            Slot::Default(_) => self.has_any(id),
            Slot::Sub(sub) => self.has_subhandler(sub),
        };
        if taken && !id.is_test_handler() {
            return Err(GridError::HandlerAlreadyExists(id));
        }
        Ok(slot)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
