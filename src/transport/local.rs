//! In-process connection.
//!
//! Dispatches straight into a [`HandlerRegistry`] without a network in
//! between. Streams still run their handler as a separate task with bounded
//! queues, so flow control and cancellation behave as they would remotely.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use gridwire::handler::{Context, HandlerRegistry, HandlerResult, RemoteClient, SingleHandlerFn};
//! use gridwire::id::HandlerId;
//! use gridwire::transport::{LocalConnection, Requester};
//!
//! # tokio_test_block_on(async {
//! let mut registry = HandlerRegistry::new();
//! let echo: SingleHandlerFn = Arc::new(|p: Vec<u8>| -> HandlerResult<Vec<u8>> { Ok(p) });
//! registry.register_single(HandlerId::DISK_INFO, echo, "").unwrap();
//!
//! let conn = LocalConnection::new(Arc::new(registry), RemoteClient::new("node-1"));
//! let resp = conn.request(&Context::new(), HandlerId::DISK_INFO, b"ping").await.unwrap();
//! assert_eq!(resp, b"ping");
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;
use tokio::task::JoinHandle;

use super::{Requester, Stream, Streamer};
use crate::buffer::{get_byte_buffer, put_byte_buffer};
use crate::error::{GridError, Result};
use crate::handler::{BoxFuture, Context, HandlerRegistry, HandlerResult, RemoteClient};
use crate::id::HandlerId;

/// Connection to handlers in the same process.
#[derive(Clone)]
pub struct LocalConnection {
    registry: Arc<HandlerRegistry>,
    caller: RemoteClient,
    subroute: String,
}

impl LocalConnection {
    /// Connect to `registry`, identifying as `caller`.
    pub fn new(registry: Arc<HandlerRegistry>, caller: RemoteClient) -> Self {
        Self {
            registry,
            caller,
            subroute: String::new(),
        }
    }

    /// A connection that targets handlers registered under `route`.
    ///
    /// Nested calls join routes with `/`.
    pub fn subroute(&self, route: &str) -> Self {
        let subroute = if self.subroute.is_empty() {
            route.to_string()
        } else {
            format!("{}/{}", self.subroute, route)
        };
        Self {
            registry: self.registry.clone(),
            caller: self.caller.clone(),
            subroute,
        }
    }

    /// The subroute this connection targets; empty for default handlers.
    pub fn route(&self) -> &str {
        &self.subroute
    }

    fn server_context(&self, ctx: &Context) -> Context {
        ctx.child()
            .with_caller(self.caller.clone())
            .with_subroute(&self.subroute)
    }
}

impl Requester for LocalConnection {
    fn request<'a>(&'a self, ctx: &'a Context, id: HandlerId, req: &'a [u8]) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            if let Some(err) = ctx.err() {
                return Err(err);
            }
            let handler = self
                .registry
                .single(id, &self.subroute)
                .ok_or(GridError::UnknownHandler(id))?
                .clone();

            tracing::debug!(
                handler = %id,
                prefix = id.trace_prefix(),
                subroute = %self.subroute,
                "local request"
            );
            tracing::trace!(handler = %id, params = ctx.trace_params(), "local request params");

            let mut payload = get_byte_buffer();
            payload.extend_from_slice(req);
            handler(payload).map_err(GridError::Remote)
        })
    }
}

impl Streamer for LocalConnection {
    fn new_stream<'a>(
        &'a self,
        ctx: &'a Context,
        id: HandlerId,
        payload: Option<&'a [u8]>,
    ) -> BoxFuture<'a, Result<Stream>> {
        Box::pin(async move {
            if let Some(err) = ctx.err() {
                return Err(err);
            }
            let server_ctx = self.server_context(ctx);

            tracing::debug!(
                handler = %id,
                prefix = id.trace_prefix(),
                subroute = %self.subroute,
                "local stream"
            );
            tracing::trace!(handler = %id, params = ctx.trace_params(), "local stream params");

            if let Some(handler) = self.registry.stream(id, &self.subroute) {
                let (requests, inbound) = if handler.in_capacity > 0 {
                    let (tx, rx) = mpsc::channel(handler.in_capacity);
                    (Some(tx), Some(rx))
                } else {
                    (None, None)
                };
                let capacity = handler.out_capacity.max(1);
                let (out_tx, out_rx) = mpsc::channel(capacity);
                let task = tokio::spawn((handler.handle)(server_ctx.clone(), copy(payload), inbound, out_tx));
                return Ok(spawn_pump(server_ctx, requests, out_rx, task, capacity));
            }

            if let Some(handler) = self.registry.stateless(id, &self.subroute) {
                let capacity = handler.out_capacity.max(1);
                let (out_tx, out_rx) = mpsc::channel(capacity);
                let task = tokio::spawn((handler.handle)(server_ctx.clone(), copy(payload), out_tx));
                return Ok(spawn_pump(server_ctx, None, out_rx, task, capacity));
            }

            Err(GridError::UnknownHandler(id))
        })
    }
}

fn copy(payload: Option<&[u8]>) -> Vec<u8> {
    let mut buf = get_byte_buffer();
    if let Some(p) = payload {
        buf.extend_from_slice(p);
    }
    buf
}

/// Forward handler output to the client and finish with the handler's result.
fn spawn_pump(
    ctx: Context,
    requests: Option<mpsc::Sender<Vec<u8>>>,
    mut out_rx: mpsc::Receiver<Vec<u8>>,
    task: JoinHandle<HandlerResult>,
    capacity: usize,
) -> Stream {
    let (resp_tx, resp_rx) = mpsc::channel(capacity);
    let token = ctx.cancellation_token().clone();

    tokio::spawn(async move {
        // Keep draining after the client leaves so the handler never blocks on output.
        let mut client_gone = false;
        while let Some(msg) = out_rx.recv().await {
            if client_gone {
                put_byte_buffer(msg);
                continue;
            }
            if let Err(SendError(rejected)) = resp_tx.send(Ok(msg)).await {
                if let Ok(buf) = rejected {
                    put_byte_buffer(buf);
                }
                ctx.cancel();
                client_gone = true;
            }
        }

        let outcome = match task.await {
            Ok(Ok(())) => ctx.err().map_or(Ok(()), Err),
            Ok(Err(remote)) => Err(GridError::Remote(remote)),
            Err(join) => {
                tracing::error!(error = %join, "stream handler task failed");
                Err(GridError::Transport(join.to_string()))
            }
        };
        if let Err(err) = outcome {
            let _ = resp_tx.send(Err(err)).await;
        }
    });

    Stream::new(requests, resp_rx, token)
}
