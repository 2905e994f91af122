//! Typed single-call adapter.
//!
//! Wraps a byte-level single handler with typed, pooled request and response
//! values. The same adapter value is used on both sides: [`SingleHandler::register`]
//! on the server and [`SingleHandler::call`] on the client.

use std::sync::Arc;
use std::time::Duration;

use tracing::Level;

use crate::buffer::{get_byte_buffer, put_byte_buffer};
use crate::codec::RoundTripper;
use crate::error::{GridError, RemoteErr, Result};
use crate::handler::{Context, HandlerRegistry, HandlerResult, SingleHandlerFn};
use crate::id::HandlerId;
use crate::pool::ObjectPool;
use crate::transport::Requester;

/// Deadline applied by [`SingleHandler::call`] when the context has none.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Typed adapter for one-request, one-response handlers.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use gridwire::codec::RoundTripper;
/// use gridwire::handler::{Context, HandlerRegistry, RemoteClient};
/// use gridwire::id::HandlerId;
/// use gridwire::transport::LocalConnection;
/// use gridwire::typed::SingleHandler;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize, Default, PartialEq, Debug)]
/// struct DiskInfoRequest { disk: String }
/// impl RoundTripper for DiskInfoRequest {}
///
/// #[derive(Serialize, Deserialize, Default, PartialEq, Debug)]
/// struct DiskInfo { free: u64 }
/// impl RoundTripper for DiskInfo {}
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let disk_info = SingleHandler::new(HandlerId::DISK_INFO, DiskInfoRequest::default, DiskInfo::default);
///
/// let mut registry = HandlerRegistry::new();
/// disk_info
///     .register(&mut registry, |_req: &DiskInfoRequest| Ok(DiskInfo { free: 12345 }), "")
///     .unwrap();
///
/// let conn = LocalConnection::new(Arc::new(registry), RemoteClient::new("node-1"));
/// let req = DiskInfoRequest { disk: "/data1".into() };
/// let resp = disk_info.call(&Context::new(), &conn, &req).await.unwrap();
/// assert_eq!(resp.free, 12345);
/// disk_info.put_response(resp);
/// # });
/// ```
pub struct SingleHandler<Req, Resp> {
    id: HandlerId,
    shared_response: bool,
    call_timeout: Duration,
    req_pool: Arc<ObjectPool<Req>>,
    resp_pool: Arc<ObjectPool<Resp>>,
}

impl<Req, Resp> Clone for SingleHandler<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            shared_response: self.shared_response,
            call_timeout: self.call_timeout,
            req_pool: self.req_pool.clone(),
            resp_pool: self.resp_pool.clone(),
        }
    }
}

impl<Req: RoundTripper, Resp: RoundTripper> SingleHandler<Req, Resp> {
    /// Create an adapter for `id` with constructors for fresh values.
    pub fn new<NewReq, NewResp>(id: HandlerId, new_request: NewReq, new_response: NewResp) -> Self
    where
        NewReq: Fn() -> Req + Send + Sync + 'static,
        NewResp: Fn() -> Resp + Send + Sync + 'static,
    {
        Self {
            id,
            shared_response: false,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            req_pool: Arc::new(ObjectPool::new(new_request)),
            resp_pool: Arc::new(ObjectPool::new(new_response)),
        }
    }

    /// Responses returned by the handler are not put back into the pool.
    pub fn with_shared_response(mut self) -> Self {
        self.shared_response = true;
        self
    }

    /// Deadline used by `call` when the context has none.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// The handler id.
    #[inline]
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Take a request from the pool.
    pub fn new_request(&self) -> Req {
        self.req_pool.get()
    }

    /// Return a request to the pool.
    pub fn put_request(&self, req: Req) {
        self.req_pool.put(req);
    }

    /// Take a response from the pool.
    pub fn new_response(&self) -> Resp {
        self.resp_pool.get()
    }

    /// Return a response to the pool.
    pub fn put_response(&self, resp: Resp) {
        self.resp_pool.put(resp);
    }

    /// Install `handle` in `registry`. An empty `subroute` registers the default handler.
    ///
    /// Decode and encode failures are returned to the caller as [`RemoteErr`].
    pub fn register<F>(&self, registry: &mut HandlerRegistry, handle: F, subroute: &str) -> Result<()>
    where
        F: Fn(&Req) -> HandlerResult<Resp> + Send + Sync + 'static,
    {
        let req_pool = self.req_pool.clone();
        let resp_pool = self.resp_pool.clone();
        let shared = self.shared_response;

        let handler: SingleHandlerFn = Arc::new(move |mut payload: Vec<u8>| -> HandlerResult<Vec<u8>> {
            let mut req = req_pool.get();
            if let Err(err) = req.decode_from(&payload) {
                put_byte_buffer(payload);
                req_pool.put(req);
                return Err(RemoteErr::from(err));
            }

            let result = handle(&req);
            req_pool.put(req);
            let resp = match result {
                Ok(resp) => resp,
                Err(err) => {
                    put_byte_buffer(payload);
                    return Err(err);
                }
            };

            // The request buffer becomes the response buffer.
            payload.clear();
            let encoded = resp.encode_into(&mut payload);
            if !shared {
                resp_pool.put(resp);
            }
            match encoded {
                Ok(()) => Ok(payload),
                Err(err) => {
                    put_byte_buffer(payload);
                    Err(RemoteErr::from(err))
                }
            }
        });

        registry.register_single(self.id, handler, subroute)
    }

    /// Send `req` and wait for the typed response.
    ///
    /// The response comes from the pool; hand it back with [`put_response`](Self::put_response)
    /// when done. Remote failures are `GridError::Remote`; everything else means
    /// the call did not complete.
    ///
    /// The request's `Debug` output is attached to the context as trace params
    /// only while TRACE is enabled, so transports see them at that level only.
    pub async fn call<R>(&self, ctx: &Context, requester: &R, req: &Req) -> Result<Resp>
    where
        R: Requester + ?Sized,
    {
        let mut payload = get_byte_buffer();
        if let Err(err) = req.encode_into(&mut payload) {
            put_byte_buffer(payload);
            return Err(err);
        }

        let mut ctx = ctx.clone();
        if tracing::enabled!(Level::TRACE) {
            ctx = ctx.with_trace_params(format!("{req:?}"));
        }
        if ctx.deadline().is_none() {
            ctx = ctx.with_timeout(self.call_timeout);
        }

        let result = tokio::select! {
            res = requester.request(&ctx, self.id, &payload) => res,
            _ = ctx.done() => Err(ctx.err().unwrap_or(GridError::DeadlineExceeded)),
        };
        put_byte_buffer(payload);
        let resp_buf = result?;

        let mut resp = self.resp_pool.get();
        let decoded = resp.decode_from(&resp_buf).map(|_| ());
        put_byte_buffer(resp_buf);
        match decoded {
            Ok(()) => Ok(resp),
            Err(err) => {
                self.resp_pool.put(resp);
                Err(err)
            }
        }
    }
}
