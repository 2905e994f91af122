//! Typed stream adapter, server side.
//!
//! A registered stream runs three tasks per call:
//!
//! ```text
//! raw inbound ──► input forwarder ──► typed requests ──► handler
//!                                                          │
//! raw outbound ◄── output forwarder ◄── typed responses ◄──┘
//! ```
//!
//! The forwarders decode and encode with pooled values and buffers. Both
//! queues between forwarders and handler hold at most one item, so a slow
//! side throttles the other.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::buffer::{get_byte_buffer, put_byte_buffer};
use crate::codec::RoundTripper;
use crate::error::{RemoteErr, Result};
use crate::handler::{BoxFuture, Context, HandlerRegistry, HandlerResult, StreamHandler, StreamHandlerFn};
use crate::id::HandlerId;
use crate::pool::ObjectPool;

/// Default input and output capacity of a stream.
pub const DEFAULT_STREAM_CAPACITY: usize = 1;

type Constructor<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Typed adapter for bidirectional streams.
///
/// `P` is the initial payload, `Req` the messages sent by the caller and
/// `Resp` the messages sent back. Built with [`new`](Self::new), which
/// expects neither payload nor input; [`with_payload`](Self::with_payload)
/// and [`with_requests`](Self::with_requests) enable them.
pub struct StreamTypeHandler<P, Req, Resp> {
    pub(super) id: HandlerId,
    pub(super) in_capacity: usize,
    pub(super) out_capacity: usize,
    pub(super) shared_response: bool,
    pub(super) new_payload: Option<Constructor<P>>,
    pub(super) req_pool: Option<Arc<ObjectPool<Req>>>,
    pub(super) resp_pool: Arc<ObjectPool<Resp>>,
}

impl<P, Req, Resp> Clone for StreamTypeHandler<P, Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            in_capacity: self.in_capacity,
            out_capacity: self.out_capacity,
            shared_response: self.shared_response,
            new_payload: self.new_payload.clone(),
            req_pool: self.req_pool.clone(),
            resp_pool: self.resp_pool.clone(),
        }
    }
}

impl<P, Req, Resp> StreamTypeHandler<P, Req, Resp>
where
    P: RoundTripper,
    Req: RoundTripper,
    Resp: RoundTripper,
{
    /// Create an adapter that sends `Resp` messages and expects no payload and no input.
    pub fn new<NewResp>(id: HandlerId, new_response: NewResp) -> Self
    where
        NewResp: Fn() -> Resp + Send + Sync + 'static,
    {
        Self {
            id,
            in_capacity: 0,
            out_capacity: DEFAULT_STREAM_CAPACITY,
            shared_response: false,
            new_payload: None,
            req_pool: None,
            resp_pool: Arc::new(ObjectPool::new(new_response)),
        }
    }

    /// Parse an initial payload built with `new_payload`.
    pub fn with_payload<NewP>(mut self, new_payload: NewP) -> Self
    where
        NewP: Fn() -> P + Send + Sync + 'static,
    {
        self.new_payload = Some(Arc::new(new_payload));
        self
    }

    /// Accept `Req` messages from the caller, built with `new_request`.
    ///
    /// Sets the input capacity to the default if it was 0.
    pub fn with_requests<NewReq>(mut self, new_request: NewReq) -> Self
    where
        NewReq: Fn() -> Req + Send + Sync + 'static,
    {
        self.req_pool = Some(Arc::new(ObjectPool::new(new_request)));
        if self.in_capacity == 0 {
            self.in_capacity = DEFAULT_STREAM_CAPACITY;
        }
        self
    }

    /// Set the input capacity. Ignored while no request constructor is set.
    pub fn with_in_capacity(mut self, capacity: usize) -> Self {
        if self.req_pool.is_some() {
            self.in_capacity = capacity;
        }
        self
    }

    /// Set the output capacity. Values below 1 mean 1.
    pub fn with_out_capacity(mut self, capacity: usize) -> Self {
        self.out_capacity = capacity.max(1);
        self
    }

    /// Responses sent by the handler are not put back into the pool.
    pub fn with_shared_response(mut self) -> Self {
        self.shared_response = true;
        self
    }

    /// The handler id.
    #[inline]
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Input capacity; 0 when no input is expected.
    #[inline]
    pub fn in_capacity(&self) -> usize {
        self.in_capacity
    }

    /// Output capacity.
    #[inline]
    pub fn out_capacity(&self) -> usize {
        self.out_capacity
    }

    /// Build a fresh payload, or the default when payloads are disabled.
    pub fn new_payload(&self) -> P {
        match &self.new_payload {
            Some(new) => new(),
            None => P::default(),
        }
    }

    /// Take a request from the pool. Returns the default when no input is expected.
    pub fn new_request(&self) -> Req {
        match &self.req_pool {
            Some(pool) => pool.get(),
            None => Req::default(),
        }
    }

    /// Return a request to the pool.
    pub fn put_request(&self, req: Req) {
        if let Some(pool) = &self.req_pool {
            pool.put(req);
        }
    }

    /// Take a response from the pool.
    pub fn new_response(&self) -> Resp {
        self.resp_pool.get()
    }

    /// Return a response to the pool.
    pub fn put_response(&self, resp: Resp) {
        self.resp_pool.put(resp);
    }

    /// Install `handle` in `registry`.
    ///
    /// `subroute` parts are joined with `/`; no parts registers the default handler.
    /// The handler receives the call context, the decoded payload, the request
    /// queue (`None` when no input is expected) and the response queue. It must
    /// watch `ctx` for cancellation and must keep reading requests until it returns.
    pub fn register<F, Fut>(&self, registry: &mut HandlerRegistry, handle: F, subroute: &[&str]) -> Result<()>
    where
        F: Fn(Context, P, Option<mpsc::Receiver<Req>>, mpsc::Sender<Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let this = self.clone();
        let handle = Arc::new(handle);
        let stream_fn: StreamHandlerFn = Arc::new(
            move |ctx: Context,
                  payload: Vec<u8>,
                  inbound: Option<mpsc::Receiver<Vec<u8>>>,
                  out: mpsc::Sender<Vec<u8>>|
                  -> BoxFuture<'static, HandlerResult> {
                let this = this.clone();
                let handle = handle.clone();
                Box::pin(async move { this.serve(ctx, payload, inbound, out, &*handle).await })
            },
        );

        registry.register_stream(
            self.id,
            StreamHandler {
                handle: stream_fn,
                subroute: subroute.join("/"),
                out_capacity: self.out_capacity,
                in_capacity: self.in_capacity,
            },
        )
    }

    /// Like [`register`](Self::register) for handlers that take no input.
    ///
    /// The adapter's input capacity is set to 0.
    pub fn register_no_input<F, Fut>(&mut self, registry: &mut HandlerRegistry, handle: F, subroute: &[&str]) -> Result<()>
    where
        F: Fn(Context, P, mpsc::Sender<Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.in_capacity = 0;
        self.register(
            registry,
            move |ctx: Context, payload: P, _in: Option<mpsc::Receiver<Req>>, out: mpsc::Sender<Resp>| {
                handle(ctx, payload, out)
            },
            subroute,
        )
    }

    /// Like [`register`](Self::register) for handlers that take no payload.
    ///
    /// Payload parsing is disabled on the adapter.
    pub fn register_no_payload<F, Fut>(
        &mut self,
        registry: &mut HandlerRegistry,
        handle: F,
        subroute: &[&str],
    ) -> Result<()>
    where
        F: Fn(Context, Option<mpsc::Receiver<Req>>, mpsc::Sender<Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.new_payload = None;
        self.register(
            registry,
            move |ctx: Context, _payload: P, inbound: Option<mpsc::Receiver<Req>>, out: mpsc::Sender<Resp>| {
                handle(ctx, inbound, out)
            },
            subroute,
        )
    }

    /// Run one stream: decode the payload, start the forwarders, run the
    /// handler, then wait for the forwarders to finish.
    async fn serve<F, Fut>(
        &self,
        ctx: Context,
        payload: Vec<u8>,
        inbound: Option<mpsc::Receiver<Vec<u8>>>,
        out: mpsc::Sender<Vec<u8>>,
        handle: &F,
    ) -> HandlerResult
    where
        F: Fn(Context, P, Option<mpsc::Receiver<Req>>, mpsc::Sender<Resp>) -> Fut,
        Fut: Future<Output = HandlerResult>,
    {
        let decoded = self.decode_payload(&payload);
        put_byte_buffer(payload);
        let payload = decoded.map_err(RemoteErr::from)?;

        let (requests, input_task) = match (inbound, &self.req_pool) {
            (Some(raw), Some(pool)) if self.in_capacity > 0 => {
                let (tx, rx) = mpsc::channel(1);
                let task = tokio::spawn(forward_input(ctx.clone(), self.id, raw, tx, pool.clone()));
                (Some(rx), Some(task))
            }
            _ => (None, None),
        };

        let (resp_tx, resp_rx) = mpsc::channel(1);
        let output_task = tokio::spawn(forward_output(
            ctx.clone(),
            self.id,
            resp_rx,
            out,
            self.resp_pool.clone(),
            self.shared_response,
        ));

        let result = handle(ctx, payload, requests, resp_tx).await;

        // The response sender was dropped with the handler, so the output forwarder drains and exits.
        if let Err(err) = output_task.await {
            tracing::error!(handler = %self.id, error = %err, "output forwarder failed");
        }
        if let Some(task) = input_task {
            if let Err(err) = task.await {
                tracing::error!(handler = %self.id, error = %err, "input forwarder failed");
            }
        }
        result
    }

    fn decode_payload(&self, buf: &[u8]) -> Result<P> {
        match &self.new_payload {
            Some(new) => {
                let mut payload = new();
                payload.decode_from(buf)?;
                Ok(payload)
            }
            None => Ok(P::default()),
        }
    }
}

/// Decode raw inbound messages and hand them to the handler.
///
/// A slot in the typed queue is reserved before the next raw message is
/// read, so nothing is decoded ahead of the handler's demand.
async fn forward_input<Req: RoundTripper>(
    ctx: Context,
    id: HandlerId,
    mut raw: mpsc::Receiver<Vec<u8>>,
    tx: mpsc::Sender<Req>,
    pool: Arc<ObjectPool<Req>>,
) {
    loop {
        let permit = tokio::select! {
            permit = tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
            _ = ctx.done() => return,
        };

        let req = loop {
            let msg = tokio::select! {
                msg = raw.recv() => match msg {
                    Some(msg) => msg,
                    None => return,
                },
                _ = tx.closed() => return,
                _ = ctx.done() => return,
            };

            let mut req = pool.get();
            let decoded = req.decode_from(&msg).map(|_| ());
            put_byte_buffer(msg);
            match decoded {
                Ok(()) => break req,
                Err(err) => {
                    warn!(handler = %id, prefix = id.trace_prefix(), error = %err, "dropping undecodable stream message");
                    pool.put(req);
                }
            }
        };
        permit.send(req);
    }
}

/// Encode handler output and forward it to the raw outbound queue.
///
/// After cancellation or once the outbound queue is gone, keeps draining the
/// typed queue and discards what it receives.
async fn forward_output<Resp: RoundTripper>(
    ctx: Context,
    id: HandlerId,
    mut rx: mpsc::Receiver<Resp>,
    out: mpsc::Sender<Vec<u8>>,
    pool: Arc<ObjectPool<Resp>>,
    shared: bool,
) {
    let mut discard = false;
    while let Some(resp) = rx.recv().await {
        if discard {
            if !shared {
                pool.put(resp);
            }
            continue;
        }

        let mut buf = get_byte_buffer();
        let encoded = resp.encode_into(&mut buf);
        if !shared {
            pool.put(resp);
        }
        if let Err(err) = encoded {
            warn!(handler = %id, prefix = id.trace_prefix(), error = %err, "dropping unencodable stream response");
            put_byte_buffer(buf);
            continue;
        }

        tokio::select! {
            permit = out.reserve() => match permit {
                Ok(permit) => permit.send(buf),
                Err(_) => {
                    put_byte_buffer(buf);
                    discard = true;
                }
            },
            _ = ctx.done() => {
                put_byte_buffer(buf);
                discard = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::NoPayload;
    use crate::error::GridError;
    use crate::handler::RemoteClient;
    use crate::transport::{LocalConnection, Streamer};
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Serialize, Deserialize, Default, PartialEq, Debug, Clone)]
    struct Num {
        n: u64,
    }

    impl RoundTripper for Num {}

    /// Same wire form as `Num`, but fails to serialize when `n` is 13.
    #[derive(Deserialize, Default, PartialEq, Debug)]
    struct Flaky {
        n: u64,
    }

    impl Serialize for Flaky {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
            use serde::ser::{Error, SerializeStruct};
            if self.n == 13 {
                return Err(S::Error::custom("boom"));
            }
            let mut st = serializer.serialize_struct("Flaky", 1)?;
            st.serialize_field("n", &self.n)?;
            st.end()
        }
    }

    impl RoundTripper for Flaky {}

    fn connection(registry: HandlerRegistry) -> LocalConnection {
        LocalConnection::new(Arc::new(registry), RemoteClient::new("node-1:9000"))
    }

    /// Serve a handler that sends `make(n)` for each of `values`.
    fn sending<Resp: RoundTripper>(
        handler: &StreamTypeHandler<NoPayload, NoPayload, Resp>,
        make: fn(u64) -> Resp,
        values: &'static [u64],
    ) -> LocalConnection {
        let mut registry = HandlerRegistry::new();
        handler
            .register(
                &mut registry,
                move |_ctx: Context, _p: NoPayload, _in: Option<mpsc::Receiver<NoPayload>>, out: mpsc::Sender<Resp>| async move {
                    for &n in values {
                        out.send(make(n)).await.map_err(|_| RemoteErr::new("closed"))?;
                    }
                    Ok::<(), RemoteErr>(())
                },
                &[],
            )
            .unwrap();
        connection(registry)
    }

    /// Read the whole stream, decoding each message as `Num`.
    async fn received(conn: &LocalConnection) -> Vec<u64> {
        let stream = conn
            .new_stream(&Context::new(), HandlerId::WALK_DIR, None)
            .await
            .unwrap();
        let mut got = Vec::new();
        stream
            .results(|buf| {
                let mut num = Num::default();
                num.decode_from(&buf)?;
                got.push(num.n);
                Ok(())
            })
            .await
            .unwrap();
        got
    }

    #[test]
    fn test_defaults() {
        let no_input: StreamTypeHandler<NoPayload, NoPayload, Num> = StreamTypeHandler::new(HandlerId::WALK_DIR, Num::default);
        assert_eq!(no_input.in_capacity(), 0);
        assert_eq!(no_input.out_capacity(), DEFAULT_STREAM_CAPACITY);

        let with_input = no_input.clone().with_requests(NoPayload::default);
        assert_eq!(with_input.in_capacity(), DEFAULT_STREAM_CAPACITY);

        // Input capacity only applies when requests are accepted.
        assert_eq!(no_input.with_in_capacity(4).in_capacity(), 0);
        assert_eq!(with_input.with_in_capacity(4).with_out_capacity(0).out_capacity(), 1);
    }

    #[test]
    fn test_subroute_parts_are_joined() {
        let handler: StreamTypeHandler<NoPayload, NoPayload, Num> = StreamTypeHandler::new(HandlerId::WALK_DIR, Num::default);
        let mut registry = HandlerRegistry::new();
        handler
            .register(
                &mut registry,
                |_ctx: Context, _p: NoPayload, _in: Option<mpsc::Receiver<NoPayload>>, _out: mpsc::Sender<Num>| async {
                    Ok::<(), RemoteErr>(())
                },
                &["pool-1", "set-2"],
            )
            .unwrap();
        assert!(registry.stream(HandlerId::WALK_DIR, "pool-1/set-2").is_some());
        assert!(registry.stream(HandlerId::WALK_DIR, "").is_none());
    }

    #[tokio::test]
    async fn test_responses_return_to_pool() {
        let handler: StreamTypeHandler<NoPayload, NoPayload, Num> = StreamTypeHandler::new(HandlerId::WALK_DIR, Num::default);
        let conn = sending(&handler, |n| Num { n }, &[1, 2, 3]);

        assert_eq!(received(&conn).await, vec![1, 2, 3]);
        assert_eq!(handler.resp_pool.idle_count(), 3);
    }

    #[tokio::test]
    async fn test_shared_responses_stay_out_of_pool() {
        let handler: StreamTypeHandler<NoPayload, NoPayload, Num> =
            StreamTypeHandler::new(HandlerId::WALK_DIR, Num::default).with_shared_response();
        let conn = sending(&handler, |n| Num { n }, &[1, 2, 3]);

        assert_eq!(received(&conn).await, vec![1, 2, 3]);
        assert_eq!(handler.resp_pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_unencodable_response_is_dropped() {
        let handler: StreamTypeHandler<NoPayload, NoPayload, Flaky> = StreamTypeHandler::new(HandlerId::WALK_DIR, Flaky::default);
        let conn = sending(&handler, |n| Flaky { n }, &[1, 13, 2]);

        assert_eq!(received(&conn).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_payload_decode_failure() {
        let handler: StreamTypeHandler<Num, NoPayload, Num> =
            StreamTypeHandler::new(HandlerId::WALK_DIR, Num::default).with_payload(Num::default);
        let mut registry = HandlerRegistry::new();
        handler
            .register(
                &mut registry,
                |_ctx: Context, _p: Num, _in: Option<mpsc::Receiver<NoPayload>>, _out: mpsc::Sender<Num>| async {
                    Err::<(), RemoteErr>(RemoteErr::new("handler must not run"))
                },
                &[],
            )
            .unwrap();

        let stream = connection(registry)
            .new_stream(&Context::new(), HandlerId::WALK_DIR, Some(&[0xc1]))
            .await
            .unwrap();
        let err = stream.results(|_| Ok(())).await.unwrap_err();
        assert!(err.remote().is_some());
        assert_ne!(err.to_string(), "handler must not run");
        assert!(!err.to_string().starts_with("MsgPack"));
    }

    #[tokio::test]
    async fn test_undecodable_message_is_dropped() {
        let handler: StreamTypeHandler<NoPayload, Num, Num> =
            StreamTypeHandler::new(HandlerId::WALK_DIR, Num::default).with_requests(Num::default);
        let mut registry = HandlerRegistry::new();
        handler
            .register(
                &mut registry,
                |_ctx: Context, _p: NoPayload, inbound: Option<mpsc::Receiver<Num>>, out: mpsc::Sender<Num>| async move {
                    let mut inbound = inbound.ok_or_else(|| RemoteErr::new("no input"))?;
                    while let Some(req) = inbound.recv().await {
                        out.send(req).await.map_err(|_| RemoteErr::new("closed"))?;
                    }
                    Ok::<(), RemoteErr>(())
                },
                &[],
            )
            .unwrap();

        let mut stream = connection(registry)
            .new_stream(&Context::new(), HandlerId::WALK_DIR, None)
            .await
            .unwrap();
        let requests = stream.requests.take().unwrap();
        tokio::spawn(async move {
            let mut first = Vec::new();
            Num { n: 1 }.encode_into(&mut first).unwrap();
            let mut second = Vec::new();
            Num { n: 2 }.encode_into(&mut second).unwrap();

            requests.send(first).await.unwrap();
            requests.send(vec![0xc1]).await.unwrap();
            requests.send(second).await.unwrap();
        });

        let mut seen = Vec::new();
        stream
            .results(|buf| {
                let mut num = Num::default();
                num.decode_from(&buf)?;
                seen.push(num.n);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_cancel_unblocks_handler_on_full_output() {
        let (done_tx, mut done_rx) = mpsc::channel::<usize>(1);
        let handler: StreamTypeHandler<NoPayload, NoPayload, Num> = StreamTypeHandler::new(HandlerId::WALK_DIR, Num::default);
        let mut registry = HandlerRegistry::new();
        handler
            .register(
                &mut registry,
                move |_ctx: Context, _p: NoPayload, _in: Option<mpsc::Receiver<NoPayload>>, out: mpsc::Sender<Num>| {
                    let done_tx = done_tx.clone();
                    async move {
                        // Ignores cancellation on purpose; the forwarder must keep draining.
                        let mut sent = 0;
                        for n in 0..100 {
                            if out.send(Num { n }).await.is_err() {
                                break;
                            }
                            sent += 1;
                        }
                        let _ = done_tx.send(sent).await;
                        Ok::<(), RemoteErr>(())
                    }
                },
                &[],
            )
            .unwrap();

        let ctx = Context::new();
        let stream = connection(registry)
            .new_stream(&ctx, HandlerId::WALK_DIR, None)
            .await
            .unwrap();

        // Nobody reads the stream; canceling must still let the handler finish.
        ctx.cancel();
        let sent = tokio::time::timeout(Duration::from_secs(2), done_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sent, 100);

        let err = stream.results(|_| Ok(())).await;
        assert!(matches!(err, Ok(()) | Err(GridError::Canceled)));
    }
}
