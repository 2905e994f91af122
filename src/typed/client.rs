//! Typed stream adapter, client side.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use super::StreamTypeHandler;
use crate::buffer::{get_byte_buffer, put_byte_buffer};
use crate::codec::RoundTripper;
use crate::error::Result;
use crate::handler::Context;
use crate::id::HandlerId;
use crate::pool::ObjectPool;
use crate::transport::{Stream, Streamer};

impl<P, Req, Resp> StreamTypeHandler<P, Req, Resp>
where
    P: RoundTripper,
    Req: RoundTripper,
    Resp: RoundTripper,
{
    /// Open a typed stream to the handler.
    ///
    /// `payload` is only sent when the adapter parses payloads. Requests sent
    /// on [`TypedStream::requests`] are returned to this adapter's pool once
    /// encoded.
    pub async fn call<S>(&self, ctx: &Context, streamer: &S, payload: P) -> Result<TypedStream<Req, Resp>>
    where
        S: Streamer + ?Sized,
    {
        let encoded = match self.new_payload {
            Some(_) => {
                let mut buf = get_byte_buffer();
                if let Err(err) = payload.encode_into(&mut buf) {
                    put_byte_buffer(buf);
                    return Err(err);
                }
                Some(buf)
            }
            None => None,
        };

        let opened = streamer.new_stream(ctx, self.id, encoded.as_deref()).await;
        if let Some(buf) = encoded {
            put_byte_buffer(buf);
        }
        let mut stream = opened?;

        // Dropping an unused raw sender closes the remote's input.
        let requests = match (stream.requests.take(), &self.req_pool) {
            (Some(raw), Some(pool)) if self.in_capacity > 0 => {
                let (tx, rx) = mpsc::channel(1);
                tokio::spawn(forward_requests(ctx.clone(), self.id, rx, raw, pool.clone()));
                Some(tx)
            }
            _ => None,
        };

        Ok(TypedStream {
            requests,
            responses: stream,
            resp_pool: self.resp_pool.clone(),
        })
    }
}

/// Client view of a typed stream.
pub struct TypedStream<Req, Resp> {
    /// Requests to the handler. `None` when the handler takes no input.
    ///
    /// Take the sender before calling [`results`](Self::results) and drop it
    /// to close the input.
    pub requests: Option<mpsc::Sender<Req>>,
    responses: Stream,
    resp_pool: Arc<ObjectPool<Resp>>,
}

impl<Req, Resp: RoundTripper> TypedStream<Req, Resp> {
    /// Decode responses one by one and pass them to `next`.
    ///
    /// Stops at the first decode error, remote error or error from `next`,
    /// and returns it. Each response is owned by `next`; it may give it back
    /// with `put_response` on the adapter.
    pub async fn results<F>(self, mut next: F) -> Result<()>
    where
        F: FnMut(Resp) -> Result<()>,
    {
        let TypedStream {
            requests,
            responses,
            resp_pool,
        } = self;
        drop(requests);

        responses
            .results(|buf| {
                let mut resp = resp_pool.get();
                let decoded = resp.decode_from(&buf).map(|_| ());
                put_byte_buffer(buf);
                match decoded {
                    Ok(()) => next(resp),
                    Err(err) => {
                        resp_pool.put(resp);
                        Err(err)
                    }
                }
            })
            .await
    }

    /// Cancel the remote handler.
    pub fn cancel(&self) {
        self.responses.cancel();
    }
}

/// Encode typed requests and forward them to the raw request queue.
async fn forward_requests<Req: RoundTripper>(
    ctx: Context,
    id: HandlerId,
    mut rx: mpsc::Receiver<Req>,
    raw: mpsc::Sender<Vec<u8>>,
    pool: Arc<ObjectPool<Req>>,
) {
    loop {
        let req = tokio::select! {
            req = rx.recv() => match req {
                Some(req) => req,
                None => return,
            },
            _ = raw.closed() => return,
            _ = ctx.done() => return,
        };

        let mut buf = get_byte_buffer();
        let encoded = req.encode_into(&mut buf);
        pool.put(req);
        if let Err(err) = encoded {
            warn!(handler = %id, prefix = id.trace_prefix(), error = %err, "dropping unencodable stream request");
            put_byte_buffer(buf);
            continue;
        }

        tokio::select! {
            permit = raw.reserve() => match permit {
                Ok(permit) => permit.send(buf),
                Err(_) => {
                    put_byte_buffer(buf);
                    return;
                }
            },
            _ = ctx.done() => {
                put_byte_buffer(buf);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::NoPayload;
    use crate::error::{GridError, RemoteErr};
    use crate::handler::{HandlerRegistry, RemoteClient};
    use crate::id::HandlerId;
    use crate::transport::LocalConnection;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Serialize, Deserialize, Default, PartialEq, Debug, Clone)]
    struct WalkDirOptions {
        bucket: String,
        limit: u64,
    }

    impl RoundTripper for WalkDirOptions {}

    #[derive(Serialize, Deserialize, Default, PartialEq, Debug, Clone)]
    struct Entry {
        name: String,
    }

    impl RoundTripper for Entry {}

    fn walk_dir() -> (StreamTypeHandler<WalkDirOptions, NoPayload, Entry>, LocalConnection) {
        let mut handler = StreamTypeHandler::new(HandlerId::WALK_DIR, Entry::default).with_payload(WalkDirOptions::default);
        let mut registry = HandlerRegistry::new();
        handler
            .register_no_input(
                &mut registry,
                |ctx: Context, opts: WalkDirOptions, out: mpsc::Sender<Entry>| async move {
                    if opts.bucket.is_empty() {
                        return Err(RemoteErr::new("bucket not found"));
                    }
                    for i in 0..opts.limit {
                        let entry = Entry {
                            name: format!("{}/obj-{i}", opts.bucket),
                        };
                        tokio::select! {
                            sent = out.send(entry) => sent.map_err(|_| RemoteErr::new("closed"))?,
                            _ = ctx.done() => return Ok(()),
                        }
                    }
                    Ok::<(), RemoteErr>(())
                },
                &[],
            )
            .unwrap();
        let conn = LocalConnection::new(Arc::new(registry), RemoteClient::new("node-1:9000"));
        (handler, conn)
    }

    #[tokio::test]
    async fn test_payload_and_results() {
        let (handler, conn) = walk_dir();
        let opts = WalkDirOptions {
            bucket: "photos".into(),
            limit: 3,
        };

        let stream = handler.call(&Context::new(), &conn, opts).await.unwrap();
        assert!(stream.requests.is_none());

        let mut names = Vec::new();
        stream
            .results(|entry| {
                names.push(entry.name.clone());
                handler.put_response(entry);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(names, vec!["photos/obj-0", "photos/obj-1", "photos/obj-2"]);
    }

    #[tokio::test]
    async fn test_remote_error() {
        let (handler, conn) = walk_dir();
        let stream = handler
            .call(&Context::new(), &conn, WalkDirOptions::default())
            .await
            .unwrap();

        let err = stream.results(|_| Ok(())).await.unwrap_err();
        assert_eq!(err.to_string(), "bucket not found");
    }

    #[tokio::test]
    async fn test_callback_error_stops_stream() {
        let (handler, conn) = walk_dir();
        let opts = WalkDirOptions {
            bucket: "photos".into(),
            limit: 1_000_000,
        };
        let stream = handler.call(&Context::new(), &conn, opts).await.unwrap();

        let mut seen = 0;
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            stream.results(|_| {
                seen += 1;
                if seen == 2 {
                    return Err(GridError::Transport("enough".into()));
                }
                Ok(())
            }),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(GridError::Transport(_))));
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn test_cancel_stops_remote_handler() {
        let (handler, conn) = walk_dir();
        let opts = WalkDirOptions {
            bucket: "photos".into(),
            limit: u64::MAX,
        };
        let stream = handler.call(&Context::new(), &conn, opts).await.unwrap();
        stream.cancel();

        // The handler sees cancellation and the stream ends instead of running forever.
        let result = tokio::time::timeout(Duration::from_secs(2), stream.results(|_| Ok(())))
            .await
            .unwrap();
        assert!(matches!(result, Ok(()) | Err(GridError::Canceled)));
    }

    #[tokio::test]
    async fn test_unknown_handler() {
        let handler: StreamTypeHandler<NoPayload, NoPayload, Entry> = StreamTypeHandler::new(HandlerId::READ_XL, Entry::default);
        let conn = LocalConnection::new(Arc::new(HandlerRegistry::new()), RemoteClient::new("node-1:9000"));

        let err = handler.call(&Context::new(), &conn, NoPayload).await.err().unwrap();
        assert!(matches!(err, GridError::UnknownHandler(_)));
        assert!(err.remote().is_none());
    }
}
