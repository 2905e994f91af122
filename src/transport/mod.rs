//! Transport module - the byte-level seam below the typed adapters.
//!
//! Connection management, multiplexing and retries live behind two traits:
//! - [`Requester`] - single request, single response
//! - [`Streamer`] - opens a bidirectional [`Stream`]
//!
//! [`LocalConnection`] implements both over an in-process [`HandlerRegistry`](crate::handler::HandlerRegistry).

mod local;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::buffer::put_byte_buffer;
use crate::error::Result;
use crate::handler::{BoxFuture, Context};
use crate::id::HandlerId;

pub use local::LocalConnection;

/// Sends single requests to a remote.
///
/// Errors returned here are transport errors, except `GridError::Remote`
/// which carries the remote handler's own failure.
pub trait Requester: Send + Sync {
    /// Send `req` to handler `id` and wait for the response bytes.
    ///
    /// `req` is only borrowed; the caller still owns and releases it.
    fn request<'a>(&'a self, ctx: &'a Context, id: HandlerId, req: &'a [u8]) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// Opens streams to a remote.
pub trait Streamer: Send + Sync {
    /// Open a stream to handler `id` with an optional initial payload.
    fn new_stream<'a>(
        &'a self,
        ctx: &'a Context,
        id: HandlerId,
        payload: Option<&'a [u8]>,
    ) -> BoxFuture<'a, Result<Stream>>;
}

/// Client side of a raw bidirectional stream.
///
/// Responses must be consumed with [`Stream::results`], either to the end or
/// to the first error. Dropping the stream cancels the remote handler.
pub struct Stream {
    /// Messages to the remote handler. `None` if the handler takes no input.
    ///
    /// Drop the sender to signal the end of input.
    pub requests: Option<mpsc::Sender<Vec<u8>>>,
    responses: mpsc::Receiver<Result<Vec<u8>>>,
    cancel: CancellationToken,
}

impl Stream {
    /// Assemble a stream from its queues. Used by transports.
    ///
    /// `cancel` is triggered when the consumer stops early or drops the stream.
    pub fn new(
        requests: Option<mpsc::Sender<Vec<u8>>>,
        responses: mpsc::Receiver<Result<Vec<u8>>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            requests,
            responses,
            cancel,
        }
    }

    /// Consume responses one by one until the remote closes the stream.
    ///
    /// Each message buffer is handed to `next`. The first error, from the
    /// remote or from `next`, cancels the stream, drains what is left and is
    /// returned.
    pub async fn results<F>(mut self, mut next: F) -> Result<()>
    where
        F: FnMut(Vec<u8>) -> Result<()>,
    {
        while let Some(msg) = self.responses.recv().await {
            if let Err(err) = msg.and_then(&mut next) {
                self.cancel.cancel();
                self.drain().await;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Cancel the remote handler.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    async fn drain(&mut self) {
        while let Some(msg) = self.responses.recv().await {
            if let Ok(buf) = msg {
                put_byte_buffer(buf);
            }
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
