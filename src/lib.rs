//! # gridwire
//!
//! Typed RPC and bidirectional streaming core for node-to-node traffic in a
//! storage grid.
//!
//! ## Architecture
//!
//! - **Byte level**: [`handler::HandlerRegistry`] maps a [`id::HandlerId`]
//!   (optionally narrowed by a subroute) to byte-in/byte-out handlers
//! - **Typed level**: [`typed::SingleHandler`] and [`typed::StreamTypeHandler`]
//!   encode, decode and pool values on top of the byte handlers
//! - **Transport**: reached through the [`transport::Requester`] and
//!   [`transport::Streamer`] traits; [`transport::LocalConnection`] serves a
//!   registry in-process
//!
//! Handler failures travel as [`RemoteErr`] and stay distinguishable from
//! local failures (`GridError` variants other than `Remote`).
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use gridwire::codec::{NoPayload, RoundTripper};
//! use gridwire::handler::{Context, HandlerRegistry, RemoteClient};
//! use gridwire::id::HandlerId;
//! use gridwire::transport::LocalConnection;
//! use gridwire::typed::StreamTypeHandler;
//! use gridwire::RemoteErr;
//! use serde::{Deserialize, Serialize};
//! use tokio::sync::mpsc;
//!
//! #[derive(Serialize, Deserialize, Default, PartialEq, Debug)]
//! struct Num { n: u64 }
//! impl RoundTripper for Num {}
//!
//! # tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap().block_on(async {
//! let doubler: StreamTypeHandler<NoPayload, Num, Num> =
//!     StreamTypeHandler::new(HandlerId::TEST, Num::default).with_requests(Num::default);
//!
//! let mut registry = HandlerRegistry::new();
//! doubler
//!     .register(
//!         &mut registry,
//!         |_ctx: Context, _p: NoPayload, input: Option<mpsc::Receiver<Num>>, out: mpsc::Sender<Num>| async move {
//!             let mut input = input.ok_or_else(|| RemoteErr::new("no input"))?;
//!             while let Some(req) = input.recv().await {
//!                 out.send(Num { n: req.n * 2 }).await.map_err(|_| RemoteErr::new("closed"))?;
//!             }
//!             Ok::<(), RemoteErr>(())
//!         },
//!         &[],
//!     )
//!     .unwrap();
//!
//! let conn = LocalConnection::new(Arc::new(registry), RemoteClient::new("node-1"));
//! let mut stream = doubler.call(&Context::new(), &conn, NoPayload).await.unwrap();
//! let requests = stream.requests.take().unwrap();
//! tokio::spawn(async move {
//!     for n in 1..=3 {
//!         requests.send(Num { n }).await.unwrap();
//!     }
//! });
//!
//! let mut got = Vec::new();
//! stream.results(|resp| { got.push(resp.n); Ok(()) }).await.unwrap();
//! assert_eq!(got, vec![2, 4, 6]);
//! # });
//! ```

pub mod buffer;
pub mod codec;
pub mod error;
pub mod handler;
pub mod id;
pub mod pool;
pub mod transport;
pub mod typed;

pub use error::{is_remote_err, GridError, RemoteErr, Result};
pub use handler::{Context, HandlerRegistry};
pub use id::{HandlerId, SubHandlerId};
pub use typed::{SingleHandler, StreamTypeHandler, TypedStream};
