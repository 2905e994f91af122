//! Typed adapters over the byte-level handlers.
//!
//! - [`SingleHandler`] - one typed request, one typed response
//! - [`StreamTypeHandler`] - typed payload, request stream and response stream
//! - [`TypedStream`] - client view returned by [`StreamTypeHandler::call`]
//!
//! Each adapter owns its object pools. Values taken from an adapter go back to
//! the same adapter.

mod client;
mod single;
mod stream;

pub use client::TypedStream;
pub use single::{SingleHandler, DEFAULT_CALL_TIMEOUT};
pub use stream::{StreamTypeHandler, DEFAULT_STREAM_CAPACITY};
