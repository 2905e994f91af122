//! Codec module - typed payload serialization.
//!
//! - [`RoundTripper`] - capability every request/response/payload type needs
//!   to pass through the typed adapters
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (struct-as-map format)
//! - [`NoPayload`] - placeholder for handlers without a payload
//!
//! # Example
//!
//! ```
//! use gridwire::codec::RoundTripper;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Default, PartialEq, Debug)]
//! struct DiskInfoRequest {
//!     disk: String,
//! }
//!
//! impl RoundTripper for DiskInfoRequest {}
//!
//! let req = DiskInfoRequest { disk: "/data1".into() };
//! let mut buf = Vec::new();
//! req.encode_into(&mut buf).unwrap();
//! assert_eq!(buf.len(), req.encoded_size());
//!
//! let mut decoded = DiskInfoRequest::default();
//! let rest = decoded.decode_from(&buf).unwrap();
//! assert!(rest.is_empty());
//! assert_eq!(decoded, req);
//! ```

mod msgpack;

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use msgpack::MsgPackCodec;

/// Serialization round trip for values carried by the typed adapters.
///
/// Types opt in with an empty `impl RoundTripper for T {}`; the provided
/// methods encode with MsgPack. `T::default()` is the sentinel value that is
/// never stored in an object pool.
pub trait RoundTripper:
    Serialize + DeserializeOwned + PartialEq + Default + Debug + Send + Sync + 'static
{
    /// Decode from the front of `buf` into `self`, returning the unconsumed bytes.
    fn decode_from<'a>(&mut self, buf: &'a [u8]) -> Result<&'a [u8]> {
        let (value, rest) = MsgPackCodec::decode_prefix(buf)?;
        *self = value;
        Ok(rest)
    }

    /// Append the encoding of `self` to `buf`.
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<()> {
        MsgPackCodec::encode_into(self, buf)
    }

    /// Exact number of bytes `encode_into` appends.
    fn encoded_size(&self) -> usize {
        MsgPackCodec::encoded_size(self)
    }

    /// Clear the value before it goes back to a pool.
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Payload type for handlers that take no payload.
///
/// Encodes to zero bytes and decodes without consuming input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoPayload;

impl RoundTripper for NoPayload {
    fn decode_from<'a>(&mut self, buf: &'a [u8]) -> Result<&'a [u8]> {
        Ok(buf)
    }

    fn encode_into(&self, _buf: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }

    fn encoded_size(&self) -> usize {
        0
    }
}

impl RoundTripper for String {}
impl RoundTripper for u64 {}
impl RoundTripper for bool {}
