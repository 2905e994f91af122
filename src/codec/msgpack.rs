//! MsgPack codec using `rmp-serde`.
//!
//! Always uses the named (struct-as-map) encoding, so peers can add or reorder
//! fields without breaking older decoders.
//!
//! # Example
//!
//! ```
//! use gridwire::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct LockArgs {
//!     uid: String,
//!     resources: Vec<String>,
//! }
//!
//! let args = LockArgs { uid: "u-1".to_string(), resources: vec!["bucket/obj".to_string()] };
//! let encoded = MsgPackCodec::encode(&args).unwrap();
//! let decoded: LockArgs = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, args);
//! ```

use std::io;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    #[inline]
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Append the MsgPack encoding of `value` to `buf`.
    ///
    /// On error `buf` may hold a partial encoding; callers discard it.
    #[inline]
    pub fn encode_into<T: Serialize + ?Sized>(value: &T, buf: &mut Vec<u8>) -> Result<()> {
        rmp_serde::encode::write_named(buf, value)?;
        Ok(())
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Decode one value from the front of `bytes`, returning it with the rest.
    pub fn decode_prefix<T: DeserializeOwned>(bytes: &[u8]) -> Result<(T, &[u8])> {
        let mut rest = bytes;
        let value = rmp_serde::from_read(&mut rest)?;
        Ok((value, rest))
    }

    /// Exact encoded size of `value`, without allocating the encoding.
    ///
    /// Returns 0 if the value cannot be encoded.
    pub fn encoded_size<T: Serialize + ?Sized>(value: &T) -> usize {
        let mut counter = ByteCounter(0);
        match rmp_serde::encode::write_named(&mut counter, value) {
            Ok(()) => counter.0,
            Err(_) => 0,
        }
    }
}

/// Writer that only counts bytes.
struct ByteCounter(usize);

impl io::Write for ByteCounter {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
