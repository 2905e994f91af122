//! Error types for gridwire.
//!
//! Two domains never mix:
//!
//! - [`GridError`] covers everything that stops a call from completing
//!   (deadline, cancellation, unknown handler, codec failures on the local side).
//! - [`RemoteErr`] is the only error that crosses the wire. It carries the
//!   remote's message and nothing else.

use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::HandlerId;

/// Main error type for all gridwire operations.
#[derive(Debug, Error)]
pub enum GridError {
    /// The remote handler reported an application error.
    #[error(transparent)]
    Remote(#[from] RemoteErr),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Handler id is invalid or nothing is registered for it.
    #[error("unknown handler: {0}")]
    UnknownHandler(HandlerId),

    /// A handler is already registered at the id (or id + subroute).
    #[error("handler already exists: {0}")]
    HandlerAlreadyExists(HandlerId),

    /// The call's deadline passed before a response arrived.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The call's context was canceled.
    #[error("call canceled")]
    Canceled,

    /// The stream was closed before the operation could complete.
    #[error("stream closed")]
    StreamClosed,

    /// Failure reported by the underlying transport.
    #[error("transport error: {0}")]
    Transport(String),
}

impl GridError {
    /// Returns the remote error if this error came from the remote handler.
    #[inline]
    pub fn remote(&self) -> Option<&RemoteErr> {
        match self {
            GridError::Remote(r) => Some(r),
            _ => None,
        }
    }
}

/// Result type alias using GridError.
pub type Result<T> = std::result::Result<T, GridError>;

/// Error returned by a remote handler.
///
/// Only the message survives the boundary; the original error type is not preserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteErr(String);

impl RemoteErr {
    /// Create a remote error from a message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Create a remote error from any error. Only its message is kept.
    pub fn from_error(err: &dyn StdError) -> Self {
        Self(err.to_string())
    }

    /// The error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }

    /// Reports whether `other` is a remote error with the same message.
    ///
    /// Matches both a bare `RemoteErr` and a `GridError::Remote`.
    pub fn matches(&self, other: &(dyn StdError + 'static)) -> bool {
        if let Some(r) = other.downcast_ref::<RemoteErr>() {
            return r == self;
        }
        match other.downcast_ref::<GridError>() {
            Some(GridError::Remote(r)) => r == self,
            _ => false,
        }
    }
}

impl fmt::Display for RemoteErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for RemoteErr {}

/// Codec failures keep only rmp-serde's own message.
impl From<GridError> for RemoteErr {
    fn from(err: GridError) -> Self {
        match err {
            GridError::Remote(r) => r,
            GridError::MsgPackEncode(e) => Self(e.to_string()),
            GridError::MsgPackDecode(e) => Self(e.to_string()),
            other => Self(other.to_string()),
        }
    }
}

impl From<&str> for RemoteErr {
    fn from(msg: &str) -> Self {
        Self::new(msg)
    }
}

impl From<String> for RemoteErr {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

/// Returns the remote error if `err` is one.
///
/// Lets callers tell "the remote rejected the call" apart from
/// "the call did not complete".
pub fn is_remote_err(err: &GridError) -> Option<&RemoteErr> {
    err.remote()
}

/// Helper for handlers without a response payload.
///
/// Converts an optional failure into the remote error shape.
pub fn no_payload_err<E: StdError>(result: std::result::Result<(), E>) -> std::result::Result<(), RemoteErr> {
    result.map_err(|e| RemoteErr::from_error(&e))
}
