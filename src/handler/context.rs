//! Per-call context.
//!
//! A [`Context`] travels with every call on both sides:
//! - cancellation and an optional deadline, observed by forwarding tasks and handlers
//! - on the server, the caller identity and the active subroute (set by the dispatcher)
//! - on the client, optional trace parameters for the transport
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use gridwire::handler::Context;
//!
//! let ctx = Context::new().with_timeout(Duration::from_secs(5));
//! assert!(ctx.deadline().is_some());
//! assert!(!ctx.is_done());
//!
//! ctx.cancel();
//! assert!(ctx.is_done());
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::GridError;

/// Information about the remote caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteClient {
    /// Name of the calling node.
    pub name: String,
}

impl RemoteClient {
    /// Create caller information.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Context passed through every call.
///
/// `Context` is cheap to clone. Clones share the same cancellation signal.
#[derive(Debug, Clone)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    caller: Option<Arc<RemoteClient>>,
    subroute: Option<Arc<str>>,
    trace_params: Option<Arc<str>>,
}

impl Context {
    /// Create a context with no deadline.
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
            caller: None,
            subroute: None,
            trace_params: None,
        }
    }

    /// Context canceled when `token` is canceled.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Set the deadline to `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Set the deadline. An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(d) if d < deadline => d,
            _ => deadline,
        });
        self
    }

    /// Derive a context with its own cancellation signal.
    ///
    /// Canceling the child does not cancel `self`; canceling `self` cancels the child.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    /// Set the caller. Used by dispatchers.
    pub fn with_caller(mut self, caller: RemoteClient) -> Self {
        self.caller = Some(Arc::new(caller));
        self
    }

    /// Set the active subroute. Used by dispatchers.
    pub fn with_subroute(mut self, subroute: &str) -> Self {
        self.subroute = Some(Arc::from(subroute));
        self
    }

    /// Attach trace parameters describing the request.
    pub fn with_trace_params(mut self, params: impl Into<Arc<str>>) -> Self {
        self.trace_params = Some(params.into());
        self
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The cancellation token behind this context.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The deadline, if any.
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Caller information. Only set on the server side.
    #[inline]
    pub fn caller(&self) -> Option<&RemoteClient> {
        self.caller.as_deref()
    }

    /// Subroute the handler was reached through; empty when none.
    #[inline]
    pub fn subroute(&self) -> &str {
        self.subroute.as_deref().unwrap_or("")
    }

    /// Trace parameters attached by the caller.
    #[inline]
    pub fn trace_params(&self) -> Option<&str> {
        self.trace_params.as_deref()
    }

    /// True once the context is canceled or its deadline has passed.
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<GridError> {
        if self.cancel.is_cancelled() {
            Some(GridError::Canceled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(GridError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Completes when the context is canceled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
