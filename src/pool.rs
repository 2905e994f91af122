//! Pool of reusable typed values.
//!
//! Each typed adapter owns one pool per typed field. Pools are never shared
//! across adapters, so a pool only ever holds one handler's values.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::RoundTripper;

/// Default number of idle values retained per pool.
pub const DEFAULT_MAX_IDLE: usize = 256;

type Constructor<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Free-list of values of one type.
///
/// - `get` constructs a value when the list is empty.
/// - `put` ignores the sentinel (`T::default()`) and clears everything else
///   with [`RoundTripper::reset`] before storing it.
pub struct ObjectPool<T> {
    new: Constructor<T>,
    free: Mutex<Vec<T>>,
    sentinel: T,
    max_idle: usize,
}

impl<T: RoundTripper> ObjectPool<T> {
    /// Create a pool that builds values with `new`.
    pub fn new<F>(new: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_max_idle(new, DEFAULT_MAX_IDLE)
    }

    /// Create a pool retaining at most `max_idle` values.
    pub fn with_max_idle<F>(new: F, max_idle: usize) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            new: Arc::new(new),
            free: Mutex::new(Vec::new()),
            sentinel: T::default(),
            max_idle,
        }
    }

    /// Take a value from the pool.
    pub fn get(&self) -> T {
        let pooled = self.free.lock().pop();
        match pooled {
            Some(v) => v,
            None => (self.new)(),
        }
    }

    /// Return a value for reuse.
    pub fn put(&self, mut value: T) {
        if value == self.sentinel {
            return;
        }
        value.reset();
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(value);
        }
    }

    /// Number of idle values.
    pub fn idle_count(&self) -> usize {
        self.free.lock().len()
    }
}
