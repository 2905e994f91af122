//! Reusable byte buffers for encoded messages.
//!
//! Every encoded request, response and stream message is written into a buffer
//! taken from here. A buffer has one owner at a time: whoever receives it either
//! hands it on for transmission or gives it back with [`put_byte_buffer`],
//! exactly once.
//!
//! # Usage
//!
//! ```
//! use gridwire::buffer::{get_byte_buffer, put_byte_buffer};
//!
//! let mut buf = get_byte_buffer();
//! buf.extend_from_slice(b"payload");
//! // ... hand off or use ...
//! put_byte_buffer(buf);
//! ```

use parking_lot::Mutex;

/// Capacity of freshly allocated buffers.
pub const DEFAULT_BUFFER_SIZE: usize = 4 << 10;

/// Buffers with a larger capacity are not retained.
pub const MAX_BUFFER_SIZE: usize = 64 << 10;

/// Maximum number of idle buffers kept by a pool.
pub const MAX_IDLE_BUFFERS: usize = 1024;

/// A pool of byte buffers.
///
/// Retains only buffers whose capacity lies in
/// `DEFAULT_BUFFER_SIZE..=MAX_BUFFER_SIZE`, so one oversized message does not
/// pin its allocation forever.
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
}

impl BufferPool {
    /// Create an empty pool retaining at most `max_idle` buffers.
    pub const fn new(max_idle: usize) -> Self {
        Self {
            free: parking_lot::const_mutex(Vec::new()),
            max_idle,
        }
    }

    /// Take an empty buffer, allocating one if the pool is empty.
    pub fn get(&self) -> Vec<u8> {
        match self.free.lock().pop() {
            Some(buf) => buf,
            None => Vec::with_capacity(DEFAULT_BUFFER_SIZE),
        }
    }

    /// Return a buffer. Its contents are discarded.
    pub fn put(&self, mut buf: Vec<u8>) {
        let cap = buf.capacity();
        if !(DEFAULT_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&cap) {
            return;
        }
        buf.clear();
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(buf);
        }
    }

    /// Number of idle buffers.
    pub fn idle_count(&self) -> usize {
        self.free.lock().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(MAX_IDLE_BUFFERS)
    }
}

static BUFFER_POOL: BufferPool = BufferPool::new(MAX_IDLE_BUFFERS);

/// Take an empty buffer from the process-wide pool.
#[inline]
pub fn get_byte_buffer() -> Vec<u8> {
    BUFFER_POOL.get()
}

/// Return a buffer to the process-wide pool.
///
/// The buffer must not be referenced after this call.
#[inline]
pub fn put_byte_buffer(buf: Vec<u8>) {
    BUFFER_POOL.put(buf)
}
