//! Thread-safe sequence counter for request numbering.
//!
//! Every request a device sends carries an 8-bit sequence number that the bulb
//! echoes back in its acknowledgement or response.  The driver uses it to pair
//! a reply with the request that is waiting for it.  Eight bits wrap quickly,
//! which is fine: only a handful of requests are ever in flight per device.

use std::sync::atomic::{AtomicU8, Ordering};

/// A lock-free, wrapping counter for packet sequence numbers.
///
/// # Examples
///
/// ```rust
/// use lifx_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SequenceCounter {
    inner: AtomicU8,
}

impl SequenceCounter {
    /// Creates a new counter starting at 0.
    pub fn new() -> Self {
        Self {
            inner: AtomicU8::new(0),
        }
    }

    /// Returns the next sequence number, wrapping from 255 to 0.
    ///
    /// `Relaxed` is enough: the value only tags packets, it does not guard
    /// any other memory.
    pub fn next(&self) -> u8 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the current value without incrementing.
    pub fn current(&self) -> u8 {
        self.inner.load(Ordering::Relaxed)
    }
}
