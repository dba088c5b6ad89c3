//! Thread-safe packet id counter for emit requests.
//!
//! # What is a packet id?
//!
//! Every emit frame carries a 2-byte packet id right after the bridge
//! identifier.  The bridge does not use it for ordering.  It matters for
//! retries:
//!
//! - **A retried emit reuses its id.**  A bridge that already played the code
//!   once (and only the ack got lost) can recognise the duplicate.
//! - **Distinct commands get distinct ids.**  Two different codes sent back to
//!   back never look like a retry of each other.
//!
//! The id space is only 16 bits, so ids wrap.  That is harmless: a duplicate
//! is only ever compared against the emit immediately before it.
//!
//! # Thread safety
//!
//! One counter is shared by every send batch the engine runs, possibly on
//! several tokio worker threads at once.  The counter is a single
//! `AtomicU16`, so `next()` is one lock-free `fetch_add` and two concurrent
//! callers can never draw the same id (until the counter wraps).

use std::sync::atomic::{AtomicU16, Ordering};

/// A lock-free counter producing 16-bit packet ids.
///
/// Wraps from `u16::MAX` back to 0 without panicking.
///
/// # Examples
///
/// ```rust
/// use allone_core::protocol::PacketIdCounter;
///
/// let counter = PacketIdCounter::starting_at(7);
/// assert_eq!(counter.next(), 7);
/// assert_eq!(counter.next(), 8);
/// ```
#[derive(Debug)]
pub struct PacketIdCounter {
    /// The id the next call to [`next`](Self::next) returns.
    inner: AtomicU16,
}

impl PacketIdCounter {
    /// Creates a counter starting at 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a counter whose first id is `first`.  Seeding from the clock
    /// keeps ids from repeating across process restarts.
    pub fn starting_at(first: u16) -> Self {
        Self {
            inner: AtomicU16::new(first),
        }
    }

    /// Returns the next packet id and atomically advances the counter.
    ///
    /// Wraps from `u16::MAX` to 0 on overflow without panicking.
    ///
    /// # Atomic ordering
    ///
    /// `Ordering::Relaxed` is enough: an id only has to differ from the ids
    /// handed out around it.  It never publishes other memory to the thread
    /// that sends the frame.
    pub fn next(&self) -> u16 {
        // `fetch_add` returns the value before the addition and wraps on
        // overflow.
        self.inner.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for PacketIdCounter {
    fn default() -> Self {
        Self::new()
    }
}
