/*!
 * Stream Buffer
 * Bounded blocking byte ring with a receive trigger level
 */

use crate::core::types::Size;
use parking_lot::{Condvar, Mutex, MutexGuard};
use ringbuf::{traits::*, HeapRb};
use std::time::{Duration, Instant};

struct Ring {
    rb: HeapRb<u8>,
    /// Latched when an endpoint of the owning pipe is freed. Blocked
    /// operations return early and future ones never wait.
    broken: bool,
}

/// Bounded single-producer/single-consumer byte ring.
///
/// `send` blocks while the ring is full, `receive` blocks until at least
/// `trigger_level` bytes are buffered. Both take an optional timeout;
/// `None` waits forever, `Some(Duration::ZERO)` never blocks.
pub struct StreamBuffer {
    ring: Mutex<Ring>,
    readable: Condvar,
    writable: Condvar,
    capacity: Size,
    trigger_level: Size,
}

impl StreamBuffer {
    /// Create a buffer holding up to `capacity` bytes.
    ///
    /// `trigger_level` is the minimum number of buffered bytes required to
    /// unblock a pending `receive`. Must satisfy
    /// `0 < trigger_level <= capacity`.
    pub fn new(capacity: Size, trigger_level: Size) -> Self {
        assert!(capacity > 0, "stream buffer capacity must be non-zero");
        assert!(
            trigger_level > 0 && trigger_level <= capacity,
            "trigger level must be within 1..=capacity"
        );

        Self {
            ring: Mutex::new(Ring {
                rb: HeapRb::new(capacity),
                broken: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity,
            trigger_level,
        }
    }

    pub fn capacity(&self) -> Size {
        self.capacity
    }

    pub fn trigger_level(&self) -> Size {
        self.trigger_level
    }

    pub fn bytes_available(&self) -> Size {
        self.ring.lock().rb.occupied_len()
    }

    pub fn spaces_available(&self) -> Size {
        self.ring.lock().rb.vacant_len()
    }

    pub fn is_broken(&self) -> bool {
        self.ring.lock().broken
    }

    /// Append up to `data.len()` bytes, blocking while the ring is full.
    ///
    /// Returns the number of bytes accepted, which is less than
    /// `data.len()` only if the timeout elapsed or the buffer was marked
    /// broken. A broken buffer still accepts whatever fits immediately
    /// but never blocks for space.
    pub fn send(&self, data: &[u8], timeout: Option<Duration>) -> Size {
        if data.is_empty() {
            return 0;
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut ring = self.ring.lock();

        let mut sent = ring.rb.push_slice(data);
        while sent < data.len() && !ring.broken {
            if !Self::wait_on(&self.writable, &mut ring, deadline) {
                break;
            }
            sent += ring.rb.push_slice(&data[sent..]);
        }

        drop(ring);
        if sent > 0 {
            self.readable.notify_all();
        }
        sent
    }

    /// Drain up to `buf.len()` bytes, blocking until at least
    /// `trigger_level` bytes are buffered.
    ///
    /// On timeout (or on a broken buffer) whatever is already present is
    /// returned, possibly 0.
    pub fn receive(&self, buf: &mut [u8], timeout: Option<Duration>) -> Size {
        if buf.is_empty() {
            return 0;
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut ring = self.ring.lock();

        while ring.rb.occupied_len() < self.trigger_level && !ring.broken {
            if !Self::wait_on(&self.readable, &mut ring, deadline) {
                break;
            }
        }

        let received = ring.rb.pop_slice(buf);
        drop(ring);
        if received > 0 {
            self.writable.notify_all();
        }
        received
    }

    /// Latch the broken flag and wake every waiter in both directions.
    ///
    /// Irreversible; called when an endpoint of the owning pipe is freed.
    pub fn mark_broken(&self) {
        let mut ring = self.ring.lock();
        ring.broken = true;
        drop(ring);
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Wait on `condvar` until woken or `deadline`. Returns false on timeout.
    fn wait_on(
        condvar: &Condvar,
        guard: &mut MutexGuard<'_, Ring>,
        deadline: Option<Instant>,
    ) -> bool {
        match deadline {
            Some(deadline) => !condvar.wait_until(guard, deadline).timed_out(),
            None => {
                condvar.wait(guard);
                true
            }
        }
    }
}

impl std::fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("StreamBuffer")
            .field("capacity", &self.capacity)
            .field("trigger_level", &self.trigger_level)
            .field("buffered", &ring.rb.occupied_len())
            .field("broken", &ring.broken)
            .finish()
    }
}
