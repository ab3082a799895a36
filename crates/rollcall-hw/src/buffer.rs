//! Bounded drop-oldest hand-off between acquisition and inference.

use crate::frame::Frame;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Largest capacity accepted; more would let staleness grow past a few frames.
pub const MAX_CAPACITY: usize = 3;

/// Small FIFO that evicts its oldest entry to admit a new one when full.
///
/// `push` never blocks; `pop` blocks up to a timeout. Each pushed item is
/// delivered at most once and in push order.
pub struct FrameBuffer<T = Frame> {
    queue: Mutex<VecDeque<T>>,
    ready: Condvar,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> FrameBuffer<T> {
    /// Create a buffer holding up to `capacity` items, clamped to `1..=MAX_CAPACITY`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_CAPACITY);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Insert an item, evicting the oldest if full. Returns the evicted item.
    pub fn push(&self, item: T) -> Option<T> {
        let evicted = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(item);
            evicted
        };
        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.ready.notify_one();
        evicted
    }

    /// Take the oldest item, waiting up to `timeout`. `None` means timed out.
    pub fn pop(&self, timeout: Duration) -> Option<T> {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut queue, _) = self
            .ready
            .wait_timeout_while(queue, timeout, |q| q.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of items evicted since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
