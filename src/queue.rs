//! Blocking work queue
//!
//! An unbounded FIFO with a blocking `pop` and an explicit shutdown signal.
//! The worker thread sleeps in [`BlockingQueue::pop`] until a ticket arrives;
//! [`BlockingQueue::shutdown`] wakes every waiter so the thread can exit.
//!
//! Items queued before shutdown are still delivered. Once the queue is both
//! shut down and empty, `pop` returns `None` immediately instead of blocking.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

struct QueueState<T> {
    items: VecDeque<T>,
    stopped: bool,
}

/// Mutex + condition variable FIFO shared between producers and the worker
pub struct BlockingQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
}

impl<T> std::fmt::Debug for BlockingQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("BlockingQueue")
            .field("len", &state.items.len())
            .field("stopped", &state.stopped)
            .finish()
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    /// Create an empty, running queue
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                stopped: false,
            }),
            ready: Condvar::new(),
        }
    }

    // A panicking producer must not wedge the worker, so poison is ignored.
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item and wake one waiter
    pub fn push(&self, item: T) {
        self.lock().items.push_back(item);
        self.ready.notify_one();
    }

    /// Remove the front item, blocking until one is available
    ///
    /// Returns `None` once the queue has been shut down and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self
            .ready
            .wait_while(self.lock(), |s| s.items.is_empty() && !s.stopped)
            .unwrap_or_else(PoisonError::into_inner);
        state.items.pop_front()
    }

    /// Remove the front item without blocking
    pub fn try_pop(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Stop the queue and wake every waiter
    pub fn shutdown(&self) {
        self.lock().stopped = true;
        self.ready.notify_all();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shutdown(&self) -> bool {
        self.lock().stopped
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Check if no items are queued
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}
