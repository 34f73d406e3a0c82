//! Bounded blocking FIFO queues shuttling chunks between stages.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct QueueState<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// Bounded blocking MPMC queue with shutdown broadcast.
///
/// `enqueue` blocks while full and returns `false` once shutdown is
/// signalled; `dequeue` blocks while empty and returns `None` only when
/// shutdown has been signalled *and* the buffer has drained, so items
/// already in flight are always delivered in FIFO order.
pub struct ChunkQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> ChunkQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Blocks while the queue is full. Returns `false` if shutdown was
    /// signalled before the item could be stored (the item is dropped).
    pub fn enqueue(&self, item: T) -> bool {
        let mut state = self.state.lock();
        while state.items.len() >= self.capacity {
            if state.shutdown {
                return false;
            }
            self.not_full.wait(&mut state);
        }
        if state.shutdown {
            return false;
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        true
    }

    /// Blocks while the queue is empty. Returns `None` on terminal drain
    /// (shutdown signalled and no items left).
    pub fn dequeue(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.shutdown {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Non-blocking variant; `None` means empty right now, not terminal.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut state = self.state.lock();
        let item = state.items.pop_front();
        if item.is_some() {
            drop(state);
            self.not_full.notify_one();
        }
        item
    }

    /// Sets the shutdown flag and wakes all waiters on both sides.
    pub fn signal_shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
