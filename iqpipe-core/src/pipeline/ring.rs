//! Byte-oriented bounded SPSC ring buffer.
//!
//! Used twice: decoupling the SDR capture thread from the Reader
//! (buffered-SDR mode) and decoupling the PostProcessor from disk
//! latency (file-output mode). The transport stays byte-oriented; the
//! typed packet layer lives in [`codec`](super::codec).

use parking_lot::{Condvar, Mutex};

struct RingState {
    buf: Box<[u8]>,
    /// Read position.
    head: usize,
    /// Bytes currently stored.
    len: usize,
    /// Writer signalled end of stream.
    closed: bool,
    /// Shutdown requested; wakes all waiters.
    shutdown: bool,
}

impl RingState {
    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn free(&self) -> usize {
        self.capacity() - self.len
    }

    fn copy_in(&mut self, data: &[u8]) {
        let capacity = self.capacity();
        let pos = (self.head + self.len) % capacity;
        let first = data.len().min(capacity - pos);
        self.buf[pos..pos + first].copy_from_slice(&data[..first]);
        if first < data.len() {
            let rest = data.len() - first;
            self.buf[..rest].copy_from_slice(&data[first..]);
        }
        self.len += data.len();
    }

    fn copy_out(&mut self, out: &mut [u8]) -> usize {
        let take = out.len().min(self.len);
        let capacity = self.capacity();
        let first = take.min(capacity - self.head);
        out[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        if first < take {
            out[first..take].copy_from_slice(&self.buf[..take - first]);
        }
        self.head = (self.head + take) % capacity;
        self.len -= take;
        take
    }
}

pub struct ByteRing {
    state: Mutex<RingState>,
    readable: Condvar,
    writable: Condvar,
}

impl ByteRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be positive");
        Self {
            state: Mutex::new(RingState {
                buf: vec![0u8; capacity].into_boxed_slice(),
                head: 0,
                len: 0,
                closed: false,
                shutdown: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity()
    }

    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocking write. Stores as much of `data` as fits, waiting for
    /// space as needed; returns the number of bytes written, which is
    /// less than `data.len()` only when shutdown interrupts the wait
    /// (0 when shutting down with a full ring).
    pub fn write(&self, data: &[u8]) -> usize {
        let mut written = 0;
        let mut state = self.state.lock();
        while written < data.len() {
            if state.shutdown || state.closed {
                break;
            }
            let free = state.free();
            if free == 0 {
                self.writable.wait(&mut state);
                continue;
            }
            let take = free.min(data.len() - written);
            state.copy_in(&data[written..written + take]);
            written += take;
            self.readable.notify_one();
        }
        written
    }

    /// Non-blocking all-or-nothing write of several parts (a packet
    /// header plus payload planes). Returns `false` without storing
    /// anything when the ring lacks space for the whole packet; the
    /// caller counts the drop.
    pub fn try_write_vectored(&self, parts: &[&[u8]]) -> bool {
        let total: usize = parts.iter().map(|p| p.len()).sum();
        let mut state = self.state.lock();
        if state.shutdown || state.closed || state.free() < total {
            return false;
        }
        for part in parts {
            state.copy_in(part);
        }
        drop(state);
        self.readable.notify_one();
        true
    }

    /// Blocking read. Waits until at least one byte is available, the
    /// writer closed the ring (returns 0 on clean EOF once drained), or
    /// shutdown was signalled (returns 0).
    pub fn read(&self, out: &mut [u8]) -> usize {
        if out.is_empty() {
            return 0;
        }
        let mut state = self.state.lock();
        loop {
            if state.len > 0 {
                let taken = state.copy_out(out);
                drop(state);
                self.writable.notify_one();
                return taken;
            }
            if state.closed || state.shutdown {
                return 0;
            }
            self.readable.wait(&mut state);
        }
    }

    /// Writer-side end of stream: readers drain the remainder and then
    /// observe EOF.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.readable.notify_all();
        self.writable.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Wakes all blocked readers and writers; pending data is still
    /// readable for draining.
    pub fn signal_shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        drop(state);
        self.readable.notify_all();
        self.writable.notify_all();
    }
}
