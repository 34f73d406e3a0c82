//! Setup-time allocation budget.
//!
//! Every fixed-lifetime allocation (chunk pool, queue storage, DSP state,
//! scratch buffers) is drawn from one `SetupArena` during pipeline
//! construction. The arena vends owned zero-initialized buffers and fails
//! setup when the byte budget is exceeded, which keeps the hot path free
//! of allocation: once the workers start, nothing allocates.
//!
//! The three large data-plane regions (chunk sample buffers, SDR input
//! ring, file-write ring) are accounted separately so they can be sized
//! and released independently.

use std::sync::atomic::{AtomicUsize, Ordering};

use num_complex::Complex;

use crate::errors::ConfigError;

pub struct SetupArena {
    capacity: usize,
    used: AtomicUsize,
}

impl SetupArena {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.used())
    }

    fn reserve(&self, bytes: usize) -> Result<(), ConfigError> {
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_add(bytes);
            if next > self.capacity {
                return Err(ConfigError::ArenaExhausted {
                    requested: bytes,
                    remaining: self.capacity - current,
                    capacity: self.capacity,
                });
            }
            match self.used.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Account for a fixed-lifetime allocation made elsewhere (queue
    /// storage, channel buffers) without routing the bytes through the
    /// arena.
    pub fn charge(&self, bytes: usize) -> Result<(), ConfigError> {
        self.reserve(bytes)
    }

    /// Zero-initialized byte buffer counted against the budget.
    pub fn alloc_bytes(&self, len: usize) -> Result<Vec<u8>, ConfigError> {
        self.reserve(len)?;
        Ok(vec![0u8; len])
    }

    /// Zeroed complex sample buffer counted against the budget.
    pub fn alloc_complex(&self, len: usize) -> Result<Vec<Complex<f32>>, ConfigError> {
        self.reserve(len * std::mem::size_of::<Complex<f32>>())?;
        Ok(vec![Complex::new(0.0, 0.0); len])
    }

    /// Zeroed i16 scratch buffer counted against the budget.
    pub fn alloc_i16(&self, len: usize) -> Result<Vec<i16>, ConfigError> {
        self.reserve(len * 2)?;
        Ok(vec![0i16; len])
    }
}
