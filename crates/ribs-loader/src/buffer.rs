//! Byte buffers owned by in-flight requests, with leak accounting.
//!
//! Each request holds two buffers: a fixed-capacity chunk that every read
//! fills, and a growable accumulator the chunks are appended to. Both are
//! [`TrackedBuffer`]s, so a [`BufferLedger`] always knows how many are alive
//! and how much capacity they pin. Release happens on drop, which makes
//! "freed exactly once" a property of ownership rather than of each error path.

use std::collections::TryReserveError;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counters {
    outstanding: AtomicUsize,
    outstanding_bytes: AtomicUsize,
    total_allocated: AtomicU64,
}

/// Shared counters for every buffer a loader hands out.
#[derive(Debug, Clone, Default)]
pub struct BufferLedger {
    counters: Arc<Counters>,
}

impl BufferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers currently alive.
    pub fn outstanding(&self) -> usize {
        self.counters.outstanding.load(Ordering::Acquire)
    }

    /// Capacity, in bytes, pinned by buffers currently alive.
    pub fn outstanding_bytes(&self) -> usize {
        self.counters.outstanding_bytes.load(Ordering::Acquire)
    }

    /// Buffers ever allocated through this ledger.
    pub fn total_allocated(&self) -> u64 {
        self.counters.total_allocated.load(Ordering::Acquire)
    }

    /// Zero-filled buffer of exactly `capacity` bytes.
    pub(crate) fn chunk(&self, capacity: usize) -> Result<TrackedBuffer, TryReserveError> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)?;
        data.resize(capacity, 0);
        Ok(self.track(data))
    }

    /// Empty buffer with room for `reserve` bytes.
    pub(crate) fn accumulator(&self, reserve: usize) -> Result<TrackedBuffer, TryReserveError> {
        let mut data = Vec::new();
        data.try_reserve_exact(reserve)?;
        Ok(self.track(data))
    }

    /// Take ownership of caller-provided bytes.
    pub(crate) fn adopt(&self, data: Vec<u8>) -> TrackedBuffer {
        self.track(data)
    }

    fn track(&self, data: Vec<u8>) -> TrackedBuffer {
        let accounted = data.capacity();
        self.counters.outstanding.fetch_add(1, Ordering::AcqRel);
        self.counters
            .outstanding_bytes
            .fetch_add(accounted, Ordering::AcqRel);
        self.counters.total_allocated.fetch_add(1, Ordering::AcqRel);
        TrackedBuffer {
            data,
            accounted,
            ledger: self.clone(),
        }
    }
}

/// A byte buffer whose lifetime is recorded in a [`BufferLedger`].
#[derive(Debug)]
pub(crate) struct TrackedBuffer {
    data: Vec<u8>,
    accounted: usize,
    ledger: BufferLedger,
}

impl TrackedBuffer {
    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    /// Append `bytes`, growing without aborting the process on allocation failure.
    pub(crate) fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<(), TryReserveError> {
        self.data.try_reserve(bytes.len())?;
        self.data.extend_from_slice(bytes);
        self.sync_capacity();
        Ok(())
    }

    fn sync_capacity(&mut self) {
        let capacity = self.data.capacity();
        let counter = &self.ledger.counters.outstanding_bytes;
        if capacity > self.accounted {
            counter.fetch_add(capacity - self.accounted, Ordering::AcqRel);
        } else if capacity < self.accounted {
            counter.fetch_sub(self.accounted - capacity, Ordering::AcqRel);
        }
        self.accounted = capacity;
    }
}

impl Drop for TrackedBuffer {
    fn drop(&mut self) {
        let counters = &self.ledger.counters;
        counters
            .outstanding_bytes
            .fetch_sub(self.accounted, Ordering::AcqRel);
        counters.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}
