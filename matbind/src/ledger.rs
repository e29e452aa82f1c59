//! Accounting for native matrix memory
//!
//! Each runtime owns one [`MemoryLedger`]. Buffers record themselves here
//! on creation and again when their last reference goes away, which makes
//! leaks and double frees observable without global state.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Per-runtime allocation counters and the per-request size limit
#[derive(Debug)]
pub struct MemoryLedger {
    allocation_limit: usize,
    next_id: AtomicU64,
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
    wraps: AtomicUsize,
    unwraps: AtomicUsize,
    live_bytes: AtomicUsize,
}

/// Point-in-time copy of the ledger counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LedgerStats {
    /// Owned buffers created
    pub allocations: usize,
    /// Owned buffers freed
    pub deallocations: usize,
    /// External buffers wrapped
    pub wraps: usize,
    /// External buffers whose last reference was dropped
    pub unwraps: usize,
    /// Bytes held by owned buffers that are still alive
    pub live_bytes: usize,
}

impl LedgerStats {
    /// Buffers of either kind still referenced
    pub fn live_buffers(&self) -> usize {
        // counters are loaded one by one, so a racing snapshot can run ahead
        self.allocations.saturating_sub(self.deallocations)
            + self.wraps.saturating_sub(self.unwraps)
    }
}

impl MemoryLedger {
    pub fn new(allocation_limit: usize) -> Self {
        Self {
            allocation_limit,
            next_id: AtomicU64::new(1),
            allocations: AtomicUsize::new(0),
            deallocations: AtomicUsize::new(0),
            wraps: AtomicUsize::new(0),
            unwraps: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
        }
    }

    /// Largest single owned allocation permitted, in bytes
    pub fn allocation_limit(&self) -> usize {
        self.allocation_limit
    }

    pub(crate) fn record_allocation(&self, bytes: usize) -> u64 {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn record_deallocation(&self, bytes: usize) {
        self.deallocations.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_wrap(&self) -> u64 {
        self.wraps.fetch_add(1, Ordering::Relaxed);
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn record_unwrap(&self) {
        self.unwraps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            deallocations: self.deallocations.load(Ordering::Relaxed),
            wraps: self.wraps.load(Ordering::Relaxed),
            unwraps: self.unwraps.load(Ordering::Relaxed),
            live_bytes: self.live_bytes.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(crate::config::BindingConfig::DEFAULT_MAX_ALLOCATION_BYTES)
    }
}
