//! Runtime-scoped bump region for OSR snapshots
//!
//! A snapshot lives for exactly one transfer. Leases bump an offset and
//! the offset rewinds once every lease is released.

use crate::error::{OsrError, Result};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct RegionState {
    offset: usize,
    live: usize,
    high_water: usize,
}

/// Bump region shared by every transfer of a runtime
#[derive(Debug)]
pub struct OsrTempRegion {
    capacity: usize,
    state: Mutex<RegionState>,
}

impl OsrTempRegion {
    /// Create a region of `capacity` bytes
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            state: Mutex::new(RegionState::default()),
        })
    }

    /// Total size in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes still available
    pub fn available(&self) -> usize {
        self.capacity - self.state.lock().offset
    }

    /// Number of unreleased leases
    pub fn live_leases(&self) -> usize {
        self.state.lock().live
    }

    /// Largest offset ever reached
    pub fn high_water(&self) -> usize {
        self.state.lock().high_water
    }

    /// Lease `bytes` bytes. Fails without side effects when the region is
    /// exhausted.
    pub fn allocate(self: &Arc<Self>, bytes: usize) -> Result<RegionLease> {
        let mut state = self.state.lock();
        let available = self.capacity - state.offset;
        if bytes > available {
            return Err(OsrError::OutOfMemory {
                requested: bytes,
                available,
            });
        }
        let start = state.offset;
        state.offset += bytes;
        state.live += 1;
        state.high_water = state.high_water.max(state.offset);
        Ok(RegionLease {
            region: Arc::clone(self),
            start,
            len: bytes,
        })
    }

    fn release(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.live > 0, "region lease released twice");
        state.live = state.live.saturating_sub(1);
        if state.live == 0 {
            state.offset = 0;
        }
    }
}

/// Bytes leased from an `OsrTempRegion`, returned on drop
#[derive(Debug)]
pub struct RegionLease {
    region: Arc<OsrTempRegion>,
    start: usize,
    len: usize,
}

impl RegionLease {
    /// Offset of the lease inside the region
    pub fn start(&self) -> usize {
        self.start
    }

    /// Leased bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the lease is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for RegionLease {
    fn drop(&mut self) {
        self.region.release();
    }
}
