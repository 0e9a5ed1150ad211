// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Physical frame pool with per-frame reference counts
//! OWNERS: @kernel-mm-team
//! PUBLIC API: FramePool (alloc/free/reference_add), FrameStats
//! INVARIANTS: A frame is recycled exactly when its reference count drops
//!   to zero; DEVICE frames never enter the pool and are never refcounted
//!
//! Frames handed out by `alloc` are zeroed by contract: the embedding
//! image zeroes the backing memory, the core only tracks ownership.
//! Reference counts exist for the steal path, where one frame backs
//! mappings in two address spaces at once.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use spin::Mutex;

/// Errors reported by the frame pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameError {
    /// The pool is exhausted.
    NoMemory,
    /// The frame is not owned by the pool.
    NotAllocated,
}

/// Counters exposed for diagnostics and tests. `allocated` and `freed`
/// are monotonic; the difference is the number of live frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub allocated: u64,
    pub freed: u64,
}

struct PoolInner {
    free: Vec<usize>,
    refcounts: BTreeMap<usize, usize>,
    stats: FrameStats,
}

/// Pool of physical frames, identified by frame number.
pub struct FramePool {
    inner: Mutex<PoolInner>,
}

impl FramePool {
    /// Creates a pool owning `count` frames starting at `base_pfn`.
    pub fn new(base_pfn: usize, count: usize) -> Self {
        let free = (base_pfn..base_pfn + count).rev().collect();
        Self {
            inner: Mutex::new(PoolInner {
                free,
                refcounts: BTreeMap::new(),
                stats: FrameStats::default(),
            }),
        }
    }

    /// Allocates one frame with a reference count of one.
    pub fn alloc(&self) -> Result<usize, FrameError> {
        let mut inner = self.inner.lock();
        let pfn = inner.free.pop().ok_or(FrameError::NoMemory)?;
        inner.refcounts.insert(pfn, 1);
        inner.stats.allocated += 1;
        Ok(pfn)
    }

    /// Drops one reference to `pfn`, recycling the frame at zero.
    pub fn free(&self, pfn: usize) -> Result<(), FrameError> {
        let mut inner = self.inner.lock();
        let count = inner
            .refcounts
            .get_mut(&pfn)
            .ok_or(FrameError::NotAllocated)?;
        *count -= 1;
        if *count == 0 {
            inner.refcounts.remove(&pfn);
            inner.free.push(pfn);
        }
        inner.stats.freed += 1;
        Ok(())
    }

    /// Adds a reference to an already-allocated frame.
    pub fn reference_add(&self, pfn: usize) -> Result<(), FrameError> {
        let mut inner = self.inner.lock();
        let count = inner
            .refcounts
            .get_mut(&pfn)
            .ok_or(FrameError::NotAllocated)?;
        *count += 1;
        Ok(())
    }

    /// Current reference count of `pfn`; zero when not allocated.
    pub fn refcount(&self, pfn: usize) -> usize {
        self.inner.lock().refcounts.get(&pfn).copied().unwrap_or(0)
    }

    pub fn stats(&self) -> FrameStats {
        self.inner.lock().stats
    }

    /// Number of frames currently handed out.
    pub fn in_use(&self) -> usize {
        self.inner.lock().refcounts.len()
    }
}
