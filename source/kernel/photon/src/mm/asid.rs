// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: ASID allocation and LRU-style recycling
//! OWNERS: @kernel-mm-team
//! PUBLIC API: Asid, AsidRegistry (get/put), inactive FIFO bookkeeping
//! DEPENDS_ON: mm::tlb (ASID-wide flush when stealing), mm::address_space
//! INVARIANTS: Registry lock is the outermost mm lock (registry -> address
//!   space); refcount changes and FIFO membership are decided together
//!   under it; an address space sits in the FIFO iff refcount == 0 and its
//!   ASID is valid and not the kernel's
//!
//! The hardware offers far fewer ASIDs than there are address spaces.
//! When the free pool runs dry, the least-recently-inactive address space
//! loses its tag: it is unhooked from the FIFO, marked ASID_INVALID and
//! every stale translation carrying the tag is shot down on all CPUs. The
//! victim pays to reacquire a tag the next time it is switched in.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::address_space::AddressSpace;
use super::tlb::{self, CpuId, ShootdownKind, TlbController};
use crate::sync::{Mutex, MutexGuard};

/// Hardware address-space tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Asid(u16);

impl Asid {
    /// Reserved for the kernel address space.
    pub const KERNEL: Asid = Asid(0);
    /// "No tag assigned."
    pub const INVALID: Asid = Asid(u16::MAX);

    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u16 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

pub(crate) struct RegistryInner {
    free: Vec<Asid>,
    /// FIFO of address spaces that hold an ASID but run nowhere; the
    /// front is the least recently inactive and the next victim.
    inactive: VecDeque<Arc<AddressSpace>>,
}

/// Owner of the free ASID pool and the inactive-with-ASID FIFO.
pub struct AsidRegistry {
    inner: Mutex<RegistryInner>,
}

impl AsidRegistry {
    /// Creates a registry handing out ASIDs `1..=count`; 0 stays reserved
    /// for the kernel.
    pub fn new(count: u16) -> Self {
        debug_assert!(count < Asid::INVALID.value());
        let free = (1..=count).rev().map(Asid::new).collect();
        Self {
            inner: Mutex::new(RegistryInner { free, inactive: VecDeque::new() }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock()
    }

    /// Allocates an ASID, stealing one if the pool is dry.
    ///
    /// Must not be called with any per-address-space lock held: stealing
    /// locks the victim.
    pub fn get(&self, tlb: &TlbController, cpu: CpuId) -> Asid {
        let mut inner = self.inner.lock();
        Self::get_locked(&mut inner, tlb, cpu)
    }

    pub(crate) fn get_locked(
        inner: &mut RegistryInner,
        tlb: &TlbController,
        cpu: CpuId,
    ) -> Asid {
        if let Some(asid) = inner.free.pop() {
            return asid;
        }

        let victim = match inner.inactive.pop_front() {
            Some(victim) => victim,
            None => panic!("asid: pool exhausted and no inactive address space to steal from"),
        };

        let asid = victim.take_asid_for_steal();
        debug_assert!(asid.is_valid() && asid != Asid::KERNEL);

        // The stolen tag may still qualify TLB entries anywhere.
        let guard = tlb.shootdown_start(cpu, ShootdownKind::Asid(asid));
        tlb::invalidate_local(ShootdownKind::Asid(asid));
        guard.finalize();

        asid
    }

    /// Returns an ASID to the free pool.
    pub fn put(&self, asid: Asid) {
        debug_assert!(asid.is_valid() && asid != Asid::KERNEL);
        self.inner.lock().free.push(asid);
    }

    /// Number of ASIDs currently free.
    pub fn free_count(&self) -> usize {
        self.inner.lock().free.len()
    }
}

impl RegistryInner {
    pub(crate) fn enqueue_inactive(&mut self, space: Arc<AddressSpace>) {
        self.inactive.push_back(space);
    }

    /// Unhooks `space` from the FIFO; returns whether it was present.
    pub(crate) fn remove_inactive(&mut self, space: &Arc<AddressSpace>) -> bool {
        match self.inactive.iter().position(|s| Arc::ptr_eq(s, space)) {
            Some(index) => {
                self.inactive.remove(index);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn inactive_len(&self) -> usize {
        self.inactive.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_pool_hands_out_distinct_valid_asids() {
        let registry = AsidRegistry::new(4);
        let tlb = TlbController::new();
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..4 {
            let asid = registry.get(&tlb, CpuId(0));
            assert!(asid.is_valid());
            assert_ne!(asid, Asid::KERNEL);
            assert!(seen.insert(asid.value()));
        }
        assert_eq!(registry.free_count(), 0);
    }

    #[test]
    fn put_recycles() {
        let registry = AsidRegistry::new(1);
        let tlb = TlbController::new();
        let asid = registry.get(&tlb, CpuId(0));
        registry.put(asid);
        assert_eq!(registry.get(&tlb, CpuId(0)), asid);
    }
}
