// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Cross-CPU TLB shootdown collective
//! OWNERS: @kernel-mm-team
//! PUBLIC API: TlbController (register/shootdown_start/recent), TlbCpu::service,
//!   ShootdownKind, invalidate_local
//! INVARIANTS: One collective in flight at a time; the initiator returns
//!   from start() only after every other CPU paused and acknowledged;
//!   finalize() returns only after every participant left the round
//!
//! The three-step protocol brackets every mapping removal or permission
//! reduction: start (broadcast + wait for acks), local invalidate on the
//! initiator, finalize (release the waiters). Remote CPUs take part by
//! polling [`TlbCpu::service`] from their interrupt path; on the host,
//! test threads call it directly.
//!
//! A small bounded ring of recently issued shootdowns is kept for triage
//! and for the kernel selftests; it records what was requested, not what
//! each CPU applied.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use super::asid::Asid;
use crate::arch;

/// Identifies a CPU taking part in shootdowns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuId(pub usize);

/// What to invalidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShootdownKind {
    /// A page range of one address space.
    Pages { asid: Asid, base: usize, pages: usize },
    /// Every translation tagged with the ASID (used when stealing it).
    Asid(Asid),
    /// Everything.
    All,
}

#[cfg(feature = "tlb_trace_large")]
const TRACE_CAP: usize = 1024;
#[cfg(not(feature = "tlb_trace_large"))]
const TRACE_CAP: usize = 64;

struct CpuSlot {
    id: CpuId,
    request: Mutex<Option<ShootdownKind>>,
    pending: AtomicBool,
    acked: AtomicBool,
    released: AtomicBool,
}

/// Handle held by each CPU; `service` must be reachable from its
/// interrupt path while the CPU can initiate or receive shootdowns.
pub struct TlbCpu {
    slot: Arc<CpuSlot>,
}

impl TlbCpu {
    /// Processes one pending shootdown request, if any.
    ///
    /// Applies the invalidation locally, acknowledges, and then pauses
    /// until the initiator finalizes the round. Returns whether a request
    /// was serviced.
    pub fn service(&self) -> bool {
        if !self.slot.pending.load(Ordering::Acquire) {
            return false;
        }
        if let Some(kind) = self.slot.request.lock().take() {
            invalidate_local(kind);
        }
        self.slot.acked.store(true, Ordering::Release);
        while !self.slot.released.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
        // Last write of the round: tells the initiator we left.
        self.slot.pending.store(false, Ordering::Release);
        true
    }

    pub fn id(&self) -> CpuId {
        self.slot.id
    }
}

/// Applies an invalidation on the executing CPU.
pub fn invalidate_local(kind: ShootdownKind) {
    match kind {
        ShootdownKind::Pages { asid, base, pages } => {
            arch::tlb_invalidate_pages(asid, base, pages)
        }
        ShootdownKind::Asid(asid) => arch::tlb_invalidate_asid(asid),
        ShootdownKind::All => arch::tlb_invalidate_all(),
    }
}

/// Coordinates shootdown collectives across the registered CPUs.
pub struct TlbController {
    slots: Mutex<Vec<Arc<CpuSlot>>>,
    serial: Mutex<()>,
    trace: Mutex<VecDeque<ShootdownKind>>,
}

impl TlbController {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            serial: Mutex::new(()),
            trace: Mutex::new(VecDeque::new()),
        }
    }

    /// Registers a CPU and returns its participation handle.
    pub fn register(&self, id: CpuId) -> TlbCpu {
        let slot = Arc::new(CpuSlot {
            id,
            request: Mutex::new(None),
            pending: AtomicBool::new(false),
            acked: AtomicBool::new(false),
            released: AtomicBool::new(false),
        });
        self.slots.lock().push(Arc::clone(&slot));
        TlbCpu { slot }
    }

    /// Starts a shootdown from `initiator`: broadcasts the request and
    /// spins until every other CPU acknowledged and paused.
    ///
    /// The caller performs its local invalidation while holding the
    /// returned guard and then calls [`ShootdownGuard::finalize`].
    pub fn shootdown_start(&self, initiator: CpuId, kind: ShootdownKind) -> ShootdownGuard<'_> {
        let serial = self.serial.lock();

        let targets: Vec<Arc<CpuSlot>> = self
            .slots
            .lock()
            .iter()
            .filter(|slot| slot.id != initiator)
            .cloned()
            .collect();

        for slot in &targets {
            *slot.request.lock() = Some(kind);
            slot.acked.store(false, Ordering::Relaxed);
            slot.released.store(false, Ordering::Relaxed);
            slot.pending.store(true, Ordering::Release);
        }
        for slot in &targets {
            while !slot.acked.load(Ordering::Acquire) {
                core::hint::spin_loop();
            }
        }

        let mut trace = self.trace.lock();
        if trace.len() == TRACE_CAP {
            trace.pop_front();
        }
        trace.push_back(kind);

        ShootdownGuard { _serial: serial, targets }
    }

    /// Most recent shootdowns, oldest first.
    pub fn recent(&self) -> Vec<ShootdownKind> {
        self.trace.lock().iter().copied().collect()
    }
}

impl Default for TlbController {
    fn default() -> Self {
        Self::new()
    }
}

/// Open shootdown round. Dropping the guard finalizes it.
#[must_use = "the remote CPUs stay paused until the round is finalized"]
pub struct ShootdownGuard<'a> {
    _serial: spin::MutexGuard<'a, ()>,
    targets: Vec<Arc<CpuSlot>>,
}

impl ShootdownGuard<'_> {
    /// Releases the paused CPUs and waits for them to leave the round.
    pub fn finalize(self) {}
}

impl Drop for ShootdownGuard<'_> {
    fn drop(&mut self) {
        for slot in &self.targets {
            slot.released.store(true, Ordering::Release);
        }
        for slot in &self.targets {
            while slot.pending.load(Ordering::Acquire) {
                core::hint::spin_loop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_cpu_round_completes_immediately() {
        let ctl = TlbController::new();
        let _cpu0 = ctl.register(CpuId(0));

        let kind = ShootdownKind::Asid(Asid::new(3));
        let guard = ctl.shootdown_start(CpuId(0), kind);
        invalidate_local(kind);
        guard.finalize();

        assert_eq!(ctl.recent(), [kind]);
    }

    #[test]
    fn remote_cpu_pauses_until_finalize() {
        let ctl = Arc::new(TlbController::new());
        let _cpu0 = ctl.register(CpuId(0));
        let cpu1 = ctl.register(CpuId(1));

        let serviced = std::thread::spawn(move || {
            let mut rounds = 0;
            while rounds < 2 {
                if cpu1.service() {
                    rounds += 1;
                }
                std::hint::spin_loop();
            }
            rounds
        });

        for base in [0usize, 0x10000] {
            let kind = ShootdownKind::Pages { asid: Asid::new(1), base, pages: 2 };
            let guard = ctl.shootdown_start(CpuId(0), kind);
            invalidate_local(kind);
            guard.finalize();
        }

        assert_eq!(serviced.join().expect("service thread"), 2);
        assert_eq!(ctl.recent().len(), 2);
    }
}
