// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Architecture seams used by the mm core
//! OWNERS: @kernel-mm-team
//! PUBLIC API: ipl_save/ipl_restore, asid_install, tlb_invalidate_*
//! DEPENDS_ON: riscv (OS builds only)
//! INVARIANTS: Host fallbacks are observable no-ops so unit tests can run
//!   the same code paths the OS image runs
//!
//! Everything RISC-V specific in this crate lives here. On the host the
//! functions keep enough state (an interrupt-disable depth counter) for
//! tests to assert that every save is paired with a restore.

use crate::mm::asid::Asid;

/// Opaque saved interrupt level, returned by [`ipl_save`].
#[derive(Clone, Copy, Debug)]
pub struct Ipl(#[allow(dead_code)] usize);

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod imp {
    use super::{Asid, Ipl};

    pub fn ipl_save() -> Ipl {
        let sie = riscv::register::sstatus::read().sie();
        unsafe { riscv::register::sstatus::clear_sie() };
        Ipl(sie as usize)
    }

    pub fn ipl_restore(ipl: Ipl) {
        if ipl.0 != 0 {
            unsafe { riscv::register::sstatus::set_sie() };
        }
    }

    pub fn asid_install(asid: Asid, root_ppn: usize) {
        unsafe {
            riscv::register::satp::set(
                riscv::register::satp::Mode::Sv39,
                asid.value() as usize,
                root_ppn,
            );
        }
        riscv::asm::sfence_vma_all();
    }

    pub fn tlb_invalidate_pages(asid: Asid, base: usize, pages: usize) {
        for page in 0..pages {
            riscv::asm::sfence_vma(
                asid.value() as usize,
                base + page * crate::mm::PAGE_SIZE,
            );
        }
    }

    pub fn tlb_invalidate_asid(asid: Asid) {
        // sfence.vma with rs1=x0 and a concrete ASID flushes all non-global
        // translations for that ASID.
        riscv::asm::sfence_vma(asid.value() as usize, 0);
    }

    pub fn tlb_invalidate_all() {
        riscv::asm::sfence_vma_all();
    }
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
mod imp {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::{Asid, Ipl};

    static IPL_DEPTH: AtomicUsize = AtomicUsize::new(0);

    pub fn ipl_save() -> Ipl {
        Ipl(IPL_DEPTH.fetch_add(1, Ordering::AcqRel))
    }

    pub fn ipl_restore(_ipl: Ipl) {
        let prev = IPL_DEPTH.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unbalanced ipl restore");
    }

    /// Current interrupt-disable nesting depth (host only, for tests).
    pub fn ipl_depth() -> usize {
        IPL_DEPTH.load(Ordering::Acquire)
    }

    pub fn asid_install(_asid: Asid, _root_ppn: usize) {}

    pub fn tlb_invalidate_pages(_asid: Asid, _base: usize, _pages: usize) {}

    pub fn tlb_invalidate_asid(_asid: Asid) {}

    pub fn tlb_invalidate_all() {}
}

pub use imp::{
    asid_install, ipl_restore, ipl_save, tlb_invalidate_all, tlb_invalidate_asid,
    tlb_invalidate_pages,
};

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub use imp::ipl_depth;
