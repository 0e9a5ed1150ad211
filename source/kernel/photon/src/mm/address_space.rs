// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Address spaces — the higher-level client of the VAT layer
//! OWNERS: @kernel-mm-team
//! PUBLIC API: Mm (init/create_address_space/switch), AddressSpace
//!   (area_create/area_resize/area_destroy/area_steal/page_fault), AsError
//! DEPENDS_ON: mm::{area, asid, frame, page_table, tlb, used_range}, sync, arch
//! INVARIANTS: Lock order registry -> address-space state -> area -> page
//!   table; every rejection happens before any mapping changes; shrink,
//!   destroy and ASID stealing bracket mapping removal with a shootdown
//!
//! An address space owns an area table, a page-table root, a count of CPUs
//! currently running in it and an ASID. The kernel address space is
//! created once by `Mm::init` and passed around explicitly; nothing in
//! this module consults a global.

use alloc::sync::Arc;

use static_assertions::assert_impl_all;

use super::area::{Area, AreaFlags, AreaLifecycle, AreaRef, AreaTable};
use super::asid::{Asid, AsidRegistry};
use super::frame::FramePool;
use super::page_table::PageTable;
use super::tlb::{self, CpuId, ShootdownKind, TlbController};
use super::{PAGE_SIZE, PAGE_WIDTH};
use crate::sync::{IplGuard, Mutex, MutexGuard};
use crate::task::Task;
use crate::{arch, log_error};

/// Errors surfaced by address-space operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsError {
    /// No area covers the given address.
    NoEntry,
    /// The operation is not supported for the area (DEVICE resize).
    NotSupported,
    /// Semantically invalid request (zero size, writable+executable,
    /// misaligned base, size mismatch on steal).
    PermissionDenied,
    /// The range would conflict with another area or the kernel half.
    AddrNotAvailable,
    /// Allocation failure.
    NoMemory,
}

impl core::fmt::Display for AsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            AsError::NoEntry => "no such area",
            AsError::NotSupported => "operation not supported for this area",
            AsError::PermissionDenied => "semantically invalid request",
            AsError::AddrNotAvailable => "address range not available",
            AsError::NoMemory => "out of memory",
        };
        f.write_str(text)
    }
}

/// Result of the high-level page-fault handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use = "an unhandled fault must be forwarded to the low-level handler"]
pub enum FaultOutcome {
    /// Mapping installed (or already present); resume the thread.
    Ok,
    /// Control was diverted to the copy-primitive failover trampoline.
    Defer,
    /// True fault; the low-level handler takes over.
    Fault,
}

/// Per-thread marker that a user-copy primitive is in progress. The fault
/// handler consumes the slot and diverts to `failover` instead of
/// signalling a fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopySlot {
    /// Address of the copy failover trampoline.
    pub failover: usize,
}

/// The part of the interrupted state the fault handler may rewrite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IState {
    pub retaddr: usize,
}

impl IState {
    pub fn set_retaddr(&mut self, retaddr: usize) {
        self.retaddr = retaddr;
    }
}

/// Memory-management subsystem configuration.
#[derive(Clone, Copy, Debug)]
pub struct MmConfig {
    /// First frame number owned by the pool.
    pub frame_base: usize,
    /// Number of frames in the pool.
    pub frame_count: usize,
    /// Number of assignable ASIDs (the kernel tag is extra).
    pub asid_count: u16,
}

/// Top-level mm state: frame pool, ASID registry, TLB coordinator and the
/// kernel address space.
pub struct Mm {
    pub frames: FramePool,
    pub asids: AsidRegistry,
    pub tlb: TlbController,
    kernel_space: Arc<AddressSpace>,
}

impl Mm {
    /// Brings up the subsystem and creates the kernel address space.
    pub fn init(config: MmConfig) -> Arc<Mm> {
        let kernel_space = Arc::new(AddressSpace::new(true));
        Arc::new(Mm {
            frames: FramePool::new(config.frame_base, config.frame_count),
            asids: AsidRegistry::new(config.asid_count),
            tlb: TlbController::new(),
            kernel_space,
        })
    }

    pub fn kernel_space(&self) -> &Arc<AddressSpace> {
        &self.kernel_space
    }

    /// Creates an empty user address space with no ASID assigned.
    pub fn create_address_space(&self) -> Arc<AddressSpace> {
        Arc::new(AddressSpace::new(false))
    }

    /// Switches the executing CPU from `old` to `new`.
    ///
    /// Runs on the scheduler path: address-space locks are taken with the
    /// non-yielding acquire and the deferred ASID allocation happens only
    /// after the per-space lock is dropped, because the allocator may have
    /// to lock a steal victim.
    pub fn switch(&self, cpu: CpuId, old: Option<&Arc<AddressSpace>>, new: &Arc<AddressSpace>) {
        let _ipl = IplGuard::new();
        let mut registry = self.asids.lock();

        // Retire the old address space first.
        if let Some(old) = old {
            let mut state = old.state.lock_active();
            debug_assert!(state.refcount > 0);
            state.refcount -= 1;
            if state.refcount == 0 && !old.kernel {
                debug_assert!(state.asid.is_valid());
                registry.enqueue_inactive(Arc::clone(old));
            }
        }

        // Then prepare the new one.
        let mut needs_asid = false;
        {
            let mut state = new.state.lock_active();
            state.refcount += 1;
            if state.refcount == 1 && !new.kernel {
                if state.asid.is_valid() {
                    let removed = registry.remove_inactive(new);
                    debug_assert!(removed, "inactive FIFO out of sync");
                } else {
                    // Defer until the state lock is released: the
                    // allocator may lock a victim, which could be any
                    // address space.
                    needs_asid = true;
                }
            }
        }

        if needs_asid {
            let asid = AsidRegistry::get_locked(&mut registry, &self.tlb, cpu);
            new.state.lock_active().asid = asid;
        }

        let asid = new.state.lock_active().asid;
        drop(registry);

        // Architecture-specific install of root and tag on this CPU.
        let root_ppn = new.page_table.lock().root_ppn();
        arch::asid_install(asid, root_ppn);
    }
}

struct AsState {
    /// CPUs currently running threads in this space.
    refcount: usize,
    asid: Asid,
    areas: AreaTable,
}

/// A per-process virtual memory context.
pub struct AddressSpace {
    kernel: bool,
    /// The address-space lock: areas, refcount and ASID.
    state: Mutex<AsState>,
    /// The VAT lock and the translation structure behind it.
    page_table: Mutex<PageTable>,
}

assert_impl_all!(AddressSpace: Send, Sync);

impl AddressSpace {
    fn new(kernel: bool) -> Self {
        let asid = if kernel { Asid::KERNEL } else { Asid::INVALID };
        Self {
            kernel,
            state: Mutex::new(AsState { refcount: 0, asid, areas: AreaTable::new() }),
            page_table: Mutex::new(PageTable::new()),
        }
    }

    pub fn is_kernel(&self) -> bool {
        self.kernel
    }

    /// Current ASID (INVALID when none is assigned).
    pub fn asid(&self) -> Asid {
        self.state.lock().asid
    }

    /// Number of CPUs currently running in this space.
    pub fn refcount(&self) -> usize {
        self.state.lock().refcount
    }

    /// Strips the ASID from a steal victim. Called by the allocator with
    /// the registry lock held.
    pub(crate) fn take_asid_for_steal(&self) -> Asid {
        let mut state = self.state.lock_active();
        let asid = state.asid;
        state.asid = Asid::INVALID;
        asid
    }

    /// Creates an area of `size` bytes at the page-aligned `base`.
    pub fn area_create(
        &self,
        flags: AreaFlags,
        size: usize,
        base: usize,
        lifecycle: AreaLifecycle,
    ) -> Result<AreaRef, AsError> {
        if base % PAGE_SIZE != 0 || size == 0 {
            return Err(AsError::PermissionDenied);
        }
        // Writable executable areas are not supported.
        if flags.contains(AreaFlags::EXEC | AreaFlags::WRITE) {
            return Err(AsError::PermissionDenied);
        }

        let _ipl = IplGuard::new();
        let mut state = self.state.lock();

        if state.areas.conflicts(base, size, None) {
            return Err(AsError::AddrNotAvailable);
        }

        let pages = size_to_pages(size);
        let area = Arc::new(Mutex::new(Area::new(base, pages, flags, lifecycle)));
        state.areas.insert(base, Arc::clone(&area));
        Ok(area)
    }

    /// Resizes the area containing `address`.
    ///
    /// The page count is computed from `address`, so addressing the middle
    /// of an area resizes its tail. Shrinking frees the resident frames
    /// above the new boundary and shoots the range down; growing only
    /// checks for conflicts, pages fault in on first touch.
    pub fn area_resize(
        &self,
        mm: &Mm,
        cpu: CpuId,
        address: usize,
        new_size: usize,
    ) -> Result<(), AsError> {
        let _ipl = IplGuard::new();
        let state = self.state.lock();

        let area_ref = state.areas.find(address).ok_or(AsError::NoEntry)?;
        let mut area = area_ref.lock();

        if area.flags().contains(AreaFlags::DEVICE) {
            // Remapping of memory-mapped device ranges is not supported.
            return Err(AsError::NotSupported);
        }

        let new_pages = size_to_pages((address - area.base()) + new_size);
        if new_pages == 0 {
            // Zero-size areas are not allowed.
            return Err(AsError::PermissionDenied);
        }

        if new_pages < area.pages() {
            let old_pages = area.pages();
            let boundary_page = (area.base() >> PAGE_WIDTH) + new_pages;

            // Walk the used runs from the highest addresses downwards,
            // splitting the run that straddles the new boundary.
            loop {
                let Some((run_page, run_count)) = area.used().last_run() else {
                    break;
                };
                if run_page + run_count <= boundary_page {
                    break;
                }

                let (first_freed, freed_count) = if run_page >= boundary_page {
                    (run_page, run_count)
                } else {
                    (boundary_page, run_page + run_count - boundary_page)
                };

                self.release_resident_pages(mm, first_freed, freed_count);

                if area.used_mut().remove(first_freed, freed_count).is_err() {
                    panic!("resize: used-space accounting out of sync");
                }
            }

            let kind = ShootdownKind::Pages {
                asid: state.asid,
                base: area.base() + new_pages * PAGE_SIZE,
                pages: old_pages - new_pages,
            };
            let guard = mm.tlb.shootdown_start(cpu, kind);
            tlb::invalidate_local(kind);
            guard.finalize();
        } else if state
            .areas
            .conflicts(address, new_pages * PAGE_SIZE, Some(&area_ref))
        {
            return Err(AsError::AddrNotAvailable);
        }

        area.set_pages(new_pages);
        Ok(())
    }

    /// Destroys the area containing `address`, releasing its frames.
    pub fn area_destroy(&self, mm: &Mm, cpu: CpuId, address: usize) -> Result<(), AsError> {
        let _ipl = IplGuard::new();
        let mut state = self.state.lock();

        let area_ref = state.areas.find(address).ok_or(AsError::NoEntry)?;
        let mut area = area_ref.lock();
        let base = area.base();

        if !area.flags().contains(AreaFlags::DEVICE) {
            // Device ranges keep their frames; everything else is walked
            // from the low end and returned to the pool.
            while let Some((run_page, run_count)) = area.used().first_run() {
                self.release_resident_pages(mm, run_page, run_count);
                if area.used_mut().remove(run_page, run_count).is_err() {
                    panic!("destroy: used-space accounting out of sync");
                }
            }
        }

        let kind = ShootdownKind::Pages { asid: state.asid, base, pages: area.pages() };
        let guard = mm.tlb.shootdown_start(cpu, kind);
        tlb::invalidate_local(kind);
        guard.finalize();

        area.set_lifecycle(AreaLifecycle::Partial);
        drop(area);

        state.areas.remove(base);
        Ok(())
    }

    /// Unmaps `[first_page, first_page + count)` and drops one frame
    /// reference per page. Every page must be mapped and present.
    fn release_resident_pages(&self, mm: &Mm, first_page: usize, count: usize) {
        let mut page_table = self.page_table.lock();
        for page in first_page..first_page + count {
            let va = page << PAGE_WIDTH;
            match page_table.unmap(va) {
                Some(pte) => {
                    debug_assert!(pte.present());
                    if mm.frames.free(pte.pfn).is_err() {
                        log_error!(target: "mm", "free of unpooled frame {:#x}", pte.pfn);
                    }
                }
                None => panic!("used page {va:#x} has no mapping"),
            }
        }
    }

    /// Steals the area at `src_base` in `src_task`'s address space:
    /// creates a PARTIAL copy at `dst_base` in this space, re-references
    /// every resident frame and installs the same mappings.
    pub fn area_steal(
        &self,
        mm: &Mm,
        src_task: &Task,
        src_base: usize,
        acc_size: usize,
        dst_base: usize,
    ) -> Result<AreaRef, AsError> {
        let _ipl = IplGuard::new();
        let src_space = src_task.address_space();

        let (src_pages, src_flags) = {
            let state = src_space.state.lock();
            let area_ref = state.areas.find(src_base).ok_or(AsError::NoEntry)?;
            let area = area_ref.lock();
            (area.pages(), area.flags())
        };

        let src_size = src_pages * PAGE_SIZE;
        if src_size != acc_size {
            return Err(AsError::PermissionDenied);
        }

        // The destination is created PARTIAL so a concurrent fault on it
        // defers instead of racing the copy below.
        let dst_area = self
            .area_create(src_flags, src_size, dst_base, AreaLifecycle::Partial)
            .map_err(|_| AsError::NoMemory)?;

        // Lock both spaces in ascending identity order to avoid ABBA.
        let self_id = self as *const AddressSpace as usize;
        let src_id = Arc::as_ptr(&src_space) as usize;
        let _locks: (MutexGuard<'_, AsState>, Option<MutexGuard<'_, AsState>>);
        if self_id == src_id {
            _locks = (self.state.lock(), None);
        } else if self_id < src_id {
            let first = self.state.lock();
            _locks = (first, Some(src_space.state.lock()));
        } else {
            let first = src_space.state.lock();
            _locks = (first, Some(self.state.lock()));
        }

        let dst_flags = { dst_area.lock().page_flags() };
        for i in 0..src_pages {
            let pte = {
                let src_table = src_space.page_table.lock();
                src_table.find(src_base + i * PAGE_SIZE)
            };
            let Some(pte) = pte else { continue };
            if !pte.present() {
                continue;
            }

            if !src_flags.contains(AreaFlags::DEVICE)
                && mm.frames.reference_add(pte.pfn).is_err()
            {
                panic!("steal: source frame {:#x} not owned by the pool", pte.pfn);
            }

            let mut dst_table = self.page_table.lock();
            if dst_table.map(dst_base + i * PAGE_SIZE, pte.pfn, dst_flags).is_err() {
                panic!("steal: destination mapping collision at page {i}");
            }
        }

        // The destination is fully populated; let faults through.
        dst_area.lock().set_lifecycle(AreaLifecycle::Normal);
        Ok(dst_area)
    }

    /// Handles a page fault at `page_va` in this (the current) space.
    ///
    /// `copy_slot` is the faulting thread's user-copy marker; when set, an
    /// unhandled fault rewrites the saved return address to the failover
    /// trampoline and reports `Defer` instead of `Fault`.
    pub fn page_fault(
        &self,
        mm: &Mm,
        page_va: usize,
        istate: &mut IState,
        copy_slot: &mut Option<CopySlot>,
    ) -> FaultOutcome {
        let page = page_va & !(PAGE_SIZE - 1);

        let state = self.state.lock();
        let Some(area_ref) = state.areas.find(page) else {
            drop(state);
            return resolve_unhandled(istate, copy_slot);
        };
        let mut area = area_ref.lock();

        if area.lifecycle() == AreaLifecycle::Partial {
            // Not fully initialized yet (steal in progress); the owner
            // finishes the copy, we must not race it.
            drop(area);
            drop(state);
            return resolve_unhandled(istate, copy_slot);
        }

        if area.flags().contains(AreaFlags::DEVICE) {
            // Device ranges are mapped explicitly and never fault-backed.
            debug_assert!(false, "page fault in DEVICE area at {page:#x}");
            drop(area);
            drop(state);
            return resolve_unhandled(istate, copy_slot);
        }

        let mut page_table = self.page_table.lock();

        // Another CPU may have resolved the same fault already; check
        // under the page-table lock before allocating.
        if let Some(pte) = page_table.find(page) {
            if pte.present() {
                return FaultOutcome::Ok;
            }
            // A valid but non-present mapping would mean frame reuse,
            // which has no encoding yet; fall through to a fresh frame.
        }

        let pfn = match mm.frames.alloc() {
            Ok(pfn) => pfn,
            Err(_) => {
                log_error!(target: "mm", "page fault at {:#x}: frame pool exhausted", page);
                return FaultOutcome::Fault;
            }
        };

        // New information only; no shootdown needed.
        if page_table.map(page, pfn, area.page_flags()).is_err() {
            panic!("fault: mapping insert failed at {page:#x}");
        }
        if area.used_mut().insert(page >> PAGE_WIDTH, 1).is_err() {
            panic!("fault: used-space insert failed at {page:#x}");
        }

        FaultOutcome::Ok
    }

    /// Installs a pre-selected frame into the area covering `page`
    /// (DEVICE-style explicit mappings).
    pub fn set_mapping(&self, page: usize, pfn: usize) -> Result<(), AsError> {
        let _ipl = IplGuard::new();
        let state = self.state.lock();

        let area_ref = state.areas.find(page).ok_or(AsError::NoEntry)?;
        let mut area = area_ref.lock();

        self.page_table
            .lock()
            .map(page, pfn, area.page_flags())
            .map_err(|_| AsError::AddrNotAvailable)?;

        area.used_mut()
            .insert(page >> PAGE_WIDTH, 1)
            .map_err(|_| AsError::AddrNotAvailable)
    }

    /// Size in bytes of the area based at `base`, or `None`.
    pub fn area_size(&self, base: usize) -> Option<usize> {
        let _ipl = IplGuard::new();
        let state = self.state.lock();
        let area_ref = state.areas.find(base)?;
        let size = area_ref.lock().size();
        Some(size)
    }

    /// Looks up the current mapping of `va`, for diagnostics and tests.
    pub fn mapping_of(&self, va: usize) -> Option<super::page_table::Pte> {
        self.page_table.lock().find(va & !(PAGE_SIZE - 1))
    }

    /// Runs `f` on the area covering `va`.
    pub fn with_area<R>(&self, va: usize, f: impl FnOnce(&Area) -> R) -> Option<R> {
        let state = self.state.lock();
        let area_ref = state.areas.find(va)?;
        let area = area_ref.lock();
        Some(f(&area))
    }
}

fn resolve_unhandled(istate: &mut IState, copy_slot: &mut Option<CopySlot>) -> FaultOutcome {
    match copy_slot.take() {
        Some(slot) => {
            istate.set_retaddr(slot.failover);
            FaultOutcome::Defer
        }
        None => FaultOutcome::Fault,
    }
}

/// Number of whole pages covering `size` bytes.
pub(crate) fn size_to_pages(size: usize) -> usize {
    size.div_ceil(PAGE_SIZE)
}
