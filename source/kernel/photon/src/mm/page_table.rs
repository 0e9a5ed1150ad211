// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Sv39 page table — the virtual-address-translation collaborator
//! OWNERS: @kernel-mm-team
//! PUBLIC API: PageTable (map/find/unmap/root_ppn), PageFlags, MapError, Pte
//! INVARIANTS: W^X enforced on every leaf; canonical Sv39 range and
//!   4096-byte alignment checked on entry; intermediate levels allocated
//!   on demand and freed with the table
//!
//! The rest of mm treats this as the opaque VAT layer: it inserts, looks
//! up and removes 4 KiB leaf mappings and reads the root PPN for the satp
//! encoding. Callers serialize access through the per-address-space page
//! table lock.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ptr::NonNull;

use bitflags::bitflags;
use static_assertions::assert_impl_all;

use super::PAGE_SIZE;

/// Number of entries per Sv39 page-table page.
const PT_ENTRIES: usize = 512;
/// PPN field shift inside a PTE.
const PPN_SHIFT: usize = 10;
/// Low bits of a PTE holding flags (incl. the RSW software bits).
const FLAG_MASK: usize = 0x3ff;

bitflags! {
    /// Flags stored in Sv39 page-table entries. `SOFT_CACHED` occupies an
    /// RSW bit, which the hardware ignores; the mm core uses it to keep
    /// the cacheability attribute of a mapping.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PageFlags: usize {
        const VALID = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const EXECUTE = 1 << 3;
        const USER = 1 << 4;
        const GLOBAL = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY = 1 << 7;
        const SOFT_CACHED = 1 << 8;
    }
}

const LEAF_PERMS: PageFlags =
    PageFlags::READ.union(PageFlags::WRITE).union(PageFlags::EXECUTE);

/// Error returned when manipulating page tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapError {
    /// Virtual or physical address was not page aligned.
    Unaligned,
    /// Mapping extends beyond the canonical Sv39 range.
    OutOfRange,
    /// Mapping violates the W^X policy.
    PermissionDenied,
    /// Mapping collides with an existing entry.
    Overlap,
    /// Flags do not describe a valid leaf entry.
    InvalidFlags,
}

/// Decoded leaf entry, as handed to the mm core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pte {
    /// Physical frame number of the target page.
    pub pfn: usize,
    pub flags: PageFlags,
}

impl Pte {
    /// A PTE inserted by this table is always VALID; "present" is the
    /// VALID bit here (there is no swapped-out encoding yet).
    pub fn present(&self) -> bool {
        self.flags.contains(PageFlags::VALID)
    }
}

#[repr(align(4096))]
struct PageTablePage {
    entries: [usize; PT_ENTRIES],
}

impl PageTablePage {
    const fn new() -> Self {
        Self { entries: [0; PT_ENTRIES] }
    }
}

/// Three-level Sv39 page table allocating intermediate levels on demand.
pub struct PageTable {
    root: NonNull<PageTablePage>,
    owned: Vec<NonNull<PageTablePage>>,
}

// SAFETY: all interior pointers target pages owned by `owned`/`root` and
// every access goes through &self/&mut self; callers additionally hold the
// per-address-space page-table lock around mutation.
unsafe impl Send for PageTable {}
assert_impl_all!(PageTable: Send);

impl PageTable {
    /// Creates an empty Sv39 page table with a fresh root page.
    pub fn new() -> Self {
        let root = Self::alloc_page();
        Self { root, owned: alloc::vec![root] }
    }

    /// Returns the physical page number of the root page suitable for satp.
    pub fn root_ppn(&self) -> usize {
        self.root.as_ptr() as usize / PAGE_SIZE
    }

    /// Installs a 4 KiB mapping from `va` to the frame `pfn`.
    pub fn map(&mut self, va: usize, pfn: usize, flags: PageFlags) -> Result<(), MapError> {
        if va % PAGE_SIZE != 0 {
            return Err(MapError::Unaligned);
        }
        if !is_canonical_sv39(va) {
            return Err(MapError::OutOfRange);
        }
        if flags.intersection(LEAF_PERMS).is_empty() || !flags.contains(PageFlags::VALID) {
            return Err(MapError::InvalidFlags);
        }
        if flags.contains(PageFlags::WRITE) && flags.contains(PageFlags::EXECUTE) {
            return Err(MapError::PermissionDenied);
        }

        let mut effective = flags | PageFlags::ACCESSED;
        if flags.contains(PageFlags::WRITE) {
            effective |= PageFlags::DIRTY;
        }

        let mut table = self.root;
        for (level, index) in vpn_indices(va).into_iter().enumerate() {
            // SAFETY: `table` points into a page kept alive by `owned`.
            let entry = unsafe { &mut (*table.as_ptr()).entries[index] };
            if level == 2 {
                if *entry & PageFlags::VALID.bits() != 0 {
                    return Err(MapError::Overlap);
                }
                *entry = (pfn << PPN_SHIFT) | effective.bits();
                return Ok(());
            }

            if *entry & PageFlags::VALID.bits() != 0 {
                if *entry & LEAF_PERMS.bits() != 0 {
                    // A superpage leaf blocks the walk.
                    return Err(MapError::Overlap);
                }
                let next = (((*entry) >> PPN_SHIFT) << 12) as *mut PageTablePage;
                table = NonNull::new(next).ok_or(MapError::OutOfRange)?;
                continue;
            }

            let next = Self::alloc_page();
            self.owned.push(next);
            let ppn = next.as_ptr() as usize / PAGE_SIZE;
            *entry = (ppn << PPN_SHIFT) | PageFlags::VALID.bits();
            table = next;
        }
        Ok(())
    }

    /// Looks up the leaf mapped at `va`, if any.
    pub fn find(&self, va: usize) -> Option<Pte> {
        if va % PAGE_SIZE != 0 || !is_canonical_sv39(va) {
            return None;
        }
        let mut table = self.root;
        for (level, index) in vpn_indices(va).into_iter().enumerate() {
            // SAFETY: `table` points into a page kept alive by `owned`.
            let entry = unsafe { (*table.as_ptr()).entries[index] };
            if entry & PageFlags::VALID.bits() == 0 {
                return None;
            }
            let is_leaf = entry & LEAF_PERMS.bits() != 0;
            if level == 2 {
                return is_leaf.then(|| decode(entry));
            }
            if is_leaf {
                // Superpages are not used by the mm core.
                return None;
            }
            let next = ((entry >> PPN_SHIFT) << 12) as *mut PageTablePage;
            table = NonNull::new(next)?;
        }
        None
    }

    /// Removes the leaf mapped at `va` and returns it.
    ///
    /// Intermediate levels are not reclaimed eagerly; they are freed with
    /// the table.
    pub fn unmap(&mut self, va: usize) -> Option<Pte> {
        if va % PAGE_SIZE != 0 || !is_canonical_sv39(va) {
            return None;
        }
        let mut table = self.root;
        for (level, index) in vpn_indices(va).into_iter().enumerate() {
            // SAFETY: `table` points into a page kept alive by `owned`.
            let entry = unsafe { &mut (*table.as_ptr()).entries[index] };
            if *entry & PageFlags::VALID.bits() == 0 {
                return None;
            }
            let is_leaf = *entry & LEAF_PERMS.bits() != 0;
            if level == 2 {
                if !is_leaf {
                    return None;
                }
                let old = decode(*entry);
                *entry = 0;
                return Some(old);
            }
            if is_leaf {
                return None;
            }
            let next = ((*entry >> PPN_SHIFT) << 12) as *mut PageTablePage;
            table = NonNull::new(next)?;
        }
        None
    }

    fn alloc_page() -> NonNull<PageTablePage> {
        let boxed = Box::new(PageTablePage::new());
        // SAFETY: Box::into_raw never returns null.
        unsafe { NonNull::new_unchecked(Box::into_raw(boxed)) }
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PageTable {
    fn drop(&mut self) {
        for page in self.owned.drain(..) {
            // SAFETY: every pointer originates from `alloc_page` and is unique.
            unsafe { drop(Box::from_raw(page.as_ptr())) };
        }
    }
}

fn decode(entry: usize) -> Pte {
    Pte {
        pfn: entry >> PPN_SHIFT,
        flags: PageFlags::from_bits_truncate(entry & FLAG_MASK),
    }
}

fn vpn_indices(va: usize) -> [usize; 3] {
    let vpn0 = (va >> 12) & 0x1ff;
    let vpn1 = (va >> 21) & 0x1ff;
    let vpn2 = (va >> 30) & 0x1ff;
    // Walk from the top level (VPN2) down to VPN0.
    [vpn2, vpn1, vpn0]
}

pub const fn is_canonical_sv39(va: usize) -> bool {
    let sign = (va >> 38) & 1;
    let upper = va >> 39;
    if sign == 0 {
        upper == 0
    } else {
        upper == usize::MAX >> 39
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RW: PageFlags = PageFlags::VALID
        .union(PageFlags::READ)
        .union(PageFlags::WRITE)
        .union(PageFlags::USER);

    #[test]
    fn rejects_unaligned_addresses() {
        let mut table = PageTable::new();
        assert_eq!(table.map(1, 1, RW), Err(MapError::Unaligned));
    }

    #[test]
    fn rejects_invalid_flags() {
        let mut table = PageTable::new();
        assert_eq!(table.map(0, 1, PageFlags::empty()), Err(MapError::InvalidFlags));
        assert_eq!(table.map(0, 1, PageFlags::VALID), Err(MapError::InvalidFlags));
    }

    #[test]
    fn enforces_w_xor_x() {
        let mut table = PageTable::new();
        let flags = PageFlags::VALID | PageFlags::WRITE | PageFlags::EXECUTE;
        assert_eq!(table.map(0, 1, flags), Err(MapError::PermissionDenied));
    }

    #[test]
    fn detects_overlap() {
        let mut table = PageTable::new();
        table.map(0, 1, RW).expect("first mapping");
        assert_eq!(table.map(0, 2, RW), Err(MapError::Overlap));
    }

    #[test]
    fn out_of_range_rejected() {
        let mut table = PageTable::new();
        let va = 1usize << 50; // beyond canonical Sv39 range
        assert_eq!(table.map(va, 1, RW), Err(MapError::OutOfRange));
    }

    #[test]
    fn map_find_unmap_roundtrip() {
        let mut table = PageTable::new();
        table.map(PAGE_SIZE, 42, RW).expect("map");

        let pte = table.find(PAGE_SIZE).expect("mapped");
        assert_eq!(pte.pfn, 42);
        assert!(pte.present());
        assert!(pte.flags.contains(PageFlags::WRITE | PageFlags::DIRTY));

        assert_eq!(table.find(2 * PAGE_SIZE), None);

        let removed = table.unmap(PAGE_SIZE).expect("unmap");
        assert_eq!(removed.pfn, 42);
        assert_eq!(table.find(PAGE_SIZE), None);
        assert_eq!(table.unmap(PAGE_SIZE), None);
    }

    #[test]
    fn root_ppn_reports_base_page() {
        let table = PageTable::new();
        assert_ne!(table.root_ppn(), 0);
    }
}
