// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Address-space areas and the per-space ordered area index
//! OWNERS: @kernel-mm-team
//! PUBLIC API: Area, AreaFlags, AreaLifecycle, AreaTable (find/conflicts)
//! INVARIANTS: Areas in one table are pairwise disjoint, never overlap the
//!   NULL page and never cross into the kernel half; EXEC and WRITE are
//!   mutually exclusive; a PARTIAL area is invisible to the fault handler
//!
//! The table is an ordered index keyed by base address. Both queries only
//! ever look at the direct hit and one neighbour on each side, which is
//! all the disjointness invariant requires.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;

use super::page_table::PageFlags;
use super::used_range::UsedRange;
use super::{overlaps, PAGE_SIZE, USER_SPACE_END};
use crate::sync::Mutex;

bitflags! {
    /// Access flags of an address-space area.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AreaFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
        /// Memory-mapped device range: pages are installed explicitly,
        /// never fault-backed, and never freed into the frame pool.
        const DEVICE = 1 << 3;
    }
}

/// Lifecycle of an area. A freshly stolen destination stays PARTIAL until
/// all source mappings are copied; the fault handler treats PARTIAL as
/// "no mapping here yet" and defers to the owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AreaLifecycle {
    Normal,
    Partial,
}

/// A contiguous virtual range with uniform flags.
pub struct Area {
    base: usize,
    pages: usize,
    flags: AreaFlags,
    lifecycle: AreaLifecycle,
    used: UsedRange,
}

pub type AreaRef = Arc<Mutex<Area>>;

impl Area {
    pub(crate) fn new(
        base: usize,
        pages: usize,
        flags: AreaFlags,
        lifecycle: AreaLifecycle,
    ) -> Self {
        Self { base, pages, flags, lifecycle, used: UsedRange::new() }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn size(&self) -> usize {
        self.pages * PAGE_SIZE
    }

    pub fn flags(&self) -> AreaFlags {
        self.flags
    }

    pub fn lifecycle(&self) -> AreaLifecycle {
        self.lifecycle
    }

    pub(crate) fn set_lifecycle(&mut self, lifecycle: AreaLifecycle) {
        self.lifecycle = lifecycle;
    }

    pub(crate) fn set_pages(&mut self, pages: usize) {
        self.pages = pages;
    }

    pub(crate) fn used(&self) -> &UsedRange {
        &self.used
    }

    pub(crate) fn used_mut(&mut self) -> &mut UsedRange {
        &mut self.used
    }

    /// Resident page runs, as (first page number, count).
    pub fn resident_runs(&self) -> Vec<(usize, usize)> {
        self.used.iter().collect()
    }

    /// Page-table flags for mappings of this area.
    pub fn page_flags(&self) -> PageFlags {
        area_flags_to_page_flags(self.flags)
    }

    /// Tells whether `va` falls inside the area.
    pub fn contains(&self, va: usize) -> bool {
        va >= self.base && va < self.base + self.size()
    }
}

/// Converts area access flags to the flags used for its page mappings.
pub fn area_flags_to_page_flags(aflags: AreaFlags) -> PageFlags {
    let mut flags = PageFlags::USER | PageFlags::VALID;

    if aflags.contains(AreaFlags::READ) {
        flags |= PageFlags::READ;
    }
    if aflags.contains(AreaFlags::WRITE) {
        flags |= PageFlags::WRITE;
    }
    if aflags.contains(AreaFlags::EXEC) {
        flags |= PageFlags::EXECUTE;
    }
    if !aflags.contains(AreaFlags::DEVICE) {
        flags |= PageFlags::SOFT_CACHED;
    }

    flags
}

/// Ordered index of the areas of one address space, keyed by base.
#[derive(Default)]
pub struct AreaTable {
    areas: BTreeMap<usize, AreaRef>,
}

impl AreaTable {
    pub const fn new() -> Self {
        Self { areas: BTreeMap::new() }
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &AreaRef)> {
        self.areas.iter().map(|(&base, area)| (base, area))
    }

    pub(crate) fn insert(&mut self, base: usize, area: AreaRef) {
        let previous = self.areas.insert(base, area);
        debug_assert!(previous.is_none(), "duplicate area base {base:#x}");
    }

    pub(crate) fn remove(&mut self, base: usize) -> Option<AreaRef> {
        self.areas.remove(&base)
    }

    /// Returns the area containing `va`: the greatest base at or below
    /// `va` is the only candidate.
    pub fn find(&self, va: usize) -> Option<AreaRef> {
        let (_, area) = self.areas.range(..=va).next_back()?;
        if area.lock().contains(va) {
            Some(Arc::clone(area))
        } else {
            None
        }
    }

    /// Tells whether placing `[va, va + size)` would conflict with the
    /// NULL page, another area (`avoid` excepted) or the kernel half.
    pub fn conflicts(&self, va: usize, size: usize, avoid: Option<&AreaRef>) -> bool {
        // Nothing may shadow the NULL page.
        if overlaps(va, size, 0, PAGE_SIZE) {
            return true;
        }

        let is_avoided = |candidate: &AreaRef| match avoid {
            Some(avoid) => Arc::ptr_eq(candidate, avoid),
            None => false,
        };

        // The direct hit and the right neighbour share a lookup: the first
        // area at or past va.
        for (_, area) in self.areas.range(va..).take(1) {
            if !is_avoided(area) {
                let area = area.lock();
                if overlaps(va, size, area.base(), area.size()) {
                    return true;
                }
            }
        }
        // Left neighbour.
        for (_, area) in self.areas.range(..va).rev().take(1) {
            if !is_avoided(area) {
                let area = area.lock();
                if overlaps(va, size, area.base(), area.size()) {
                    return true;
                }
            }
        }

        // The kernel half is never shadowed into user tables, so areas
        // may not reach into it.
        let end = match va.checked_add(size) {
            Some(end) => end,
            None => return true,
        };
        end > USER_SPACE_END
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(areas: &[(usize, usize)]) -> AreaTable {
        let mut table = AreaTable::new();
        for &(base, pages) in areas {
            table.insert(
                base,
                Arc::new(Mutex::new(Area::new(
                    base,
                    pages,
                    AreaFlags::READ | AreaFlags::WRITE,
                    AreaLifecycle::Normal,
                ))),
            );
        }
        table
    }

    #[test]
    fn find_checks_the_left_neighbour_span() {
        let table = table_with(&[(0x10000, 2), (0x20000, 1)]);

        let hit = table.find(0x10000).expect("direct hit");
        assert_eq!(hit.lock().base(), 0x10000);

        let inside = table.find(0x11fff).expect("inside first area");
        assert_eq!(inside.lock().base(), 0x10000);

        assert!(table.find(0x12000).is_none());
        assert!(table.find(0x1000).is_none());
    }

    #[test]
    fn conflicts_with_null_page_and_kernel_half() {
        let table = table_with(&[]);
        assert!(table.conflicts(0, PAGE_SIZE, None));
        assert!(table.conflicts(USER_SPACE_END - PAGE_SIZE, 2 * PAGE_SIZE, None));
        assert!(!table.conflicts(USER_SPACE_END - PAGE_SIZE, PAGE_SIZE, None));
    }

    #[test]
    fn conflicts_with_neighbours_only_when_overlapping() {
        let table = table_with(&[(0x10000, 2), (0x20000, 2)]);

        assert!(table.conflicts(0x11000, PAGE_SIZE, None));
        assert!(table.conflicts(0xf000, 2 * PAGE_SIZE, None));
        assert!(!table.conflicts(0x12000, PAGE_SIZE, None));
        assert!(!table.conflicts(0x1e000, 2 * PAGE_SIZE, None));
        assert!(table.conflicts(0x1e000, 3 * PAGE_SIZE, None));
    }

    #[test]
    fn conflicts_skips_the_avoided_area() {
        let table = table_with(&[(0x10000, 2)]);
        let area = table.find(0x10000).expect("area");

        // Growing in place is only a self-overlap.
        assert!(!table.conflicts(0x10000, 3 * PAGE_SIZE, Some(&area)));
        assert!(table.conflicts(0x10000, 3 * PAGE_SIZE, None));
    }

    #[test]
    fn page_flag_conversion_keeps_cacheability_rule() {
        let flags = area_flags_to_page_flags(AreaFlags::READ | AreaFlags::WRITE);
        assert!(flags.contains(PageFlags::SOFT_CACHED));
        assert!(flags.contains(PageFlags::USER | PageFlags::VALID));

        let device = area_flags_to_page_flags(AreaFlags::READ | AreaFlags::DEVICE);
        assert!(!device.contains(PageFlags::SOFT_CACHED));
    }
}
