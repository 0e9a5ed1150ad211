// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Numeric syscall surface for the area operations
//! OWNERS: @kernel-team
//! PUBLIC API: sys_area_create/sys_area_resize/sys_area_destroy, errno values
//! INVARIANTS: Status codes are stable wire values; `sys_area_create`
//!   reports failure as usize::MAX, the others return an errno
//!
//! Thin wrappers: decode raw flag bits, run the operation on the caller's
//! address space, encode the result. Everything interesting happens in
//! `mm::address_space`.

use alloc::sync::Arc;

use crate::mm::area::{AreaFlags, AreaLifecycle};
use crate::mm::tlb::CpuId;
use crate::mm::{AddressSpace, AsError, Mm};

pub const EOK: usize = 0;
pub const ENOENT: usize = 1;
pub const ENOTSUP: usize = 2;
pub const EPERM: usize = 3;
pub const EADDRNOTAVAIL: usize = 4;
pub const ENOMEM: usize = 5;
/// Unknown flag bits in a request.
pub const EINVAL: usize = 6;

fn errno(err: AsError) -> usize {
    match err {
        AsError::NoEntry => ENOENT,
        AsError::NotSupported => ENOTSUP,
        AsError::PermissionDenied => EPERM,
        AsError::AddrNotAvailable => EADDRNOTAVAIL,
        AsError::NoMemory => ENOMEM,
    }
}

/// Creates an area in the caller's address space.
///
/// Returns the base address on success, `usize::MAX` on failure.
pub fn sys_area_create(
    current: &Arc<AddressSpace>,
    base: usize,
    size: usize,
    flags: u32,
) -> usize {
    let Some(flags) = AreaFlags::from_bits(flags) else {
        return usize::MAX;
    };
    match current.area_create(flags, size, base, AreaLifecycle::Normal) {
        Ok(_) => base,
        Err(_) => usize::MAX,
    }
}

/// Resizes the area containing `base` in the caller's address space.
pub fn sys_area_resize(
    mm: &Mm,
    current: &Arc<AddressSpace>,
    cpu: CpuId,
    base: usize,
    new_size: usize,
) -> usize {
    match current.area_resize(mm, cpu, base, new_size) {
        Ok(()) => EOK,
        Err(err) => errno(err),
    }
}

/// Destroys the area containing `base` in the caller's address space.
pub fn sys_area_destroy(
    mm: &Mm,
    current: &Arc<AddressSpace>,
    cpu: CpuId,
    base: usize,
) -> usize {
    match current.area_destroy(mm, cpu, base) {
        Ok(()) => EOK,
        Err(err) => errno(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::{MmConfig, PAGE_SIZE};

    #[test]
    fn create_returns_base_or_minus_one() {
        let mm = Mm::init(MmConfig { frame_base: 0, frame_count: 8, asid_count: 2 });
        let _cpu0 = mm.tlb.register(CpuId(0));
        let space = mm.create_address_space();
        let rw = (AreaFlags::READ | AreaFlags::WRITE).bits();

        assert_eq!(sys_area_create(&space, 0x10000, PAGE_SIZE, rw), 0x10000);
        // Overlap: reported as -1, not as an errno.
        assert_eq!(sys_area_create(&space, 0x10000, PAGE_SIZE, rw), usize::MAX);
        // Unknown flag bits.
        assert_eq!(sys_area_create(&space, 0x20000, PAGE_SIZE, 1 << 30), usize::MAX);

        assert_eq!(sys_area_resize(&mm, &space, CpuId(0), 0x10000, 2 * PAGE_SIZE), EOK);
        assert_eq!(
            sys_area_resize(&mm, &space, CpuId(0), 0x90000, PAGE_SIZE),
            ENOENT
        );
        assert_eq!(sys_area_destroy(&mm, &space, CpuId(0), 0x10000), EOK);
        assert_eq!(sys_area_destroy(&mm, &space, CpuId(0), 0x10000), ENOENT);
    }
}
