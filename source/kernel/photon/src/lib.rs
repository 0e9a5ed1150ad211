// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: PHOTON kernel core library — address spaces, ASID recycling, TLB coherence
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! PUBLIC API: mm (Mm, AddressSpace, area ops, page fault), task::Task, syscall wrappers
//! DEPENDS_ON: bitflags, spin, static_assertions, riscv (OS builds)
//! INVARIANTS: Lock order ASID registry -> address space -> area -> page table;
//!   no partially applied area operation is ever observable
//!
//! This crate is the machine-independent core a kernel image links against.
//! It owns no boot path, no allocator bring-up and no drivers; RISC-V
//! specific instructions are confined to `arch` behind target cfgs so the
//! whole crate builds and tests on the host.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod diag;
pub mod mm;
pub mod sync;
pub mod syscall;
pub mod task;
