// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel task objects, reduced to what the mm core consumes
//! OWNERS: @kernel-team
//! PUBLIC API: Task (new/id/address_space)
//! INVARIANTS: The task spinlock only guards the address-space reference;
//!   it is taken before any address-space lock and released before the
//!   caller proceeds to lock the space
//!
//! The area-steal path names its source by task: it locks the task,
//! snapshots the address-space reference and drops the task lock again
//! before touching the space itself.

use alloc::sync::Arc;

use spin::Mutex;

use crate::mm::AddressSpace;

struct TaskInner {
    address_space: Arc<AddressSpace>,
}

/// A kernel task. Scheduling state lives elsewhere; the mm core only
/// needs the identity and the owned address space.
pub struct Task {
    id: u64,
    inner: Mutex<TaskInner>,
}

impl Task {
    pub fn new(id: u64, address_space: Arc<AddressSpace>) -> Self {
        Self { id, inner: Mutex::new(TaskInner { address_space }) }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Snapshots the task's address space under the task lock.
    pub fn address_space(&self) -> Arc<AddressSpace> {
        Arc::clone(&self.inner.lock().address_space)
    }
}
