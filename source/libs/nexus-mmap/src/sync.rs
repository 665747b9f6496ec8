// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Serialized access to one address space
//! OWNERS: @kernel-mm-team
//! PUBLIC API: LockedAddressSpace
//! DEPENDS_ON: spin::Mutex
//! INVARIANTS: mmap/munmap/fault handling for one space never run concurrently

use spin::{Mutex, MutexGuard};

use crate::error::MmapError;
use crate::hal::{FrameAllocator, PageTable};
use crate::space::{AddressSpace, FaultAccess, MmapRequest};

/// Address space behind a single exclusive lock, shared by every kernel
/// thread acting for the owning process.
pub struct LockedAddressSpace<P> {
    inner: Mutex<AddressSpace<P>>,
}

impl<P: PageTable> LockedAddressSpace<P> {
    pub fn new(space: AddressSpace<P>) -> Self {
        Self { inner: Mutex::new(space) }
    }

    /// Grants exclusive access for compound operations.
    pub fn lock(&self) -> MutexGuard<'_, AddressSpace<P>> {
        self.inner.lock()
    }

    pub fn mmap(&self, request: MmapRequest) -> Result<usize, MmapError> {
        self.inner.lock().mmap(request)
    }

    pub fn munmap<A: FrameAllocator>(
        &self,
        addr: usize,
        len: usize,
        frames: &mut A,
    ) -> Result<(), MmapError> {
        self.inner.lock().munmap(addr, len, frames)
    }

    pub fn resolve_fault<A: FrameAllocator>(
        &self,
        va: usize,
        access: FaultAccess,
        frames: &mut A,
    ) -> Result<(), MmapError> {
        self.inner.lock().resolve_fault(va, access, frames)
    }

    pub fn into_inner(self) -> AddressSpace<P> {
        self.inner.into_inner()
    }
}
