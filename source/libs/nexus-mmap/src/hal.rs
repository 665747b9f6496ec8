// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Platform seams consumed by the mapping subsystem
//! OWNERS: @kernel-mm-team
//! PUBLIC API: PageTable, FrameAllocator, MappedFile, PageTableEntry, PteFlags, MapError, FileError
//! DEPENDS_ON: platform page tables, physical frame allocator, VFS file objects
//! INVARIANTS: Frames are page-sized and zeroed on allocation; adapters are internally synchronized

use alloc::sync::Arc;
use bitflags::bitflags;
use thiserror::Error;

use crate::layout::PAGE_SIZE;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    /// Leaf bits of a user page-table entry.
    pub struct PteFlags: usize {
        const PRESENT = 1 << 0;
        const WRITE = 1 << 1;
        const USER = 1 << 2;
    }
}

/// Decoded page-table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageTableEntry {
    /// Physical address of the backing frame.
    pub frame: usize,
    pub flags: PteFlags,
}

impl PageTableEntry {
    pub fn is_present(&self) -> bool {
        self.flags.contains(PteFlags::PRESENT)
    }
}

/// Error returned by page-table updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MapError {
    /// Virtual or physical address is not page aligned.
    #[error("address not page aligned")]
    Unaligned,
    /// Address lies outside the range the table can describe.
    #[error("address out of range")]
    OutOfRange,
    /// An entry already exists for the address.
    #[error("entry already present")]
    Overlap,
    /// Flags are not suitable for a leaf mapping.
    #[error("invalid leaf flags")]
    InvalidFlags,
    /// Intermediate table could not be allocated.
    #[error("out of page-table memory")]
    NoMemory,
}

/// Error returned by positioned file I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FileError {
    /// Underlying device reported a failure.
    #[error("device i/o error")]
    Device,
    /// Fewer bytes were written than requested.
    #[error("short write ({written} of {requested} bytes)")]
    ShortWrite { written: usize, requested: usize },
    /// File was not opened with the needed access mode.
    #[error("file not opened for this access")]
    BadMode,
}

/// Per-address-space page table.
///
/// Lookups return entries whether or not they are present; callers decide
/// between "backed" (present) and "placeholder" (entry without PRESENT).
pub trait PageTable {
    /// Returns the entry installed for page `va`, present or not.
    fn lookup(&self, va: usize) -> Option<PageTableEntry>;

    /// Installs a leaf entry mapping page `va` to frame `pa`.
    fn install(&mut self, va: usize, pa: usize, flags: PteFlags) -> Result<(), MapError>;

    /// Removes the entry for `va` without touching the frame it referenced.
    fn clear(&mut self, va: usize);
}

/// Physical frame allocator shared by all address spaces.
pub trait FrameAllocator {
    /// Allocates one zeroed frame and returns its physical address.
    fn allocate(&mut self) -> Option<usize>;

    /// Adds a reference to frame `pa` for another address space.
    fn share(&mut self, pa: usize);

    /// Drops one reference to frame `pa`; the last one returns it to the
    /// allocator.
    fn free(&mut self, pa: usize);

    /// Borrows the contents of frame `pa`.
    fn frame(&self, pa: usize) -> &[u8];

    /// Mutably borrows the contents of frame `pa`.
    fn frame_mut(&mut self, pa: usize) -> &mut [u8];

    /// Copies the contents of `src` into `dst`.
    fn copy_frame(&mut self, dst: usize, src: usize) {
        let mut page = [0u8; PAGE_SIZE];
        page.copy_from_slice(&self.frame(src)[..PAGE_SIZE]);
        self.frame_mut(dst)[..PAGE_SIZE].copy_from_slice(&page);
    }
}

/// Open file that can back a mapping.
///
/// Positioned I/O stands in for seek-then-read/write; implementations carry
/// their own locking.
pub trait MappedFile: Send + Sync {
    fn readable(&self) -> bool;

    fn writable(&self) -> bool;

    /// Reads up to `buf.len()` bytes at `offset`; returns the count read (0 at EOF).
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, FileError>;

    /// Writes `buf` at `offset`; returns the count written.
    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, FileError>;
}

/// Shared handle to a backing file; cloned into every region piece.
pub type FileRef = Arc<dyn MappedFile>;
