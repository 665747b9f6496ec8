// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-process memory mappings (mmap/munmap) with lazy page materialization
//! OWNERS: @kernel-mm-team
//! STATUS: Functional (host-first)
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests (region table), scenario tests, property tests
//!
//! PUBLIC API:
//!   - AddressSpace: mmap / munmap / materialize / resolve_fault / fork_into
//!   - RegionTable, Region: ordered, capacity-bounded interval set
//!   - hal::{PageTable, FrameAllocator, MappedFile}: platform seams
//!   - syscall: raw entry points returning sentinel values
//!   - LockedAddressSpace: one exclusive lock per address space
//!
//! DEPENDS_ON: bitflags, log, spin, thiserror
//! INVARIANTS: Regions sorted by base; rounded extents pairwise disjoint; every
//!             region inside [base, ceiling); a page is backed iff its PTE is present

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![forbid(clippy::unwrap_used)]

extern crate alloc;

pub mod error;
pub mod flags;
pub mod hal;
pub mod layout;
pub mod region;
pub mod space;
pub mod sync;
pub mod syscall;

#[cfg(test)]
mod mock;
#[cfg(test)]
mod tests_prop;

pub use error::MmapError;
pub use flags::{MapFlags, Prot, Sharing};
pub use hal::{FileError, FileRef, FrameAllocator, MapError, MappedFile, PageTable};
pub use layout::{MmapConfig, KERNEL_BASE, MMAP_BASE, MMAP_LIMIT, PAGE_SIZE};
pub use region::{Backing, Region, RegionTable};
pub use space::{AddressSpace, FaultAccess, MmapRequest};
pub use sync::LockedAddressSpace;
