// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: User mapping window, page geometry and per-space configuration
//! OWNERS: @kernel-mm-team
//! PUBLIC API: PAGE_SIZE, MMAP_BASE, KERNEL_BASE, MMAP_LIMIT, MmapConfig, page_round_{up,down}
//! INVARIANTS: Window bounds page-aligned; base < ceiling; capacity non-zero

use static_assertions::const_assert;

use crate::error::MmapError;

/// Size of a page in bytes.
pub const PAGE_SIZE: usize = 4096;
/// Lowest address handed out to user mappings.
pub const MMAP_BASE: usize = 0x6000_0000;
/// First address owned by the kernel; user mappings end at or below it.
pub const KERNEL_BASE: usize = 0x8000_0000;
/// Default number of regions a single address space may hold.
pub const MMAP_LIMIT: usize = 32;

const_assert!(PAGE_SIZE.is_power_of_two());
const_assert!(MMAP_BASE % PAGE_SIZE == 0);
const_assert!(KERNEL_BASE % PAGE_SIZE == 0);
const_assert!(MMAP_BASE < KERNEL_BASE);

/// Rounds `addr` up to the next page boundary, saturating at the last page.
pub const fn page_round_up(addr: usize) -> usize {
    match addr.checked_add(PAGE_SIZE - 1) {
        Some(bumped) => bumped & !(PAGE_SIZE - 1),
        None => usize::MAX & !(PAGE_SIZE - 1),
    }
}

/// Rounds `addr` down to its page boundary.
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

pub const fn is_page_aligned(addr: usize) -> bool {
    addr % PAGE_SIZE == 0
}

/// Address window and capacity bound of one address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MmapConfig {
    /// Start of the mapping window (inclusive).
    pub base: usize,
    /// End of the mapping window (exclusive).
    pub ceiling: usize,
    /// Maximum number of live regions.
    pub max_regions: usize,
}

impl MmapConfig {
    /// Builds a validated configuration.
    pub fn new(base: usize, ceiling: usize, max_regions: usize) -> Result<Self, MmapError> {
        if !is_page_aligned(base) || !is_page_aligned(ceiling) {
            return Err(MmapError::InvalidArgument);
        }
        if base >= ceiling || max_regions == 0 {
            return Err(MmapError::InvalidArgument);
        }
        Ok(Self { base, ceiling, max_regions })
    }

    /// Returns true when `[start, end)` lies inside the window.
    pub fn contains_range(&self, start: usize, end: usize) -> bool {
        start >= self.base && end <= self.ceiling && start <= end
    }
}

impl Default for MmapConfig {
    fn default() -> Self {
        Self { base: MMAP_BASE, ceiling: KERNEL_BASE, max_regions: MMAP_LIMIT }
    }
}
