// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Region table: ordered, non-overlapping, capacity-bounded interval set
//! OWNERS: @kernel-mm-team
//! PUBLIC API: Region, Backing, RegionTable{check_address, find_address, insert, remove_range}
//! DEPENDS_ON: layout::MmapConfig
//! INVARIANTS: Sorted by base; PageRoundUp(r[i].end) <= PageRoundUp(r[i+1].base);
//!             every rounded extent inside [config.base, config.ceiling)

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::ops::Range;

use crate::error::MmapError;
use crate::flags::{MapFlags, Prot};
use crate::hal::FileRef;
use crate::layout::{page_round_up, MmapConfig, PAGE_SIZE};

/// Source of a region's page contents.
#[derive(Clone)]
pub enum Backing {
    /// Zero-filled pages.
    Anonymous,
    /// File contents; `offset` is the file position of the region's base.
    File { file: FileRef, offset: usize },
}

impl Backing {
    pub fn file(&self) -> Option<&FileRef> {
        match self {
            Self::Anonymous => None,
            Self::File { file, .. } => Some(file),
        }
    }

    /// Returns true when both refer to the same file object (or both are anonymous).
    pub fn same_source(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Anonymous, Self::Anonymous) => true,
            (Self::File { file: a, .. }, Self::File { file: b, .. }) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn advanced(&self, delta: usize) -> Self {
        match self {
            Self::Anonymous => Self::Anonymous,
            Self::File { file, offset } => {
                Self::File { file: Arc::clone(file), offset: offset + delta }
            }
        }
    }
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::File { offset, .. } => f.debug_struct("File").field("offset", offset).finish(),
        }
    }
}

/// One contiguous mapping with uniform protection, sharing and backing.
#[derive(Clone, Debug)]
pub struct Region {
    base: usize,
    len: usize,
    prot: Prot,
    flags: MapFlags,
    backing: Backing,
    guard_page: Option<usize>,
}

impl Region {
    pub fn new(base: usize, len: usize, prot: Prot, flags: MapFlags, backing: Backing) -> Self {
        Self { base, len, prot, flags, backing, guard_page: None }
    }

    /// Marks the last page of the current extent as the growth guard page.
    pub fn with_guard_page(mut self) -> Self {
        self.guard_page = Some(self.end() - PAGE_SIZE);
        self
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn prot(&self) -> Prot {
        self.prot
    }

    pub fn flags(&self) -> MapFlags {
        self.flags
    }

    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    pub fn guard_page(&self) -> Option<usize> {
        self.guard_page
    }

    /// Page-rounded start of the extent.
    pub fn start(&self) -> usize {
        page_round_up(self.base)
    }

    /// Page-rounded end of the extent (exclusive).
    pub fn end(&self) -> usize {
        page_round_up(self.base + self.len)
    }

    pub fn contains(&self, va: usize) -> bool {
        va >= self.start() && va < self.end()
    }

    /// Returns true when the rounded extent intersects `[lower, upper)`.
    pub fn intersects(&self, lower: usize, upper: usize) -> bool {
        self.end() > lower && self.start() < upper
    }

    pub fn is_shared(&self) -> bool {
        self.flags.contains(MapFlags::SHARED)
    }

    /// Shared, writable and file-backed: modified pages go back to the file.
    pub fn writes_back(&self) -> bool {
        self.is_shared() && self.prot.contains(Prot::WRITE) && self.backing.file().is_some()
    }

    /// True while the guard page still lies inside this piece of the region.
    pub fn holds_guard(&self) -> bool {
        self.guard_page.map_or(false, |guard| self.contains(guard))
    }

    /// End of the bytes that are persisted on write-back.
    pub fn payload_end(&self) -> usize {
        let end = self.base + self.len;
        if self.holds_guard() {
            end.saturating_sub(PAGE_SIZE).max(self.base)
        } else {
            end
        }
    }

    /// File position backing `va`, if the region is file-backed.
    pub fn file_position(&self, va: usize) -> Option<(&FileRef, usize)> {
        match &self.backing {
            Backing::Anonymous => None,
            Backing::File { file, offset } => Some((file, offset + (va - self.base))),
        }
    }

    pub(crate) fn with_prot(mut self, prot: Prot) -> Self {
        self.prot = prot;
        self
    }

    /// Drops everything from `new_end` onwards.
    pub(crate) fn truncate_tail(&mut self, new_end: usize) {
        debug_assert!(new_end > self.base && new_end <= self.base + self.len);
        self.len = new_end - self.base;
    }

    /// Drops everything below `new_base`, keeping the file offset in step.
    pub(crate) fn truncate_front(&mut self, new_base: usize) {
        let end = self.base + self.len;
        debug_assert!(new_base > self.base && new_base < end);
        self.backing = self.backing.advanced(new_base - self.base);
        self.len = end - new_base;
        self.base = new_base;
    }

    /// Cuts `[lower, upper)` out of the middle; `self` keeps the front piece and
    /// the tail piece is returned.
    pub(crate) fn split_out(&mut self, lower: usize, upper: usize) -> Region {
        let end = self.base + self.len;
        debug_assert!(lower > self.base && upper < end && lower < upper);
        let tail = Region {
            base: upper,
            len: end - upper,
            prot: self.prot,
            flags: self.flags,
            backing: self.backing.advanced(upper - self.base),
            guard_page: self.guard_page,
        };
        self.len = lower - self.base;
        tail
    }
}

/// Ordered region list of one address space.
#[derive(Clone, Debug)]
pub struct RegionTable {
    regions: Vec<Region>,
    config: MmapConfig,
}

impl RegionTable {
    pub fn new(config: MmapConfig) -> Self {
        Self { regions: Vec::with_capacity(config.max_regions), config }
    }

    pub fn config(&self) -> &MmapConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.regions.len() >= self.config.max_regions
    }

    pub fn get(&self, index: usize) -> Option<&Region> {
        self.regions.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Region> {
        self.regions.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn as_slice(&self) -> &[Region] {
        &self.regions
    }

    /// Fixed placement: index at which `[addr, addr + len)` can be inserted
    /// without overlapping any rounded extent.
    pub fn check_address(&self, addr: usize, len: usize) -> Result<usize, MmapError> {
        let lower = page_round_up(addr);
        let upper = match addr.checked_add(len) {
            Some(end) => page_round_up(end),
            None => return Err(MmapError::PlacementConflict),
        };
        let mut prev_end = 0;
        for (index, region) in self.regions.iter().enumerate() {
            if upper <= region.start() {
                return if lower >= prev_end {
                    Ok(index)
                } else {
                    Err(MmapError::PlacementConflict)
                };
            }
            prev_end = region.end();
        }
        if lower >= prev_end {
            Ok(self.regions.len())
        } else {
            Err(MmapError::PlacementConflict)
        }
    }

    /// Dynamic placement: first gap from `config.base` whose rounded size holds
    /// `len`. Returns the insertion index and the chosen base.
    pub fn find_address(&self, len: usize) -> Result<(usize, usize), MmapError> {
        let fits = |start: usize, limit: usize| {
            start.checked_add(len).map_or(false, |end| page_round_up(end) <= limit)
        };
        let mut cursor = self.config.base;
        for (index, region) in self.regions.iter().enumerate() {
            if fits(cursor, region.start()) {
                return Ok((index, cursor));
            }
            cursor = cursor.max(region.end());
        }
        if fits(cursor, self.config.ceiling) {
            Ok((self.regions.len(), cursor))
        } else {
            Err(MmapError::PlacementExhausted)
        }
    }

    /// Inserts `region` at `index`, shifting later entries up.
    pub fn insert(&mut self, index: usize, region: Region) -> Result<(), MmapError> {
        if self.is_full() {
            return Err(MmapError::CapacityExceeded);
        }
        if index > self.regions.len() {
            return Err(MmapError::InvalidArgument);
        }
        self.regions.insert(index, region);
        debug_assert!(self.check_invariants(), "region table invariant broken by insert");
        Ok(())
    }

    /// Removes the regions in `range`, compacting the table. Returns the
    /// number of freed slots.
    pub fn remove_range(&mut self, range: Range<usize>) -> usize {
        let end = range.end.min(self.regions.len());
        let start = range.start.min(end);
        self.regions.drain(start..end).count()
    }

    /// Index of the region whose rounded extent contains `va`.
    pub fn find_containing(&self, va: usize) -> Option<usize> {
        let index = self.regions.partition_point(|region| region.end() <= va);
        self.regions.get(index).filter(|region| region.contains(va)).map(|_| index)
    }

    /// First and last index of the regions intersecting `[lower, upper)`.
    pub fn intersecting(&self, lower: usize, upper: usize) -> Option<(usize, usize)> {
        let first = self.regions.iter().position(|r| r.intersects(lower, upper))?;
        let last = self.regions.iter().rposition(|r| r.intersects(lower, upper))?;
        Some((first, last))
    }

    /// Verifies ordering, disjointness and window containment.
    pub fn check_invariants(&self) -> bool {
        if self.regions.len() > self.config.max_regions {
            return false;
        }
        let in_window =
            self.regions.iter().all(|r| r.len > 0 && self.config.contains_range(r.start(), r.end()));
        let ordered = self.regions.windows(2).all(|pair| {
            pair[0].base < pair[1].base && pair[0].end() <= pair[1].start()
        });
        in_window && ordered
    }
}
