// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-process address space: mmap, munmap, lazy materialization, fork sharing
//! OWNERS: @kernel-mm-team
//! STATUS: Functional (host-first)
//! PUBLIC API: AddressSpace, MmapRequest, FaultAccess
//! DEPENDS_ON: region::RegionTable, hal::{PageTable, FrameAllocator, MappedFile}
//! INVARIANTS: mmap never allocates frames or touches files; a page is backed iff its
//!             PTE is present; every present PTE holds one frame reference
//!
//! Frame ownership: `fork_into` installs the frames of shared regions in the
//! child and takes an extra reference on each through `FrameAllocator::share`.
//! Parent and child drop their references independently on munmap or exit; the
//! frame is reclaimed with the last one. Inherited shared regions carry
//! `Prot::CHILD`, which user requests may not set.

use alloc::vec::Vec;
use log::{debug, error, warn};

use crate::error::MmapError;
use crate::flags::{MapFlags, Prot, Sharing};
use crate::hal::{FileError, FileRef, FrameAllocator, PageTable};
use crate::layout::{is_page_aligned, page_round_down, page_round_up, MmapConfig, PAGE_SIZE};
use crate::region::{Backing, Region, RegionTable};

/// Arguments of a mapping request after syscall decoding.
#[derive(Clone)]
pub struct MmapRequest {
    /// Requested base; only honoured with `MapFlags::FIXED`.
    pub addr: usize,
    pub len: usize,
    pub prot: Prot,
    pub flags: MapFlags,
    pub file: Option<FileRef>,
    /// Ignored: mappings always start at file offset 0.
    pub offset: usize,
}

impl MmapRequest {
    /// Anonymous request placed by the kernel.
    pub fn anonymous(len: usize, prot: Prot, sharing: Sharing) -> Self {
        let flags = match sharing {
            Sharing::Private => MapFlags::PRIVATE,
            Sharing::Shared => MapFlags::SHARED,
        };
        Self { addr: 0, len, prot, flags: flags | MapFlags::ANONYMOUS, file: None, offset: 0 }
    }

    /// File-backed request placed by the kernel.
    pub fn file(file: FileRef, len: usize, prot: Prot, sharing: Sharing) -> Self {
        let flags = match sharing {
            Sharing::Private => MapFlags::PRIVATE,
            Sharing::Shared => MapFlags::SHARED,
        };
        Self { addr: 0, len, prot, flags, file: Some(file), offset: 0 }
    }

    /// Pins the request at `addr`.
    pub fn at(mut self, addr: usize) -> Self {
        self.addr = addr;
        self.flags |= MapFlags::FIXED;
        self
    }

    /// Appends a growth guard page.
    pub fn grows_up(mut self) -> Self {
        self.flags |= MapFlags::GROWSUP;
        self
    }
}

/// Kind of access that raised a page fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultAccess {
    Read,
    Write,
}

/// Mapping state of one process: its region table and page table.
pub struct AddressSpace<P> {
    regions: RegionTable,
    page_table: P,
}

impl<P: PageTable> AddressSpace<P> {
    /// Creates an empty address space with the default layout.
    pub fn new(page_table: P) -> Self {
        Self::with_config(page_table, MmapConfig::default())
    }

    pub fn with_config(page_table: P, config: MmapConfig) -> Self {
        Self { regions: RegionTable::new(config), page_table }
    }

    pub fn regions(&self) -> &RegionTable {
        &self.regions
    }

    pub fn page_table(&self) -> &P {
        &self.page_table
    }

    pub fn page_table_mut(&mut self) -> &mut P {
        &mut self.page_table
    }

    /// Reserves a region; no frame is allocated until the first fault.
    pub fn mmap(&mut self, request: MmapRequest) -> Result<usize, MmapError> {
        let MmapRequest { addr, mut len, prot, flags, file, offset } = request;
        if len < 1 || prot.contains(Prot::CHILD) {
            return Err(MmapError::InvalidArgument);
        }
        flags.sharing()?;
        if self.regions.is_full() {
            warn!(target: "mm", "MMAP: region table full ({} regions)", self.regions.len());
            return Err(MmapError::CapacityExceeded);
        }

        let backing = if flags.contains(MapFlags::ANONYMOUS) {
            Backing::Anonymous
        } else {
            let file = file.ok_or(MmapError::InvalidArgument)?;
            if !file.readable() {
                return Err(MmapError::PermissionDenied);
            }
            if flags.contains(MapFlags::SHARED) && prot.contains(Prot::WRITE) && !file.writable() {
                return Err(MmapError::PermissionDenied);
            }
            if offset != 0 {
                debug!(target: "mm", "MMAP: ignoring file offset {:#x}", offset);
            }
            Backing::File { file, offset: 0 }
        };

        if flags.contains(MapFlags::GROWSUP) {
            len = len.checked_add(PAGE_SIZE).ok_or(MmapError::InvalidArgument)?;
        }

        let config = *self.regions.config();
        let (index, base) = if flags.contains(MapFlags::FIXED) {
            if addr < config.base || !is_page_aligned(addr) {
                return Err(MmapError::InvalidArgument);
            }
            let end = addr.checked_add(len).ok_or(MmapError::InvalidArgument)?;
            if page_round_up(end) > config.ceiling {
                return Err(MmapError::InvalidArgument);
            }
            (self.regions.check_address(addr, len)?, addr)
        } else {
            self.regions.find_address(len)?
        };

        let mut region = Region::new(base, len, prot, flags, backing);
        if flags.contains(MapFlags::GROWSUP) {
            region = region.with_guard_page();
        }
        self.regions.insert(index, region)?;
        debug!(target: "mm", "MMAP: {:#x}..{:#x} prot={:?} flags={:?}", base, base + len, prot, flags);
        Ok(base)
    }

    /// Releases `[addr, PageRoundUp(addr + len))`, writing back shared file
    /// pages and splitting or truncating the regions it touches.
    ///
    /// A failed split (table full) leaves the write-back and frame release of
    /// the first pass in place.
    pub fn munmap<A: FrameAllocator>(
        &mut self,
        addr: usize,
        len: usize,
        frames: &mut A,
    ) -> Result<(), MmapError> {
        if !is_page_aligned(addr) {
            return Err(MmapError::InvalidArgument);
        }
        let lower = addr;
        let upper = page_round_up(addr.saturating_add(len));
        if lower >= upper {
            return Ok(());
        }
        let Some((first, last)) = self.regions.intersecting(lower, upper) else {
            return Ok(());
        };

        for index in first..=last {
            if let Some(region) = self.regions.get(index) {
                if region.writes_back() {
                    write_back(region, &self.page_table, frames, lower, upper)?;
                }
            }
        }
        for index in first..=last {
            if let Some(region) = self.regions.get(index) {
                release_pages(region, &mut self.page_table, frames, lower, upper);
            }
        }

        if first == last {
            self.cut_single(first, lower, upper)?;
        } else {
            self.cut_span(first, last, lower, upper);
        }
        debug_assert!(self.regions.check_invariants(), "region table invariant broken by munmap");
        debug!(target: "mm", "MUNMAP: {:#x}..{:#x} -> {} regions", lower, upper, self.regions.len());
        Ok(())
    }

    /// Tears down every mapping; used when the owning process exits.
    pub fn release_all<A: FrameAllocator>(&mut self, frames: &mut A) -> Result<(), MmapError> {
        let config = *self.regions.config();
        self.munmap(config.base, config.ceiling - config.base, frames)
    }

    /// Backs the page containing `va` with a fresh frame.
    pub fn materialize<A: FrameAllocator>(
        &mut self,
        va: usize,
        frames: &mut A,
    ) -> Result<(), MmapError> {
        let index = self.regions.find_containing(va).ok_or(MmapError::InvalidArgument)?;
        let region = self.regions.get(index).ok_or(MmapError::InvalidArgument)?;
        let page = page_round_down(va);

        let pa = frames.allocate().ok_or_else(|| {
            error!(target: "mm", "FAULT: out of frames at {:#x}", page);
            MmapError::AllocationFailure
        })?;
        if let Some((file, offset)) = region.file_position(page) {
            if let Err(err) = file.read_at(offset, &mut frames.frame_mut(pa)[..PAGE_SIZE]) {
                frames.free(pa);
                return Err(MmapError::IoFailure(err));
            }
        }
        if self.page_table.lookup(page).is_some() {
            self.page_table.clear(page);
        }
        if let Err(err) = self.page_table.install(page, pa, region.prot().pte_flags()) {
            frames.free(pa);
            error!(target: "mm", "FAULT: install {:#x} failed: {}", page, err);
            return Err(MmapError::InstallFailure(err));
        }
        Ok(())
    }

    /// Classifies a fault at `va` and materializes the page when it is a
    /// legitimate first touch.
    pub fn resolve_fault<A: FrameAllocator>(
        &mut self,
        va: usize,
        access: FaultAccess,
        frames: &mut A,
    ) -> Result<(), MmapError> {
        let index = self.regions.find_containing(va).ok_or(MmapError::InvalidArgument)?;
        let region = self.regions.get(index).ok_or(MmapError::InvalidArgument)?;
        if access == FaultAccess::Write && !region.prot().contains(Prot::WRITE) {
            return Err(MmapError::PermissionDenied);
        }
        match self.page_table.lookup(page_round_down(va)) {
            Some(entry) if entry.is_present() => Ok(()),
            _ => self.materialize(va, frames),
        }
    }

    /// Copies `data` into user memory at `va`, faulting pages in on the way.
    pub fn copy_out<A: FrameAllocator>(
        &mut self,
        va: usize,
        data: &[u8],
        frames: &mut A,
    ) -> Result<(), MmapError> {
        let mut done = 0;
        while done < data.len() {
            let cursor = va.checked_add(done).ok_or(MmapError::InvalidArgument)?;
            self.resolve_fault(cursor, FaultAccess::Write, frames)?;
            let pa = self.present_frame(cursor)?;
            let within = cursor % PAGE_SIZE;
            let chunk = (PAGE_SIZE - within).min(data.len() - done);
            frames.frame_mut(pa)[within..within + chunk].copy_from_slice(&data[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Copies user memory at `va` into `buf`, faulting pages in on the way.
    pub fn copy_in<A: FrameAllocator>(
        &mut self,
        va: usize,
        buf: &mut [u8],
        frames: &mut A,
    ) -> Result<(), MmapError> {
        let mut done = 0;
        while done < buf.len() {
            let cursor = va.checked_add(done).ok_or(MmapError::InvalidArgument)?;
            self.resolve_fault(cursor, FaultAccess::Read, frames)?;
            let pa = self.present_frame(cursor)?;
            let within = cursor % PAGE_SIZE;
            let chunk = (PAGE_SIZE - within).min(buf.len() - done);
            buf[done..done + chunk].copy_from_slice(&frames.frame(pa)[within..within + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Duplicates this address space into `child_page_table`.
    ///
    /// Shared regions are fully backed first and hand a reference to each
    /// frame to the child under `Prot::CHILD`; private regions get eager
    /// copies of their present pages.
    pub fn fork_into<A: FrameAllocator>(
        &mut self,
        child_page_table: P,
        frames: &mut A,
    ) -> Result<AddressSpace<P>, MmapError> {
        self.back_shared_pages(frames)?;
        let mut child = AddressSpace::with_config(child_page_table, *self.regions.config());
        let mut held: Vec<usize> = Vec::new();
        match self.populate_child(&mut child, &mut held, frames) {
            Ok(()) => {
                debug!(target: "mm", "FORK: {} regions, {} frame references", child.regions.len(), held.len());
                Ok(child)
            }
            Err(err) => {
                for pa in held {
                    frames.free(pa);
                }
                warn!(target: "mm", "FORK: aborted: {}", err);
                Err(err)
            }
        }
    }

    /// Materializes every unbacked page of the shared regions so parent and
    /// child end up on the same frames.
    fn back_shared_pages<A: FrameAllocator>(&mut self, frames: &mut A) -> Result<(), MmapError> {
        let mut pending = Vec::new();
        for region in self.regions.iter().filter(|region| region.is_shared()) {
            let mut page = region.start();
            while page < region.end() {
                if !self.page_table.lookup(page).map_or(false, |entry| entry.is_present()) {
                    pending.push(page);
                }
                page += PAGE_SIZE;
            }
        }
        for page in pending {
            self.materialize(page, frames)?;
        }
        Ok(())
    }

    fn populate_child<A: FrameAllocator>(
        &self,
        child: &mut AddressSpace<P>,
        held: &mut Vec<usize>,
        frames: &mut A,
    ) -> Result<(), MmapError> {
        for (index, region) in self.regions.iter().enumerate() {
            let shared = region.is_shared();
            let prot = if shared { region.prot() | Prot::CHILD } else { region.prot() };
            child.regions.insert(index, region.clone().with_prot(prot))?;

            let mut page = region.start();
            while page < region.end() {
                if let Some(entry) = self.page_table.lookup(page).filter(|e| e.is_present()) {
                    let pa = if shared {
                        frames.share(entry.frame);
                        entry.frame
                    } else {
                        let pa = frames.allocate().ok_or(MmapError::AllocationFailure)?;
                        frames.copy_frame(pa, entry.frame);
                        pa
                    };
                    held.push(pa);
                    child.page_table.install(page, pa, entry.flags)?;
                }
                page += PAGE_SIZE;
            }
        }
        Ok(())
    }

    fn present_frame(&self, va: usize) -> Result<usize, MmapError> {
        self.page_table
            .lookup(page_round_down(va))
            .filter(|entry| entry.is_present())
            .map(|entry| entry.frame)
            .ok_or(MmapError::InvalidArgument)
    }

    fn cut_single(&mut self, index: usize, lower: usize, upper: usize) -> Result<(), MmapError> {
        let is_full = self.regions.is_full();
        let region = self.regions.get_mut(index).ok_or(MmapError::InvalidArgument)?;
        let (start, end) = (region.start(), region.end());

        if lower > start && upper < end {
            if is_full {
                warn!(target: "mm", "MUNMAP: no slot to split {:#x}..{:#x}", start, end);
                return Err(MmapError::CapacityExceeded);
            }
            let tail = region.split_out(lower, upper);
            self.regions.insert(index + 1, tail)?;
        } else if lower <= start && upper >= end {
            self.regions.remove_range(index..index + 1);
        } else if end > upper {
            region.truncate_front(upper);
        } else {
            region.truncate_tail(lower);
        }
        Ok(())
    }

    fn cut_span(&mut self, first: usize, last: usize, lower: usize, upper: usize) {
        let mut remove_from = first + 1;
        let mut remove_to = last;
        if let Some(head) = self.regions.get_mut(first) {
            if head.start() >= lower {
                remove_from = first;
            } else {
                head.truncate_tail(lower);
            }
        }
        if let Some(tail) = self.regions.get_mut(last) {
            if tail.end() <= upper {
                remove_to = last + 1;
            } else {
                tail.truncate_front(upper);
            }
        }
        self.regions.remove_range(remove_from..remove_to);
    }
}

/// Writes the present pages of `region` inside `[lower, upper)` back to its
/// file, clipped to the payload (guard page and tail slack excluded).
fn write_back<P: PageTable, A: FrameAllocator>(
    region: &Region,
    page_table: &P,
    frames: &A,
    lower: usize,
    upper: usize,
) -> Result<(), MmapError> {
    let payload_end = region.payload_end();
    let mut page = region.start().max(lower);
    let stop = region.end().min(upper);
    while page < stop {
        let chunk_end = (page + PAGE_SIZE).min(payload_end);
        if chunk_end <= page {
            break;
        }
        if let Some(entry) = page_table.lookup(page).filter(|e| e.is_present()) {
            if let Some((file, offset)) = region.file_position(page) {
                let bytes = &frames.frame(entry.frame)[..chunk_end - page];
                let written = file.write_at(offset, bytes).map_err(|err| {
                    error!(target: "mm", "MUNMAP: write-back at {:#x} failed: {}", page, err);
                    MmapError::IoFailure(err)
                })?;
                if written != bytes.len() {
                    return Err(MmapError::IoFailure(FileError::ShortWrite {
                        written,
                        requested: bytes.len(),
                    }));
                }
            }
        }
        page += PAGE_SIZE;
    }
    Ok(())
}

/// Drops the page-table entries of `region` inside `[lower, upper)` and the
/// frame reference each present entry holds.
fn release_pages<P: PageTable, A: FrameAllocator>(
    region: &Region,
    page_table: &mut P,
    frames: &mut A,
    lower: usize,
    upper: usize,
) {
    let mut page = region.start().max(lower);
    let stop = region.end().min(upper);
    while page < stop {
        if let Some(entry) = page_table.lookup(page) {
            if entry.is_present() {
                frames.free(entry.frame);
            }
            page_table.clear(page);
        }
        page += PAGE_SIZE;
    }
}
