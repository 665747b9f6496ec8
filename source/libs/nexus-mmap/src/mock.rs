// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: In-memory fakes for the page table, frame allocator and backing files
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; frames are heap buffers, double frees panic

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::hal::{FileError, FrameAllocator, MapError, MappedFile, PageTable, PageTableEntry, PteFlags};
use crate::layout::{is_page_aligned, PAGE_SIZE};

/// Flat page table keyed by page address.
#[derive(Debug, Default)]
pub struct MockPageTable {
    entries: BTreeMap<usize, PageTableEntry>,
    deny_next_install: bool,
}

impl MockPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces the next `install` to fail with [`MapError::NoMemory`].
    pub fn deny_next_install(&mut self) {
        self.deny_next_install = true;
    }

    /// Leaves a non-present placeholder entry at `va`.
    pub fn install_placeholder(&mut self, va: usize, pa: usize) {
        self.entries.insert(va, PageTableEntry { frame: pa, flags: PteFlags::USER });
    }

    pub fn present_pages(&self) -> Vec<usize> {
        self.entries.iter().filter(|(_, e)| e.is_present()).map(|(va, _)| *va).collect()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

impl PageTable for MockPageTable {
    fn lookup(&self, va: usize) -> Option<PageTableEntry> {
        self.entries.get(&va).copied()
    }

    fn install(&mut self, va: usize, pa: usize, flags: PteFlags) -> Result<(), MapError> {
        if !is_page_aligned(va) || !is_page_aligned(pa) {
            return Err(MapError::Unaligned);
        }
        if !flags.contains(PteFlags::PRESENT) {
            return Err(MapError::InvalidFlags);
        }
        if self.entries.contains_key(&va) {
            return Err(MapError::Overlap);
        }
        if core::mem::take(&mut self.deny_next_install) {
            return Err(MapError::NoMemory);
        }
        self.entries.insert(va, PageTableEntry { frame: pa, flags });
        Ok(())
    }

    fn clear(&mut self, va: usize) {
        self.entries.remove(&va);
    }
}

const FRAME_BASE: usize = 0x8800_0000;

/// Bounded pool of heap-backed frames.
#[derive(Debug)]
pub struct MockFrames {
    capacity: usize,
    next: usize,
    recycled: Vec<usize>,
    live: BTreeMap<usize, Vec<u8>>,
    refs: BTreeMap<usize, usize>,
    freed: BTreeSet<usize>,
    pub free_calls: usize,
}

impl MockFrames {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next: 0,
            recycled: Vec::new(),
            live: BTreeMap::new(),
            refs: BTreeMap::new(),
            freed: BTreeSet::new(),
            free_calls: 0,
        }
    }

    pub fn live(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, pa: usize) -> bool {
        self.live.contains_key(&pa)
    }

    pub fn refs(&self, pa: usize) -> usize {
        self.refs.get(&pa).copied().unwrap_or(0)
    }

    pub fn frame_is_zero(&self, pa: usize) -> bool {
        self.live.get(&pa).map_or(false, |bytes| bytes.iter().all(|b| *b == 0))
    }
}

impl FrameAllocator for MockFrames {
    fn allocate(&mut self) -> Option<usize> {
        if self.live.len() >= self.capacity {
            return None;
        }
        let pa = match self.recycled.pop() {
            Some(pa) => pa,
            None => {
                let pa = FRAME_BASE + self.next * PAGE_SIZE;
                self.next += 1;
                pa
            }
        };
        self.freed.remove(&pa);
        self.live.insert(pa, vec![0; PAGE_SIZE]);
        self.refs.insert(pa, 1);
        Some(pa)
    }

    fn share(&mut self, pa: usize) {
        let count = self.refs.get_mut(&pa).expect("share of a frame that is not live");
        *count += 1;
    }

    fn free(&mut self, pa: usize) {
        self.free_calls += 1;
        let count = self.refs.get_mut(&pa).expect("free of a frame that is not live");
        *count -= 1;
        if *count > 0 {
            return;
        }
        self.refs.remove(&pa);
        assert!(self.live.remove(&pa).is_some(), "free of frame {pa:#x} that is not live");
        assert!(self.freed.insert(pa), "double free of frame {pa:#x}");
        self.recycled.push(pa);
    }

    fn frame(&self, pa: usize) -> &[u8] {
        self.live.get(&pa).map(Vec::as_slice).expect("frame is live")
    }

    fn frame_mut(&mut self, pa: usize) -> &mut [u8] {
        self.live.get_mut(&pa).map(Vec::as_mut_slice).expect("frame is live")
    }
}

/// Growable in-memory file.
#[derive(Debug, Default)]
pub struct MemFile {
    data: Mutex<Vec<u8>>,
    readable: bool,
    writable: bool,
    fail_io: AtomicBool,
}

impl MemFile {
    pub fn new(data: &[u8], readable: bool, writable: bool) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(data.to_vec()),
            readable,
            writable,
            fail_io: AtomicBool::new(false),
        })
    }

    pub fn read_write(data: &[u8]) -> Arc<Self> {
        Self::new(data, true, true)
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Makes every following read and write fail.
    pub fn fail_io(&self) {
        self.fail_io.store(true, Ordering::SeqCst);
    }
}

impl MappedFile for MemFile {
    fn readable(&self) -> bool {
        self.readable
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, FileError> {
        if self.fail_io.load(Ordering::SeqCst) {
            return Err(FileError::Device);
        }
        if !self.readable {
            return Err(FileError::BadMode);
        }
        let data = self.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let count = buf.len().min(data.len() - offset);
        buf[..count].copy_from_slice(&data[offset..offset + count]);
        Ok(count)
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, FileError> {
        if self.fail_io.load(Ordering::SeqCst) {
            return Err(FileError::Device);
        }
        if !self.writable {
            return Err(FileError::BadMode);
        }
        let mut data = self.data.lock();
        if data.len() < offset + buf.len() {
            data.resize(offset + buf.len(), 0);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }
}
