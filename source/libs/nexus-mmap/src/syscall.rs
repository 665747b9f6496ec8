// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Raw syscall entry points for mmap/munmap
//! OWNERS: @kernel-mm-team
//! PUBLIC API: sys_mmap, sys_munmap, MAP_FAILED, SYSCALL_FAILED
//! DEPENDS_ON: space::AddressSpace
//! INVARIANTS: Unknown flag bits are rejected; every error collapses to the sentinel

use log::debug;

use crate::flags::{MapFlags, Prot};
use crate::hal::{FileRef, FrameAllocator, PageTable};
use crate::space::{AddressSpace, MmapRequest};

/// Returned by `sys_mmap` on failure (`(void *)-1`).
pub const MAP_FAILED: usize = usize::MAX;
/// Returned by `sys_munmap` on failure.
pub const SYSCALL_FAILED: isize = -1;

/// `mmap(addr, length, prot, flags, file, offset)` with trap-frame integers.
pub fn sys_mmap<P: PageTable>(
    space: &mut AddressSpace<P>,
    addr: usize,
    len: isize,
    prot: u32,
    flags: u32,
    file: Option<FileRef>,
    offset: usize,
) -> usize {
    let (Ok(len), Some(prot), Some(flags)) =
        (usize::try_from(len), Prot::from_bits(prot), MapFlags::from_bits(flags))
    else {
        debug!(target: "syscall", "mmap: rejected raw args len={} prot={:#x} flags={:#x}", len, prot, flags);
        return MAP_FAILED;
    };
    match space.mmap(MmapRequest { addr, len, prot, flags, file, offset }) {
        Ok(base) => base,
        Err(err) => {
            debug!(target: "syscall", "mmap: {}", err);
            MAP_FAILED
        }
    }
}

/// `munmap(addr, length)`; returns 0 or -1.
pub fn sys_munmap<P: PageTable, A: FrameAllocator>(
    space: &mut AddressSpace<P>,
    frames: &mut A,
    addr: usize,
    len: isize,
) -> isize {
    let Ok(len) = usize::try_from(len) else {
        return SYSCALL_FAILED;
    };
    match space.munmap(addr, len, frames) {
        Ok(()) => 0,
        Err(err) => {
            debug!(target: "syscall", "munmap({:#x}, {:#x}): {}", addr, len, err);
            SYSCALL_FAILED
        }
    }
}
