// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Protection and mapping flag vocabulary
//! OWNERS: @kernel-mm-team
//! PUBLIC API: Prot, MapFlags, Sharing
//! INVARIANTS: Exactly one of PRIVATE/SHARED per mapping

use bitflags::bitflags;

use crate::error::MmapError;
use crate::hal::PteFlags;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    /// Page protection requested for a mapping.
    pub struct Prot: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// Shared region inherited at fork; set by the kernel only.
        const CHILD = 1 << 2;
    }
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    /// Sharing and placement flags of a mapping request.
    pub struct MapFlags: u32 {
        const PRIVATE = 1 << 0;
        const SHARED = 1 << 1;
        const ANONYMOUS = 1 << 2;
        const FIXED = 1 << 3;
        const GROWSUP = 1 << 4;
    }
}

/// Sharing mode derived from [`MapFlags`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sharing {
    Private,
    Shared,
}

impl MapFlags {
    /// Returns the sharing mode, rejecting requests that set both or neither.
    pub fn sharing(self) -> Result<Sharing, MmapError> {
        match (self.contains(Self::PRIVATE), self.contains(Self::SHARED)) {
            (true, false) => Ok(Sharing::Private),
            (false, true) => Ok(Sharing::Shared),
            _ => Err(MmapError::InvalidArgument),
        }
    }
}

impl Prot {
    /// Leaf PTE bits for a user page carrying this protection.
    pub fn pte_flags(self) -> PteFlags {
        let mut flags = PteFlags::PRESENT | PteFlags::USER;
        if self.contains(Self::WRITE) {
            flags |= PteFlags::WRITE;
        }
        flags
    }
}
