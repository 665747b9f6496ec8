// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy shared by mmap, munmap and fault materialization.

use thiserror::Error;

use crate::hal::{FileError, MapError};

/// Errors reported by the mapping subsystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum MmapError {
    /// Bad length, misaligned or out-of-window address, conflicting sharing flags.
    #[error("invalid argument")]
    InvalidArgument,
    /// Region table is full (including a split that needs a free slot).
    #[error("region table capacity exceeded")]
    CapacityExceeded,
    /// Fixed placement overlaps an existing region.
    #[error("fixed placement overlaps an existing region")]
    PlacementConflict,
    /// No gap large enough for dynamic placement.
    #[error("no free gap for mapping")]
    PlacementExhausted,
    /// Backing file lacks the required access mode.
    #[error("permission denied")]
    PermissionDenied,
    /// Write-back or page population failed.
    #[error("file i/o failed: {0}")]
    IoFailure(#[source] FileError),
    /// No physical frame available.
    #[error("out of physical frames")]
    AllocationFailure,
    /// Page-table update failed.
    #[error("page-table install failed: {0}")]
    InstallFailure(#[source] MapError),
}

impl From<MapError> for MmapError {
    fn from(value: MapError) -> Self {
        Self::InstallFailure(value)
    }
}

impl From<FileError> for MmapError {
    fn from(value: FileError) -> Self {
        Self::IoFailure(value)
    }
}
