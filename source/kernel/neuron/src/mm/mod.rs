// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Virtual memory primitives: frames and two-level user page tables.

pub mod frame;
pub mod page_table;

pub use frame::{FrameAllocator, FrameId};
pub use page_table::{PageTable, Pte};

use nexus_abi::AbiError;

/// Error returned by mapping operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Virtual address is not page aligned.
    Unaligned,
    /// Mapping would reach at or above `UTOP`.
    OutOfRange,
    /// Flags do not describe a valid user entry.
    InvalidFlags,
    /// Frame budget exhausted.
    OutOfMemory,
    /// Mapping would grant more than the source allows.
    PermissionDenied,
}

impl From<MapError> for AbiError {
    fn from(err: MapError) -> Self {
        match err {
            MapError::OutOfMemory => AbiError::NoMem,
            MapError::Unaligned
            | MapError::OutOfRange
            | MapError::InvalidFlags
            | MapError::PermissionDenied => AbiError::Invalid,
        }
    }
}

#[cfg(test)]
mod tests;
