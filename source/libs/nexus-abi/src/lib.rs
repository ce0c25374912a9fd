// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Shared ABI between the exokernel and userland crates
//! OWNERS: @runtime
//! PUBLIC API: EnvId, EnvStatus, Forked, AbiError, SysResult, PageFlags, Access, FaultErr,
//!             UTrapframe, FaultUpcall, VmSyscalls, AddressSpaceView, UserMemory, Context, layout::*
//! DEPENDS_ON: bitflags
//! INVARIANTS: EnvId::SELF (raw 0) always names the caller; error codes are stable negatives;
//!             mapping syscalls take page-aligned addresses below UTOP

pub mod flags;
pub mod layout;

use core::fmt;

pub use flags::{Access, FaultErr, PageFlags, UTrapframe};

/// Result returned by VM syscalls.
pub type SysResult<T> = core::result::Result<T, AbiError>;

/// Environment (context) identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct EnvId(u32);

impl EnvId {
    /// Alias for the calling environment.
    pub const SELF: Self = Self(0);

    /// Wraps a raw identifier.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns `true` for the caller alias.
    #[inline]
    pub const fn is_self(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Scheduling state of an environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvStatus {
    /// Slot unused.
    Free,
    /// Eligible to run.
    Runnable,
    /// Exists but must not be scheduled.
    NotRunnable,
}

/// The two outcomes of creating a child environment.
///
/// A single create request completes twice: once in the parent, carrying the child's id,
/// and once in the child when the scheduler first resumes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Forked {
    /// Returned to the creator.
    Parent(EnvId),
    /// Returned inside the new environment.
    Child,
}

/// Errors returned by the kernel for VM and environment syscalls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbiError {
    /// Environment does not exist or the caller may not act on it.
    BadEnv,
    /// Arguments were malformed (alignment, range, permission bits, missing source page).
    Invalid,
    /// Physical memory exhausted.
    NoMem,
    /// Environment table full.
    NoFreeEnv,
    /// Memory access could not be resolved; the environment was destroyed.
    Fault,
}

impl AbiError {
    /// Stable negative error code.
    pub const fn code(self) -> i32 {
        match self {
            Self::BadEnv => -2,
            Self::Invalid => -3,
            Self::NoMem => -4,
            Self::NoFreeEnv => -5,
            Self::Fault => -6,
        }
    }
}

impl fmt::Display for AbiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadEnv => write!(f, "bad environment"),
            Self::Invalid => write!(f, "invalid parameter"),
            Self::NoMem => write!(f, "out of memory"),
            Self::NoFreeEnv => write!(f, "out of environments"),
            Self::Fault => write!(f, "segmentation fault"),
        }
    }
}

impl core::error::Error for AbiError {}

/// Entry point the kernel invokes on the exception stack when a protected access faults.
///
/// Returning from the upcall resumes the faulting access.
pub type FaultUpcall = fn(&dyn Context, &UTrapframe);

/// Page-granular memory and environment syscalls.
///
/// `EnvId::SELF` addresses the caller; other ids must name the caller or one of its children.
pub trait VmSyscalls {
    /// Returns the caller's own identifier.
    fn getenvid(&self) -> EnvId;

    /// Creates a not-yet-runnable child with an empty user address space.
    ///
    /// The parent observes `Forked::Parent(child)`; the child observes `Forked::Child` once it
    /// is scheduled.
    fn exofork(&self) -> SysResult<Forked>;

    /// Maps a fresh zeroed page at `va` in `env` with `perm`, replacing any existing mapping.
    fn page_alloc(&self, env: EnvId, va: usize, perm: PageFlags) -> SysResult<()>;

    /// Maps the page at `src_va` in `src` at `dst_va` in `dst` with `perm`.
    fn page_map(
        &self,
        src: EnvId,
        src_va: usize,
        dst: EnvId,
        dst_va: usize,
        perm: PageFlags,
    ) -> SysResult<()>;

    /// Removes the mapping at `va` in `env`; unmapping an absent page succeeds.
    fn page_unmap(&self, env: EnvId, va: usize) -> SysResult<()>;

    /// Registers the fault upcall of `env`.
    fn set_pgfault_upcall(&self, env: EnvId, upcall: FaultUpcall) -> SysResult<()>;

    /// Sets the scheduling state of `env` (`Runnable` or `NotRunnable`).
    fn set_status(&self, env: EnvId, status: EnvStatus) -> SysResult<()>;
}

/// Read-only view of the caller's own page tables.
pub trait AddressSpaceView {
    /// Flags of directory entry `pdx`; empty when no page table backs it.
    fn pde(&self, pdx: usize) -> PageFlags;

    /// Flags of the entry for page number `pn`; empty when unmapped.
    fn pte(&self, pn: usize) -> PageFlags;
}

/// Ordinary user loads and stores; either may raise a page fault.
pub trait UserMemory {
    /// Copies `buf.len()` bytes starting at `va` into `buf`.
    fn load(&self, va: usize, buf: &mut [u8]) -> SysResult<()>;

    /// Copies `bytes` to memory starting at `va`.
    fn store(&self, va: usize, bytes: &[u8]) -> SysResult<()>;
}

/// Everything code running inside one environment can do.
pub trait Context: VmSyscalls + AddressSpaceView + UserMemory {}

impl<T: VmSyscalls + AddressSpaceView + UserMemory + ?Sized> Context for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_distinct_and_negative() {
        for err in [
            AbiError::BadEnv,
            AbiError::Invalid,
            AbiError::NoMem,
            AbiError::NoFreeEnv,
            AbiError::Fault,
        ] {
            assert!(err.code() < 0);
        }
        assert_ne!(AbiError::NoMem.code(), AbiError::NoFreeEnv.code());
    }

    #[test]
    fn self_alias() {
        assert!(EnvId::SELF.is_self());
        assert!(!EnvId::from_raw(0x400).is_self());
        assert_eq!(EnvId::from_raw(0x1001).to_string(), "00001001");
    }
}
