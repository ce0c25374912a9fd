// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use core::fmt;

use log::error;
use nexus_abi::{AbiError, EnvId, FaultErr, PageFlags};
use thiserror::Error;

/// The one failure a caller of `fork`/`sfork` gets back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ForkError {
    /// The kernel could not create the child; nothing was changed.
    #[error("exofork failed: {0}")]
    Exofork(#[source] AbiError),
}

impl ForkError {
    /// Negative error code, as returned by the classic integer interface.
    pub const fn code(&self) -> i32 {
        match self {
            Self::Exofork(err) => err.code(),
        }
    }
}

/// Failure while propagating one page into a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DupError {
    /// Nothing is mapped at the page.
    #[error("no mapping at {va:#x}")]
    NotPresent {
        /// Page address.
        va: usize,
    },
    /// Granting the page to the child failed.
    #[error("mapping {va:#x} into {child} failed: {err}")]
    MapChild {
        /// Page address.
        va: usize,
        /// Destination environment.
        child: EnvId,
        /// Kernel error.
        #[source]
        err: AbiError,
    },
    /// Downgrading the parent's own mapping failed.
    #[error("downgrading own mapping at {va:#x} failed: {err}")]
    RemapParent {
        /// Page address.
        va: usize,
        /// Kernel error.
        #[source]
        err: AbiError,
    },
}

/// Failure inside the copy-on-write fault handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FaultError {
    /// The faulting access was not a store.
    #[error("fault at {va:#x} was not a write (err {err:?})")]
    NotWrite {
        /// Faulting address.
        va: usize,
        /// Error bits delivered with the fault.
        err: FaultErr,
    },
    /// The faulting page does not carry the copy-on-write marker.
    #[error("fault at {va:#x} hit a page that is not copy-on-write ({flags:?})")]
    NotCopyOnWrite {
        /// Faulting address.
        va: usize,
        /// Flags found in the address-space view.
        flags: PageFlags,
    },
    /// Allocating the scratch page failed.
    #[error("allocating scratch page failed: {0}")]
    Alloc(#[source] AbiError),
    /// Copying the shared contents into the scratch page failed.
    #[error("copying {va:#x} failed: {err}")]
    CopyPage {
        /// Page address.
        va: usize,
        /// Kernel error.
        #[source]
        err: AbiError,
    },
    /// Moving the private copy over the shared page failed.
    #[error("installing private copy at {va:#x} failed: {err}")]
    Remap {
        /// Page address.
        va: usize,
        /// Kernel error.
        #[source]
        err: AbiError,
    },
    /// Releasing the scratch slot failed.
    #[error("unmapping scratch page failed: {0}")]
    Unmap(#[source] AbiError),
}

/// Logs `err` and aborts the current context.
///
/// Used for every failure after the point where a half-built address space could be observed.
#[cold]
pub fn fatal<E: fmt::Display>(what: &str, err: E) -> ! {
    error!("nexus-fork: {}: {}", what, err);
    panic!("{}: {}", what, err)
}
