// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page permission bits, fault error bits, and the frame handed to a fault upcall.

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    /// Flags stored in a user page-table entry.
    ///
    /// `COW` lives in the software-available range; hardware ignores it and only the
    /// fault handler and the duplication policy give it meaning.
    pub struct PageFlags: u32 {
        /// Entry maps a page.
        const PRESENT = 1 << 0;
        /// Stores are permitted.
        const WRITABLE = 1 << 1;
        /// Accessible from user mode.
        const USER = 1 << 2;
        /// Set by hardware on any access.
        const ACCESSED = 1 << 5;
        /// Set by hardware on a store.
        const DIRTY = 1 << 6;
        /// Copy-on-write marker; never combined with `WRITABLE`.
        const COW = 1 << 11;
        /// Bits reserved for software use.
        const AVAIL = 0xE00;
    }
}

impl PageFlags {
    /// Bits a mapping syscall accepts.
    pub const SYSCALL: Self = Self::PRESENT
        .union(Self::WRITABLE)
        .union(Self::USER)
        .union(Self::AVAIL);
    /// Private, writable user page.
    pub const USER_RW: Self = Self::PRESENT.union(Self::USER).union(Self::WRITABLE);
    /// Read-only user page.
    pub const USER_RO: Self = Self::PRESENT.union(Self::USER);
    /// Shared copy-on-write user page.
    pub const USER_COW: Self = Self::PRESENT.union(Self::USER).union(Self::COW);

    /// Returns `true` when the entry maps a page.
    #[inline]
    pub const fn is_present(self) -> bool {
        self.contains(Self::PRESENT)
    }

    /// Classifies a present mapping; `None` when nothing is mapped.
    pub fn access(self) -> Option<Access> {
        if !self.is_present() {
            None
        } else if self.contains(Self::WRITABLE) {
            Some(Access::Writable)
        } else if self.contains(Self::COW) {
            Some(Access::CopyOnWrite)
        } else {
            Some(Access::ReadOnly)
        }
    }
}

/// How a present user mapping may be written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Access {
    /// Neither writable nor copy-on-write (code, constants).
    ReadOnly,
    /// Private and directly writable.
    Writable,
    /// Shared; the first store materialises a private copy.
    CopyOnWrite,
}

impl Access {
    /// Canonical user permission for this access class.
    pub const fn flags(self) -> PageFlags {
        match self {
            Self::ReadOnly => PageFlags::USER_RO,
            Self::Writable => PageFlags::USER_RW,
            Self::CopyOnWrite => PageFlags::USER_COW,
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// Error code pushed with a page fault.
    pub struct FaultErr: u32 {
        /// Protection violation on a present page (clear: page not present).
        const PRESENT = 1 << 0;
        /// The faulting access was a store.
        const WRITE = 1 << 1;
        /// The access came from user mode.
        const USER = 1 << 2;
    }
}

/// Fault description delivered to a user fault upcall on the exception stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UTrapframe {
    /// Faulting virtual address (not rounded).
    pub fault_va: usize,
    /// Fault error bits.
    pub err: FaultErr,
}

impl UTrapframe {
    /// Returns `true` when the fault was raised by a store.
    pub const fn is_write(&self) -> bool {
        self.err.contains(FaultErr::WRITE)
    }
}
