// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared-memory duplication: thread-like siblings with private stacks.
//!
//! The child maps the parent's frames with the parent's exact permissions, so stores from
//! either side are visible to the other with no ordering between them. Only the exception
//! stack and the top page of the normal stack stay private.

use log::trace;
use nexus_abi::layout::page_va;
use nexus_abi::{Context, EnvId, Forked, PageFlags};

use crate::fork::{Process, Strategy};
use crate::{DupError, ForkError};

impl<C: Context> Process<C> {
    /// Duplicates the process sharing all memory except the stacks.
    ///
    /// Same return contract and fatality rules as [`Process::fork`].
    pub fn sfork(&mut self) -> Result<Forked, ForkError> {
        self.duplicate(Strategy::SharedMemory)
    }
}

/// Maps page `pn` of the caller into `child` with the caller's current permissions.
///
/// Bits the hardware maintains are dropped; nothing is downgraded on either side.
pub fn share_page(ctx: &dyn Context, child: EnvId, pn: usize) -> Result<(), DupError> {
    let va = page_va(pn);
    let flags = ctx.pte(pn);
    if !flags.is_present() {
        return Err(DupError::NotPresent { va });
    }
    let perm = flags & PageFlags::SYSCALL;
    ctx.page_map(EnvId::SELF, va, child, va, perm)
        .map_err(|err| DupError::MapChild { va, child, err })?;
    trace!("nexus-fork: share {:#x} -> {} {:?}", va, child, perm);
    Ok(())
}
