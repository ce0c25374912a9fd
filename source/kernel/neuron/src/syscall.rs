// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: VM and environment syscall handlers
//! OWNERS: @kernel-team
//! PUBLIC API: Kernel::sys_* (crate-internal; reached through EnvContext)
//! DEPENDS_ON: env::EnvTable, mm::{FrameAllocator, PageTable}
//! INVARIANTS: Decode→Check→Execute; addresses page aligned and below UTOP; permissions carry
//!             USER|PRESENT and nothing outside SYSCALL; writable grants need a writable source

use log::{debug, trace};
use nexus_abi::layout::{is_page_aligned, UTOP};
use nexus_abi::{AbiError, EnvId, EnvStatus, FaultUpcall, Forked, PageFlags, SysResult};

use crate::mm::{MapError, Pte};
use crate::Kernel;

// Typed decoders for Decode→Check→Execute

/// Page-aligned user address below `UTOP`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct UserPage(usize);

impl UserPage {
    #[inline]
    fn decode(va: usize) -> Result<Self, AbiError> {
        if va >= UTOP {
            return Err(MapError::OutOfRange.into());
        }
        if !is_page_aligned(va) {
            return Err(MapError::Unaligned.into());
        }
        Ok(Self(va))
    }
}

#[derive(Clone, Copy, Debug)]
struct Perm(PageFlags);

impl Perm {
    #[inline]
    fn decode(perm: PageFlags) -> Self {
        Self(perm)
    }

    #[inline]
    fn check(self) -> Result<PageFlags, AbiError> {
        let required = PageFlags::USER | PageFlags::PRESENT;
        if !self.0.contains(required) || !PageFlags::SYSCALL.contains(self.0) {
            return Err(MapError::InvalidFlags.into());
        }
        Ok(self.0)
    }
}

#[derive(Clone, Copy)]
struct PageMapArgsTyped {
    src: EnvId,
    src_va: UserPage,
    dst: EnvId,
    dst_va: UserPage,
    perm: Perm,
}

impl PageMapArgsTyped {
    #[inline]
    fn decode(
        src: EnvId,
        src_va: usize,
        dst: EnvId,
        dst_va: usize,
        perm: PageFlags,
    ) -> Result<Self, AbiError> {
        Ok(Self {
            src,
            src_va: UserPage::decode(src_va)?,
            dst,
            dst_va: UserPage::decode(dst_va)?,
            perm: Perm::decode(perm),
        })
    }

    #[inline]
    fn check(&self) -> Result<PageFlags, AbiError> {
        self.perm.check()
    }
}

impl Kernel {
    pub(crate) fn sys_exofork(&self, caller: EnvId) -> SysResult<Forked> {
        let mut state = self.state.lock();
        let record = state.envs.get_mut(caller).ok_or(AbiError::BadEnv)?;
        // A freshly scheduled child resumes inside the call that created it.
        if let Some(pending) = record.pending.take() {
            return Ok(pending);
        }
        #[cfg(feature = "failpoints")]
        if self.failpoints.take_exofork() {
            return Err(AbiError::NoFreeEnv);
        }
        let child = state.envs.alloc(Some(caller))?;
        if let Some(record) = state.envs.get_mut(child) {
            record.pending = Some(Forked::Child);
        }
        debug!("neuron: exofork {} -> {}", caller, child);
        Ok(Forked::Parent(child))
    }

    pub(crate) fn sys_page_alloc(
        &self,
        caller: EnvId,
        env: EnvId,
        va: usize,
        perm: PageFlags,
    ) -> SysResult<()> {
        let va = UserPage::decode(va)?;
        let perm = Perm::decode(perm).check()?;

        let mut state = self.state.lock();
        let target = state.envs.resolve(caller, env)?;
        #[cfg(feature = "failpoints")]
        if self.failpoints.take_frame_alloc() {
            return Err(AbiError::NoMem);
        }
        let frame = state.frames.alloc()?;
        if let Err(err) = state.install(target, va.0, Pte { frame, flags: perm }) {
            state.frames.release_if_unused(frame);
            return Err(err.into());
        }
        trace!("neuron: page_alloc {} {:#x} {:?} -> {}", target, va.0, perm, frame);
        Ok(())
    }

    pub(crate) fn sys_page_map(
        &self,
        caller: EnvId,
        src: EnvId,
        src_va: usize,
        dst: EnvId,
        dst_va: usize,
        perm: PageFlags,
    ) -> SysResult<()> {
        let typed = PageMapArgsTyped::decode(src, src_va, dst, dst_va, perm)?;
        let perm = typed.check()?;

        let mut state = self.state.lock();
        let src = state.envs.resolve(caller, typed.src)?;
        let dst = state.envs.resolve(caller, typed.dst)?;
        let source = state
            .envs
            .get(src)
            .and_then(|record| record.pgdir.lookup(typed.src_va.0))
            .ok_or(AbiError::Invalid)?;
        if perm.contains(PageFlags::WRITABLE) && !source.flags.contains(PageFlags::WRITABLE) {
            return Err(MapError::PermissionDenied.into());
        }
        #[cfg(feature = "failpoints")]
        if self.failpoints.take_page_map() {
            return Err(AbiError::NoMem);
        }
        state.install(dst, typed.dst_va.0, Pte { frame: source.frame, flags: perm })?;
        trace!(
            "neuron: page_map {}:{:#x} -> {}:{:#x} {:?}",
            src,
            typed.src_va.0,
            dst,
            typed.dst_va.0,
            perm
        );
        Ok(())
    }

    pub(crate) fn sys_page_unmap(&self, caller: EnvId, env: EnvId, va: usize) -> SysResult<()> {
        let va = UserPage::decode(va)?;
        let mut state = self.state.lock();
        let target = state.envs.resolve(caller, env)?;
        state.uninstall(target, va.0);
        Ok(())
    }

    pub(crate) fn sys_set_pgfault_upcall(
        &self,
        caller: EnvId,
        env: EnvId,
        upcall: FaultUpcall,
    ) -> SysResult<()> {
        let mut state = self.state.lock();
        let target = state.envs.resolve(caller, env)?;
        let record = state.envs.get_mut(target).ok_or(AbiError::BadEnv)?;
        record.upcall = Some(upcall);
        Ok(())
    }

    pub(crate) fn sys_set_status(
        &self,
        caller: EnvId,
        env: EnvId,
        status: EnvStatus,
    ) -> SysResult<()> {
        if !matches!(status, EnvStatus::Runnable | EnvStatus::NotRunnable) {
            return Err(AbiError::Invalid);
        }
        let mut state = self.state.lock();
        let target = state.envs.resolve(caller, env)?;
        let record = state.envs.get_mut(target).ok_or(AbiError::BadEnv)?;
        record.status = status;
        debug!("neuron: env {} -> {:?}", target, status);
        Ok(())
    }
}
