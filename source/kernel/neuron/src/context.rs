// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! The view of the kernel that code running inside one environment gets.

extern crate alloc;

use alloc::sync::Arc;
use core::fmt;

use nexus_abi::{
    AddressSpaceView, EnvId, EnvStatus, FaultUpcall, Forked, PageFlags, SysResult, UserMemory,
    VmSyscalls,
};

use crate::trap::Op;
use crate::Kernel;

/// Execution context bound to one environment.
///
/// Every syscall is issued on behalf of that environment, and the address-space view
/// reflects its page tables.
#[derive(Clone)]
pub struct EnvContext {
    kernel: Arc<Kernel>,
    env: EnvId,
}

impl EnvContext {
    pub(crate) fn new(kernel: Arc<Kernel>, env: EnvId) -> Self {
        Self { kernel, env }
    }

    /// Environment this context runs as.
    pub fn env(&self) -> EnvId {
        self.env
    }
}

impl fmt::Debug for EnvContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvContext").field("env", &self.env).finish()
    }
}

impl VmSyscalls for EnvContext {
    fn getenvid(&self) -> EnvId {
        self.env
    }

    fn exofork(&self) -> SysResult<Forked> {
        self.kernel.sys_exofork(self.env)
    }

    fn page_alloc(&self, env: EnvId, va: usize, perm: PageFlags) -> SysResult<()> {
        self.kernel.sys_page_alloc(self.env, env, va, perm)
    }

    fn page_map(
        &self,
        src: EnvId,
        src_va: usize,
        dst: EnvId,
        dst_va: usize,
        perm: PageFlags,
    ) -> SysResult<()> {
        self.kernel.sys_page_map(self.env, src, src_va, dst, dst_va, perm)
    }

    fn page_unmap(&self, env: EnvId, va: usize) -> SysResult<()> {
        self.kernel.sys_page_unmap(self.env, env, va)
    }

    fn set_pgfault_upcall(&self, env: EnvId, upcall: FaultUpcall) -> SysResult<()> {
        self.kernel.sys_set_pgfault_upcall(self.env, env, upcall)
    }

    fn set_status(&self, env: EnvId, status: EnvStatus) -> SysResult<()> {
        self.kernel.sys_set_status(self.env, env, status)
    }
}

impl AddressSpaceView for EnvContext {
    fn pde(&self, pdx: usize) -> PageFlags {
        let state = self.kernel.state.lock();
        state.envs.get(self.env).map_or(PageFlags::empty(), |env| env.pgdir.pde(pdx))
    }

    fn pte(&self, pn: usize) -> PageFlags {
        let state = self.kernel.state.lock();
        state.envs.get(self.env).map_or(PageFlags::empty(), |env| env.pgdir.pte(pn))
    }
}

impl UserMemory for EnvContext {
    fn load(&self, va: usize, buf: &mut [u8]) -> SysResult<()> {
        self.kernel.user_access(self.env, va, Op::Load(buf))
    }

    fn store(&self, va: usize, bytes: &[u8]) -> SysResult<()> {
        self.kernel.user_access(self.env, va, Op::Store(bytes))
    }
}
