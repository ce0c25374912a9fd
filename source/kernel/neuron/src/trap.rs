// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: User memory accesses and page-fault delivery to user upcalls
//! OWNERS: @kernel-team
//! PUBLIC API: Kernel::user_access (crate-internal)
//! DEPENDS_ON: context::EnvContext, mm::PageTable
//! INVARIANTS: The upcall runs with no kernel lock held and only while the exception stack is
//!             mapped writable; an access that keeps faulting past the delivery limit kills
//!             the environment

extern crate alloc;

use alloc::sync::Arc;

use log::{debug, warn};
use nexus_abi::layout::{round_down, PAGE_SIZE, UXSTACK_PAGE};
use nexus_abi::{AbiError, EnvId, FaultErr, FaultUpcall, PageFlags, SysResult, UTrapframe};

use crate::mm::FrameId;
use crate::{EnvContext, Kernel, KernelState};

/// A user load or store confined to one page.
pub(crate) enum Op<'a> {
    Load(&'a mut [u8]),
    Store(&'a [u8]),
}

impl Op<'_> {
    fn is_write(&self) -> bool {
        matches!(self, Op::Store(_))
    }

    fn len(&self) -> usize {
        match self {
            Op::Load(buf) => buf.len(),
            Op::Store(bytes) => bytes.len(),
        }
    }
}

enum Translation {
    Mapped(FrameId),
    Fault(FaultErr),
    Gone,
}

impl KernelState {
    /// Walks `env`'s page table the way the MMU would, updating accessed/dirty bits.
    fn translate(&mut self, env: EnvId, va: usize, write: bool) -> Translation {
        let Some(record) = self.envs.get_mut(env) else {
            return Translation::Gone;
        };
        let mut err = FaultErr::USER;
        if write {
            err |= FaultErr::WRITE;
        }
        let Some(pte) = record.pgdir.lookup_mut(round_down(va)) else {
            return Translation::Fault(err);
        };
        if !pte.flags.contains(PageFlags::USER) || (write && !pte.flags.contains(PageFlags::WRITABLE))
        {
            return Translation::Fault(err | FaultErr::PRESENT);
        }
        pte.flags |= PageFlags::ACCESSED;
        if write {
            pte.flags |= PageFlags::DIRTY;
        }
        Translation::Mapped(pte.frame)
    }

    fn copy(&mut self, frame: FrameId, offset: usize, op: Op<'_>) {
        let Some(bytes) = self.frames.bytes_mut(frame) else {
            return;
        };
        let end = offset + op.len();
        match op {
            Op::Load(buf) => buf.copy_from_slice(&bytes[offset..end]),
            Op::Store(src) => bytes[offset..end].copy_from_slice(src),
        }
    }

    /// Returns the upcall to run, or `None` when the fault cannot be reflected to user mode.
    fn fault_target(&self, env: EnvId) -> Option<FaultUpcall> {
        let record = self.envs.get(env)?;
        let upcall = record.upcall?;
        let stack = record.pgdir.lookup(UXSTACK_PAGE)?;
        stack.flags.contains(PageFlags::USER_RW).then_some(upcall)
    }
}

impl Kernel {
    /// Performs a user access of arbitrary length, one page at a time.
    pub(crate) fn user_access(
        self: &Arc<Self>,
        env: EnvId,
        va: usize,
        mut op: Op<'_>,
    ) -> SysResult<()> {
        let total = op.len();
        let mut done = 0;
        while done < total {
            let addr = va.checked_add(done).ok_or(AbiError::Fault)?;
            let offset = addr % PAGE_SIZE;
            let len = (PAGE_SIZE - offset).min(total - done);
            let chunk = match &mut op {
                Op::Load(buf) => Op::Load(&mut buf[done..done + len]),
                Op::Store(bytes) => Op::Store(&bytes[done..done + len]),
            };
            self.access_page(env, addr, chunk)?;
            done += len;
        }
        Ok(())
    }

    fn access_page(self: &Arc<Self>, env: EnvId, va: usize, op: Op<'_>) -> SysResult<()> {
        let write = op.is_write();
        let mut deliveries = 0;
        loop {
            let (upcall, utf) = {
                let mut state = self.state.lock();
                match state.translate(env, va, write) {
                    Translation::Mapped(frame) => {
                        state.copy(frame, va % PAGE_SIZE, op);
                        return Ok(());
                    }
                    Translation::Gone => return Err(AbiError::BadEnv),
                    Translation::Fault(err) => {
                        deliveries += 1;
                        match state.fault_target(env) {
                            Some(upcall) if deliveries <= self.config.max_fault_deliveries => {
                                (upcall, UTrapframe { fault_va: va, err })
                            }
                            _ => {
                                warn!(
                                    "neuron: env {} unhandled fault va={:#x} err={:?}; destroying",
                                    env, va, err
                                );
                                state.teardown(env);
                                return Err(AbiError::Fault);
                            }
                        }
                    }
                }
            };
            debug!("neuron: fault upcall env={} va={:#x} err={:?}", env, va, utf.err);
            let ctx = EnvContext::new(Arc::clone(self), env);
            upcall(&ctx, &utf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KernelConfig;
    use nexus_abi::layout::{USTACK_PAGE, UTEXT};
    use nexus_abi::{Context, EnvStatus, UserMemory, VmSyscalls};

    fn upgrade_in_place(ctx: &dyn Context, utf: &UTrapframe) {
        let va = round_down(utf.fault_va);
        ctx.page_map(EnvId::SELF, va, EnvId::SELF, va, PageFlags::USER_RW)
            .or_else(|_| ctx.page_alloc(EnvId::SELF, va, PageFlags::USER_RW))
            .expect("fix up");
    }

    fn ignore(_: &dyn Context, _: &UTrapframe) {}

    #[test]
    fn accesses_span_pages_and_set_hardware_bits() {
        let kernel = Kernel::new(KernelConfig::default());
        let env = kernel.spawn().expect("spawn");
        let ctx = kernel.schedule(env).expect("schedule");
        ctx.page_alloc(EnvId::SELF, UTEXT, PageFlags::USER_RW).expect("a");
        ctx.page_alloc(EnvId::SELF, UTEXT + PAGE_SIZE, PageFlags::USER_RW).expect("b");

        let va = UTEXT + PAGE_SIZE - 2;
        ctx.store(va, &[1, 2, 3, 4]).expect("store");
        let mut buf = [0; 4];
        ctx.load(va, &mut buf).expect("load");
        assert_eq!(buf, [1, 2, 3, 4]);
        assert!(kernel.flags_at(env, UTEXT).contains(PageFlags::ACCESSED | PageFlags::DIRTY));
        assert!(!kernel.flags_at(env, USTACK_PAGE).contains(PageFlags::ACCESSED));
    }

    #[test]
    fn fault_without_upcall_destroys_env() {
        let kernel = Kernel::new(KernelConfig::default());
        let env = kernel.spawn().expect("spawn");
        let ctx = kernel.schedule(env).expect("schedule");
        assert_eq!(ctx.store(UTEXT, &[1]), Err(AbiError::Fault));
        assert_eq!(kernel.status(env), EnvStatus::Free);
        assert_eq!(kernel.frames_in_use(), 0);
    }

    #[test]
    fn fault_without_exception_stack_destroys_env() {
        let kernel = Kernel::new(KernelConfig::default());
        let env = kernel.spawn().expect("spawn");
        let ctx = kernel.schedule(env).expect("schedule");
        ctx.set_pgfault_upcall(EnvId::SELF, upgrade_in_place).expect("upcall");
        ctx.page_alloc(EnvId::SELF, UTEXT, PageFlags::USER_RO).expect("ro");
        assert_eq!(ctx.store(UTEXT, &[1]), Err(AbiError::Fault));
        assert_eq!(kernel.status(env), EnvStatus::Free);
    }

    #[test]
    fn upcall_fixes_mapping_and_access_retries() {
        let kernel = Kernel::new(KernelConfig::default());
        let env = kernel.spawn().expect("spawn");
        let ctx = kernel.schedule(env).expect("schedule");
        ctx.page_alloc(EnvId::SELF, UXSTACK_PAGE, PageFlags::USER_RW).expect("xstack");
        ctx.set_pgfault_upcall(EnvId::SELF, upgrade_in_place).expect("upcall");
        ctx.page_alloc(EnvId::SELF, UTEXT, PageFlags::USER_RW).expect("rw");
        ctx.page_map(EnvId::SELF, UTEXT, EnvId::SELF, UTEXT, PageFlags::USER_RO).expect("ro");

        ctx.store(UTEXT + 8, &[9]).expect("store after fixup");
        assert!(kernel.flags_at(env, UTEXT).contains(PageFlags::WRITABLE));
        ctx.store(UTEXT + 3 * PAGE_SIZE, &[7]).expect("demand page");
    }

    #[test]
    fn unresolved_faults_are_bounded() {
        let kernel = Kernel::new(KernelConfig::default().with_max_fault_deliveries(2));
        let env = kernel.spawn().expect("spawn");
        let ctx = kernel.schedule(env).expect("schedule");
        ctx.page_alloc(EnvId::SELF, UXSTACK_PAGE, PageFlags::USER_RW).expect("xstack");
        ctx.set_pgfault_upcall(EnvId::SELF, ignore).expect("upcall");
        let mut buf = [0; 1];
        assert_eq!(ctx.load(UTEXT, &mut buf), Err(AbiError::Fault));
        assert_eq!(kernel.status(env), EnvStatus::Free);
    }
}
