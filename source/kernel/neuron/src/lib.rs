// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![deny(missing_docs)]

//! CONTEXT: NEURON exokernel core: environments, page-granular memory grants, fault upcalls
//! OWNERS: @kernel-team
//! PUBLIC API: Kernel, KernelConfig, EnvContext, Failpoints (feature "failpoints"), mm::*
//! DEPENDS_ON: nexus_abi (ABI types, layout), spin (state lock), log (diagnostics)
//! INVARIANTS: Every mapping holds one frame reference; every install/remove counts one
//!             translation-cache invalidation; upcalls run with no kernel lock held

extern crate alloc;

pub mod config;
mod context;
pub mod env;
#[cfg(feature = "failpoints")]
mod failpoints;
pub mod mm;
mod syscall;
mod trap;

use alloc::{sync::Arc, vec::Vec};

use log::debug;
use nexus_abi::layout::{PFTEMP, PT_SPAN, USTACKTOP, USTACK_PAGE, UTEXT, UTOP, UXSTACK_PAGE};
use nexus_abi::{AbiError, EnvId, EnvStatus, PageFlags, SysResult};
use spin::Mutex;
use static_assertions::{assert_impl_all, const_assert, const_assert_eq};

pub use config::KernelConfig;
pub use context::EnvContext;
#[cfg(feature = "failpoints")]
pub use failpoints::Failpoints;

use env::EnvTable;
use mm::{FrameAllocator, FrameId, MapError, Pte};

const_assert_eq!(UTOP % PT_SPAN, 0);
const_assert!(USTACKTOP < UXSTACK_PAGE);
const_assert!(PFTEMP < UTEXT);
const_assert!(USTACK_PAGE > UTEXT);

/// State guarded by the kernel lock.
pub(crate) struct KernelState {
    pub(crate) envs: EnvTable,
    pub(crate) frames: FrameAllocator,
}

impl KernelState {
    /// Installs `pte` at `va` in `env`, replacing and releasing any previous mapping.
    pub(crate) fn install(&mut self, env: EnvId, va: usize, pte: Pte) -> Result<(), MapError> {
        let record = self.envs.get_mut(env).ok_or(MapError::PermissionDenied)?;
        // Take the new reference first: remapping a page onto itself must not free it.
        self.frames.incref(pte.frame);
        match record.pgdir.insert(va, pte) {
            Ok(old) => {
                record.tlb_invalidations += 1;
                if let Some(old) = old {
                    self.frames.decref(old.frame);
                }
                Ok(())
            }
            Err(err) => {
                self.frames.decref(pte.frame);
                Err(err)
            }
        }
    }

    /// Removes the mapping at `va` in `env`; absent mappings are ignored.
    pub(crate) fn uninstall(&mut self, env: EnvId, va: usize) {
        let Some(record) = self.envs.get_mut(env) else {
            return;
        };
        if let Some(old) = record.pgdir.remove(va) {
            record.tlb_invalidations += 1;
            self.frames.decref(old.frame);
        }
    }

    /// Frees `env` and every frame reference its address space holds.
    pub(crate) fn teardown(&mut self, env: EnvId) -> bool {
        let Some(mut record) = self.envs.remove(env) else {
            return false;
        };
        for pte in record.pgdir.drain() {
            self.frames.decref(pte.frame);
        }
        true
    }
}

/// An exokernel instance.
///
/// Environments interact with it through [`EnvContext`] handles obtained from
/// [`Kernel::schedule`]; the remaining methods are supervisor-side controls and
/// introspection.
pub struct Kernel {
    pub(crate) state: Mutex<KernelState>,
    config: KernelConfig,
    #[cfg(feature = "failpoints")]
    failpoints: Failpoints,
}

assert_impl_all!(Kernel: Send, Sync);

impl Kernel {
    /// Creates a kernel with no environments.
    pub fn new(config: KernelConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(KernelState {
                envs: EnvTable::new(config.max_envs),
                frames: FrameAllocator::new(config.max_frames),
            }),
            config,
            #[cfg(feature = "failpoints")]
            failpoints: Failpoints::default(),
        })
    }

    /// Fault injection switches.
    #[cfg(feature = "failpoints")]
    pub fn failpoints(&self) -> &Failpoints {
        &self.failpoints
    }

    /// Creates a runnable root environment with one page of normal stack.
    pub fn spawn(&self) -> SysResult<EnvId> {
        let mut state = self.state.lock();
        let id = state.envs.alloc(None)?;
        let frame = match state.frames.alloc() {
            Ok(frame) => frame,
            Err(err) => {
                state.teardown(id);
                return Err(err.into());
            }
        };
        if let Err(err) = state.install(id, USTACK_PAGE, Pte { frame, flags: PageFlags::USER_RW }) {
            state.frames.release_if_unused(frame);
            state.teardown(id);
            return Err(err.into());
        }
        if let Some(env) = state.envs.get_mut(id) {
            env.status = EnvStatus::Runnable;
        }
        debug!("neuron: spawned root env {}", id);
        Ok(id)
    }

    /// Resumes `env`, handing out the context its code runs with.
    pub fn schedule(self: &Arc<Self>, env: EnvId) -> SysResult<EnvContext> {
        let state = self.state.lock();
        let record = state.envs.get(env).ok_or(AbiError::BadEnv)?;
        if record.status != EnvStatus::Runnable {
            return Err(AbiError::Invalid);
        }
        Ok(EnvContext::new(Arc::clone(self), env))
    }

    /// Destroys `env`, releasing its address space.
    pub fn destroy(&self, env: EnvId) -> SysResult<()> {
        if self.state.lock().teardown(env) {
            debug!("neuron: destroyed env {}", env);
            Ok(())
        } else {
            Err(AbiError::BadEnv)
        }
    }

    /// Scheduling state of `env`; `Free` once it no longer exists.
    pub fn status(&self, env: EnvId) -> EnvStatus {
        self.state.lock().envs.get(env).map_or(EnvStatus::Free, |record| record.status)
    }

    /// Creator of `env`.
    pub fn parent(&self, env: EnvId) -> Option<EnvId> {
        self.state.lock().envs.get(env).and_then(|record| record.parent)
    }

    /// Frame mapped at `va` in `env`.
    pub fn frame_at(&self, env: EnvId, va: usize) -> Option<FrameId> {
        self.pte_at(env, va).map(|pte| pte.frame)
    }

    /// Flags mapped at `va` in `env`; empty when unmapped.
    pub fn flags_at(&self, env: EnvId, va: usize) -> PageFlags {
        self.pte_at(env, va).map_or(PageFlags::empty(), |pte| pte.flags)
    }

    /// Mappings referencing `frame`.
    pub fn frame_refs(&self, frame: FrameId) -> usize {
        self.state.lock().frames.refs(frame)
    }

    /// Frames currently allocated across all environments.
    pub fn frames_in_use(&self) -> usize {
        self.state.lock().frames.in_use()
    }

    /// Live environments.
    pub fn live_envs(&self) -> usize {
        self.state.lock().envs.live()
    }

    /// Translation-cache invalidations performed on `env`'s address space.
    pub fn tlb_invalidations(&self, env: EnvId) -> u64 {
        self.state.lock().envs.get(env).map_or(0, |record| record.tlb_invalidations)
    }

    /// Every mapping of `env` as `(va, pte)` in ascending address order.
    pub fn mappings(&self, env: EnvId) -> Vec<(usize, Pte)> {
        self.state
            .lock()
            .envs
            .get(env)
            .map_or_else(Vec::new, |record| record.pgdir.mapped_pages())
    }

    fn pte_at(&self, env: EnvId, va: usize) -> Option<Pte> {
        self.state.lock().envs.get(env).and_then(|record| record.pgdir.lookup(va))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_abi::VmSyscalls;

    #[test]
    fn spawn_maps_one_stack_page() {
        let kernel = Kernel::new(KernelConfig::default());
        let env = kernel.spawn().expect("spawn");
        assert_eq!(kernel.status(env), EnvStatus::Runnable);
        assert_eq!(kernel.flags_at(env, USTACK_PAGE), PageFlags::USER_RW);
        assert_eq!(kernel.flags_at(env, UXSTACK_PAGE), PageFlags::empty());
        assert_eq!(kernel.frames_in_use(), 1);
        assert_eq!(kernel.tlb_invalidations(env), 1);
    }

    #[test]
    fn destroy_releases_frames() {
        let kernel = Kernel::new(KernelConfig::default());
        let env = kernel.spawn().expect("spawn");
        kernel.destroy(env).expect("destroy");
        assert_eq!(kernel.frames_in_use(), 0);
        assert_eq!(kernel.status(env), EnvStatus::Free);
        assert_eq!(kernel.destroy(env), Err(AbiError::BadEnv));
    }

    #[test]
    fn spawn_fails_cleanly_without_frames() {
        let kernel = Kernel::new(KernelConfig::default().with_max_frames(0));
        assert_eq!(kernel.spawn(), Err(AbiError::NoMem));
        assert_eq!(kernel.live_envs(), 0);
    }

    #[test]
    fn only_runnable_envs_are_scheduled() {
        let kernel = Kernel::new(KernelConfig::default());
        let env = kernel.spawn().expect("spawn");
        let ctx = kernel.schedule(env).expect("runnable");
        ctx.set_status(EnvId::SELF, EnvStatus::NotRunnable).expect("park");
        assert_eq!(kernel.schedule(env).err(), Some(AbiError::Invalid));
        kernel.destroy(env).expect("destroy");
        assert_eq!(kernel.schedule(env).err(), Some(AbiError::BadEnv));
    }
}
