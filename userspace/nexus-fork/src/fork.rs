// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Fork orchestration over a per-process context
//! OWNERS: @runtime
//! PUBLIC API: Process::{attach, fork, resumed_as, this_env, context}
//! DEPENDS_ON: policy::duppage, pgfault::{ensure_exception_stack, pgfault, register_upcall},
//!             walk::PresentPages
//! INVARIANTS: exofork is the only recoverable failure and leaves the address space untouched;
//!             the child is marked runnable last

use log::debug;
use nexus_abi::layout::{page_va, PAGE_SIZE, USTACK_PAGE, UXSTACK_PAGE};
use nexus_abi::{Context, EnvId, EnvStatus, Forked, PageFlags};

use crate::pgfault::{ensure_exception_stack, pgfault, register_upcall};
use crate::policy::duppage;
use crate::sfork::share_page;
use crate::walk::PresentPages;
use crate::{fatal, ForkError};

/// How a duplication treats ordinary pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Strategy {
    /// Every mutable page becomes copy-on-write.
    CopyOnWrite,
    /// Only the top stack page is copy-on-write; everything else is shared as is.
    SharedMemory,
}

/// What happens to one present page during duplication.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PageClass {
    /// Fresh private page in the child.
    ExceptionStack,
    /// Duplication policy.
    CopyOnWrite,
    /// Same frame, same permissions.
    Shared,
}

impl Strategy {
    pub(crate) fn classify(self, pn: usize) -> PageClass {
        let va = page_va(pn);
        if va == UXSTACK_PAGE {
            return PageClass::ExceptionStack;
        }
        match self {
            Self::CopyOnWrite => PageClass::CopyOnWrite,
            Self::SharedMemory if va == USTACK_PAGE => PageClass::CopyOnWrite,
            Self::SharedMemory => PageClass::Shared,
        }
    }
}

/// Per-process state: the context the code runs with and which environment it is.
///
/// `this_env` is resolved when the process is attached and again whenever a fork returns
/// in the child.
#[derive(Debug)]
pub struct Process<C> {
    ctx: C,
    this_env: EnvId,
}

impl<C: Context> Process<C> {
    /// Binds process state to the context it runs with.
    pub fn attach(ctx: C) -> Self {
        let this_env = ctx.getenvid();
        Self { ctx, this_env }
    }

    /// The child's copy of this state as it stood inside `fork`, now running on `ctx`.
    ///
    /// Identity is still the parent's until the child's pending `fork` call returns.
    pub fn resumed_as(&self, ctx: C) -> Self {
        Self { ctx, this_env: self.this_env }
    }

    /// Environment this process believes it is.
    pub fn this_env(&self) -> EnvId {
        self.this_env
    }

    /// Context the process runs with.
    pub fn context(&self) -> &C {
        &self.ctx
    }

    /// Duplicates the process with copy-on-write sharing of every mutable page.
    ///
    /// Returns `Forked::Parent(child)` in the parent and `Forked::Child` in the child. Only a
    /// failure to create the child is returned; later failures abort.
    pub fn fork(&mut self) -> Result<Forked, ForkError> {
        self.duplicate(Strategy::CopyOnWrite)
    }

    pub(crate) fn duplicate(&mut self, strategy: Strategy) -> Result<Forked, ForkError> {
        register_upcall(&self.ctx, pgfault);

        let child = match self.ctx.exofork().map_err(ForkError::Exofork)? {
            Forked::Child => {
                self.this_env = self.ctx.getenvid();
                debug!("nexus-fork: resumed as child {}", self.this_env);
                return Ok(Forked::Child);
            }
            Forked::Parent(child) => child,
        };
        // Mapped only once a child exists, so a failed exofork changes no mappings.
        ensure_exception_stack(&self.ctx);

        let mut pages = 0usize;
        for pn in PresentPages::new(&self.ctx) {
            match strategy.classify(pn) {
                PageClass::ExceptionStack => {
                    if let Err(err) =
                        self.ctx.page_alloc(child, UXSTACK_PAGE, PageFlags::USER_RW)
                    {
                        fatal("allocating child exception stack", err);
                    }
                }
                PageClass::CopyOnWrite => {
                    if let Err(err) = duppage(&self.ctx, child, pn) {
                        fatal("duplicating page", err);
                    }
                }
                PageClass::Shared => {
                    if let Err(err) = share_page(&self.ctx, child, pn) {
                        fatal("sharing page", err);
                    }
                }
            }
            pages += 1;
        }

        if let Err(err) = self.ctx.set_pgfault_upcall(child, pgfault) {
            fatal("registering child fault handler", err);
        }
        if let Err(err) = self.ctx.set_status(child, EnvStatus::Runnable) {
            fatal("starting child", err);
        }
        debug!(
            "nexus-fork: {:?} {} -> {} ({} pages, {} KiB)",
            strategy,
            self.this_env,
            child,
            pages,
            pages * PAGE_SIZE / 1024
        );
        Ok(Forked::Parent(child))
    }
}
