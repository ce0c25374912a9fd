// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Copy-on-write page-fault handler and its installer
//! OWNERS: @runtime
//! PUBLIC API: pgfault(), resolve_cow_fault(), set_pgfault_handler()
//! DEPENDS_ON: nexus_abi::Context
//! INVARIANTS: Only a store to a copy-on-write page is resolved; anything else is fatal.
//!             The frame other environments still map is never written.

use log::trace;
use nexus_abi::layout::{page_number, round_down, PAGE_SIZE, PFTEMP, UXSTACK_PAGE};
use nexus_abi::{AbiError, Access, Context, EnvId, FaultUpcall, PageFlags, UTrapframe};

use crate::{fatal, FaultError};

// The handler runs on a one-page exception stack; copy through a small bounce buffer.
const COPY_CHUNK: usize = 256;

/// Installs `handler` as the caller's fault upcall.
///
/// Allocates the exception stack the first time, when the address-space view shows no page
/// there. Calling it again only replaces the registered handler. Failures are fatal.
pub fn set_pgfault_handler(ctx: &dyn Context, handler: FaultUpcall) {
    ensure_exception_stack(ctx);
    register_upcall(ctx, handler);
}

/// Maps the caller's exception stack unless it is already present.
pub(crate) fn ensure_exception_stack(ctx: &dyn Context) {
    if !ctx.pte(page_number(UXSTACK_PAGE)).is_present() {
        if let Err(err) = ctx.page_alloc(EnvId::SELF, UXSTACK_PAGE, PageFlags::USER_RW) {
            fatal("allocating exception stack", err);
        }
    }
}

pub(crate) fn register_upcall(ctx: &dyn Context, handler: FaultUpcall) {
    if let Err(err) = ctx.set_pgfault_upcall(EnvId::SELF, handler) {
        fatal("registering fault handler", err);
    }
}

/// Gives the faulting environment a private, writable copy of a copy-on-write page.
pub fn resolve_cow_fault(ctx: &dyn Context, utf: &UTrapframe) -> Result<(), FaultError> {
    let va = utf.fault_va;
    if !utf.is_write() {
        return Err(FaultError::NotWrite { va, err: utf.err });
    }
    let flags = ctx.pte(page_number(va));
    if flags.access() != Some(Access::CopyOnWrite) {
        return Err(FaultError::NotCopyOnWrite { va, flags });
    }

    let page = round_down(va);
    ctx.page_alloc(EnvId::SELF, PFTEMP, PageFlags::USER_RW).map_err(FaultError::Alloc)?;
    copy_page(ctx, page, PFTEMP).map_err(|err| FaultError::CopyPage { va: page, err })?;
    ctx.page_map(EnvId::SELF, PFTEMP, EnvId::SELF, page, PageFlags::USER_RW)
        .map_err(|err| FaultError::Remap { va: page, err })?;
    ctx.page_unmap(EnvId::SELF, PFTEMP).map_err(FaultError::Unmap)?;
    trace!("nexus-fork: private copy of {:#x} in {}", page, ctx.getenvid());
    Ok(())
}

/// Fault upcall registered by `fork`: resolves copy-on-write faults, aborts on anything else.
pub fn pgfault(ctx: &dyn Context, utf: &UTrapframe) {
    if let Err(err) = resolve_cow_fault(ctx, utf) {
        fatal("copy-on-write fault", err);
    }
}

fn copy_page(ctx: &dyn Context, from: usize, to: usize) -> Result<(), AbiError> {
    let mut buf = [0u8; COPY_CHUNK];
    for offset in (0..PAGE_SIZE).step_by(COPY_CHUNK) {
        ctx.load(from + offset, &mut buf)?;
        ctx.store(to + offset, &buf)?;
    }
    Ok(())
}
