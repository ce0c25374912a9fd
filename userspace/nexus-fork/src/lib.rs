// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: User-space process duplication over page-granular kernel grants
//! OWNERS: @runtime
//! PUBLIC API: Process::{attach, fork, sfork, resumed_as, this_env}, duppage(), dup_perm(),
//!             pgfault(), resolve_cow_fault(), set_pgfault_handler(), PresentPages
//! DEPENDS_ON: nexus_abi (syscall and address-space traits), log, thiserror
//! INVARIANTS: A frame shared by two environments is never writable in either unless it was
//!             shared on purpose by sfork; the exception stack is private to each environment;
//!             a child becomes runnable only after its whole address space is populated
//!
//! Usage, from the parent's point of view:
//!
//! ```ignore
//! let mut process = Process::attach(ctx);
//! match process.fork()? {
//!     Forked::Parent(child) => { /* child is runnable */ }
//!     Forked::Child => { /* running in the child; process.this_env() is updated */ }
//! }
//! ```

mod error;
pub mod fork;
pub mod pgfault;
pub mod policy;
pub mod sfork;
pub mod walk;

pub use error::{fatal, DupError, FaultError, ForkError};
pub use fork::Process;
pub use pgfault::{pgfault, resolve_cow_fault, set_pgfault_handler};
pub use policy::{dup_perm, duppage, DupPlan};
pub use sfork::share_page;
pub use walk::PresentPages;
