// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Duplication policy: how one parent page is propagated into a child.

use log::trace;
use nexus_abi::layout::page_va;
use nexus_abi::{Access, Context, EnvId, PageFlags};

use crate::DupError;

/// Permissions to install for one duplicated page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DupPlan {
    /// Permission of the child's new mapping.
    pub child: PageFlags,
    /// Permission the parent's own mapping is re-installed with, if it must change.
    pub parent: Option<PageFlags>,
}

/// Decides the plan for a page whose current flags are `flags`; `None` when not present.
///
/// Mutable pages (writable or already copy-on-write) become copy-on-write on both sides and
/// the parent is always re-mapped. Read-only pages are granted unchanged.
pub fn dup_perm(flags: PageFlags) -> Option<DupPlan> {
    match flags.access()? {
        Access::ReadOnly => Some(DupPlan { child: flags & PageFlags::SYSCALL, parent: None }),
        Access::Writable | Access::CopyOnWrite => {
            let cow = Access::CopyOnWrite.flags();
            Some(DupPlan { child: cow, parent: Some(cow) })
        }
    }
}

/// Shares page `pn` of the caller with `child` according to [`dup_perm`].
///
/// The child mapping is installed before the parent is downgraded; errors are returned so
/// the caller can decide how fatal they are.
pub fn duppage(ctx: &dyn Context, child: EnvId, pn: usize) -> Result<(), DupError> {
    let va = page_va(pn);
    let plan = dup_perm(ctx.pte(pn)).ok_or(DupError::NotPresent { va })?;
    ctx.page_map(EnvId::SELF, va, child, va, plan.child)
        .map_err(|err| DupError::MapChild { va, child, err })?;
    if let Some(perm) = plan.parent {
        ctx.page_map(EnvId::SELF, va, EnvId::SELF, va, perm)
            .map_err(|err| DupError::RemapParent { va, err })?;
    }
    trace!("nexus-fork: dup {:#x} -> {} {:?}", va, child, plan.child);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn writable_pages_become_cow_on_both_sides() {
        let plan = dup_perm(PageFlags::USER_RW | PageFlags::DIRTY).expect("present");
        assert_eq!(plan.child, PageFlags::USER_COW);
        assert_eq!(plan.parent, Some(PageFlags::USER_COW));
    }

    #[test]
    fn cow_pages_still_remap_the_parent() {
        let plan = dup_perm(PageFlags::USER_COW).expect("present");
        assert_eq!(plan.parent, Some(PageFlags::USER_COW));
    }

    #[test]
    fn read_only_pages_pass_through() {
        let plan = dup_perm(PageFlags::USER_RO | PageFlags::ACCESSED).expect("present");
        assert_eq!(plan, DupPlan { child: PageFlags::USER_RO, parent: None });
    }

    #[test]
    fn absent_pages_have_no_plan() {
        assert_eq!(dup_perm(PageFlags::empty()), None);
        assert_eq!(dup_perm(PageFlags::USER | PageFlags::WRITABLE), None);
    }

    fn present_flags() -> impl Strategy<Value = PageFlags> {
        any::<u32>().prop_map(|bits| PageFlags::from_bits_truncate(bits) | PageFlags::USER_RO)
    }

    proptest! {
        #[test]
        fn child_never_gets_writable(flags in present_flags()) {
            let plan = dup_perm(flags).expect("present");
            prop_assert!(!plan.child.contains(PageFlags::WRITABLE));
            prop_assert!(PageFlags::SYSCALL.contains(plan.child));
            prop_assert!(plan.child.contains(PageFlags::USER_RO));
        }

        #[test]
        fn mutable_iff_parent_is_downgraded(flags in present_flags()) {
            let plan = dup_perm(flags).expect("present");
            let mutable = flags.intersects(PageFlags::WRITABLE | PageFlags::COW);
            prop_assert_eq!(plan.parent.is_some(), mutable);
            prop_assert_eq!(plan.child.contains(PageFlags::COW), mutable);
            if let Some(parent) = plan.parent {
                prop_assert_eq!(parent, plan.child);
            }
        }
    }
}
