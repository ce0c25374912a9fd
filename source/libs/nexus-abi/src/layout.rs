// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: User address-space layout shared by the kernel and userspace
//! OWNERS: @runtime
//! PUBLIC API: PAGE_SIZE, PT_ENTRIES, PT_SPAN, UTOP, UXSTACKTOP, USTACKTOP, UTEMP, PFTEMP, UTEXT,
//!             page_number(), page_va(), pdx(), round_down(), is_page_aligned()
//! INVARIANTS: Every address passed to a mapping syscall is page aligned and below UTOP
//!
//! ```text
//!    UTOP, UXSTACKTOP -> +------------------------------+
//!                        |  user exception stack (1 pg) |  RW, private per env
//!                        +------------------------------+
//!                        |  empty guard page            |
//!          USTACKTOP  -> +------------------------------+
//!                        |  normal user stack           |  RW
//!                        +------------------------------+
//!                        :                              :
//!              UTEXT  -> +------------------------------+
//!                        |  PFTEMP (last page of UTEMP) |  fault-handler scratch slot
//!              UTEMP  -> +------------------------------+
//!                        |  unmapped                    |
//!                  0  -> +------------------------------+
//! ```

/// Size of a page in bytes.
pub const PAGE_SIZE: usize = 4096;
/// Number of page-table entries covered by one directory entry.
pub const PT_ENTRIES: usize = 1024;
/// Bytes mapped by one directory entry.
pub const PT_SPAN: usize = PAGE_SIZE * PT_ENTRIES;

/// Top of the user-addressable range (exclusive).
pub const UTOP: usize = 0xEEC0_0000;
/// Top of the one-page user exception stack.
pub const UXSTACKTOP: usize = UTOP;
/// Top of the normal user stack; one guard page below the exception stack.
pub const USTACKTOP: usize = UTOP - 2 * PAGE_SIZE;

/// Start of the temporary mapping window.
pub const UTEMP: usize = PT_SPAN;
/// Scratch page the copy-on-write handler stages private copies in.
pub const PFTEMP: usize = UTEMP + PT_SPAN - PAGE_SIZE;
/// Conventional start of program text.
pub const UTEXT: usize = 2 * PT_SPAN;

/// Base address of the user exception stack page.
pub const UXSTACK_PAGE: usize = UXSTACKTOP - PAGE_SIZE;
/// Base address of the topmost page of the normal user stack.
pub const USTACK_PAGE: usize = USTACKTOP - PAGE_SIZE;

/// Returns the page number containing `va`.
#[inline]
pub const fn page_number(va: usize) -> usize {
    va / PAGE_SIZE
}

/// Returns the base address of page number `pn`.
#[inline]
pub const fn page_va(pn: usize) -> usize {
    pn * PAGE_SIZE
}

/// Returns the directory index covering page number `pn`.
#[inline]
pub const fn pdx(pn: usize) -> usize {
    pn / PT_ENTRIES
}

/// Rounds `va` down to its page boundary.
#[inline]
pub const fn round_down(va: usize) -> usize {
    va & !(PAGE_SIZE - 1)
}

/// Returns `true` when `va` sits on a page boundary.
#[inline]
pub const fn is_page_aligned(va: usize) -> bool {
    va % PAGE_SIZE == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stacks_do_not_overlap() {
        assert_eq!(UXSTACK_PAGE, UTOP - PAGE_SIZE);
        assert_eq!(USTACK_PAGE + PAGE_SIZE, USTACKTOP);
        assert!(USTACKTOP < UXSTACK_PAGE);
    }

    #[test]
    fn scratch_slot_sits_below_text() {
        assert!(is_page_aligned(PFTEMP));
        assert_eq!(PFTEMP + PAGE_SIZE, UTEXT);
        assert!(PFTEMP >= UTEMP);
    }

    #[test]
    fn page_math() {
        assert_eq!(round_down(0x1234_5678), 0x1234_5000);
        assert_eq!(page_va(page_number(0x1234_5678)), 0x1234_5000);
        assert_eq!(pdx(page_number(PT_SPAN)), 1);
        assert_eq!(pdx(page_number(PT_SPAN - 1)), 0);
    }
}
