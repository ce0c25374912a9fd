// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Iteration over the present pages of the caller's address space.

use nexus_abi::layout::{page_number, pdx, PT_ENTRIES, UTOP};
use nexus_abi::AddressSpaceView;

/// Page numbers below `UTOP` with a present mapping, in ascending order.
///
/// A directory entry that is not present skips its whole span without probing leaf entries.
pub struct PresentPages<'a, V: AddressSpaceView + ?Sized> {
    view: &'a V,
    pn: usize,
    end: usize,
}

impl<'a, V: AddressSpaceView + ?Sized> PresentPages<'a, V> {
    /// Walks the entire user range.
    pub fn new(view: &'a V) -> Self {
        Self::range(view, 0, page_number(UTOP))
    }

    /// Walks page numbers `start..end`.
    pub fn range(view: &'a V, start: usize, end: usize) -> Self {
        Self { view, pn: start, end }
    }
}

impl<V: AddressSpaceView + ?Sized> Iterator for PresentPages<'_, V> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.pn < self.end {
            let dir = pdx(self.pn);
            let dir_end = ((dir + 1) * PT_ENTRIES).min(self.end);
            if !self.view.pde(dir).is_present() {
                self.pn = dir_end;
                continue;
            }
            while self.pn < dir_end {
                let pn = self.pn;
                self.pn += 1;
                if self.view.pte(pn).is_present() {
                    return Some(pn);
                }
            }
        }
        None
    }
}
