// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Two-level user page table allocating second-level tables on demand.

extern crate alloc;

use alloc::{boxed::Box, collections::BTreeMap, vec::Vec};

use nexus_abi::layout::{is_page_aligned, page_number, page_va, pdx, PAGE_SIZE, PT_ENTRIES, UTOP};
use nexus_abi::PageFlags;

use super::{FrameId, MapError};

/// A leaf entry: which frame backs the page and with what permissions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pte {
    /// Backing frame.
    pub frame: FrameId,
    /// Permission and status bits.
    pub flags: PageFlags,
}

type Table = [Option<Pte>; PT_ENTRIES];

/// Page directory keyed by directory index; absent keys are non-present PDEs.
#[derive(Default)]
pub struct PageTable {
    dirs: BTreeMap<usize, Box<Table>>,
}

impl PageTable {
    /// Creates an empty page table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the entry mapped at `va`.
    pub fn lookup(&self, va: usize) -> Option<Pte> {
        if !is_page_aligned(va) || va >= UTOP {
            return None;
        }
        let pn = page_number(va);
        self.dirs.get(&pdx(pn)).and_then(|table| table[pn % PT_ENTRIES])
    }

    /// Mutable access to the entry mapped at `va`.
    pub fn lookup_mut(&mut self, va: usize) -> Option<&mut Pte> {
        if !is_page_aligned(va) || va >= UTOP {
            return None;
        }
        let pn = page_number(va);
        self.dirs.get_mut(&pdx(pn)).and_then(|table| table[pn % PT_ENTRIES].as_mut())
    }

    /// Installs `pte` at `va`, returning the entry it replaced.
    pub fn insert(&mut self, va: usize, pte: Pte) -> Result<Option<Pte>, MapError> {
        if !is_page_aligned(va) {
            return Err(MapError::Unaligned);
        }
        if va >= UTOP {
            return Err(MapError::OutOfRange);
        }
        if !pte.flags.contains(PageFlags::PRESENT) {
            return Err(MapError::InvalidFlags);
        }
        let pn = page_number(va);
        let table = self.dirs.entry(pdx(pn)).or_insert_with(|| Box::new([None; PT_ENTRIES]));
        Ok(table[pn % PT_ENTRIES].replace(pte))
    }

    /// Clears the entry at `va`; drops the second-level table once it is empty.
    pub fn remove(&mut self, va: usize) -> Option<Pte> {
        if !is_page_aligned(va) || va >= UTOP {
            return None;
        }
        let pn = page_number(va);
        let dir = pdx(pn);
        let table = self.dirs.get_mut(&dir)?;
        let old = table[pn % PT_ENTRIES].take();
        if table.iter().all(Option::is_none) {
            self.dirs.remove(&dir);
        }
        old
    }

    /// Directory entry flags: present when a second-level table backs `dir`.
    pub fn pde(&self, dir: usize) -> PageFlags {
        if self.dirs.contains_key(&dir) {
            PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER
        } else {
            PageFlags::empty()
        }
    }

    /// Leaf flags for page number `pn`; empty when unmapped or out of range.
    pub fn pte(&self, pn: usize) -> PageFlags {
        pn.checked_mul(PAGE_SIZE)
            .and_then(|va| self.lookup(va))
            .map_or(PageFlags::empty(), |pte| pte.flags)
    }

    /// Every mapping as `(va, pte)` in ascending address order.
    pub fn mapped_pages(&self) -> Vec<(usize, Pte)> {
        self.dirs
            .iter()
            .flat_map(|(dir, table)| {
                table.iter().enumerate().filter_map(move |(slot, pte)| {
                    pte.map(|pte| (page_va(dir * PT_ENTRIES + slot), pte))
                })
            })
            .collect()
    }

    /// Removes and returns every mapping.
    pub fn drain(&mut self) -> Vec<Pte> {
        let entries = self.mapped_pages().into_iter().map(|(_, pte)| pte).collect();
        self.dirs.clear();
        entries
    }
}
