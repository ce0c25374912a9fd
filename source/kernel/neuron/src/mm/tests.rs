// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Unit tests for user page table invariants
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; verify alignment, flags, range, replacement, directory bookkeeping

extern crate std;

use std::collections::BTreeMap;

use nexus_abi::layout::{page_number, PAGE_SIZE, PT_SPAN, UTOP};
use nexus_abi::{AbiError, PageFlags};
use proptest::prelude::*;

use super::{FrameId, MapError, PageTable, Pte};

fn pte(index: usize, flags: PageFlags) -> Pte {
    Pte { frame: FrameId::from_index(index), flags }
}

#[test]
fn rejects_unaligned_addresses() {
    let mut table = PageTable::new();
    assert_eq!(table.insert(1, pte(0, PageFlags::USER_RW)), Err(MapError::Unaligned));
}

#[test]
fn rejects_non_present_entries() {
    let mut table = PageTable::new();
    assert_eq!(table.insert(0, pte(0, PageFlags::USER)), Err(MapError::InvalidFlags));
}

#[test]
fn out_of_range_rejected() {
    let mut table = PageTable::new();
    assert_eq!(table.insert(UTOP, pte(0, PageFlags::USER_RW)), Err(MapError::OutOfRange));
    assert_eq!(table.lookup(UTOP), None);
}

#[test]
fn insert_replaces_and_reports_previous() {
    let mut table = PageTable::new();
    assert_eq!(table.insert(PAGE_SIZE, pte(1, PageFlags::USER_RW)), Ok(None));
    let old = table.insert(PAGE_SIZE, pte(2, PageFlags::USER_COW)).expect("replace");
    assert_eq!(old, Some(pte(1, PageFlags::USER_RW)));
    assert_eq!(table.pte(1), PageFlags::USER_COW);
}

#[test]
fn directory_entries_track_second_level_tables() {
    let mut table = PageTable::new();
    let va = 3 * PT_SPAN + 5 * PAGE_SIZE;
    assert!(table.pde(3).is_empty());
    table.insert(va, pte(0, PageFlags::USER_RO)).expect("map");
    assert!(table.pde(3).is_present());
    assert!(table.pde(2).is_empty());
    assert_eq!(table.remove(va), Some(pte(0, PageFlags::USER_RO)));
    assert!(table.pde(3).is_empty());
    assert_eq!(table.pte(page_number(va)), PageFlags::empty());
}

#[test]
fn out_of_range_page_numbers_read_as_unmapped() {
    let mut table = PageTable::new();
    table.insert(PAGE_SIZE, pte(1, PageFlags::USER_RW)).expect("map");
    assert_eq!(table.pte(usize::MAX), PageFlags::empty());
    assert_eq!(table.pte(page_number(UTOP)), PageFlags::empty());
    assert!(table.pde(usize::MAX).is_empty());
}

#[test]
fn drain_returns_everything_in_order() {
    let mut table = PageTable::new();
    table.insert(2 * PT_SPAN, pte(7, PageFlags::USER_RO)).expect("map");
    table.insert(PAGE_SIZE, pte(3, PageFlags::USER_RW)).expect("map");
    let pages: Vec<_> = table.mapped_pages().into_iter().map(|(va, _)| va).collect();
    assert_eq!(pages, vec![PAGE_SIZE, 2 * PT_SPAN]);
    assert_eq!(table.drain().len(), 2);
    assert!(table.pde(0).is_empty());
    assert!(table.pde(2).is_empty());
}

#[test]
fn map_errors_surface_as_abi_errors() {
    assert_eq!(AbiError::from(MapError::OutOfMemory), AbiError::NoMem);
    assert_eq!(AbiError::from(MapError::Unaligned), AbiError::Invalid);
    assert_eq!(AbiError::from(MapError::PermissionDenied), AbiError::Invalid);
}

#[derive(Clone, Debug)]
enum Op {
    Insert(usize, usize),
    Remove(usize),
}

fn op() -> impl Strategy<Value = Op> {
    // A handful of directories so tables are created and dropped repeatedly.
    let page = (0usize..4, 0usize..8).prop_map(|(dir, slot)| dir * PT_SPAN + slot * PAGE_SIZE);
    prop_oneof![
        (page.clone(), 0usize..64).prop_map(|(va, frame)| Op::Insert(va, frame)),
        page.prop_map(Op::Remove),
    ]
}

proptest! {
    #[test]
    fn behaves_like_a_map(ops in proptest::collection::vec(op(), 0..64)) {
        let mut table = PageTable::new();
        let mut model = BTreeMap::new();
        for op in ops {
            match op {
                Op::Insert(va, frame) => {
                    let entry = pte(frame, PageFlags::USER_RW);
                    prop_assert_eq!(table.insert(va, entry), Ok(model.insert(va, entry)));
                }
                Op::Remove(va) => prop_assert_eq!(table.remove(va), model.remove(&va)),
            }
        }
        let mapped: BTreeMap<_, _> = table.mapped_pages().into_iter().collect();
        prop_assert_eq!(mapped, model.clone());
        for dir in 0..4 {
            let live = model.keys().any(|va| va / PT_SPAN == dir);
            prop_assert_eq!(table.pde(dir).is_present(), live);
        }
    }
}
