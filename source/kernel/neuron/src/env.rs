// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Environment records and the generation-checked environment table
//! OWNERS: @kernel-team
//! PUBLIC API: Env, EnvTable, MAX_ENV_SLOTS
//! DEPENDS_ON: mm::PageTable, nexus_abi::{EnvId, EnvStatus, Forked, FaultUpcall}
//! INVARIANTS: A live id never has raw value 0; a recycled slot never answers to an old id;
//!             only the caller or its direct child passes a checked lookup

extern crate alloc;

use alloc::vec::Vec;

use nexus_abi::{AbiError, EnvId, EnvStatus, FaultUpcall, Forked};

use crate::mm::PageTable;

const INDEX_BITS: u32 = 10;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const MAX_GENERATION: u32 = u32::MAX >> INDEX_BITS;

/// Upper bound on simultaneously live environments.
pub const MAX_ENV_SLOTS: usize = 1 << INDEX_BITS;

/// Kernel-side state of one environment.
pub struct Env {
    /// Current identifier.
    pub id: EnvId,
    /// Creator, if any.
    pub parent: Option<EnvId>,
    /// Scheduling state.
    pub status: EnvStatus,
    /// User page table.
    pub pgdir: PageTable,
    /// Registered fault upcall.
    pub upcall: Option<FaultUpcall>,
    /// Result the environment's next `exofork` returns instead of creating a child.
    pub pending: Option<Forked>,
    /// Translation-cache invalidations performed on this address space.
    pub tlb_invalidations: u64,
}

impl Env {
    fn new(id: EnvId, parent: Option<EnvId>) -> Self {
        Self {
            id,
            parent,
            status: EnvStatus::NotRunnable,
            pgdir: PageTable::new(),
            upcall: None,
            pending: None,
            tlb_invalidations: 0,
        }
    }
}

#[derive(Default)]
struct Slot {
    generation: u32,
    env: Option<Env>,
}

/// Fixed-capacity table of environments.
pub struct EnvTable {
    slots: Vec<Slot>,
    capacity: usize,
}

impl EnvTable {
    /// Creates a table holding at most `capacity` environments.
    pub fn new(capacity: usize) -> Self {
        Self { slots: Vec::new(), capacity: capacity.min(MAX_ENV_SLOTS) }
    }

    /// Allocates a not-runnable environment with an empty address space.
    pub fn alloc(&mut self, parent: Option<EnvId>) -> Result<EnvId, AbiError> {
        let index = match self.slots.iter().position(|slot| slot.env.is_none()) {
            Some(index) => index,
            None if self.slots.len() < self.capacity => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
            None => return Err(AbiError::NoFreeEnv),
        };
        let slot = &mut self.slots[index];
        slot.generation = if slot.generation >= MAX_GENERATION { 1 } else { slot.generation + 1 };
        let id = EnvId::from_raw((slot.generation << INDEX_BITS) | index as u32);
        slot.env = Some(Env::new(id, parent));
        Ok(id)
    }

    /// Returns the live environment named by `id`.
    pub fn get(&self, id: EnvId) -> Option<&Env> {
        let slot = self.slots.get((id.raw() & INDEX_MASK) as usize)?;
        slot.env.as_ref().filter(|env| env.id == id)
    }

    /// Mutable variant of [`Self::get`].
    pub fn get_mut(&mut self, id: EnvId) -> Option<&mut Env> {
        let slot = self.slots.get_mut((id.raw() & INDEX_MASK) as usize)?;
        slot.env.as_mut().filter(|env| env.id == id)
    }

    /// Resolves `id` on behalf of `caller`.
    ///
    /// `EnvId::SELF` names the caller. Any other id must be the caller itself or one of its
    /// direct children.
    pub fn resolve(&self, caller: EnvId, id: EnvId) -> Result<EnvId, AbiError> {
        if id.is_self() {
            return self.get(caller).map(|env| env.id).ok_or(AbiError::BadEnv);
        }
        let env = self.get(id).ok_or(AbiError::BadEnv)?;
        if env.id != caller && env.parent != Some(caller) {
            return Err(AbiError::BadEnv);
        }
        Ok(env.id)
    }

    /// Frees the slot of `id`, returning its record.
    pub fn remove(&mut self, id: EnvId) -> Option<Env> {
        let slot = self.slots.get_mut((id.raw() & INDEX_MASK) as usize)?;
        if slot.env.as_ref().is_some_and(|env| env.id == id) {
            slot.env.take()
        } else {
            None
        }
    }

    /// Number of live environments.
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|slot| slot.env.is_some()).count()
    }
}
