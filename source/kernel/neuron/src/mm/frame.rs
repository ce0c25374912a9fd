// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Reference-counted physical frame pool.

extern crate alloc;

use alloc::{boxed::Box, vec::Vec};
use core::fmt;

use nexus_abi::layout::PAGE_SIZE;

use super::MapError;

/// Identifies one physical frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(usize);

impl FrameId {
    #[cfg(test)]
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pp{}", self.0)
    }
}

struct Frame {
    data: Box<[u8; PAGE_SIZE]>,
    refs: usize,
}

/// Pool of page frames with a fixed budget.
///
/// A frame is live from `alloc` until its reference count drops back to zero; mappings hold
/// one reference each.
pub struct FrameAllocator {
    slots: Vec<Option<Frame>>,
    free: Vec<usize>,
    limit: usize,
    in_use: usize,
}

impl FrameAllocator {
    /// Creates a pool that hands out at most `limit` frames at a time.
    pub fn new(limit: usize) -> Self {
        Self { slots: Vec::new(), free: Vec::new(), limit, in_use: 0 }
    }

    /// Allocates a zeroed frame with no references.
    ///
    /// The caller must either map it or hand it back through [`Self::release_if_unused`].
    pub fn alloc(&mut self) -> Result<FrameId, MapError> {
        if self.in_use >= self.limit {
            return Err(MapError::OutOfMemory);
        }
        let frame = Frame { data: Box::new([0; PAGE_SIZE]), refs: 0 };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(frame);
                index
            }
            None => {
                self.slots.push(Some(frame));
                self.slots.len() - 1
            }
        };
        self.in_use += 1;
        Ok(FrameId(index))
    }

    /// Adds a mapping reference.
    pub fn incref(&mut self, id: FrameId) {
        if let Some(frame) = self.frame_mut(id) {
            frame.refs += 1;
        }
    }

    /// Drops a mapping reference, freeing the frame when none remain.
    pub fn decref(&mut self, id: FrameId) {
        let Some(frame) = self.frame_mut(id) else {
            return;
        };
        frame.refs = frame.refs.saturating_sub(1);
        if frame.refs == 0 {
            self.free_slot(id);
        }
    }

    /// Frees a frame that never received a mapping.
    pub fn release_if_unused(&mut self, id: FrameId) {
        if self.refs(id) == 0 && self.frame(id).is_some() {
            self.free_slot(id);
        }
    }

    /// Number of mappings referencing `id`.
    pub fn refs(&self, id: FrameId) -> usize {
        self.frame(id).map_or(0, |frame| frame.refs)
    }

    /// Frames currently allocated.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Mutable contents of a live frame.
    pub fn bytes_mut(&mut self, id: FrameId) -> Option<&mut [u8; PAGE_SIZE]> {
        self.frame_mut(id).map(|frame| &mut *frame.data)
    }

    fn frame(&self, id: FrameId) -> Option<&Frame> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    fn frame_mut(&mut self, id: FrameId) -> Option<&mut Frame> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    fn free_slot(&mut self, id: FrameId) {
        if let Some(slot) = self.slots.get_mut(id.0) {
            if slot.take().is_some() {
                self.free.push(id.0);
                self.in_use -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_enforced() {
        let mut frames = FrameAllocator::new(2);
        let a = frames.alloc().expect("first");
        let _b = frames.alloc().expect("second");
        assert_eq!(frames.alloc(), Err(MapError::OutOfMemory));
        frames.release_if_unused(a);
        assert_eq!(frames.in_use(), 1);
        frames.alloc().expect("slot reused");
    }

    #[test]
    fn last_reference_frees() {
        let mut frames = FrameAllocator::new(4);
        let id = frames.alloc().expect("alloc");
        frames.incref(id);
        frames.incref(id);
        frames.decref(id);
        assert_eq!(frames.refs(id), 1);
        assert!(frames.bytes_mut(id).is_some());
        frames.decref(id);
        assert_eq!(frames.in_use(), 0);
        assert!(frames.bytes_mut(id).is_none());
    }

    #[test]
    fn recycled_frames_are_zeroed() {
        let mut frames = FrameAllocator::new(1);
        let id = frames.alloc().expect("alloc");
        frames.incref(id);
        frames.bytes_mut(id).expect("live")[17] = 0xaa;
        frames.decref(id);
        let again = frames.alloc().expect("realloc");
        assert!(frames.bytes_mut(again).expect("live").iter().all(|b| *b == 0));
    }
}
