// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! One-shot fault injection switches, scoped to a kernel instance.

use core::sync::atomic::{AtomicBool, Ordering};

/// Each switch fires once on the next matching operation and then resets.
#[derive(Debug, Default)]
pub struct Failpoints {
    exofork: AtomicBool,
    frame_alloc: AtomicBool,
    page_map: AtomicBool,
}

impl Failpoints {
    /// Forces the next `exofork` to return `NoFreeEnv`.
    pub fn fail_next_exofork(&self) {
        self.exofork.store(true, Ordering::SeqCst);
    }

    /// Forces the next frame allocation to return `NoMem`.
    pub fn fail_next_frame_alloc(&self) {
        self.frame_alloc.store(true, Ordering::SeqCst);
    }

    /// Forces the next `page_map` to return `NoMem`.
    pub fn deny_next_map(&self) {
        self.page_map.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_exofork(&self) -> bool {
        self.exofork.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn take_frame_alloc(&self) -> bool {
        self.frame_alloc.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn take_page_map(&self) -> bool {
        self.page_map.swap(false, Ordering::SeqCst)
    }
}
