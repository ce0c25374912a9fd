// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Runtime limits chosen when a kernel instance is created.

use crate::env::MAX_ENV_SLOTS;

/// Default environment table size.
pub const DEFAULT_MAX_ENVS: usize = MAX_ENV_SLOTS;
/// Default frame budget (32 MiB of user memory).
pub const DEFAULT_MAX_FRAMES: usize = 8192;
/// Default number of upcalls delivered for one access before the environment is killed.
pub const DEFAULT_MAX_FAULT_DELIVERIES: usize = 4;

/// Kernel instance limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelConfig {
    /// Environment slots; clamped to the id encoding's capacity.
    pub max_envs: usize,
    /// Frames that may be live at once.
    pub max_frames: usize,
    /// Upcalls per faulting access before the kernel gives up.
    pub max_fault_deliveries: usize,
}

impl KernelConfig {
    /// Configuration with the default limits.
    pub const fn new() -> Self {
        Self {
            max_envs: DEFAULT_MAX_ENVS,
            max_frames: DEFAULT_MAX_FRAMES,
            max_fault_deliveries: DEFAULT_MAX_FAULT_DELIVERIES,
        }
    }

    /// Sets the environment table size.
    pub const fn with_max_envs(mut self, max_envs: usize) -> Self {
        self.max_envs = if max_envs > MAX_ENV_SLOTS { MAX_ENV_SLOTS } else { max_envs };
        self
    }

    /// Sets the frame budget.
    pub const fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Sets the per-access upcall limit.
    pub const fn with_max_fault_deliveries(mut self, deliveries: usize) -> Self {
        self.max_fault_deliveries = deliveries;
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_count_is_clamped() {
        let config = KernelConfig::new().with_max_envs(1 << 20);
        assert_eq!(config.max_envs, MAX_ENV_SLOTS);
        assert_eq!(KernelConfig::default().with_max_envs(3).max_envs, 3);
    }
}
