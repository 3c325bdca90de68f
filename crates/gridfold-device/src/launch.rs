//! Launch configuration and per-group execution context

use std::fmt;

use crate::device::DeviceProperties;
use crate::error::{DeviceError, Result};

/// One-dimensional launch shape: `grid_size` worker groups of `group_size` lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaunchConfig {
    /// Number of worker groups
    pub grid_size: u32,

    /// Lanes per worker group
    pub group_size: u32,

    /// Group-local shared memory in bytes
    pub shared_bytes: usize,
}

impl LaunchConfig {
    pub const fn new(grid_size: u32, group_size: u32) -> Self {
        Self {
            grid_size,
            group_size,
            shared_bytes: 0,
        }
    }

    /// A single worker group.
    pub const fn single_group(group_size: u32) -> Self {
        Self::new(1, group_size)
    }

    pub const fn with_shared_bytes(mut self, shared_bytes: usize) -> Self {
        self.shared_bytes = shared_bytes;
        self
    }

    /// Total number of lanes across the grid
    pub const fn total_lanes(&self) -> u64 {
        self.grid_size as u64 * self.group_size as u64
    }

    /// Check the shape against what the device can run.
    pub fn validate(&self, properties: &DeviceProperties) -> Result<()> {
        if self.grid_size == 0 {
            return Err(DeviceError::invalid_launch("grid size must be at least 1"));
        }
        if self.group_size == 0 || self.group_size > properties.max_group_size {
            return Err(DeviceError::invalid_launch(format!(
                "group size {} outside 1..={}",
                self.group_size, properties.max_group_size
            )));
        }
        if self.shared_bytes > properties.shared_bytes_per_unit {
            return Err(DeviceError::invalid_launch(format!(
                "{} shared bytes exceed the per-unit limit of {}",
                self.shared_bytes, properties.shared_bytes_per_unit
            )));
        }
        Ok(())
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl fmt::Display for LaunchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grid={}, group={}", self.grid_size, self.group_size)?;
        if self.shared_bytes > 0 {
            write!(f, ", shared={}B", self.shared_bytes)?;
        }
        Ok(())
    }
}

/// What a worker group knows about itself while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupContext {
    pub group_idx: u32,
    pub grid_size: u32,
    pub group_size: u32,
}

impl GroupContext {
    pub const fn new(group_idx: u32, config: &LaunchConfig) -> Self {
        Self {
            group_idx,
            grid_size: config.grid_size,
            group_size: config.group_size,
        }
    }
}

/// A launch as recorded by a device that keeps a launch log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub kernel: &'static str,
    pub config: LaunchConfig,
    pub stream: u64,
}
