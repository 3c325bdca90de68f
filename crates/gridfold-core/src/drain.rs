//! Drain queue for dynamic tile mapping
//!
//! A descriptor in scratch memory holds the next unclaimed tile index and
//! the total tile count. The reset kernel runs as its own launch ahead of
//! the partial-reduction stage; worker groups then claim tiles until the
//! counter reaches the total. Each index in `0..total_tiles` is handed out
//! exactly once.

use std::mem::offset_of;

use bytemuck::{Pod, Zeroable};
use gridfold_device::{DeviceError, DeviceSlice, GroupContext, Kernel};

/// Scheduling state of one dynamic-mapping dispatch.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrainDescriptor {
    pub next_tile: u64,
    pub total_tiles: u64,
}

/// Handle to a [`DrainDescriptor`] in device memory.
#[derive(Debug, Clone)]
pub struct DrainQueue {
    slot: DeviceSlice<DrainDescriptor>,
}

impl DrainQueue {
    /// Wrap the first descriptor of `slot`.
    pub fn new(slot: DeviceSlice<DrainDescriptor>) -> gridfold_device::Result<Self> {
        if slot.is_empty() {
            return Err(DeviceError::InvalidAccess(
                "drain queue needs room for one descriptor".to_string(),
            ));
        }
        Ok(Self { slot })
    }

    /// Restart the queue at tile 0 of `total_tiles`.
    pub fn reset(&self, total_tiles: u64) -> gridfold_device::Result<()> {
        self.slot.set(
            0,
            DrainDescriptor {
                next_tile: 0,
                total_tiles,
            },
        )
    }

    /// Claim the next unclaimed tile, or `None` once every tile is taken.
    pub fn claim(&self) -> gridfold_device::Result<Option<u64>> {
        let base = self.slot.byte_offset(0)?;
        self.slot.buffer().fetch_increment_bounded(
            base + offset_of!(DrainDescriptor, next_tile),
            base + offset_of!(DrainDescriptor, total_tiles),
        )
    }

    pub fn descriptor(&self) -> gridfold_device::Result<DrainDescriptor> {
        self.slot.get(0)
    }

    /// Number of tiles handed out so far.
    pub fn claimed(&self) -> gridfold_device::Result<u64> {
        let descriptor = self.descriptor()?;
        Ok(descriptor.next_tile.min(descriptor.total_tiles))
    }
}

/// Single-lane launch that resets the drain queue.
pub struct DrainResetKernel {
    queue: DrainQueue,
    total_tiles: u64,
}

impl DrainResetKernel {
    pub const NAME: &'static str = "drain_reset";

    pub fn new(queue: DrainQueue, total_tiles: u64) -> Self {
        Self { queue, total_tiles }
    }
}

impl Kernel for DrainResetKernel {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run_group(&self, ctx: GroupContext) -> gridfold_device::Result<()> {
        if ctx.group_idx != 0 {
            return Ok(());
        }
        self.queue.reset(self.total_tiles)
    }
}
