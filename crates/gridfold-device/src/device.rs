//! The device port
//!
//! Everything the dispatcher needs from an accelerator goes through
//! [`Device`]: capability and occupancy queries, allocation, and ordered
//! kernel submission. Tests inject deterministic occupancy numbers or
//! failures by implementing the trait over another device.

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;

use crate::error::Result;
use crate::launch::{GroupContext, LaunchConfig};
use crate::memory::DeviceBuffer;
use crate::stream::Stream;

/// Static capabilities of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    pub name: String,

    /// Hardware generation used to select tuning policies (e.g. 350, 600)
    pub generation: u32,

    /// Number of parallel execution units. Zero means no parallel work can
    /// be submitted at all.
    pub execution_units: u32,

    pub max_group_size: u32,

    /// Lanes that can be resident on one execution unit at once
    pub max_lanes_per_unit: u32,

    /// Hard cap on resident worker groups per execution unit
    pub max_groups_per_unit: u32,

    pub shared_bytes_per_unit: usize,

    /// Lanes scheduled together; group sizes are rounded up to this
    pub lane_width: u32,
}

impl fmt::Display for DeviceProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (gen {}, {} units, {} lanes/unit)",
            self.name, self.generation, self.execution_units, self.max_lanes_per_unit
        )
    }
}

/// Per-group resource usage of a kernel, used for occupancy queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelFootprint {
    pub group_size: u32,
    pub shared_bytes: usize,
}

impl KernelFootprint {
    pub const fn new(group_size: u32, shared_bytes: usize) -> Self {
        Self {
            group_size,
            shared_bytes,
        }
    }
}

/// A kernel: code executed once per worker group of a launch.
///
/// Groups of one launch run concurrently and in no particular order.
pub trait Kernel: Send + Sync {
    fn name(&self) -> &'static str;

    fn run_group(&self, ctx: GroupContext) -> Result<()>;
}

/// An accelerator the dispatcher can submit work to.
pub trait Device: Send + Sync {
    fn properties(&self) -> Result<DeviceProperties>;

    /// How many groups with this footprint can be resident on one execution
    /// unit at the same time.
    fn max_resident_groups(&self, footprint: KernelFootprint) -> Result<u32>;

    /// Allocate `bytes` of zeroed device memory.
    fn allocate(&self, bytes: usize) -> Result<DeviceBuffer>;

    /// Submit a kernel to `stream`. Returns once the launch is queued; the
    /// groups run later, after everything already queued on the stream.
    fn launch(&self, stream: &Stream, config: LaunchConfig, kernel: Arc<dyn Kernel>) -> Result<()>;

    /// Block until `stream` is drained and report the first execution error
    /// since the previous synchronization.
    fn synchronize(&self, stream: &Stream) -> Result<()> {
        stream.synchronize()
    }

    /// Allocate a buffer holding a copy of `data`.
    fn upload<T: Pod>(&self, data: &[T]) -> Result<DeviceBuffer>
    where
        Self: Sized,
    {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buffer = self.allocate(bytes.len())?;
        buffer.copy_from_host(0, bytes)?;
        Ok(buffer)
    }
}

impl<D: Device + ?Sized> Device for &D {
    fn properties(&self) -> Result<DeviceProperties> {
        (**self).properties()
    }

    fn max_resident_groups(&self, footprint: KernelFootprint) -> Result<u32> {
        (**self).max_resident_groups(footprint)
    }

    fn allocate(&self, bytes: usize) -> Result<DeviceBuffer> {
        (**self).allocate(bytes)
    }

    fn launch(&self, stream: &Stream, config: LaunchConfig, kernel: Arc<dyn Kernel>) -> Result<()> {
        (**self).launch(stream, config, kernel)
    }

    fn synchronize(&self, stream: &Stream) -> Result<()> {
        (**self).synchronize(stream)
    }
}

impl<D: Device + ?Sized> Device for Arc<D> {
    fn properties(&self) -> Result<DeviceProperties> {
        (**self).properties()
    }

    fn max_resident_groups(&self, footprint: KernelFootprint) -> Result<u32> {
        (**self).max_resident_groups(footprint)
    }

    fn allocate(&self, bytes: usize) -> Result<DeviceBuffer> {
        (**self).allocate(bytes)
    }

    fn launch(&self, stream: &Stream, config: LaunchConfig, kernel: Arc<dyn Kernel>) -> Result<()> {
        (**self).launch(stream, config, kernel)
    }

    fn synchronize(&self, stream: &Stream) -> Result<()> {
        (**self).synchronize(stream)
    }
}
