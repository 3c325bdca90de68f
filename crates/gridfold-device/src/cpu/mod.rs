//! CPU device
//!
//! Reference implementation of [`Device`]. Each launch becomes one job on
//! the target stream; the job runs every worker group of the grid on the
//! global rayon pool and retires only when all of them have finished.
//!
//! ```text
//! CpuDevice
//! ├── DeviceProperties - configurable generation / units / limits
//! ├── occupancy        - lane, group and shared-memory residency model
//! ├── launch log       - every accepted launch, in submission order
//! └── rayon            - worker groups of one launch run in parallel
//! ```

pub mod occupancy;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gridfold_tracing::perf_span;
use gridfold_tracing::performance::record_launch;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::device::{Device, DeviceProperties, Kernel, KernelFootprint};
use crate::error::{DeviceError, Result};
use crate::launch::{GroupContext, LaunchConfig, LaunchRecord};
use crate::memory::{BufferHandle, DeviceBuffer};
use crate::stream::Stream;

/// Largest single allocation the CPU device accepts.
const MAX_ALLOCATION: usize = 1 << 40;

/// Device that executes kernels on the host's rayon pool.
#[derive(Clone)]
pub struct CpuDevice {
    properties: DeviceProperties,
    launch_log: Arc<Mutex<Vec<LaunchRecord>>>,
    next_buffer_id: Arc<AtomicU64>,
}

impl CpuDevice {
    /// A device with one execution unit per rayon worker thread.
    pub fn new() -> Self {
        Self::with_properties(DeviceProperties {
            name: "cpu".to_string(),
            generation: 350,
            execution_units: rayon::current_num_threads() as u32,
            max_group_size: 1024,
            max_lanes_per_unit: 2048,
            max_groups_per_unit: 16,
            shared_bytes_per_unit: 48 * 1024,
            lane_width: 32,
        })
    }

    pub fn with_properties(properties: DeviceProperties) -> Self {
        Self {
            properties,
            launch_log: Arc::new(Mutex::new(Vec::new())),
            next_buffer_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_generation(mut self, generation: u32) -> Self {
        self.properties.generation = generation;
        self
    }

    pub fn with_execution_units(mut self, units: u32) -> Self {
        self.properties.execution_units = units;
        self
    }

    pub fn with_max_groups_per_unit(mut self, groups: u32) -> Self {
        self.properties.max_groups_per_unit = groups;
        self
    }

    pub fn with_max_lanes_per_unit(mut self, lanes: u32) -> Self {
        self.properties.max_lanes_per_unit = lanes;
        self
    }

    pub fn with_shared_bytes_per_unit(mut self, bytes: usize) -> Self {
        self.properties.shared_bytes_per_unit = bytes;
        self
    }

    /// Every launch accepted so far, oldest first.
    pub fn launch_log(&self) -> Vec<LaunchRecord> {
        self.launch_log.lock().clone()
    }

    /// Kernel names of every launch accepted so far.
    pub fn launched_kernels(&self) -> Vec<&'static str> {
        self.launch_log.lock().iter().map(|record| record.kernel).collect()
    }

    pub fn launch_count(&self) -> usize {
        self.launch_log.lock().len()
    }

    pub fn clear_launch_log(&self) {
        self.launch_log.lock().clear();
    }
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for CpuDevice {
    fn properties(&self) -> Result<DeviceProperties> {
        Ok(self.properties.clone())
    }

    fn max_resident_groups(&self, footprint: KernelFootprint) -> Result<u32> {
        occupancy::resident_groups_per_unit(&self.properties, footprint)
    }

    fn allocate(&self, bytes: usize) -> Result<DeviceBuffer> {
        if bytes > MAX_ALLOCATION {
            return Err(DeviceError::OutOfMemory { requested: bytes });
        }
        let handle = BufferHandle::new(self.next_buffer_id.fetch_add(1, Ordering::Relaxed));
        tracing::trace!(buffer = %handle, bytes, "buffer_allocated");
        Ok(DeviceBuffer::zeroed(handle, bytes))
    }

    #[tracing::instrument(level = "debug", skip(self, stream, config, kernel), fields(kernel = kernel.name(), stream = stream.id(), config = %config))]
    fn launch(&self, stream: &Stream, config: LaunchConfig, kernel: Arc<dyn Kernel>) -> Result<()> {
        if self.properties.execution_units == 0 {
            return Err(DeviceError::unsupported("device reports no execution units"));
        }
        config.validate(&self.properties)?;

        self.launch_log.lock().push(LaunchRecord {
            kernel: kernel.name(),
            config,
            stream: stream.id(),
        });

        stream.submit(kernel.name(), move || execute_grid(config, kernel.as_ref()))
    }
}

/// Run every group of one launch; the first failing group fails the launch.
fn execute_grid(config: LaunchConfig, kernel: &dyn Kernel) -> Result<()> {
    let timer = perf_span!(
        kernel.name(),
        grid_size = config.grid_size,
        group_size = config.group_size
    );

    (0..config.grid_size)
        .into_par_iter()
        .try_for_each(|group_idx| kernel.run_group(GroupContext::new(group_idx, &config)))?;

    record_launch(
        kernel.name(),
        config.grid_size,
        config.group_size,
        timer.elapsed_us(),
    );
    Ok(())
}
