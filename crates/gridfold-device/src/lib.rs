//! # gridfold-device
//!
//! The accelerator port used by the gridfold reduction dispatcher.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Device trait                 │
//! │  - properties() / max_resident_groups()      │
//! │  - allocate() -> DeviceBuffer                │
//! │  - launch(stream, config, kernel)            │
//! │  - synchronize(stream)                       │
//! └──────────────────────┬───────────────────────┘
//!                        │
//!            ┌───────────┴───────────┐
//!            ▼                       ▼
//!      ┌───────────┐          ┌─────────────┐
//!      │ CpuDevice │          │ test fakes, │
//!      │  (rayon)  │          │ other ports │
//!      └───────────┘          └─────────────┘
//! ```
//!
//! Work is submitted to a [`Stream`], an ordered queue executed by its own
//! worker thread. Launches on one stream never overlap: every worker group
//! of a launch retires before the next launch on that stream starts.
//!
//! ```rust
//! use gridfold_device::{CpuDevice, Device, GroupContext, Kernel, LaunchConfig, Stream};
//! use std::sync::Arc;
//!
//! struct Fill(gridfold_device::DeviceSlice<u32>);
//!
//! impl Kernel for Fill {
//!     fn name(&self) -> &'static str {
//!         "fill"
//!     }
//!
//!     fn run_group(&self, ctx: GroupContext) -> gridfold_device::Result<()> {
//!         self.0.set(ctx.group_idx as usize, ctx.group_idx)
//!     }
//! }
//!
//! # fn main() -> gridfold_device::Result<()> {
//! let device = CpuDevice::new();
//! let stream = Stream::new()?;
//! let buffer = device.allocate(4 * 8)?;
//! let slots = buffer.slice::<u32>(0, 8)?;
//!
//! device.launch(&stream, LaunchConfig::new(8, 32), Arc::new(Fill(slots.clone())))?;
//! device.synchronize(&stream)?;
//!
//! assert_eq!(slots.to_vec()?, vec![0, 1, 2, 3, 4, 5, 6, 7]);
//! # Ok(())
//! # }
//! ```

pub mod cpu;
pub mod device;
pub mod error;
pub mod launch;
pub mod memory;
pub mod stream;

pub use cpu::CpuDevice;
pub use device::{Device, DeviceProperties, Kernel, KernelFootprint};
pub use error::{DeviceError, Result};
pub use launch::{GroupContext, LaunchConfig, LaunchRecord};
pub use memory::{BufferHandle, DeviceBuffer, DeviceSlice};
pub use stream::Stream;
