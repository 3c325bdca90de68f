//! # gridfold-core
//!
//! Device-wide reductions over a [`gridfold_device::Device`].
//!
//! A reduction folds `num_items` values with an associative operator into a
//! single value written to device memory. The dispatcher picks a tuned
//! configuration for the device generation, decides between a single-group
//! pass and a two-stage pass, sizes the grid from live occupancy, and carves
//! every temporary out of one caller-provided scratch buffer.
//!
//! ## Architecture
//!
//! ```text
//! policy::select ──► grid::plan ──► ScratchLayout::plan
//!                                        │
//!              Mode::QuerySize ◄─────────┤
//!                                        ▼
//!              Mode::Execute ──► bind ──► drain_reset? ─► partial_reduce ─► combine
//! ```
//!
//! ## Example
//!
//! ```
//! use gridfold_core::{Dispatcher, Mode};
//! use gridfold_device::{CpuDevice, Device, Stream};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let device = CpuDevice::new();
//! let stream = Stream::new()?;
//!
//! let data: Vec<u32> = (1..=100_000).map(|i| i % 7).collect();
//! let input = device.upload(&data)?.slice::<u32>(0, data.len())?;
//! let output = device.allocate(4)?.slice::<u32>(0, 1)?;
//!
//! let dispatcher = Dispatcher::new(&device);
//! let sized = dispatcher.sum(Mode::QuerySize, &input, &output, data.len(), &stream)?;
//! let scratch = device.allocate(sized.scratch_bytes())?;
//! dispatcher.sum(Mode::Execute(&scratch), &input, &output, data.len(), &stream)?;
//!
//! stream.synchronize()?;
//! assert_eq!(output.get(0)?, data.iter().sum::<u32>());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod drain;
pub mod error;
pub mod grid;
pub mod group_reduce;
pub mod instrumentation;
pub mod kernels;
pub mod ops;
pub mod policy;
pub mod scratch;
pub mod source;

pub use config::DispatchOptions;
pub use dispatch::{max, min, reduce, sum, Dispatch, Dispatcher, Mode, Submission};
pub use drain::{DrainDescriptor, DrainQueue};
pub use error::{ReduceError, Result, Stage};
pub use grid::{EvenShare, GridPlan, Occupancy, TileMapping, TwoStagePlan};
pub use instrumentation::{DispatchMetrics, DispatchPath};
pub use ops::{Element, FnOp, Max, Min, ReductionOp, Sum, Summable};
pub use policy::{DispatchConfig, GridMapping, GroupReduceStrategy, LoadHint, StagePolicies};
pub use scratch::{ScratchLayout, ScratchRegions, SCRATCH_ALIGNMENT};
pub use source::{ConstantSource, CountingSource, ItemSource};
