//! Reduction dispatch
//!
//! Every entry point follows the same two-call protocol:
//!
//! 1. Call with [`Mode::QuerySize`] to learn how many scratch bytes the
//!    reduction needs. Nothing is launched and the output is untouched.
//! 2. Allocate at least that many bytes and call again with
//!    [`Mode::Execute`]. The dispatcher plans the grid, slices the scratch
//!    buffer and submits the stages to the stream.
//!
//! ```text
//! QuerySize ──► Sized { scratch_bytes }
//!
//! Execute ──► plan ──┬─► SingleStage: combine(input)
//!                    └─► TwoStage:    [drain_reset] ─► partial_reduce ─► combine(partials)
//! ```
//!
//! Launches are asynchronous; ordering comes from the stream alone. In debug
//! mode the stream is drained before the first launch and every launch is
//! followed by a blocking synchronization, so execution failures surface from
//! the dispatch call that caused them.

use std::sync::Arc;
use std::time::Instant;

use gridfold_device::{Device, DeviceBuffer, DeviceSlice, Kernel, LaunchConfig, Stream};
use num_traits::Bounded;

use crate::config::DispatchOptions;
use crate::drain::{DrainDescriptor, DrainQueue, DrainResetKernel};
use crate::error::{ReduceError, Result, Stage};
use crate::grid::{self, GridPlan, Occupancy, TileMapping, TwoStagePlan};
use crate::instrumentation::DispatchMetrics;
use crate::kernels::{CombineKernel, PartialMapping, PartialReduceKernel};
use crate::ops::{Element, Max, Min, ReductionOp, Sum, Summable};
use crate::policy::{self, DispatchConfig, GridMapping};
use crate::scratch::{ScratchLayout, ScratchRegions};
use crate::source::ItemSource;

/// Scratch index of the partials array on the two-stage path.
const PARTIALS_REGION: usize = 0;
/// Scratch index of the drain-queue descriptor on the two-stage path.
const DRAIN_REGION: usize = 1;

/// What a dispatch call should do with its scratch argument.
#[derive(Debug, Clone, Copy)]
pub enum Mode<'a> {
    /// Report the scratch size only.
    QuerySize,
    /// Run the reduction using this scratch buffer.
    Execute(&'a DeviceBuffer),
}

/// Outcome of a successful dispatch call.
#[derive(Debug, Clone)]
pub enum Dispatch {
    Sized { scratch_bytes: usize },
    Submitted(Submission),
}

impl Dispatch {
    /// Scratch bytes required by this call configuration.
    pub fn scratch_bytes(&self) -> usize {
        match self {
            Dispatch::Sized { scratch_bytes } => *scratch_bytes,
            Dispatch::Submitted(submission) => submission.scratch_bytes,
        }
    }

    pub fn submission(&self) -> Option<&Submission> {
        match self {
            Dispatch::Sized { .. } => None,
            Dispatch::Submitted(submission) => Some(submission),
        }
    }
}

/// What was submitted to the stream.
#[derive(Debug, Clone)]
pub struct Submission {
    pub scratch_bytes: usize,
    pub plan: GridPlan,
    pub layout: ScratchLayout,
}

impl Submission {
    /// The drain queue inside `scratch`, when this submission used dynamic
    /// tile mapping.
    ///
    /// Only meaningful for the scratch buffer this submission ran with and
    /// after the stream has been synchronized.
    pub fn drain_queue(&self, scratch: &DeviceBuffer) -> Result<Option<DrainQueue>> {
        match &self.plan {
            GridPlan::TwoStage(two) if matches!(two.mapping, TileMapping::Dynamic { .. }) => {}
            _ => return Ok(None),
        }
        let regions = self.layout.bind(scratch)?;
        let slot = regions.region::<DrainDescriptor>(DRAIN_REGION)?;
        DrainQueue::new(slot).map(Some).map_err(ReduceError::Scratch)
    }
}

/// Plans and submits reductions on one device.
pub struct Dispatcher<'d> {
    device: &'d dyn Device,
    options: DispatchOptions,
}

impl<'d> Dispatcher<'d> {
    pub fn new(device: &'d dyn Device) -> Self {
        Self::with_options(device, DispatchOptions::default())
    }

    pub fn with_options(device: &'d dyn Device, options: DispatchOptions) -> Self {
        Self { device, options }
    }

    /// Reduce the first `num_items` of `input` with `op` into `output[0]`.
    #[tracing::instrument(
        level = "debug",
        skip(self, mode, input, output, op, stream),
        fields(op = op.name(), stream = stream.id(), query = matches!(mode, Mode::QuerySize))
    )]
    pub fn reduce<T, S, Op>(
        &self,
        mode: Mode<'_>,
        input: &S,
        output: &DeviceSlice<T>,
        num_items: usize,
        op: Op,
        stream: &Stream,
    ) -> Result<Dispatch>
    where
        T: Element,
        S: ItemSource<T>,
        Op: ReductionOp<T>,
    {
        let start = Instant::now();

        if input.len() < num_items {
            return Err(ReduceError::invalid_argument(format!(
                "input holds {} items, {} requested",
                input.len(),
                num_items
            )));
        }
        if output.is_empty() {
            return Err(ReduceError::invalid_argument("output must hold at least one element"));
        }

        let properties = self.device.properties().map_err(ReduceError::DeviceQuery)?;
        if properties.execution_units == 0 {
            return Err(ReduceError::UnsupportedEnvironment(format!(
                "{} has no execution units",
                properties.name
            )));
        }

        let policies = policy::select(properties.generation, std::mem::size_of::<T>());
        let partial = policies.partial.map(|config| match self.options.mapping_override {
            Some(mapping) => config.with_mapping(mapping),
            None => config,
        });

        let plan = match partial {
            Some(config) if !grid::fits_single_stage(num_items, Some(&config)) => {
                let groups_per_unit = self
                    .device
                    .max_resident_groups(config.footprint::<T>())
                    .map_err(ReduceError::DeviceQuery)?;
                let occupancy = Occupancy {
                    groups_per_unit,
                    execution_units: properties.execution_units,
                };
                grid::plan(num_items, Some(&config), occupancy, self.options.oversubscription)
            }
            _ => GridPlan::SingleStage,
        };

        let layout = ScratchLayout::plan(&plan.scratch_extents::<T>());
        let scratch_bytes = layout.total_bytes();

        let scratch = match mode {
            Mode::QuerySize => {
                DispatchMetrics::new(op.name(), num_items, start)
                    .with_scratch_bytes(scratch_bytes)
                    .log();
                return Ok(Dispatch::Sized { scratch_bytes });
            }
            Mode::Execute(scratch) => scratch,
        };
        let regions = layout.bind(scratch)?;

        if self.options.debug_synchronous {
            self.device.synchronize(stream).map_err(ReduceError::PendingFailure)?;
        }

        tracing::debug!(
            generation = properties.generation,
            num_items,
            plan = ?plan,
            scratch_bytes,
            "reduction_planned"
        );

        match &plan {
            GridPlan::SingleStage => {
                let kernel = CombineKernel::new(input.clone(), num_items, output.clone(), policies.combine, op);
                let launch = stage_launch::<T>(&policies.combine, 1);
                self.launch_stage(stream, Stage::Combine, launch, &policies.combine, None, Arc::new(kernel))?;
            }
            GridPlan::TwoStage(two) => {
                self.launch_two_stage(two, &regions, input, output, num_items, op, &policies.combine, stream)?;
            }
        }

        DispatchMetrics::new(op.name(), num_items, start)
            .with_plan(&plan, scratch_bytes)
            .log();

        Ok(Dispatch::Submitted(Submission {
            scratch_bytes,
            plan,
            layout,
        }))
    }

    /// [`Dispatcher::reduce`] with addition.
    pub fn sum<T, S>(
        &self,
        mode: Mode<'_>,
        input: &S,
        output: &DeviceSlice<T>,
        num_items: usize,
        stream: &Stream,
    ) -> Result<Dispatch>
    where
        T: Element + Summable,
        S: ItemSource<T>,
    {
        self.reduce(mode, input, output, num_items, Sum, stream)
    }

    /// [`Dispatcher::reduce`] with minimum.
    pub fn min<T, S>(
        &self,
        mode: Mode<'_>,
        input: &S,
        output: &DeviceSlice<T>,
        num_items: usize,
        stream: &Stream,
    ) -> Result<Dispatch>
    where
        T: Element + Bounded + PartialOrd,
        S: ItemSource<T>,
    {
        self.reduce(mode, input, output, num_items, Min, stream)
    }

    /// [`Dispatcher::reduce`] with maximum.
    pub fn max<T, S>(
        &self,
        mode: Mode<'_>,
        input: &S,
        output: &DeviceSlice<T>,
        num_items: usize,
        stream: &Stream,
    ) -> Result<Dispatch>
    where
        T: Element + Bounded + PartialOrd,
        S: ItemSource<T>,
    {
        self.reduce(mode, input, output, num_items, Max, stream)
    }

    #[allow(clippy::too_many_arguments)]
    fn launch_two_stage<T, S, Op>(
        &self,
        plan: &TwoStagePlan,
        regions: &ScratchRegions,
        input: &S,
        output: &DeviceSlice<T>,
        num_items: usize,
        op: Op,
        combine: &DispatchConfig,
        stream: &Stream,
    ) -> Result<()>
    where
        T: Element,
        S: ItemSource<T>,
        Op: ReductionOp<T>,
    {
        let partials = regions.region::<T>(PARTIALS_REGION)?;
        let queue = DrainQueue::new(regions.region::<DrainDescriptor>(DRAIN_REGION)?).map_err(ReduceError::Scratch)?;

        let mapping = match plan.mapping {
            TileMapping::EvenShare(even) => PartialMapping::EvenShare(even),
            TileMapping::Dynamic { num_tiles } => {
                let reset = DrainResetKernel::new(queue.clone(), num_tiles as u64);
                let reset_config = DispatchConfig {
                    group_size: 1,
                    items_per_member: 1,
                    ..*combine
                };
                self.launch_stage(
                    stream,
                    Stage::DrainReset,
                    LaunchConfig::single_group(1),
                    &reset_config,
                    None,
                    Arc::new(reset),
                )?;
                PartialMapping::Dynamic { queue }
            }
        };

        let partial = PartialReduceKernel::new(
            input.clone(),
            num_items,
            partials.clone(),
            plan.config,
            mapping,
            op,
        );
        self.launch_stage(
            stream,
            Stage::PartialReduce,
            stage_launch::<T>(&plan.config, plan.grid_size),
            &plan.config,
            Some(plan),
            Arc::new(partial),
        )?;

        let combine_kernel = CombineKernel::new(partials, plan.grid_size as usize, output.clone(), *combine, op);
        self.launch_stage(
            stream,
            Stage::Combine,
            stage_launch::<T>(combine, 1),
            combine,
            None,
            Arc::new(combine_kernel),
        )
    }

    /// Submit one stage; in debug mode log it and wait for it.
    fn launch_stage(
        &self,
        stream: &Stream,
        stage: Stage,
        launch: LaunchConfig,
        config: &DispatchConfig,
        plan: Option<&TwoStagePlan>,
        kernel: Arc<dyn Kernel>,
    ) -> Result<()> {
        if self.options.debug_synchronous {
            let mapping = plan.map(|p| p.mapping.kind());
            tracing::info!(
                stage = %stage,
                kernel = kernel.name(),
                grid_size = launch.grid_size,
                group_size = launch.group_size,
                items_per_member = config.items_per_member,
                tile_size = config.tile_size(),
                groups_per_unit = plan.map(|p| p.occupancy.groups_per_unit),
                oversubscription = plan.map(|p| p.oversubscription),
                mapping = mapping.map(GridMapping::as_str),
                stream = stream.id(),
                "launching stage"
            );
        }

        self.device
            .launch(stream, launch, kernel)
            .map_err(|err| ReduceError::from_launch(stage, err))?;

        if self.options.debug_synchronous {
            self.device
                .synchronize(stream)
                .map_err(|err| ReduceError::from_launch(stage, err))?;
        }
        Ok(())
    }
}

fn stage_launch<T>(config: &DispatchConfig, grid_size: u32) -> LaunchConfig {
    LaunchConfig::new(grid_size, config.group_size).with_shared_bytes(config.shared_bytes::<T>())
}

/// Reduce with an arbitrary operator. `debug_synchronous` blocks after each
/// stage and logs the chosen grid.
#[allow(clippy::too_many_arguments)]
pub fn reduce<T, S, Op>(
    device: &dyn Device,
    mode: Mode<'_>,
    input: &S,
    output: &DeviceSlice<T>,
    num_items: usize,
    op: Op,
    stream: &Stream,
    debug_synchronous: bool,
) -> Result<Dispatch>
where
    T: Element,
    S: ItemSource<T>,
    Op: ReductionOp<T>,
{
    let options = DispatchOptions::default().debug_synchronous(debug_synchronous);
    Dispatcher::with_options(device, options).reduce(mode, input, output, num_items, op, stream)
}

/// Sum the first `num_items` of `input` into `output[0]`.
pub fn sum<T, S>(
    device: &dyn Device,
    mode: Mode<'_>,
    input: &S,
    output: &DeviceSlice<T>,
    num_items: usize,
    stream: &Stream,
    debug_synchronous: bool,
) -> Result<Dispatch>
where
    T: Element + Summable,
    S: ItemSource<T>,
{
    reduce(device, mode, input, output, num_items, Sum, stream, debug_synchronous)
}

/// Minimum of the first `num_items` of `input`.
pub fn min<T, S>(
    device: &dyn Device,
    mode: Mode<'_>,
    input: &S,
    output: &DeviceSlice<T>,
    num_items: usize,
    stream: &Stream,
    debug_synchronous: bool,
) -> Result<Dispatch>
where
    T: Element + Bounded + PartialOrd,
    S: ItemSource<T>,
{
    reduce(device, mode, input, output, num_items, Min, stream, debug_synchronous)
}

/// Maximum of the first `num_items` of `input`.
pub fn max<T, S>(
    device: &dyn Device,
    mode: Mode<'_>,
    input: &S,
    output: &DeviceSlice<T>,
    num_items: usize,
    stream: &Stream,
    debug_synchronous: bool,
) -> Result<Dispatch>
where
    T: Element + Bounded + PartialOrd,
    S: ItemSource<T>,
{
    reduce(device, mode, input, output, num_items, Max, stream, debug_synchronous)
}
