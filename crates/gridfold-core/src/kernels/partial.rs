//! First pass: one partial aggregate per worker group

use std::marker::PhantomData;

use gridfold_device::{DeviceError, DeviceSlice, GroupContext, Kernel};

use super::fold_range;
use crate::drain::DrainQueue;
use crate::grid::EvenShare;
use crate::ops::{Element, ReductionOp};
use crate::policy::DispatchConfig;
use crate::source::ItemSource;

/// Where a partial-reduction group finds its tiles.
#[derive(Debug, Clone)]
pub enum PartialMapping {
    /// The group's contiguous run from the even-share plan.
    EvenShare(EvenShare),
    /// Claim tiles from the drain queue until it is exhausted.
    Dynamic { queue: DrainQueue },
}

/// Reduces the group's tiles and writes one value to `partials[group]`.
///
/// Groups that receive no tiles write the operator's identity.
pub struct PartialReduceKernel<T, S, Op> {
    source: S,
    num_items: usize,
    partials: DeviceSlice<T>,
    config: DispatchConfig,
    mapping: PartialMapping,
    op: Op,
    _marker: PhantomData<fn() -> T>,
}

impl<T, S, Op> PartialReduceKernel<T, S, Op>
where
    T: Element,
    S: ItemSource<T>,
    Op: ReductionOp<T>,
{
    pub const NAME: &'static str = "partial_reduce";

    pub fn new(
        source: S,
        num_items: usize,
        partials: DeviceSlice<T>,
        config: DispatchConfig,
        mapping: PartialMapping,
        op: Op,
    ) -> Self {
        Self {
            source,
            num_items,
            partials,
            config,
            mapping,
            op,
            _marker: PhantomData,
        }
    }

    fn reduce_group(&self, group_idx: u32) -> gridfold_device::Result<T> {
        let tile_size = self.config.tile_size().max(1);
        let mut scratch = Vec::with_capacity(tile_size);
        let mut acc = None;

        match &self.mapping {
            PartialMapping::EvenShare(even) => {
                let range = even.group_range(group_idx);
                acc = fold_range(&self.source, range, &self.config, &self.op, &mut scratch, acc)?;
            }
            PartialMapping::Dynamic { queue } => {
                while let Some(tile) = queue.claim()? {
                    let start = (tile as usize).saturating_mul(tile_size).min(self.num_items);
                    let end = start.saturating_add(tile_size).min(self.num_items);
                    acc = fold_range(&self.source, start..end, &self.config, &self.op, &mut scratch, acc)?;
                }
            }
        }

        Ok(acc.unwrap_or_else(|| self.op.identity()))
    }
}

impl<T, S, Op> Kernel for PartialReduceKernel<T, S, Op>
where
    T: Element,
    S: ItemSource<T>,
    Op: ReductionOp<T>,
{
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run_group(&self, ctx: GroupContext) -> gridfold_device::Result<()> {
        let aggregate = self
            .reduce_group(ctx.group_idx)
            .map_err(|err| DeviceError::kernel_failed(Self::NAME, ctx.group_idx, err.to_string()))?;
        self.partials.set(ctx.group_idx as usize, aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drain::DrainDescriptor;
    use crate::ops::Sum;
    use crate::policy::{GridMapping, GroupReduceStrategy, LoadHint};
    use crate::source::CountingSource;
    use gridfold_device::{BufferHandle, DeviceBuffer, LaunchConfig};

    fn config(mapping: GridMapping) -> DispatchConfig {
        DispatchConfig {
            group_size: 32,
            items_per_member: 2,
            vector_width: 2,
            strategy: GroupReduceStrategy::WarpReductions,
            load_hint: LoadHint::Default,
            mapping,
        }
    }

    fn partials(len: usize) -> DeviceSlice<u64> {
        DeviceBuffer::zeroed(BufferHandle::new(1), len * 8)
            .slice(0, len)
            .unwrap()
    }

    #[test]
    fn even_share_groups_reduce_their_runs() {
        let num_items = 1000;
        let even = EvenShare::new(num_items, 64, 4);
        let out = partials(even.grid_size as usize);
        let kernel = PartialReduceKernel::new(
            CountingSource::new(0u64, num_items),
            num_items,
            out.clone(),
            config(GridMapping::EvenShare),
            PartialMapping::EvenShare(even),
            Sum,
        );

        let launch = LaunchConfig::new(even.grid_size, 32);
        for group in 0..even.grid_size {
            kernel.run_group(GroupContext::new(group, &launch)).unwrap();
        }

        let values = out.to_vec().unwrap();
        for (group, value) in values.iter().enumerate() {
            let range = even.group_range(group as u32);
            assert_eq!(*value, range.map(|i| i as u64).sum::<u64>());
        }
        assert_eq!(values.iter().sum::<u64>(), 999 * 1000 / 2);
    }

    #[test]
    fn dynamic_groups_drain_the_queue() {
        let num_items: usize = 1000;
        let scratch = DeviceBuffer::zeroed(BufferHandle::new(2), 16);
        let queue = DrainQueue::new(scratch.slice::<DrainDescriptor>(0, 1).unwrap()).unwrap();
        queue.reset(num_items.div_ceil(64) as u64).unwrap();

        let out = partials(3);
        let kernel = PartialReduceKernel::new(
            CountingSource::new(1u64, num_items),
            num_items,
            out.clone(),
            config(GridMapping::Dynamic),
            PartialMapping::Dynamic { queue: queue.clone() },
            Sum,
        );

        let launch = LaunchConfig::new(3, 32);
        // group 0 drains everything; the others find the queue empty
        for group in 0..3 {
            kernel.run_group(GroupContext::new(group, &launch)).unwrap();
        }

        assert_eq!(out.to_vec().unwrap(), vec![1000 * 1001 / 2, 0, 0]);
        assert_eq!(queue.claimed().unwrap(), 16);
    }

    #[test]
    fn source_failures_name_the_group() {
        let even = EvenShare::new(100, 64, 2);
        let kernel = PartialReduceKernel::new(
            CountingSource::new(0u64, 50),
            100,
            partials(2),
            config(GridMapping::EvenShare),
            PartialMapping::EvenShare(even),
            Sum,
        );
        let err = kernel
            .run_group(GroupContext::new(0, &LaunchConfig::new(2, 32)))
            .unwrap_err();
        assert!(matches!(err, DeviceError::KernelFailed { kernel: "partial_reduce", group: 0, .. }));
    }
}
