//! Second pass: one group folds a whole source into the output

use std::marker::PhantomData;

use gridfold_device::{DeviceError, DeviceSlice, GroupContext, Kernel};

use super::fold_range;
use crate::ops::{Element, ReductionOp};
use crate::policy::DispatchConfig;
use crate::source::ItemSource;

/// Reduces the first `num_items` of `source` into `output[0]`.
///
/// The source is the raw input on the single-stage path and the partials
/// array on the two-stage path. Zero items produce the identity.
pub struct CombineKernel<T, S, Op> {
    source: S,
    num_items: usize,
    output: DeviceSlice<T>,
    config: DispatchConfig,
    op: Op,
    _marker: PhantomData<fn() -> T>,
}

impl<T, S, Op> CombineKernel<T, S, Op>
where
    T: Element,
    S: ItemSource<T>,
    Op: ReductionOp<T>,
{
    pub const NAME: &'static str = "combine";

    pub fn new(source: S, num_items: usize, output: DeviceSlice<T>, config: DispatchConfig, op: Op) -> Self {
        Self {
            source,
            num_items,
            output,
            config,
            op,
            _marker: PhantomData,
        }
    }
}

impl<T, S, Op> Kernel for CombineKernel<T, S, Op>
where
    T: Element,
    S: ItemSource<T>,
    Op: ReductionOp<T>,
{
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run_group(&self, ctx: GroupContext) -> gridfold_device::Result<()> {
        if ctx.group_idx != 0 {
            return Ok(());
        }

        let mut scratch = Vec::with_capacity(self.config.tile_size().min(self.num_items));
        let aggregate = fold_range(
            &self.source,
            0..self.num_items,
            &self.config,
            &self.op,
            &mut scratch,
            None,
        )
        .map_err(|err| DeviceError::kernel_failed(Self::NAME, ctx.group_idx, err.to_string()))?;

        self.output.set(0, aggregate.unwrap_or_else(|| self.op.identity()))
    }
}
