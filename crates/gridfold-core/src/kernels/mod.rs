//! Stage kernels launched by the dispatcher

mod combine;
mod partial;

pub use combine::CombineKernel;
pub use partial::{PartialMapping, PartialReduceKernel};

use std::ops::Range;

use crate::group_reduce::reduce_tile;
use crate::ops::{fold_opt, ReductionOp};
use crate::policy::DispatchConfig;
use crate::source::ItemSource;

/// Fold `range` of `source` tile by tile into `acc`, reusing `scratch` as
/// the group's tile buffer.
pub(crate) fn fold_range<T, S, Op>(
    source: &S,
    range: Range<usize>,
    config: &DispatchConfig,
    op: &Op,
    scratch: &mut Vec<T>,
    mut acc: Option<T>,
) -> gridfold_device::Result<Option<T>>
where
    T: Copy,
    S: ItemSource<T>,
    Op: ReductionOp<T>,
{
    let tile_size = config.tile_size().max(1);
    let mut start = range.start;
    while start < range.end {
        let end = start.saturating_add(tile_size).min(range.end);
        scratch.clear();
        source.read(start..end, scratch)?;
        acc = fold_opt(op, acc, reduce_tile(scratch, config, op));
        start = end;
    }
    Ok(acc)
}
