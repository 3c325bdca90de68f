//! Intra-group tile reduction
//!
//! One worker group folds one tile. Items are first distributed across the
//! group's lanes, each lane folds its own items, and the lane partials are
//! then combined with the configured [`GroupReduceStrategy`]. Strategies and
//! arrangements only change the combination order, never which items are
//! folded.

use crate::ops::{fold_opt, ReductionOp};
use crate::policy::{DispatchConfig, GroupReduceStrategy, WARP_LANES};

/// Fold `items` (at most one tile) into one aggregate; `None` when empty.
pub fn reduce_tile<T: Copy, Op: ReductionOp<T>>(items: &[T], config: &DispatchConfig, op: &Op) -> Option<T> {
    if items.is_empty() {
        return None;
    }

    let lanes = config.group_size.max(1) as usize;
    let partials = if items.len() == config.tile_size() && config.vector_width > 1 {
        blocked_partials(items, lanes, config.items_per_member.max(1) as usize, op)
    } else {
        striped_partials(items, lanes, op)
    };

    match config.strategy {
        GroupReduceStrategy::WarpReductions => warp_reductions(partials, op),
        GroupReduceStrategy::Raking => raking(&partials, op),
        GroupReduceStrategy::RakingCommutativeOnly => raking_commutative_only(partials, op),
    }
}

/// Full tiles: lane `l` owns the contiguous run `l * ipm .. (l + 1) * ipm`.
fn blocked_partials<T: Copy, Op: ReductionOp<T>>(items: &[T], lanes: usize, ipm: usize, op: &Op) -> Vec<Option<T>> {
    let mut partials = Vec::with_capacity(lanes);
    partials.extend(items.chunks(ipm).map(|run| fold_slice(run, op)));
    partials.resize(lanes, None);
    partials
}

/// Partial tiles: lane `l` owns items `l, l + lanes, l + 2 * lanes, ...`.
fn striped_partials<T: Copy, Op: ReductionOp<T>>(items: &[T], lanes: usize, op: &Op) -> Vec<Option<T>> {
    let mut partials: Vec<Option<T>> = vec![None; lanes];
    for row in items.chunks(lanes) {
        for (lane, &item) in row.iter().enumerate() {
            partials[lane] = fold_opt(op, partials[lane], Some(item));
        }
    }
    partials
}

fn fold_slice<T: Copy, Op: ReductionOp<T>>(run: &[T], op: &Op) -> Option<T> {
    run.iter().copied().reduce(|a, b| op.combine(a, b))
}

/// Shuffle-down tree within each warp, then warp 0 folds the warp aggregates.
fn warp_reductions<T: Copy, Op: ReductionOp<T>>(partials: Vec<Option<T>>, op: &Op) -> Option<T> {
    let mut aggregate = None;
    for warp in partials.chunks(WARP_LANES as usize) {
        let mut lanes = warp.to_vec();
        let mut offset = lanes.len().next_power_of_two() / 2;
        while offset > 0 {
            for lane in 0..offset {
                if let Some(&peer) = lanes.get(lane + offset) {
                    lanes[lane] = fold_opt(op, lanes[lane], peer);
                }
            }
            offset /= 2;
        }
        aggregate = fold_opt(op, aggregate, lanes[0]);
    }
    aggregate
}

/// One warp rakes equal contiguous segments of the published partials.
fn raking<T: Copy, Op: ReductionOp<T>>(partials: &[Option<T>], op: &Op) -> Option<T> {
    let segment = partials.len().div_ceil(WARP_LANES as usize).max(1);
    partials
        .chunks(segment)
        .map(|seg| seg.iter().fold(None, |acc, &p| fold_opt(op, acc, p)))
        .fold(None, |acc, p| fold_opt(op, acc, p))
}

/// Lanes beyond the first warp fold straight into lane `l % WARP_LANES`,
/// then the first warp reduces as a tree.
fn raking_commutative_only<T: Copy, Op: ReductionOp<T>>(partials: Vec<Option<T>>, op: &Op) -> Option<T> {
    let warp = WARP_LANES as usize;
    if partials.len() <= warp {
        return warp_reductions(partials, op);
    }
    let mut first: Vec<Option<T>> = partials[..warp].to_vec();
    for (index, &partial) in partials[warp..].iter().enumerate() {
        let lane = index % warp;
        first[lane] = fold_opt(op, first[lane], partial);
    }
    warp_reductions(first, op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{Max, Min, Sum};
    use crate::policy::{GridMapping, LoadHint};

    const STRATEGIES: [GroupReduceStrategy; 3] = [
        GroupReduceStrategy::WarpReductions,
        GroupReduceStrategy::Raking,
        GroupReduceStrategy::RakingCommutativeOnly,
    ];

    fn config(group_size: u32, items_per_member: u32, vector_width: u32, strategy: GroupReduceStrategy) -> DispatchConfig {
        DispatchConfig {
            group_size,
            items_per_member,
            vector_width,
            strategy,
            load_hint: LoadHint::Default,
            mapping: GridMapping::EvenShare,
        }
    }

    #[test]
    fn empty_tiles_have_no_aggregate() {
        let cfg = config(64, 4, 1, GroupReduceStrategy::Raking);
        assert_eq!(reduce_tile::<u32, _>(&[], &cfg, &Sum), None);
    }

    #[test]
    fn every_strategy_folds_every_item() {
        for strategy in STRATEGIES {
            for vector_width in [1, 4] {
                let cfg = config(96, 4, vector_width, strategy);
                for n in [1usize, 2, 31, 32, 33, 95, 96, 97, 383, 384] {
                    let items: Vec<u64> = (1..=n as u64).collect();
                    let expected = n as u64 * (n as u64 + 1) / 2;
                    assert_eq!(
                        reduce_tile(&items, &cfg, &Sum),
                        Some(expected),
                        "strategy {strategy:?}, vector width {vector_width}, n {n}"
                    );
                }
            }
        }
    }

    #[test]
    fn min_and_max_find_extremes_in_any_lane() {
        let mut items: Vec<i32> = (0..500).map(|i| (i * 37) % 101 - 50).collect();
        items[333] = -1000;
        items[17] = 1000;
        for strategy in STRATEGIES {
            let cfg = config(128, 4, 1, strategy);
            assert_eq!(reduce_tile(&items, &cfg, &Min), Some(-1000));
            assert_eq!(reduce_tile(&items, &cfg, &Max), Some(1000));
        }
    }

    #[test]
    fn single_item_passes_through() {
        for strategy in STRATEGIES {
            let cfg = config(256, 20, 4, strategy);
            assert_eq!(reduce_tile(&[42.5f32], &cfg, &Sum), Some(42.5));
        }
    }

    #[test]
    fn groups_smaller_than_a_warp() {
        let cfg = config(5, 3, 2, GroupReduceStrategy::WarpReductions);
        let items: Vec<u32> = (0..15).collect();
        assert_eq!(reduce_tile(&items, &cfg, &Sum), Some(105));
    }
}
