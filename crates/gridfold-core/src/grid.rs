//! Grid planning
//!
//! Decides between the single-stage path (one group runs the combine stage
//! over the raw input) and the two-stage path (a partial-reduction grid
//! followed by a combine over the partials), then sizes the grid and picks
//! how tiles map onto it.

use std::mem::size_of;
use std::ops::Range;

use crate::drain::DrainDescriptor;
use crate::policy::{DispatchConfig, GridMapping};

/// Live residency numbers for one kernel footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    pub groups_per_unit: u32,
    pub execution_units: u32,
}

impl Occupancy {
    /// Groups the whole device can hold at once.
    pub fn resident_groups(&self) -> u64 {
        self.groups_per_unit as u64 * self.execution_units as u64
    }
}

/// Static, order-preserving assignment of whole tiles to groups.
///
/// Every group owns `tiles_per_group` consecutive tiles except the last,
/// which owns the remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvenShare {
    pub num_items: usize,
    pub tile_size: usize,
    pub num_tiles: usize,
    pub tiles_per_group: usize,
    pub grid_size: u32,
}

impl EvenShare {
    /// Partition `num_items` for at most `max_groups` groups.
    pub fn new(num_items: usize, tile_size: usize, max_groups: u32) -> Self {
        let tile_size = tile_size.max(1);
        let num_tiles = num_items.div_ceil(tile_size);
        let target = (max_groups.max(1) as usize).min(num_tiles).max(1);
        let tiles_per_group = num_tiles.div_ceil(target).max(1);
        let grid_size = num_tiles.div_ceil(tiles_per_group).max(1);

        Self {
            num_items,
            tile_size,
            num_tiles,
            tiles_per_group,
            grid_size: grid_size.min(u32::MAX as usize) as u32,
        }
    }

    /// Items owned by `group`; empty for groups past the end.
    pub fn group_range(&self, group: u32) -> Range<usize> {
        let span = self.tiles_per_group.saturating_mul(self.tile_size);
        let start = (group as usize).saturating_mul(span).min(self.num_items);
        let end = start.saturating_add(span).min(self.num_items);
        start..end
    }
}

/// How the partial-reduction grid finds its tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileMapping {
    EvenShare(EvenShare),
    Dynamic { num_tiles: usize },
}

impl TileMapping {
    pub fn kind(&self) -> GridMapping {
        match self {
            TileMapping::EvenShare(_) => GridMapping::EvenShare,
            TileMapping::Dynamic { .. } => GridMapping::Dynamic,
        }
    }
}

/// Parameters of the two-stage path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwoStagePlan {
    pub config: DispatchConfig,
    pub tile_size: usize,
    pub num_tiles: usize,
    pub grid_size: u32,
    pub mapping: TileMapping,
    pub occupancy: Occupancy,
    pub oversubscription: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridPlan {
    SingleStage,
    TwoStage(TwoStagePlan),
}

impl GridPlan {
    pub fn is_single_stage(&self) -> bool {
        matches!(self, GridPlan::SingleStage)
    }

    /// Grid size of the partial-reduction stage, 0 on the single-stage path.
    pub fn grid_size(&self) -> u32 {
        match self {
            GridPlan::SingleStage => 0,
            GridPlan::TwoStage(plan) => plan.grid_size,
        }
    }

    /// Scratch extents in bytes: the partials array, then the drain-queue
    /// descriptor. The single-stage path needs none.
    pub fn scratch_extents<T>(&self) -> Vec<usize> {
        match self {
            GridPlan::SingleStage => Vec::new(),
            GridPlan::TwoStage(plan) => vec![
                plan.grid_size as usize * size_of::<T>(),
                size_of::<DrainDescriptor>(),
            ],
        }
    }
}

/// Whether `num_items` can skip the partial-reduction stage entirely.
pub fn fits_single_stage(num_items: usize, partial: Option<&DispatchConfig>) -> bool {
    match partial {
        None => true,
        Some(config) => num_items <= config.tile_size(),
    }
}

/// Plan the grid for `num_items`.
///
/// `oversubscription` defaults to the measured per-unit occupancy; zero is
/// treated as one.
pub fn plan(
    num_items: usize,
    partial: Option<&DispatchConfig>,
    occupancy: Occupancy,
    oversubscription: Option<u32>,
) -> GridPlan {
    let config = match partial {
        Some(config) if !fits_single_stage(num_items, partial) => *config,
        _ => return GridPlan::SingleStage,
    };

    let tile_size = config.tile_size();
    let num_tiles = num_items.div_ceil(tile_size);
    let oversubscription = oversubscription.unwrap_or(occupancy.groups_per_unit).max(1);
    let target = occupancy
        .resident_groups()
        .saturating_mul(oversubscription as u64)
        .clamp(1, u32::MAX as u64) as u32;

    let (grid_size, mapping) = match config.mapping {
        GridMapping::EvenShare => {
            let even = EvenShare::new(num_items, tile_size, target);
            (even.grid_size, TileMapping::EvenShare(even))
        }
        GridMapping::Dynamic => {
            let grid_size = (num_tiles as u64).min(target as u64) as u32;
            (grid_size, TileMapping::Dynamic { num_tiles })
        }
    };

    GridPlan::TwoStage(TwoStagePlan {
        config,
        tile_size,
        num_tiles,
        grid_size,
        mapping,
        occupancy,
        oversubscription,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{GroupReduceStrategy, LoadHint};
    use proptest::prelude::*;

    fn config(mapping: GridMapping) -> DispatchConfig {
        DispatchConfig {
            group_size: 128,
            items_per_member: 4,
            vector_width: 1,
            strategy: GroupReduceStrategy::WarpReductions,
            load_hint: LoadHint::Default,
            mapping,
        }
    }

    const OCC: Occupancy = Occupancy {
        groups_per_unit: 2,
        execution_units: 4,
    };

    #[test]
    fn small_inputs_take_the_single_stage_path() {
        let cfg = config(GridMapping::EvenShare);
        assert_eq!(plan(0, Some(&cfg), OCC, None), GridPlan::SingleStage);
        assert_eq!(plan(512, Some(&cfg), OCC, None), GridPlan::SingleStage);
        assert!(!plan(513, Some(&cfg), OCC, None).is_single_stage());
    }

    #[test]
    fn missing_partial_kernel_forces_single_stage() {
        assert_eq!(plan(10_000_000, None, OCC, None), GridPlan::SingleStage);
    }

    #[test]
    fn dynamic_grid_is_capped_by_target() {
        let cfg = config(GridMapping::Dynamic);
        // 8 resident groups * default oversubscription 2 = 16
        let GridPlan::TwoStage(p) = plan(100 * 512, Some(&cfg), OCC, None) else {
            panic!("expected two-stage plan");
        };
        assert_eq!(p.num_tiles, 100);
        assert_eq!(p.grid_size, 16);
        assert_eq!(p.oversubscription, 2);
        assert_eq!(p.mapping, TileMapping::Dynamic { num_tiles: 100 });

        let GridPlan::TwoStage(p) = plan(3 * 512, Some(&cfg), OCC, None) else {
            panic!("expected two-stage plan");
        };
        assert_eq!(p.grid_size, 3);
    }

    #[test]
    fn explicit_oversubscription_overrides_default() {
        let cfg = config(GridMapping::Dynamic);
        let GridPlan::TwoStage(p) = plan(100 * 512, Some(&cfg), OCC, Some(1)) else {
            panic!("expected two-stage plan");
        };
        assert_eq!(p.grid_size, 8);

        let GridPlan::TwoStage(p) = plan(100 * 512, Some(&cfg), OCC, Some(0)) else {
            panic!("expected two-stage plan");
        };
        assert_eq!(p.oversubscription, 1);
    }

    #[test]
    fn even_share_fills_target_without_exceeding_it() {
        let even = EvenShare::new(100 * 512 + 7, 512, 16);
        assert_eq!(even.num_tiles, 101);
        assert_eq!(even.tiles_per_group, 7);
        assert_eq!(even.grid_size, 15);
        assert_eq!(even.group_range(0), 0..7 * 512);
        assert_eq!(even.group_range(14), 14 * 7 * 512..100 * 512 + 7);
        assert!(even.group_range(15).is_empty());
    }

    #[test]
    fn scratch_extents_hold_partials_and_descriptor() {
        let cfg = config(GridMapping::EvenShare);
        let plan = plan(10 * 512, Some(&cfg), OCC, None);
        assert_eq!(plan.scratch_extents::<f64>(), vec![plan.grid_size() as usize * 8, 16]);
        assert!(GridPlan::SingleStage.scratch_extents::<f64>().is_empty());
    }

    proptest! {
        #[test]
        fn even_share_partitions_every_item_once(
            num_items in 1usize..200_000,
            tile_size in 1usize..4096,
            max_groups in 1u32..512,
        ) {
            let even = EvenShare::new(num_items, tile_size, max_groups);
            prop_assert!(even.grid_size <= max_groups);

            let mut expected_start = 0;
            let mut short_groups = 0;
            for group in 0..even.grid_size {
                let range = even.group_range(group);
                prop_assert_eq!(range.start, expected_start);
                prop_assert!(!range.is_empty());
                // whole tiles except possibly the last item-range
                prop_assert_eq!(range.start % tile_size, 0);
                if range.len() < even.tiles_per_group * tile_size {
                    short_groups += 1;
                }
                expected_start = range.end;
            }
            prop_assert_eq!(expected_start, num_items);
            prop_assert!(short_groups <= 1);
        }
    }
}
