//! Tuning policies per hardware generation
//!
//! A versioned lookup table: families ordered by `min_generation`, each with
//! a policy for wide elements (4 bytes or more) and one for narrow elements.
//! Selection picks the last family whose `min_generation` does not exceed
//! the live generation. Generations older than every family fall back to the
//! oldest one, and newer generations use the newest known family.

use std::fmt;
use std::mem::size_of;
use std::str::FromStr;

use gridfold_device::KernelFootprint;

/// Lanes that exchange partials without shared memory.
pub const WARP_LANES: u32 = 32;

/// How a worker group combines the partials held by its lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupReduceStrategy {
    /// Tree reduction inside each warp, then across warp aggregates.
    WarpReductions,
    /// Lanes publish partials; one warp rakes contiguous segments.
    Raking,
    /// Raking that folds lanes into the first warp out of order.
    RakingCommutativeOnly,
}

/// Cache hint for input loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadHint {
    Default,
    ReadOnly,
}

/// How tiles are assigned to worker groups in the partial-reduction stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridMapping {
    /// Static contiguous runs of whole tiles, computed before launch.
    EvenShare,
    /// Groups claim tiles at run time from the drain queue.
    Dynamic,
}

impl GridMapping {
    pub const fn as_str(self) -> &'static str {
        match self {
            GridMapping::EvenShare => "even-share",
            GridMapping::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for GridMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GridMapping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "even-share" | "evenshare" | "static" => Ok(GridMapping::EvenShare),
            "dynamic" | "drain" => Ok(GridMapping::Dynamic),
            other => Err(format!("unknown grid mapping '{other}'")),
        }
    }
}

/// Launch shape and strategy of one stage kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchConfig {
    pub group_size: u32,
    pub items_per_member: u32,
    pub vector_width: u32,
    pub strategy: GroupReduceStrategy,
    pub load_hint: LoadHint,
    pub mapping: GridMapping,
}

impl DispatchConfig {
    /// Items processed by one group per tile.
    pub const fn tile_size(&self) -> usize {
        self.group_size as usize * self.items_per_member as usize
    }

    /// Group-local memory the strategy needs for elements of type `T`.
    pub fn shared_bytes<T>(&self) -> usize {
        let slots = match self.strategy {
            GroupReduceStrategy::WarpReductions => self.group_size.div_ceil(WARP_LANES),
            GroupReduceStrategy::Raking | GroupReduceStrategy::RakingCommutativeOnly => self.group_size,
        };
        slots as usize * size_of::<T>()
    }

    pub fn footprint<T>(&self) -> KernelFootprint {
        KernelFootprint::new(self.group_size, self.shared_bytes::<T>())
    }

    pub const fn with_mapping(mut self, mapping: GridMapping) -> Self {
        self.mapping = mapping;
        self
    }
}

impl fmt::Display for DispatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} (vec {}, {:?}, {:?}, {})",
            self.group_size, self.items_per_member, self.vector_width, self.strategy, self.load_hint, self.mapping
        )
    }
}

/// Configurations for both stages. `partial` is `None` on hardware that
/// only runs the single-stage path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePolicies {
    pub partial: Option<DispatchConfig>,
    pub combine: DispatchConfig,
}

/// One row of the tuning table.
#[derive(Debug, Clone, Copy)]
pub struct PolicyFamily {
    pub min_generation: u32,
    pub wide: StagePolicies,
    pub narrow: StagePolicies,
}

const fn config(
    group_size: u32,
    items_per_member: u32,
    vector_width: u32,
    strategy: GroupReduceStrategy,
    load_hint: LoadHint,
    mapping: GridMapping,
) -> DispatchConfig {
    DispatchConfig {
        group_size,
        items_per_member,
        vector_width,
        strategy,
        load_hint,
        mapping,
    }
}

use GridMapping::{Dynamic, EvenShare};
use GroupReduceStrategy::{Raking, RakingCommutativeOnly, WarpReductions};
use LoadHint::ReadOnly;

static POLICY_TABLE: [PolicyFamily; 5] = [
    PolicyFamily {
        min_generation: 100,
        wide: StagePolicies {
            partial: None,
            combine: config(128, 4, 1, Raking, LoadHint::Default, EvenShare),
        },
        narrow: StagePolicies {
            partial: None,
            combine: config(128, 8, 1, Raking, LoadHint::Default, EvenShare),
        },
    },
    PolicyFamily {
        min_generation: 200,
        wide: StagePolicies {
            partial: Some(config(128, 8, 1, Raking, LoadHint::Default, EvenShare)),
            combine: config(128, 4, 1, Raking, LoadHint::Default, EvenShare),
        },
        narrow: StagePolicies {
            partial: Some(config(128, 16, 1, Raking, LoadHint::Default, EvenShare)),
            combine: config(128, 8, 1, Raking, LoadHint::Default, EvenShare),
        },
    },
    PolicyFamily {
        min_generation: 300,
        wide: StagePolicies {
            partial: Some(config(256, 8, 2, WarpReductions, LoadHint::Default, EvenShare)),
            combine: config(256, 8, 2, WarpReductions, LoadHint::Default, EvenShare),
        },
        narrow: StagePolicies {
            partial: Some(config(256, 16, 4, RakingCommutativeOnly, LoadHint::Default, EvenShare)),
            combine: config(256, 16, 4, WarpReductions, LoadHint::Default, EvenShare),
        },
    },
    PolicyFamily {
        min_generation: 350,
        wide: StagePolicies {
            partial: Some(config(256, 20, 4, WarpReductions, ReadOnly, Dynamic)),
            combine: config(256, 20, 4, WarpReductions, ReadOnly, EvenShare),
        },
        narrow: StagePolicies {
            partial: Some(config(256, 40, 4, RakingCommutativeOnly, ReadOnly, Dynamic)),
            combine: config(256, 20, 4, WarpReductions, ReadOnly, EvenShare),
        },
    },
    PolicyFamily {
        min_generation: 600,
        wide: StagePolicies {
            partial: Some(config(256, 16, 4, WarpReductions, ReadOnly, EvenShare)),
            combine: config(256, 16, 4, WarpReductions, ReadOnly, EvenShare),
        },
        narrow: StagePolicies {
            partial: Some(config(256, 32, 4, WarpReductions, ReadOnly, EvenShare)),
            combine: config(256, 16, 4, WarpReductions, ReadOnly, EvenShare),
        },
    },
];

/// The full tuning table, oldest family first.
pub fn policy_table() -> &'static [PolicyFamily] {
    &POLICY_TABLE
}

/// Policies for both stages on `generation` hardware with elements of
/// `element_size` bytes. Never fails.
pub fn select(generation: u32, element_size: usize) -> StagePolicies {
    let family = POLICY_TABLE
        .iter()
        .rev()
        .find(|family| family.min_generation <= generation)
        .unwrap_or(&POLICY_TABLE[0]);

    if element_size < 4 {
        family.narrow
    } else {
        family.wide
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted_by_generation() {
        let generations: Vec<u32> = policy_table().iter().map(|f| f.min_generation).collect();
        let mut sorted = generations.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(generations, sorted);
    }

    #[test]
    fn exact_generations_select_their_family() {
        for family in policy_table() {
            assert_eq!(select(family.min_generation, 4), family.wide);
            assert_eq!(select(family.min_generation, 2), family.narrow);
        }
    }

    #[test]
    fn in_between_generations_use_the_older_family() {
        assert_eq!(select(520, 8), select(350, 8));
        assert_eq!(select(299, 4), select(200, 4));
    }

    #[test]
    fn unknown_generations_fall_back() {
        // newer than everything: highest family
        assert_eq!(select(10_000, 4), select(600, 4));
        // older than everything: oldest family
        assert_eq!(select(10, 4), select(100, 4));
        assert!(select(0, 4).partial.is_none());
    }

    #[test]
    fn narrow_elements_get_larger_tiles() {
        let wide = select(350, 4).partial.unwrap();
        let narrow = select(350, 1).partial.unwrap();
        assert!(narrow.tile_size() > wide.tile_size());
        assert_eq!(wide.tile_size(), 5120);
    }

    #[test]
    fn shared_bytes_follow_strategy() {
        let warp = config(256, 4, 1, WarpReductions, LoadHint::Default, EvenShare);
        let raking = config(256, 4, 1, Raking, LoadHint::Default, EvenShare);
        assert_eq!(warp.shared_bytes::<f64>(), 8 * 8);
        assert_eq!(raking.shared_bytes::<f64>(), 256 * 8);
        assert_eq!(warp.footprint::<u32>(), KernelFootprint::new(256, 32));
    }

    #[test]
    fn grid_mapping_parses() {
        assert_eq!("even-share".parse::<GridMapping>(), Ok(GridMapping::EvenShare));
        assert_eq!("EVEN_SHARE".parse::<GridMapping>(), Ok(GridMapping::EvenShare));
        assert_eq!(" dynamic ".parse::<GridMapping>(), Ok(GridMapping::Dynamic));
        assert!("round-robin".parse::<GridMapping>().is_err());
        assert_eq!(GridMapping::Dynamic.to_string(), "dynamic");
    }
}
