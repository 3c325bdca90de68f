//! Dispatcher options

use std::env;

use gridfold_tracing::parse_flag;

use crate::policy::GridMapping;

/// Per-dispatcher knobs. The defaults reproduce the tuned behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Block after every launch, check its status and log the chosen grid
    /// parameters at `info`.
    pub debug_synchronous: bool,

    /// Groups kept in flight per resident slot. `None` uses the measured
    /// per-unit occupancy.
    pub oversubscription: Option<u32>,

    /// Replace the tuned tile mapping of the partial-reduction stage.
    pub mapping_override: Option<GridMapping>,
}

impl DispatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debug_synchronous(mut self, enabled: bool) -> Self {
        self.debug_synchronous = enabled;
        self
    }

    pub fn with_oversubscription(mut self, factor: u32) -> Self {
        self.oversubscription = Some(factor);
        self
    }

    pub fn with_mapping(mut self, mapping: GridMapping) -> Self {
        self.mapping_override = Some(mapping);
        self
    }

    /// Read options from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `GRIDFOLD_DEBUG_SYNC` - `1`, `true` or `yes` enables synchronous debug mode
    /// - `GRIDFOLD_OVERSUBSCRIPTION` - positive integer oversubscription factor
    /// - `GRIDFOLD_MAPPING` - `even-share` or `dynamic`
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Ok(value) = env::var("GRIDFOLD_DEBUG_SYNC") {
            options.debug_synchronous = parse_flag(&value);
        }

        if let Ok(value) = env::var("GRIDFOLD_OVERSUBSCRIPTION") {
            match value.trim().parse::<u32>() {
                Ok(factor) if factor > 0 => options.oversubscription = Some(factor),
                _ => tracing::warn!(value = %value, "ignoring invalid GRIDFOLD_OVERSUBSCRIPTION"),
            }
        }

        if let Ok(value) = env::var("GRIDFOLD_MAPPING") {
            match value.parse::<GridMapping>() {
                Ok(mapping) => options.mapping_override = Some(mapping),
                Err(err) => tracing::warn!(error = %err, "ignoring invalid GRIDFOLD_MAPPING"),
            }
        }

        options
    }
}
