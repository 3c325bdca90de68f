//! Dispatch metrics
//!
//! ```text
//! use gridfold_core::instrumentation::DispatchMetrics;
//!
//! let start = std::time::Instant::now();
//! // ... dispatch ...
//! DispatchMetrics::new("sum", num_items, start).with_plan(&plan, scratch_bytes).log();
//! ```

use std::time::Instant;

use crate::grid::GridPlan;

/// Which path a dispatch took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPath {
    SizeQuery,
    SingleStage,
    TwoStage,
}

impl DispatchPath {
    pub const fn as_str(self) -> &'static str {
        match self {
            DispatchPath::SizeQuery => "size_query",
            DispatchPath::SingleStage => "single_stage",
            DispatchPath::TwoStage => "two_stage",
        }
    }
}

/// Summary of one dispatch call, emitted as a `reduction_dispatched` event.
#[derive(Debug, Clone)]
pub struct DispatchMetrics {
    pub operation: &'static str,
    pub num_items: usize,
    pub path: DispatchPath,
    pub grid_size: u32,
    pub tile_size: usize,
    pub scratch_bytes: usize,
    /// Host time spent planning and submitting, in microseconds
    pub duration_us: u64,
}

impl DispatchMetrics {
    pub fn new(operation: &'static str, num_items: usize, start: Instant) -> Self {
        Self {
            operation,
            num_items,
            path: DispatchPath::SizeQuery,
            grid_size: 0,
            tile_size: 0,
            scratch_bytes: 0,
            duration_us: start.elapsed().as_micros() as u64,
        }
    }

    /// Fill the path and grid fields from an executed plan.
    pub fn with_plan(mut self, plan: &GridPlan, scratch_bytes: usize) -> Self {
        self.scratch_bytes = scratch_bytes;
        match plan {
            GridPlan::SingleStage => {
                self.path = DispatchPath::SingleStage;
                self.grid_size = 1;
            }
            GridPlan::TwoStage(two) => {
                self.path = DispatchPath::TwoStage;
                self.grid_size = two.grid_size;
                self.tile_size = two.tile_size;
            }
        }
        self
    }

    pub fn with_scratch_bytes(mut self, scratch_bytes: usize) -> Self {
        self.scratch_bytes = scratch_bytes;
        self
    }

    /// Items submitted per second of host time
    pub fn items_per_sec(&self) -> f64 {
        if self.duration_us == 0 {
            return 0.0;
        }
        self.num_items as f64 * 1_000_000.0 / self.duration_us as f64
    }

    pub fn log(&self) {
        tracing::debug!(
            operation = self.operation,
            num_items = self.num_items,
            path = self.path.as_str(),
            grid_size = self.grid_size,
            tile_size = self.tile_size,
            scratch_bytes = self.scratch_bytes,
            duration_us = self.duration_us,
            items_per_sec = self.items_per_sec(),
            "reduction_dispatched"
        );
    }
}
