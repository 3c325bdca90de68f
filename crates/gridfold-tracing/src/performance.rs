//! Stage timing
//!
//! [`StageTimer`] measures one launch or dispatch and reports it when
//! dropped. Whether timers report, and how short a stage may be before it is
//! skipped, is process-wide state set from [`crate::PerfSettings`] by
//! [`crate::init_global_tracing`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use tracing::Span;

use crate::PerfSettings;

static ENABLED: AtomicBool = AtomicBool::new(true);
/// `u64::MAX` encodes "no threshold".
static THRESHOLD_US: AtomicU64 = AtomicU64::new(u64::MAX);

/// Apply `settings` to every timer created from now on.
pub fn configure(settings: PerfSettings) {
    ENABLED.store(settings.enabled, Ordering::Relaxed);
    THRESHOLD_US.store(settings.threshold_us.unwrap_or(u64::MAX), Ordering::Relaxed);
}

/// The settings currently in force.
pub fn settings() -> PerfSettings {
    let threshold = THRESHOLD_US.load(Ordering::Relaxed);
    PerfSettings {
        enabled: ENABLED.load(Ordering::Relaxed),
        threshold_us: (threshold != u64::MAX).then_some(threshold),
    }
}

/// Measures its own lifetime and emits `stage_timed` inside `span` on drop.
pub struct StageTimer {
    label: &'static str,
    span: Span,
    start: Instant,
    enabled: bool,
    threshold_us: Option<u64>,
}

impl StageTimer {
    /// Start timing `label` under the global settings. Usually built with
    /// [`perf_span!`](crate::perf_span).
    pub fn new(label: &'static str, span: Span) -> Self {
        let PerfSettings { enabled, threshold_us } = settings();
        Self {
            label,
            span,
            start: Instant::now(),
            enabled,
            threshold_us,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn elapsed_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    pub fn would_report(&self) -> bool {
        self.enabled && self.threshold_us.map_or(true, |t| self.elapsed_us() >= t)
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        if !self.would_report() {
            return;
        }
        let duration_us = self.elapsed_us();
        tracing::debug!(parent: &self.span, label = self.label, duration_us, "stage_timed");
    }
}

/// One retired launch: how many groups ran and how fast they retired.
pub fn record_launch(kernel: &str, grid_size: u32, group_size: u32, duration_us: u64) {
    tracing::debug!(
        kernel,
        grid_size,
        group_size,
        lanes = grid_size as u64 * group_size as u64,
        duration_us,
        groups_per_sec = per_second(grid_size as u64, duration_us),
        "kernel_launch"
    );
}

/// Direction of a copy between host and device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    HostToDevice,
    DeviceToHost,
}

impl Transfer {
    pub const fn as_str(self) -> &'static str {
        match self {
            Transfer::HostToDevice => "h2d",
            Transfer::DeviceToHost => "d2h",
        }
    }
}

pub fn record_transfer(direction: Transfer, bytes: usize, duration_us: u64) {
    tracing::trace!(
        direction = direction.as_str(),
        bytes,
        duration_us,
        mib_per_sec = per_second(bytes as u64, duration_us) / (1024.0 * 1024.0),
        "data_transfer"
    );
}

fn per_second(count: u64, duration_us: u64) -> f64 {
    if duration_us == 0 {
        return 0.0;
    }
    count as f64 * 1_000_000.0 / duration_us as f64
}
