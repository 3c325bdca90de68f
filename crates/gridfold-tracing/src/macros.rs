//! Timer macros

/// Start a [`StageTimer`](crate::performance::StageTimer) in a `debug`-level
/// `perf` span carrying the given fields.
///
/// ```rust
/// use gridfold_tracing::perf_span;
///
/// let timer = perf_span!("partial_reduce", grid_size = 64u32, group_size = 256u32);
/// assert_eq!(timer.label(), "partial_reduce");
/// ```
#[macro_export]
macro_rules! perf_span {
    ($label:expr) => {{
        let label: &'static str = $label;
        $crate::performance::StageTimer::new(label, $crate::tracing::debug_span!("perf", label))
    }};
    ($label:expr, $($field:ident = $value:expr),+ $(,)?) => {{
        let label: &'static str = $label;
        $crate::performance::StageTimer::new(
            label,
            $crate::tracing::debug_span!("perf", label, $($field = $value),+),
        )
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn both_forms_build_timers() {
        let plain = perf_span!("plain");
        let fields = perf_span!("combine", grid_size = 1u32, group_size = 128u32);
        assert_eq!(plain.label(), "plain");
        assert_eq!(fields.label(), "combine");
    }
}
