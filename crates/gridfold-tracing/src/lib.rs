//! Logging setup shared by the gridfold crates.
//!
//! `gridfold-device` and `gridfold-core` only emit `tracing` events. Whoever
//! owns the process (a binary, a bench, a test harness) picks a
//! [`TracingConfig`] and calls [`init_global_tracing`], which installs the
//! subscriber and applies the [`PerfSettings`] used by stage timers.
//!
//! ```no_run
//! use gridfold_tracing::{init_global_tracing, TracingConfig};
//!
//! let config = TracingConfig::from_env().with_directives("gridfold_core=debug");
//! init_global_tracing(&config).expect("subscriber already installed");
//! ```

pub mod performance;

#[macro_use]
pub mod macros;

use std::env;
use std::str::FromStr;

#[doc(hidden)]
pub use tracing;

use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Named presets for [`TracingConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Pretty, coloured output at `info`.
    Local,
    /// JSON without colour codes at `info`.
    Ci,
    /// JSON with span lifecycle events; dispatcher and device at `debug`.
    Performance,
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Profile::Local),
            "ci" => Ok(Profile::Ci),
            "performance" | "perf" => Ok(Profile::Performance),
            other => Err(format!("unknown tracing profile '{other}'")),
        }
    }
}

/// Formatter used for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingOutput {
    Compact,
    Pretty,
    Json,
}

impl FromStr for TracingOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(TracingOutput::Compact),
            "pretty" => Ok(TracingOutput::Pretty),
            "json" => Ok(TracingOutput::Json),
            other => Err(format!("unknown tracing format '{other}'")),
        }
    }
}

/// Whether stage timers report, and the shortest duration they report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfSettings {
    pub enabled: bool,
    pub threshold_us: Option<u64>,
}

impl Default for PerfSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_us: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub profile: Profile,
    /// Filter directives. `None` defers to `RUST_LOG`, then to `fallback`.
    pub directives: Option<String>,
    pub fallback: String,
    pub output: TracingOutput,
    pub ansi: bool,
    pub show_targets: bool,
    pub span_events: FmtSpan,
    pub perf: PerfSettings,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::new(Profile::Local)
    }
}

impl TracingConfig {
    pub fn new(profile: Profile) -> Self {
        let base = Self {
            profile,
            directives: None,
            fallback: "info".to_string(),
            output: TracingOutput::Pretty,
            ansi: true,
            show_targets: true,
            span_events: FmtSpan::NONE,
            perf: PerfSettings::default(),
        };

        match profile {
            Profile::Local => base,
            Profile::Ci => Self {
                output: TracingOutput::Json,
                ansi: false,
                perf: PerfSettings {
                    enabled: false,
                    threshold_us: None,
                },
                ..base
            },
            Profile::Performance => Self {
                directives: Some("gridfold_core=debug,gridfold_device=debug".to_string()),
                output: TracingOutput::Json,
                ansi: false,
                span_events: FmtSpan::ENTER | FmtSpan::EXIT | FmtSpan::CLOSE,
                ..base
            },
        }
    }

    pub fn for_local() -> Self {
        Self::new(Profile::Local)
    }

    pub fn for_ci() -> Self {
        Self::new(Profile::Ci)
    }

    pub fn for_performance() -> Self {
        Self::new(Profile::Performance)
    }

    /// Start from `GRIDFOLD_TRACING_PROFILE` and apply the other overrides.
    ///
    /// # Environment Variables
    ///
    /// - `GRIDFOLD_TRACING_PROFILE` - `local` (default), `ci` or `performance`
    /// - `GRIDFOLD_TRACING_DIRECTIVES` - filter directives
    /// - `GRIDFOLD_TRACING_FORMAT` - `pretty`, `compact` or `json`
    /// - `GRIDFOLD_PERF_TRACING` - `1`, `true` or `yes` enables stage timers
    /// - `GRIDFOLD_PERF_THRESHOLD_US` - shortest stage duration worth reporting
    ///
    /// Values that do not parse leave the preset untouched.
    pub fn from_env() -> Self {
        let profile = read_env("GRIDFOLD_TRACING_PROFILE")
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(Profile::Local);
        let mut config = Self::new(profile);

        if let Some(directives) = read_env("GRIDFOLD_TRACING_DIRECTIVES") {
            config.directives = Some(directives);
        }
        if let Some(output) = read_env("GRIDFOLD_TRACING_FORMAT").and_then(|value| value.trim().parse().ok()) {
            config = config.with_output(output);
        }
        if let Some(flag) = read_env("GRIDFOLD_PERF_TRACING") {
            config.perf.enabled = parse_flag(&flag);
        }
        if let Some(threshold) = read_env("GRIDFOLD_PERF_THRESHOLD_US").and_then(|value| value.trim().parse().ok()) {
            config.perf.threshold_us = Some(threshold);
        }

        config
    }

    pub fn with_directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = Some(directives.into());
        self
    }

    /// Switch formatter; JSON never carries colour codes.
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        if output == TracingOutput::Json {
            self.ansi = false;
        }
        self
    }

    fn filter(&self) -> Result<EnvFilter, TracingSetupError> {
        match &self.directives {
            Some(directives) => {
                EnvFilter::try_new(directives).map_err(|err| TracingSetupError::InvalidFilter(err.to_string()))
            }
            None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.fallback))),
        }
    }

    fn fmt_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let layer = fmt::layer()
            .with_target(self.show_targets)
            .with_span_events(self.span_events.clone());

        match self.output {
            TracingOutput::Compact => Box::new(layer.compact().with_ansi(self.ansi)),
            TracingOutput::Pretty => Box::new(layer.pretty().with_ansi(self.ansi)),
            TracingOutput::Json => Box::new(layer.json().with_ansi(false)),
        }
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// `1`, `true` and `yes` (any case) switch a `GRIDFOLD_*` flag on.
pub fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

#[derive(Debug, thiserror::Error)]
pub enum TracingSetupError {
    /// The directive string does not parse
    #[error("invalid tracing directive: {0}")]
    InvalidFilter(String),

    /// A global subscriber is already installed
    #[error("failed to install tracing subscriber: {0}")]
    SubscriberInit(#[source] TryInitError),
}

/// Build, but do not install, the subscriber described by `config`.
pub fn build_subscriber(config: &TracingConfig) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    let filter = config.filter()?;
    Ok(Registry::default().with(config.fmt_layer()).with(filter))
}

/// Install the subscriber process-wide and apply its stage-timer settings.
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    build_subscriber(config)?
        .try_init()
        .map_err(TracingSetupError::SubscriberInit)?;
    performance::configure(config.perf);
    Ok(())
}

/// Compact `warn`-level output for test binaries. Repeated calls are no-ops.
pub fn init_test_tracing() {
    let config = TracingConfig {
        fallback: "warn".to_string(),
        ..TracingConfig::for_local().with_output(TracingOutput::Compact)
    };
    let _ = init_global_tracing(&config);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const KEYS: [&str; 5] = [
        "GRIDFOLD_TRACING_PROFILE",
        "GRIDFOLD_TRACING_DIRECTIVES",
        "GRIDFOLD_TRACING_FORMAT",
        "GRIDFOLD_PERF_TRACING",
        "GRIDFOLD_PERF_THRESHOLD_US",
    ];

    fn with_env(vars: &[(&str, &str)]) -> TracingConfig {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for key in KEYS {
            env::remove_var(key);
        }
        for (key, value) in vars {
            env::set_var(key, value);
        }
        let config = TracingConfig::from_env();
        for key in KEYS {
            env::remove_var(key);
        }
        config
    }

    #[test]
    fn profiles_differ_where_expected() {
        let local = TracingConfig::for_local();
        let ci = TracingConfig::for_ci();
        let perf = TracingConfig::for_performance();

        assert_eq!(local.output, TracingOutput::Pretty);
        assert!(local.ansi);
        assert_eq!(ci.output, TracingOutput::Json);
        assert!(!ci.perf.enabled);
        assert!(perf.directives.as_deref().is_some_and(|d| d.contains("gridfold_device=debug")));
        assert!(perf.perf.enabled);
    }

    #[test]
    fn invalid_directives_are_reported() {
        let config = TracingConfig::default().with_directives("gridfold_core=loud");
        assert!(matches!(
            build_subscriber(&config),
            Err(TracingSetupError::InvalidFilter(_))
        ));
    }

    #[test]
    fn every_output_builds() {
        for output in [TracingOutput::Compact, TracingOutput::Pretty, TracingOutput::Json] {
            let config = TracingConfig::default()
                .with_directives("warn")
                .with_output(output);
            assert!(build_subscriber(&config).is_ok(), "{output:?}");
        }
    }

    #[test]
    fn env_selects_profile_and_overrides() {
        let config = with_env(&[
            ("GRIDFOLD_TRACING_PROFILE", "ci"),
            ("GRIDFOLD_TRACING_FORMAT", "compact"),
            ("GRIDFOLD_TRACING_DIRECTIVES", "gridfold_core=trace"),
        ]);
        assert_eq!(config.profile, Profile::Ci);
        assert_eq!(config.output, TracingOutput::Compact);
        assert_eq!(config.directives.as_deref(), Some("gridfold_core=trace"));
        assert!(!config.ansi);
    }

    #[test]
    fn env_controls_stage_timers() {
        let config = with_env(&[
            ("GRIDFOLD_PERF_TRACING", "no"),
            ("GRIDFOLD_PERF_THRESHOLD_US", "250"),
        ]);
        assert_eq!(
            config.perf,
            PerfSettings {
                enabled: false,
                threshold_us: Some(250)
            }
        );
    }

    #[test]
    fn env_garbage_keeps_the_preset() {
        let config = with_env(&[
            ("GRIDFOLD_TRACING_PROFILE", "loud"),
            ("GRIDFOLD_TRACING_FORMAT", "xml"),
            ("GRIDFOLD_PERF_THRESHOLD_US", "soon"),
        ]);
        assert_eq!(config.profile, Profile::Local);
        assert_eq!(config.output, TracingOutput::Pretty);
        assert_eq!(config.perf.threshold_us, None);
    }

    #[test]
    fn json_output_drops_ansi() {
        let config = with_env(&[("GRIDFOLD_TRACING_FORMAT", "JSON")]);
        assert_eq!(config.output, TracingOutput::Json);
        assert!(!config.ansi);
    }

    #[test]
    fn flags() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" TRUE "));
        assert!(parse_flag("Yes"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("off"));
    }
}
