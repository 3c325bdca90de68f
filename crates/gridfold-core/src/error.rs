//! Error types for reduction dispatch

use std::fmt;

use gridfold_device::DeviceError;

/// Result type for reduction dispatch
pub type Result<T> = std::result::Result<T, ReduceError>;

/// The stage a launch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    DrainReset,
    PartialReduce,
    Combine,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Stage::DrainReset => "drain_reset",
            Stage::PartialReduce => "partial_reduce",
            Stage::Combine => "combine",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by a dispatch. On any error the output is unwritten.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReduceError {
    /// The calling context cannot submit parallel work at all
    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// A capability or occupancy query failed; nothing was submitted
    #[error("device query failed: {0}")]
    DeviceQuery(#[source] DeviceError),

    /// A stage failed to submit, or failed while running in debug mode
    #[error("{stage} launch failed: {source}")]
    Launch {
        stage: Stage,
        #[source]
        source: DeviceError,
    },

    /// Work submitted to the stream before this call failed. Reported by
    /// debug mode before anything of this call is launched.
    #[error("earlier work on the stream failed: {0}")]
    PendingFailure(#[source] DeviceError),

    /// The scratch buffer is smaller than the size query reported
    #[error("invalid scratch size: {provided} bytes provided, {required} required")]
    InvalidScratchSize { required: usize, provided: usize },

    /// A scratch sub-region could not be viewed as its element type
    #[error("scratch region unusable: {0}")]
    Scratch(#[source] DeviceError),

    /// Input or output arguments are inconsistent
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ReduceError {
    /// Classify a launch or synchronization failure of `stage`.
    pub fn from_launch(stage: Stage, source: DeviceError) -> Self {
        match source {
            DeviceError::Unsupported(msg) => Self::UnsupportedEnvironment(msg),
            source => Self::Launch { stage, source },
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn unsupported_launches_become_unsupported_environment() {
        let err = ReduceError::from_launch(Stage::Combine, DeviceError::unsupported("no units"));
        assert_eq!(err, ReduceError::UnsupportedEnvironment("no units".to_string()));
    }

    #[test]
    fn launch_errors_keep_their_source() {
        let device_err = DeviceError::kernel_failed("partial_reduce", 3, "read failed");
        let err = ReduceError::from_launch(Stage::PartialReduce, device_err.clone());
        assert!(err.to_string().starts_with("partial_reduce launch failed"));
        assert_eq!(err.source().map(|s| s.to_string()), Some(device_err.to_string()));
    }

    #[test]
    fn scratch_size_message() {
        let err = ReduceError::InvalidScratchSize {
            required: 512,
            provided: 511,
        };
        assert_eq!(
            err.to_string(),
            "invalid scratch size: 511 bytes provided, 512 required"
        );
    }
}
