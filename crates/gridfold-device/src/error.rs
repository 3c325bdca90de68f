//! Error types for device operations

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors reported by a [`crate::Device`] or by device memory.
///
/// `Clone` so an ordered stream can hold on to the first execution failure
/// until the next synchronization point reports it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The current context cannot submit parallel work
    #[error("device unsupported: {0}")]
    Unsupported(String),

    /// A capability or occupancy query failed
    #[error("device query failed: {0}")]
    QueryFailed(String),

    /// Launch configuration rejected before submission
    #[error("invalid launch configuration: {0}")]
    InvalidLaunchConfig(String),

    /// A worker group failed while executing a kernel
    #[error("kernel '{kernel}' failed in group {group}: {message}")]
    KernelFailed {
        kernel: &'static str,
        group: u32,
        message: String,
    },

    /// A job panicked while running on a stream
    #[error("job '{job}' panicked: {message}")]
    Panicked { job: &'static str, message: String },

    /// Buffer access out of bounds
    #[error("buffer access out of bounds: offset {offset} + size {size} > buffer size {buffer_size}")]
    BufferOutOfBounds {
        offset: usize,
        size: usize,
        buffer_size: usize,
    },

    /// Typed view at an offset that violates the element alignment
    #[error("misaligned access: offset {offset} is not a multiple of {align}")]
    Misaligned { offset: usize, align: usize },

    /// Allocation could not be satisfied
    #[error("out of device memory: requested {requested} bytes")]
    OutOfMemory { requested: usize },

    /// Any other invalid memory access
    #[error("invalid access: {0}")]
    InvalidAccess(String),

    /// The stream's worker is gone
    #[error("stream {0} is closed")]
    StreamClosed(u64),
}

impl DeviceError {
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn query_failed(msg: impl Into<String>) -> Self {
        Self::QueryFailed(msg.into())
    }

    pub fn invalid_launch(msg: impl Into<String>) -> Self {
        Self::InvalidLaunchConfig(msg.into())
    }

    pub fn panicked(job: &'static str, msg: impl Into<String>) -> Self {
        Self::Panicked {
            job,
            message: msg.into(),
        }
    }

    /// Wrap an arbitrary failure raised inside a worker group.
    pub fn kernel_failed(kernel: &'static str, group: u32, msg: impl Into<String>) -> Self {
        Self::KernelFailed {
            kernel,
            group,
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_lowercase_and_carry_context() {
        let err = DeviceError::BufferOutOfBounds {
            offset: 8,
            size: 16,
            buffer_size: 12,
        };
        assert_eq!(
            err.to_string(),
            "buffer access out of bounds: offset 8 + size 16 > buffer size 12"
        );

        let err = DeviceError::kernel_failed("combine", 0, "source exhausted");
        assert_eq!(err.to_string(), "kernel 'combine' failed in group 0: source exhausted");
    }

    #[test]
    fn errors_clone_equal() {
        let err = DeviceError::query_failed("no occupancy data");
        assert_eq!(err.clone(), err);
    }
}
