//! Errors raised while preparing, launching or reading back a computation.

/// Errors that can occur during a [`crate::Accelerator::compute`] call.
///
/// Every variant is fatal for the call that produced it. Device buffers owned by
/// the call are released before the error reaches the caller.
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("allocation of {name} failed: {reason}")]
    Allocation { name: &'static str, reason: String },
    #[error("transfer of {name} failed: {reason}")]
    Transfer { name: &'static str, reason: String },
    #[error("kernel launch failed: {0}")]
    Launch(String),
    #[error("device sync failed: {0}")]
    Sync(String),
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    #[error("input {name} has {actual} elements, expected at least {expected}")]
    InputLength {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("length {len} exceeds 32-bit indexing")]
    LengthOverflow { len: usize },
}

impl ComputeError {
    /// Short name of the stage that failed, used as the diagnostic location.
    #[must_use]
    pub fn stage(&self) -> &'static str {
        match self {
            Self::DeviceUnavailable(_) => "device",
            Self::Allocation { .. } => "allocate",
            Self::Transfer { .. } => "transfer",
            Self::Launch(_) => "launch",
            Self::Sync(_) => "sync",
            Self::InvalidTopology(_) => "configure",
            Self::InputLength { .. } | Self::LengthOverflow { .. } => "validate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_length_message_names_buffer() {
        let err = ComputeError::InputLength {
            name: "rhs",
            expected: 20,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "input rhs has 3 elements, expected at least 20"
        );
        assert_eq!(err.stage(), "validate");
    }

    #[test]
    fn length_overflow_is_a_precondition() {
        let err = ComputeError::LengthOverflow { len: 1 << 33 };
        assert_eq!(err.stage(), "validate");
        assert!(err.to_string().contains("8589934592"));
    }

    #[test]
    fn stages_are_distinct_per_taxonomy() {
        let errors = [
            ComputeError::DeviceUnavailable("none".into()),
            ComputeError::Allocation {
                name: "output",
                reason: "too large".into(),
            },
            ComputeError::Transfer {
                name: "output",
                reason: "short read".into(),
            },
            ComputeError::Launch("bad dim".into()),
            ComputeError::Sync("lost".into()),
            ComputeError::InvalidTopology("zero".into()),
        ];
        let mut stages: Vec<_> = errors.iter().map(ComputeError::stage).collect();
        stages.sort_unstable();
        stages.dedup();
        assert_eq!(stages.len(), errors.len());
    }
}
