//! Error types for havoc-engine.

use havoc_core::{SelectionError, ValidationError};
use havoc_runtime::RuntimeError;

use crate::config::ConfigError;

/// Main error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Targets could not be resolved. Fatal.
    #[error("selection error: {0}")]
    Selection(#[from] SelectionError),

    /// Disruption parameters are invalid. Fatal.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The container engine could not be set up.
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// One or more targets failed during a batch.
    #[error("{failed} of {total} targets failed: {first}")]
    Batch {
        /// Targets with an apply or revert error.
        failed: usize,
        /// Targets in the batch.
        total: usize,
        /// First error message, for the summary line.
        first: String,
    },

    /// Logging could not be initialised.
    #[error("telemetry error: {0}")]
    Telemetry(String),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_message() {
        let err = EngineError::Batch {
            failed: 1,
            total: 3,
            first: "docker error: boom".into(),
        };
        assert_eq!(err.to_string(), "1 of 3 targets failed: docker error: boom");
    }

    #[test]
    fn wraps_validation() {
        let err: EngineError = ValidationError::ZeroDelay.into();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
