//! Error types for the terrace-solver library
//!
//! This module provides the main error and result types used throughout the
//! library. All errors use the `thiserror` crate for automatic trait
//! implementations.

use thiserror::Error;

/// Main result type used throughout the terrace-solver library
pub type TerraceResult<T> = Result<T, TerraceError>;

/// Main error type for the terrace-solver library
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TerraceError {
    /// Invalid input parameters: NaN matrix entries, mismatched dimensions,
    /// disagreeing variable dimensions across factors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Elimination discovered rank deficiency in the first remaining frontal
    /// variable. The partially-mutated factor must be treated as poisoned.
    #[error(
        "Factor is singular in variable {key}, discovered while attempting to eliminate this variable"
    )]
    SingularFactor {
        /// The first frontal variable of the failed elimination
        key: usize,
    },

    /// An operation was invoked in a state its contract forbids
    #[error("Precondition violation: {0}")]
    PreconditionViolation(String),

    /// Linear algebra related errors
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singular_factor_display() {
        let error = TerraceError::SingularFactor { key: 7 };
        assert!(error.to_string().contains("singular in variable 7"));
    }

    #[test]
    fn test_invalid_input_display() {
        let error = TerraceError::InvalidInput("b has length 3 but A has 2 rows".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid input: b has length 3 but A has 2 rows"
        );
    }

    #[test]
    fn test_terrace_result_err() {
        let result: TerraceResult<i32> =
            Err(TerraceError::PreconditionViolation("test".to_string()));
        assert!(result.is_err());
    }
}
