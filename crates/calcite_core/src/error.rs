//! Error taxonomy shared by every engine component.
//!
//! Numeric hot paths never return these: they propagate `NaN` or empty result
//! sets instead. Errors surface from parsing, linear algebra validation, job
//! workers and, finally, the solver dispatcher.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Malformed expression text.
    #[error("could not parse expression: {0}")]
    Parse(String),
    /// Input outside the domain of an operation (singular matrix, zero vector, ...).
    #[error("domain error: {0}")]
    Domain(String),
    /// An iterative routine found nothing to converge to.
    #[error("no convergence: {0}")]
    Convergence(String),
    /// Operation name outside the recognized set.
    #[error("unsupported operation '{operation}'; supported operations: {supported}")]
    UnsupportedOperation { operation: String, supported: String },
    /// Non-finite intermediate value.
    #[error("numeric overflow or indeterminate result: {0}")]
    NumericOverflow(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn unsupported(operation: &str, supported: &[&str]) -> Self {
        EngineError::UnsupportedOperation {
            operation: operation.to_string(),
            supported: supported.join(", "),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::EngineError;

    #[test]
    fn unsupported_operation_names_the_supported_set() {
        let err = EngineError::unsupported("frobnicate", &["det", "inv"]);
        let message = err.to_string();
        assert!(message.contains("frobnicate"));
        assert!(message.contains("det, inv"), "unexpected message: {message}");
    }
}
