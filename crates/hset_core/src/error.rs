//! Error taxonomy shared by every map, generator and check in the crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CapError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CapError {
    /// A stage received a vector or matrix of the wrong size.
    #[error("{stage}: dimension mismatch. Expected {expected}, got {got}.")]
    DimensionMismatch {
        stage: &'static str,
        expected: usize,
        got: usize,
    },

    /// A frame basis is singular or the constraint gradient cannot be inverted.
    #[error("Degenerate frame: {0}")]
    DegenerateFrame(String),

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// A contraction or expansion predicate failed. The proof step did not succeed.
    #[error("Covering relation not certified: {0}")]
    InconclusiveCovering(String),

    #[error("Poincare oracle did not converge: {0}")]
    OracleNonConvergence(String),

    #[error("Constraint extension could not be verified: {0}")]
    ConstraintNotVerified(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
}

pub(crate) fn ensure_dimension(stage: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(CapError::DimensionMismatch {
            stage,
            expected,
            got,
        });
    }
    Ok(())
}
