use thiserror::Error;

/// Errors raised by the linear algebra primitives.
#[derive(Debug, Error, PartialEq)]
pub enum LinalgError {
    /// The input matrix contains NaN or infinite entries.
    #[error("Input matrix contains non-finite values")]
    NonFiniteInput,

    /// The SVD iteration did not converge.
    #[error("SVD did not converge")]
    SvdNotConverged,

    /// Source and destination sets must be non-empty and of the same length.
    #[error("Invalid point set lengths: {0} and {1}")]
    MismatchedInputLengths(usize, usize),

    /// The SVD did not produce the requested singular vectors.
    #[error("SVD is missing the {0} singular vectors")]
    MissingSingularVectors(&'static str),
}
