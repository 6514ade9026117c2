//! Error type shared by every stage of the analysis.

use thiserror::Error;

/// Errors produced while classifying, counting or building domains.
#[derive(Debug, Error)]
pub enum Error {
    /// The classifier found no matching shape. Not fatal: use the exact path.
    #[error("no known pattern matches the loop structure")]
    UnrecognizedPattern,

    /// A bound or condition could not be turned into affine constraints.
    #[error("cannot build affine domain: {0}")]
    DomainConstruction(String),

    /// The exact-counting backend failed to start, exited non-zero, or produced garbage.
    #[error("exact counting backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Caller supplied an argument outside the accepted range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A loop structure violates its own invariants.
    #[error("malformed loop structure: {0}")]
    InvalidStructure(String),
}

impl Error {
    pub(crate) fn domain(message: impl Into<String>) -> Self {
        Error::DomainConstruction(message.into())
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        Error::BackendUnavailable(message.into())
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    pub(crate) fn invalid_structure(message: impl Into<String>) -> Self {
        Error::InvalidStructure(message.into())
    }

    /// Returns `true` for failures that only disable the exact path.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::BackendUnavailable(format!("I/O error: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
