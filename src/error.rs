//! Error taxonomy for signature extraction, distance computation and search
//!
//! | Variant | Raised when | Search behaviour |
//! |---------|-------------|------------------|
//! | `DegenerateDistribution` | a covariance is singular or rank-deficient | candidate skipped |
//! | `InvalidSignature` | fields are missing or shapes disagree | candidate skipped |
//! | `InfeasibleTransport` | transport padding is unbalanced (a bug) | candidate skipped, logged |
//! | `EmptyCorpus` | no candidate could be scored | query fails |
//! | `UnknownEngine` | identifier is not registered | query fails |

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimilarityError {
    #[error("degenerate distribution: {0}")]
    DegenerateDistribution(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("infeasible transport problem: {0}")]
    InfeasibleTransport(String),

    #[error("no usable candidates ({skipped} skipped)")]
    EmptyCorpus { skipped: usize },

    #[error("unknown engine '{0}'")]
    UnknownEngine(String),

    #[error("engine '{0}' is already registered")]
    DuplicateEngine(String),

    #[error("audio decode error: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl SimilarityError {
    pub(crate) fn degenerate(msg: impl Into<String>) -> Self {
        SimilarityError::DegenerateDistribution(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SimilarityError::InvalidSignature(msg.into())
    }

    /// Prefix the message with the engine or candidate it concerns.
    pub fn context(self, what: &str) -> Self {
        match self {
            SimilarityError::DegenerateDistribution(m) => {
                SimilarityError::DegenerateDistribution(format!("{}: {}", what, m))
            }
            SimilarityError::InvalidSignature(m) => {
                SimilarityError::InvalidSignature(format!("{}: {}", what, m))
            }
            SimilarityError::InfeasibleTransport(m) => {
                SimilarityError::InfeasibleTransport(format!("{}: {}", what, m))
            }
            SimilarityError::Decode(m) => SimilarityError::Decode(format!("{}: {}", what, m)),
            SimilarityError::Storage(m) => SimilarityError::Storage(format!("{}: {}", what, m)),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, SimilarityError>;
