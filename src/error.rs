/// Error types for partial-likelihood computations.

use thiserror::Error;

/// Failures raised while building, combining or reducing pattern partials.
///
/// None of these are transient: every variant marks a malformed input or a
/// programming error in the caller, and aborts the current likelihood
/// evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LikelihoodError {
    /// A `(n, r)` cell outside the triangle `0 <= r <= n <= max_alleles`
    #[error(
        "pattern cell (n = {allele_count}, r = {red_allele_count}) is outside a matrix \
         with at most {max_alleles} alleles"
    )]
    OutOfRange {
        allele_count: usize,
        red_allele_count: usize,
        max_alleles: usize,
    },

    /// Inconsistent lengths, probabilities or counts
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Malformed population tree or network
    #[error("Invalid network: {message}")]
    InvalidNetwork { message: String },

    /// The external branch model broke its contract
    #[error("Branch model error: {message}")]
    BranchModel { message: String },
}

/// Type alias for Results using LikelihoodError
pub type Result<T> = std::result::Result<T, LikelihoodError>;

impl LikelihoodError {
    pub fn out_of_range(allele_count: usize, red_allele_count: usize, max_alleles: usize) -> Self {
        Self::OutOfRange {
            allele_count,
            red_allele_count,
            max_alleles,
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an invalid network error
    pub fn invalid_network(message: impl Into<String>) -> Self {
        Self::InvalidNetwork {
            message: message.into(),
        }
    }

    /// Create a branch model error
    pub fn branch_model(message: impl Into<String>) -> Self {
        Self::BranchModel {
            message: message.into(),
        }
    }
}
