/// Biallelic site-pattern partial likelihoods
///
/// Kernels for the pruning recursion over population trees and networks
/// under a biallelic coalescent model: leaf partials, merges at speciation
/// nodes, splits at admixture nodes, and the post-order walk that ties them
/// to an external `BranchModel` for branch evolution and root weights.
///
/// Enable the `python` feature to build the extension module.

#[cfg(feature = "python")]
mod python;

pub mod binomial;
pub mod config;
pub mod error;
pub mod likelihood;
pub mod matrix;
pub mod merge;
pub mod network;
pub mod patterns;
pub mod split;

pub use config::LikelihoodConfig;
pub use error::{LikelihoodError, Result};
pub use likelihood::{
    log_likelihood, BranchModel, PatternLikelihoodWalk, PatternLogLikelihood, RootPartials,
    WalkState,
};
pub use matrix::PatternMatrix;
pub use merge::{merge_pattern_matrices, merge_top_of_branch_partials, MergedPartials};
pub use network::{BranchParams, Edge, NodeKind, PopulationNetwork, PopulationNode};
pub use patterns::SitePatterns;
pub use split::{split_top_of_branch_partials, SplitPartials};
