/// # Likelihood Settings
///
/// Options that change how site-pattern likelihoods are computed. Defaults
/// reproduce the reference recursion exactly: hypergeometric merges, no
/// rescaling, codominant markers.

use serde::{Deserialize, Serialize};

use crate::error::{LikelihoodError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LikelihoodConfig {
    /// Leaf counts are individuals scored for a dominant marker
    pub markers_are_dominant: bool,
    /// Hypergeometric pooling at every merge
    pub hypergeometric_merge: bool,
    /// Rescale partials after every merge and split, tracking the factors in
    /// log space. Guards deep trees against underflow at the cost of
    /// bit-for-bit agreement with the unscaled recursion.
    pub rescale_partials: bool,
    /// Constant sites were removed from the data, so the likelihood needs
    /// the constant-pattern correction
    pub constant_sites_removed: bool,
    /// Red and green have equal frequencies, so the all-red constant pattern
    /// is as likely as the all-green one
    pub state_frequencies_are_constrained: bool,
    /// Worker threads for site patterns; 0 uses rayon's global pool
    pub threads: usize,
}

impl Default for LikelihoodConfig {
    fn default() -> Self {
        Self {
            markers_are_dominant: false,
            hypergeometric_merge: true,
            rescale_partials: false,
            constant_sites_removed: false,
            state_frequencies_are_constrained: false,
            threads: 1,
        }
    }
}

impl LikelihoodConfig {
    pub fn is_parallel(&self) -> bool {
        self.threads != 1
    }

    /// Dedicated pool for `threads > 1`; `None` means run on the caller's
    /// thread or rayon's global pool
    pub fn thread_pool(&self) -> Result<Option<rayon::ThreadPool>> {
        if self.threads <= 1 {
            return Ok(None);
        }
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map(Some)
            .map_err(|e| {
                LikelihoodError::invalid_argument(format!(
                    "cannot start {} worker threads: {}",
                    self.threads, e
                ))
            })
    }
}
