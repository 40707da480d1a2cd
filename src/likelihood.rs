/// Site-pattern likelihoods on a population tree or network
///
/// For one pattern the walk seeds every leaf from its observed counts, then
/// visits nodes in post-order:
/// 1. each finished lineage is carried up its branch by the [`BranchModel`]
/// 2. the child lineages of a node are merged into its lineage
/// 3. a lineage below an admixture node is split between both parents
/// 4. the root lineage is reduced against the model's root weights
///
/// Matrices are allocated fresh for every pattern, so independent patterns
/// can be evaluated on separate rayon workers with no shared state.

use ndarray::ArrayView1;
use rayon::prelude::*;
use tracing::{debug, instrument, trace, warn};

use crate::config::LikelihoodConfig;
use crate::error::{LikelihoodError, Result};
use crate::matrix::PatternMatrix;
use crate::merge::merge_pattern_matrices;
use crate::network::{BranchParams, Edge, NodeKind, PopulationNetwork};
use crate::patterns::SitePatterns;
use crate::split::split_top_of_branch_partials;

/// The coalescent model along branches and at the root.
pub trait BranchModel: Sync {
    /// Carry partials from the top of a branch (at its node) to its bottom
    /// (at the parent). Must keep the matrix bound and be linear in `top`.
    fn evolve(&self, top: &PatternMatrix, branch: &BranchParams) -> Result<PatternMatrix>;

    /// Weight of each root pattern `(n, r)`, usually the stationary
    /// allele-frequency distribution of the root population.
    fn root_weights(&self, max_alleles: usize, root: &BranchParams) -> Result<PatternMatrix>;
}

/// Where a lineage is in the walk, reported in trace events
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkState {
    AtLeaf,
    AfterBranchEvolution,
    AfterMerge,
    AfterSplit,
    AtRoot,
}

/// Partials plus the log of factors divided out of them
#[derive(Clone, Debug)]
struct Lineage {
    partials: PatternMatrix,
    log_scale: f64,
}

impl Lineage {
    fn new(partials: PatternMatrix, log_scale: f64) -> Self {
        Self {
            partials,
            log_scale,
        }
    }

    fn rescaled(mut self, enabled: bool) -> Self {
        if enabled {
            self.log_scale += self.partials.rescale();
        }
        self
    }
}

/// Root partials of one pattern
#[derive(Clone, Debug, PartialEq)]
pub struct RootPartials {
    pub partials: PatternMatrix,
    /// Zero unless partials rescaling is enabled
    pub log_scale: f64,
}

/// Post-order driver for a single site pattern
pub struct PatternLikelihoodWalk<'a, M: BranchModel + ?Sized> {
    network: &'a PopulationNetwork,
    model: &'a M,
    config: &'a LikelihoodConfig,
}

impl<'a, M: BranchModel + ?Sized> PatternLikelihoodWalk<'a, M> {
    pub fn new(network: &'a PopulationNetwork, model: &'a M, config: &'a LikelihoodConfig) -> Self {
        Self {
            network,
            model,
            config,
        }
    }

    /// Partials at the root for one pattern, given per-population red and
    /// total allele counts.
    pub fn root_partials(&self, red_allele_counts: &[u32], allele_counts: &[u32]) -> Result<RootPartials> {
        self.root_partials_view(
            ArrayView1::from(red_allele_counts),
            ArrayView1::from(allele_counts),
        )
    }

    /// Likelihood of one pattern
    pub fn pattern_likelihood(&self, red_allele_counts: &[u32], allele_counts: &[u32]) -> Result<f64> {
        let root = self.root_partials(red_allele_counts, allele_counts)?;
        Ok(self.reduce_root(&root.partials)? * root.log_scale.exp())
    }

    /// Log-likelihood of one pattern; `-inf` when the likelihood is zero
    pub fn pattern_log_likelihood(&self, red_allele_counts: &[u32], allele_counts: &[u32]) -> Result<f64> {
        self.pattern_log_likelihood_view(
            ArrayView1::from(red_allele_counts),
            ArrayView1::from(allele_counts),
        )
    }

    fn pattern_log_likelihood_view(
        &self,
        red_allele_counts: ArrayView1<'_, u32>,
        allele_counts: ArrayView1<'_, u32>,
    ) -> Result<f64> {
        let root = self.root_partials_view(red_allele_counts, allele_counts)?;
        let likelihood = self.reduce_root(&root.partials)?;
        if likelihood <= 0.0 {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(likelihood.ln() + root.log_scale)
    }

    fn root_partials_view(
        &self,
        red_allele_counts: ArrayView1<'_, u32>,
        allele_counts: ArrayView1<'_, u32>,
    ) -> Result<RootPartials> {
        let n_populations = self.network.number_of_populations();
        if red_allele_counts.len() != n_populations || allele_counts.len() != n_populations {
            return Err(LikelihoodError::invalid_argument(format!(
                "pattern has {} red and {} total counts for {} populations",
                red_allele_counts.len(),
                allele_counts.len(),
                n_populations
            )));
        }

        // Bottom-of-branch lineages waiting for their parent, per node and slot
        let mut pending: Vec<Vec<Option<Lineage>>> = self
            .network
            .nodes()
            .iter()
            .map(|node| vec![None; node.branches.len()])
            .collect();

        for &idx in self.network.postorder() {
            let node = self.network.node(idx);
            let tops: Vec<Lineage> = match &node.kind {
                &NodeKind::Leaf { population } => {
                    let n = allele_counts[population] as usize;
                    let r = red_allele_counts[population] as usize;
                    let partials = if self.config.markers_are_dominant {
                        PatternMatrix::dominant_leaf(n, r)?
                    } else {
                        PatternMatrix::leaf(n, r)?
                    };
                    trace!(node = %node.label, state = ?WalkState::AtLeaf, max_alleles = partials.max_alleles());
                    vec![Lineage::new(partials, 0.0)]
                }
                &NodeKind::Bifurcating { left, right } => {
                    let left = take_lineage(&mut pending, left)?;
                    let right = take_lineage(&mut pending, right)?;
                    let merged = self.merge_lineages(left, right)?;
                    trace!(node = %node.label, state = ?WalkState::AfterMerge, max_alleles = merged.partials.max_alleles());
                    vec![merged]
                }
                NodeKind::Polytomy { children } => {
                    let mut merged: Option<Lineage> = None;
                    for &edge in children {
                        let child = take_lineage(&mut pending, edge)?;
                        merged = Some(match merged {
                            Some(acc) => self.merge_lineages(acc, child)?,
                            None => child,
                        });
                    }
                    let merged = merged.ok_or_else(|| {
                        LikelihoodError::invalid_network(format!("polytomy '{}' has no children", node.label))
                    })?;
                    trace!(
                        node = %node.label,
                        state = ?WalkState::AfterMerge,
                        children = children.len(),
                        max_alleles = merged.partials.max_alleles()
                    );
                    vec![merged]
                }
                &NodeKind::Admixture {
                    child,
                    parent1_prob,
                } => {
                    let child = take_lineage(&mut pending, child)?;
                    let split = split_top_of_branch_partials(
                        child.partials.max_alleles(),
                        &child.partials,
                        parent1_prob,
                        1.0 - parent1_prob,
                    )?;
                    trace!(node = %node.label, state = ?WalkState::AfterSplit, parent1_prob);
                    // Both parents inherit the child's scale
                    vec![
                        Lineage::new(split.parent1, child.log_scale)
                            .rescaled(self.config.rescale_partials),
                        Lineage::new(split.parent2, child.log_scale)
                            .rescaled(self.config.rescale_partials),
                    ]
                }
            };

            if idx == self.network.root() {
                let root = tops.into_iter().next().ok_or_else(|| {
                    LikelihoodError::invalid_network("root produced no lineage")
                })?;
                trace!(node = %node.label, state = ?WalkState::AtRoot, log_scale = root.log_scale);
                return Ok(RootPartials {
                    partials: root.partials,
                    log_scale: root.log_scale,
                });
            }

            for (slot, top) in tops.into_iter().enumerate() {
                let bottom = self.evolve_branch(&node.branches[slot], top)?;
                trace!(node = %node.label, slot, state = ?WalkState::AfterBranchEvolution);
                pending[idx][slot] = Some(bottom);
            }
        }

        Err(LikelihoodError::invalid_network(
            "post-order traversal never reached the root",
        ))
    }

    fn merge_lineages(&self, left: Lineage, right: Lineage) -> Result<Lineage> {
        let merged = merge_pattern_matrices(
            &left.partials,
            &right.partials,
            self.config.hypergeometric_merge,
        )?;
        Ok(Lineage::new(merged, left.log_scale + right.log_scale)
            .rescaled(self.config.rescale_partials))
    }

    fn evolve_branch(&self, branch: &BranchParams, top: Lineage) -> Result<Lineage> {
        // Nothing to evolve in a lineage that carries no alleles
        if top.partials.max_alleles() == 0 {
            return Ok(top);
        }
        let mut bottom = self.model.evolve(&top.partials, branch)?;
        if bottom.max_alleles() != top.partials.max_alleles() {
            return Err(LikelihoodError::branch_model(format!(
                "branch evolution changed the allele bound from {} to {}",
                top.partials.max_alleles(),
                bottom.max_alleles()
            )));
        }
        // The no-allele mass is not affected by coalescence or mutation
        bottom.set_no_allele_probability(top.partials.no_allele_probability());
        Ok(Lineage::new(bottom, top.log_scale))
    }

    /// Sum of `weight(n, r) * partials(n, r)` over `n >= 1`. Negative or NaN
    /// sums come from underflow in the branch model and count as zero.
    fn reduce_root(&self, root: &PatternMatrix) -> Result<f64> {
        let root_node = self.network.node(self.network.root());
        let weights = self.model.root_weights(root.max_alleles(), &root_node.branches[0])?;
        if weights.max_alleles() != root.max_alleles() {
            return Err(LikelihoodError::branch_model(format!(
                "root weights have bound {} for root partials with bound {}",
                weights.max_alleles(),
                root.max_alleles()
            )));
        }
        let sum: f64 = root
            .allele_partials()
            .iter()
            .zip(weights.allele_partials())
            .map(|(p, w)| p * w)
            .sum();
        if sum < 0.0 || sum.is_nan() {
            return Ok(0.0);
        }
        Ok(sum)
    }
}

fn take_lineage(pending: &mut [Vec<Option<Lineage>>], edge: Edge) -> Result<Lineage> {
    pending
        .get_mut(edge.node)
        .and_then(|slots| slots.get_mut(edge.slot))
        .and_then(Option::take)
        .ok_or_else(|| {
            LikelihoodError::invalid_network(format!(
                "branch {}:{} was not ready when its parent was visited",
                edge.node, edge.slot
            ))
        })
}

/// Log-likelihood of a whole data set
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PatternLogLikelihood {
    /// `sum_i weight_i * ln L(pattern_i)`
    pub log_likelihood: f64,
    /// Log-probability that a site is variable, summed over the unique
    /// allele-count configurations; zero unless constant sites were removed
    pub constant_site_correction: f64,
}

impl PatternLogLikelihood {
    /// Log-likelihood conditioned on sites being variable
    pub fn corrected(&self) -> f64 {
        self.log_likelihood - self.constant_site_correction
    }
}

/// Weighted log-likelihood of every pattern, plus the constant-pattern
/// correction when `config.constant_sites_removed`.
#[instrument(skip_all, fields(n_patterns = patterns.number_of_patterns(), threads = config.threads))]
pub fn log_likelihood<M: BranchModel + ?Sized>(
    network: &PopulationNetwork,
    model: &M,
    patterns: &SitePatterns,
    config: &LikelihoodConfig,
) -> Result<PatternLogLikelihood> {
    if patterns.number_of_populations() != network.number_of_populations() {
        return Err(LikelihoodError::invalid_argument(format!(
            "patterns cover {} populations but the network has {}",
            patterns.number_of_populations(),
            network.number_of_populations()
        )));
    }
    let walk = PatternLikelihoodWalk::new(network, model, config);

    let compute = || -> Result<PatternLogLikelihood> {
        let log_likelihood = weighted_log_likelihood(&walk, patterns, config.is_parallel())?;
        let constant_site_correction = if config.constant_sites_removed {
            constant_pattern_log_likelihood_correction(&walk, patterns)?
        } else {
            0.0
        };
        Ok(PatternLogLikelihood {
            log_likelihood,
            constant_site_correction,
        })
    };

    let result = match config.thread_pool()? {
        Some(pool) => pool.install(compute),
        None => compute(),
    }?;
    debug!(
        log_likelihood = result.log_likelihood,
        constant_site_correction = result.constant_site_correction,
        "computed pattern log-likelihood"
    );
    Ok(result)
}

fn weighted_log_likelihood<M: BranchModel + ?Sized>(
    walk: &PatternLikelihoodWalk<'_, M>,
    patterns: &SitePatterns,
    parallel: bool,
) -> Result<f64> {
    let term = |pattern: usize| -> Result<f64> {
        let ln_l = walk.pattern_log_likelihood_view(
            patterns.red_allele_counts(pattern),
            patterns.allele_counts(pattern),
        )?;
        if ln_l == f64::NEG_INFINITY {
            warn!(pattern, "pattern likelihood underflowed to zero");
            return Ok(f64::NEG_INFINITY);
        }
        Ok(patterns.weight(pattern) as f64 * ln_l)
    };

    let n_patterns = patterns.number_of_patterns();
    let terms: Vec<f64> = if parallel {
        (0..n_patterns).into_par_iter().map(term).collect::<Result<_>>()?
    } else {
        (0..n_patterns).map(term).collect::<Result<_>>()?
    };
    // Summed in pattern order so threaded and serial runs agree exactly
    Ok(terms.iter().sum())
}

fn constant_pattern_log_likelihood_correction<M: BranchModel + ?Sized>(
    walk: &PatternLikelihoodWalk<'_, M>,
    patterns: &SitePatterns,
) -> Result<f64> {
    let mut correction = 0.0;
    for (allele_counts, weight) in patterns.unique_allele_counts() {
        let all_green = vec![0; allele_counts.len()];
        let green = walk.pattern_likelihood(&all_green, &allele_counts)?;
        let red = if walk.config.state_frequencies_are_constrained {
            green
        } else {
            walk.pattern_likelihood(&allele_counts, &allele_counts)?
        };
        let variable = 1.0 - green - red;
        if variable <= 0.0 {
            return Ok(f64::NEG_INFINITY);
        }
        correction += weight as f64 * variable.ln();
    }
    Ok(correction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::PopulationNode;
    use approx::assert_abs_diff_eq;

    /// Branches do nothing; the root weighs every pattern equally
    struct Frozen;

    impl BranchModel for Frozen {
        fn evolve(&self, top: &PatternMatrix, _branch: &BranchParams) -> Result<PatternMatrix> {
            Ok(top.clone())
        }

        fn root_weights(&self, max_alleles: usize, _root: &BranchParams) -> Result<PatternMatrix> {
            let cells = crate::matrix::triangular_len(max_alleles)?;
            PatternMatrix::from_flat(max_alleles, vec![1.0; cells])
        }
    }

    /// Returns a matrix one allele too small
    struct Shrinking;

    impl BranchModel for Shrinking {
        fn evolve(&self, top: &PatternMatrix, _branch: &BranchParams) -> Result<PatternMatrix> {
            PatternMatrix::new(top.max_alleles() - 1)
        }

        fn root_weights(&self, max_alleles: usize, _root: &BranchParams) -> Result<PatternMatrix> {
            PatternMatrix::new(max_alleles)
        }
    }

    fn cherry() -> PopulationNetwork {
        let b = BranchParams::new(0.1, 1.0);
        PopulationNetwork::from_nodes(vec![
            PopulationNode::leaf("A", 0, b),
            PopulationNode::leaf("B", 1, b),
            PopulationNode::bifurcating("root", Edge::to_parent(0), Edge::to_parent(1), b),
        ])
        .unwrap()
    }

    #[test]
    fn test_cherry_root_partials() {
        let network = cherry();
        let config = LikelihoodConfig::default();
        let walk = PatternLikelihoodWalk::new(&network, &Frozen, &config);

        let root = walk.root_partials(&[1, 0], &[2, 1]).unwrap();
        assert_eq!(root.partials.max_alleles(), 3);
        // C(2,1) C(1,0) / C(3,1)
        assert_abs_diff_eq!(root.partials.get(3, 1).unwrap(), 2.0 / 3.0, epsilon = 1e-12);
        assert_eq!(root.log_scale, 0.0);
        assert_abs_diff_eq!(walk.pattern_likelihood(&[1, 0], &[2, 1]).unwrap(), 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_population_passes_through() {
        let network = cherry();
        let config = LikelihoodConfig::default();
        let walk = PatternLikelihoodWalk::new(&network, &Frozen, &config);

        let root = walk.root_partials(&[0, 1], &[0, 2]).unwrap();
        assert_eq!(root.partials, PatternMatrix::leaf(2, 1).unwrap());
    }

    #[test]
    fn test_all_missing_pattern_has_zero_likelihood() {
        let network = cherry();
        let config = LikelihoodConfig::default();
        let walk = PatternLikelihoodWalk::new(&network, &Frozen, &config);
        assert_eq!(walk.pattern_likelihood(&[0, 0], &[0, 0]).unwrap(), 0.0);
        assert_eq!(
            walk.pattern_log_likelihood(&[0, 0], &[0, 0]).unwrap(),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn test_pattern_length_mismatch() {
        let network = cherry();
        let config = LikelihoodConfig::default();
        let walk = PatternLikelihoodWalk::new(&network, &Frozen, &config);
        assert!(matches!(
            walk.root_partials(&[0], &[1]),
            Err(LikelihoodError::InvalidArgument { .. })
        ));
        assert!(walk.root_partials(&[3, 0], &[2, 1]).is_err());
    }

    #[test]
    fn test_branch_model_must_keep_bound() {
        let network = cherry();
        let config = LikelihoodConfig::default();
        let walk = PatternLikelihoodWalk::new(&network, &Shrinking, &config);
        assert!(matches!(
            walk.root_partials(&[1, 0], &[2, 1]),
            Err(LikelihoodError::BranchModel { .. })
        ));
    }

    #[test]
    fn test_log_likelihood_weights_patterns() {
        let network = cherry();
        let config = LikelihoodConfig::default();
        let patterns =
            SitePatterns::from_rows(&[vec![1, 0], vec![2, 1]], &[vec![2, 1], vec![2, 1]], vec![3, 2])
                .unwrap();
        let result = log_likelihood(&network, &Frozen, &patterns, &config).unwrap();

        // The all-red pattern lands entirely on (3, 3)
        let expected = 3.0 * (2.0_f64 / 3.0).ln() + 2.0 * 1.0_f64.ln();
        assert_abs_diff_eq!(result.log_likelihood, expected, epsilon = 1e-12);
        assert_eq!(result.constant_site_correction, 0.0);
    }

    #[test]
    fn test_log_likelihood_rejects_population_mismatch() {
        let network = cherry();
        let patterns = SitePatterns::from_rows(&[vec![1]], &[vec![2]], vec![1]).unwrap();
        assert!(log_likelihood(&network, &Frozen, &patterns, &LikelihoodConfig::default()).is_err());
    }
}
