/// Merging two sibling lineages into their parent's lineage
///
/// The parent's pattern `(n, r)` is the convolution of the children's
/// patterns over every `n1 + n2 = n`, `r1 + r2 = r`. With hypergeometric
/// scaling each term is weighted by `C(n1, r1) C(n2, r2) / C(n, r)`, taken
/// as one ratio per term so that pooled bounds far past the range of the
/// individual coefficients still merge without overflow.
///
/// The flattened vectors handled here carry only the `n >= 1` cells. The
/// no-allele mass of each child travels as a separate scalar and the merged
/// no-allele mass comes back the same way, so it can never be counted twice.

use tracing::trace;

use crate::binomial::hypergeometric_weight;
use crate::error::{LikelihoodError, Result};
use crate::matrix::{allele_cell_count, allele_offset, zeroed_cells, PatternMatrix};

/// Parent lineage produced by [`merge_top_of_branch_partials`]
#[derive(Clone, Debug, PartialEq)]
pub struct MergedPartials {
    /// `max_alleles1 + max_alleles2`
    pub max_alleles: usize,
    /// `n >= 1` cells of the merged triangle
    pub pattern_probs: Vec<f64>,
    /// `no_allele_prob1 * no_allele_prob2`
    pub no_allele_probability: f64,
}

impl MergedPartials {
    pub fn into_matrix(self) -> Result<PatternMatrix> {
        PatternMatrix::from_allele_partials(
            self.max_alleles,
            self.no_allele_probability,
            &self.pattern_probs,
        )
    }
}

fn checked_partials(max_alleles: usize, partials: &[f64], which: &str) -> Result<()> {
    let expected = allele_cell_count(max_alleles)?;
    if partials.len() != expected {
        return Err(LikelihoodError::invalid_argument(format!(
            "{} partials with bound {} need {} values, got {}",
            which,
            max_alleles,
            expected,
            partials.len()
        )));
    }
    Ok(())
}

/// Combine two children's partials into their parent's.
///
/// `partials1` and `partials2` are the `n >= 1` cells of each child
/// (see [`PatternMatrix::allele_partials`]); `no_allele_prob1` and
/// `no_allele_prob2` stand in for their `(0,0)` cells. `rescale` selects
/// hypergeometric pooling over simple pooling.
pub fn merge_top_of_branch_partials(
    max_alleles1: usize,
    max_alleles2: usize,
    no_allele_prob1: f64,
    no_allele_prob2: f64,
    partials1: &[f64],
    partials2: &[f64],
    rescale: bool,
) -> Result<MergedPartials> {
    checked_partials(max_alleles1, partials1, "first child")?;
    checked_partials(max_alleles2, partials2, "second child")?;
    let max_alleles = max_alleles1.checked_add(max_alleles2).ok_or_else(|| {
        LikelihoodError::invalid_argument(format!(
            "merged bound {} + {} overflows",
            max_alleles1, max_alleles2
        ))
    })?;

    let mut pattern_probs = zeroed_cells(allele_cell_count(max_alleles)?)?;
    let mut no_allele_probability = 0.0;
    for n1 in 0..=max_alleles1 {
        for r1 in 0..=n1 {
            let p1 = if n1 == 0 {
                no_allele_prob1
            } else {
                partials1[allele_offset(n1, r1)]
            };
            if p1 == 0.0 {
                continue;
            }
            for n2 in 0..=max_alleles2 {
                for r2 in 0..=n2 {
                    let p2 = if n2 == 0 {
                        no_allele_prob2
                    } else {
                        partials2[allele_offset(n2, r2)]
                    };
                    if n1 + n2 == 0 {
                        no_allele_probability += p1 * p2;
                        continue;
                    }
                    let mut term = p1 * p2;
                    if rescale && term != 0.0 {
                        term *= hypergeometric_weight(n1, r1, n2, r2);
                    }
                    pattern_probs[allele_offset(n1 + n2, r1 + r2)] += term;
                }
            }
        }
    }

    if rescale {
        // Clamp round-off from the external branch transform
        pattern_probs.iter_mut().for_each(|p| *p = p.max(0.0));
    }

    trace!(max_alleles1, max_alleles2, rescale, "merged lineages");
    Ok(MergedPartials {
        max_alleles,
        pattern_probs,
        no_allele_probability,
    })
}

/// [`merge_top_of_branch_partials`] over whole matrices, taking each child's
/// no-allele mass from its `(0,0)` cell.
pub fn merge_pattern_matrices(
    child1: &PatternMatrix,
    child2: &PatternMatrix,
    rescale: bool,
) -> Result<PatternMatrix> {
    merge_top_of_branch_partials(
        child1.max_alleles(),
        child2.max_alleles(),
        child1.no_allele_probability(),
        child2.no_allele_probability(),
        child1.allele_partials(),
        child2.allele_partials(),
        rescale,
    )?
    .into_matrix()
}
