/// Splitting a lineage between the two parents of a reticulation
///
/// Every allele copy in the child lineage independently goes to parent 1 with
/// probability `p1` and to parent 2 otherwise. For a child pattern `(n, r)`
/// with `g = n - r` green copies, parent 1 receives `(r1 + g1, r1)` and
/// parent 2 the remainder, with weight
///
/// ```text
/// C(r, r1) p1^r1 p2^(r-r1) * C(g, g1) p1^g1 p2^(g-g1)
/// ```
///
/// The outputs are accumulated over every child cell, so the no-allele cell
/// of each parent collects all the ways that parent inherits nothing.

use tracing::trace;

use crate::binomial::{ln_n_choose_k, n_choose_k};
use crate::error::{LikelihoodError, Result};
use crate::matrix::{offset, PatternMatrix};

/// Tolerance on `prob_to_parent1 + prob_to_parent2 == 1`
pub const SPLIT_PROBABILITY_TOLERANCE: f64 = 1e-8;

/// Bottom-of-branch partials of both parents
#[derive(Clone, Debug, PartialEq)]
pub struct SplitPartials {
    pub parent1: PatternMatrix,
    pub parent2: PatternMatrix,
}

/// Child sizes up to which binomial weights are formed directly
const EXACT_BINOMIAL_MAX_N: usize = 256;

/// `k ln(p)` for `k` in `0..=max_k`, with `0 ln(0) = 0`
fn ln_powers(p: f64, max_k: usize) -> Vec<f64> {
    let ln_p = p.ln();
    (0..=max_k)
        .map(|k| if k == 0 { 0.0 } else { k as f64 * ln_p })
        .collect()
}

fn check_inheritance_probabilities(prob_to_parent1: f64, prob_to_parent2: f64) -> Result<()> {
    for p in [prob_to_parent1, prob_to_parent2] {
        if !(0.0..=1.0).contains(&p) {
            return Err(LikelihoodError::invalid_argument(format!(
                "inheritance probability {} is outside [0, 1]",
                p
            )));
        }
    }
    if (prob_to_parent1 + prob_to_parent2 - 1.0).abs() > SPLIT_PROBABILITY_TOLERANCE {
        return Err(LikelihoodError::invalid_argument(format!(
            "inheritance probabilities {} and {} do not sum to 1",
            prob_to_parent1, prob_to_parent2
        )));
    }
    Ok(())
}

/// Apportion `child` between two parent lineages.
///
/// Both outputs have bound `max_alleles`, which must be at least the child's.
pub fn split_top_of_branch_partials(
    max_alleles: usize,
    child: &PatternMatrix,
    prob_to_parent1: f64,
    prob_to_parent2: f64,
) -> Result<SplitPartials> {
    check_inheritance_probabilities(prob_to_parent1, prob_to_parent2)?;
    if child.max_alleles() > max_alleles {
        return Err(LikelihoodError::invalid_argument(format!(
            "child partials have bound {} but the split bound is {}",
            child.max_alleles(),
            max_alleles
        )));
    }

    let mut parent1 = PatternMatrix::new(max_alleles)?;
    let mut parent2 = PatternMatrix::new(max_alleles)?;

    // p^k and k ln(p) for every k a single child pattern can hand to one parent
    let child_max = child.max_alleles();
    let pow1: Vec<f64> = (0..=child_max as i32).map(|k| prob_to_parent1.powi(k)).collect();
    let pow2: Vec<f64> = (0..=child_max as i32).map(|k| prob_to_parent2.powi(k)).collect();
    let ln_pow1 = ln_powers(prob_to_parent1, child_max);
    let ln_pow2 = ln_powers(prob_to_parent2, child_max);

    let out1 = parent1.cells_mut();
    let out2 = parent2.cells_mut();
    for (n, r, p) in child.iter() {
        if p == 0.0 {
            continue;
        }
        let g = n - r;
        for r1 in 0..=r {
            let r2 = r - r1;
            for g1 in 0..=g {
                let g2 = g - g1;
                let weight = if n <= EXACT_BINOMIAL_MAX_N {
                    n_choose_k(r, r1) * n_choose_k(g, g1) * pow1[r1 + g1] * pow2[r2 + g2]
                } else {
                    // Coefficients this large overflow f64 before the powers shrink them
                    (ln_n_choose_k(r, r1) + ln_n_choose_k(g, g1) + ln_pow1[r1 + g1] + ln_pow2[r2 + g2])
                        .exp()
                };
                let contribution = p * weight;
                out1[offset(r1 + g1, r1)] += contribution;
                out2[offset(r2 + g2, r2)] += contribution;
            }
        }
    }

    trace!(
        max_alleles,
        prob_to_parent1,
        parent1_mass = parent1.sum(),
        parent2_mass = parent2.sum(),
        "split lineage"
    );
    Ok(SplitPartials { parent1, parent2 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn child_fixture() -> PatternMatrix {
        let mut m = PatternMatrix::new(2).unwrap();
        m.set(0, 0, 1.0 / 12.0).unwrap();
        m.set(1, 0, 1.0 / 12.0).unwrap();
        m.set(1, 1, 1.0 / 12.0).unwrap();
        m.set(2, 0, 2.0 / 12.0).unwrap();
        m.set(2, 1, 3.0 / 12.0).unwrap();
        m.set(2, 2, 4.0 / 12.0).unwrap();
        m
    }

    fn assert_cells(m: &PatternMatrix, expected_over_1728: &[f64]) {
        for ((_, _, p), expected) in m.iter().zip(expected_over_1728) {
            assert_abs_diff_eq!(p, expected / 1728.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_split_one_third_two_thirds() {
        let split = split_top_of_branch_partials(2, &child_fixture(), 4.0 / 12.0, 8.0 / 12.0)
            .unwrap();
        assert_cells(&split.parent1, &[912.0, 272.0, 400.0, 32.0, 48.0, 64.0]);
        assert_cells(&split.parent2, &[384.0, 320.0, 448.0, 128.0, 192.0, 256.0]);
    }

    #[test]
    fn test_split_everything_to_parent2() {
        let child = child_fixture();
        let split = split_top_of_branch_partials(2, &child, 0.0, 1.0).unwrap();

        // parent 1 inherits nothing from every child pattern
        assert_cells(&split.parent1, &[1728.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_cells(&split.parent2, &[144.0, 144.0, 144.0, 288.0, 432.0, 576.0]);
        for ((_, _, a), (_, _, b)) in split.parent2.iter().zip(child.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_split_bound_zero() {
        let child = PatternMatrix::leaf(0, 0).unwrap();
        let split = split_top_of_branch_partials(0, &child, 0.3, 0.7).unwrap();
        assert_eq!(split.parent1.flatten(), &[1.0]);
        assert_eq!(split.parent2.flatten(), &[1.0]);
    }

    #[test]
    fn test_split_into_larger_bound() {
        let child = PatternMatrix::leaf(1, 1).unwrap();
        let split = split_top_of_branch_partials(3, &child, 0.25, 0.75).unwrap();
        assert_eq!(split.parent1.max_alleles(), 3);
        assert_abs_diff_eq!(split.parent1.get(1, 1).unwrap(), 0.25);
        assert_abs_diff_eq!(split.parent1.get(0, 0).unwrap(), 0.75);
        assert_abs_diff_eq!(split.parent2.get(1, 1).unwrap(), 0.75);
    }

    #[test]
    fn test_split_of_large_sample_conserves_mass() {
        let child = PatternMatrix::leaf(1200, 600).unwrap();
        let split = split_top_of_branch_partials(1200, &child, 0.5, 0.5).unwrap();
        assert_abs_diff_eq!(split.parent1.sum(), 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(split.parent2.sum(), 1.0, epsilon = 1e-8);
        // Half the copies to each side, half of those red
        let mode = split.parent1.get(600, 300).unwrap();
        assert!(split.parent1.iter().all(|(_, _, p)| p.is_finite() && p <= mode));
    }

    #[test]
    fn test_split_rejects_bad_probabilities() {
        let child = child_fixture();
        assert!(split_top_of_branch_partials(2, &child, 0.5, 0.6).is_err());
        assert!(split_top_of_branch_partials(2, &child, -0.5, 1.5).is_err());
        assert!(split_top_of_branch_partials(2, &child, f64::NAN, 1.0).is_err());
        assert!(split_top_of_branch_partials(1, &child, 0.5, 0.5).is_err());
    }
}
