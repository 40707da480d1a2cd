//! Property-based tests for the merge and split kernels.
//!
//! Mass conservation, symmetry and the degenerate inheritance cases must hold
//! for arbitrary non-negative partials, not only the hand-checked fixtures.

use approx::assert_relative_eq;
use biallelic_partials::matrix::triangular_len;
use biallelic_partials::{
    merge_pattern_matrices, merge_top_of_branch_partials, split_top_of_branch_partials,
    PatternMatrix,
};

use proptest::prelude::*;

/// Random non-negative partials with bound up to `max_bound`
fn partials(max_bound: usize) -> impl Strategy<Value = PatternMatrix> {
    (0..=max_bound).prop_flat_map(|bound| {
        let len = triangular_len(bound).unwrap();
        prop::collection::vec(0.0f64..1.0, len)
            .prop_map(move |values| PatternMatrix::from_flat(bound, values).unwrap())
    })
}

fn assert_matrices_close(a: &PatternMatrix, b: &PatternMatrix) {
    assert_eq!(a.max_alleles(), b.max_alleles());
    for ((_, _, x), (_, _, y)) in a.iter().zip(b.iter()) {
        assert_relative_eq!(x, y, epsilon = 1e-12, max_relative = 1e-10);
    }
}

proptest! {
    #[test]
    fn proptest_simple_merge_conserves_mass(a in partials(5), b in partials(5)) {
        let merged = merge_pattern_matrices(&a, &b, false).unwrap();
        prop_assert_eq!(merged.max_alleles(), a.max_alleles() + b.max_alleles());
        let expected = a.sum() * b.sum();
        prop_assert!((merged.sum() - expected).abs() <= 1e-10 * expected.max(1.0));
    }

    #[test]
    fn proptest_merge_is_symmetric(a in partials(4), b in partials(4), rescale in any::<bool>()) {
        let ab = merge_pattern_matrices(&a, &b, rescale).unwrap();
        let ba = merge_pattern_matrices(&b, &a, rescale).unwrap();
        assert_matrices_close(&ab, &ba);
    }

    #[test]
    fn proptest_merge_no_allele_mass_is_product(a in partials(4), b in partials(4)) {
        let merged = merge_top_of_branch_partials(
            a.max_alleles(),
            b.max_alleles(),
            a.no_allele_probability(),
            b.no_allele_probability(),
            a.allele_partials(),
            b.allele_partials(),
            true,
        )
        .unwrap();
        prop_assert_eq!(
            merged.no_allele_probability,
            a.no_allele_probability() * b.no_allele_probability()
        );
        prop_assert!(merged.pattern_probs.iter().all(|&p| p >= 0.0));
    }

    #[test]
    fn proptest_split_conserves_mass(child in partials(6), p1 in 0.0f64..=1.0) {
        let split = split_top_of_branch_partials(child.max_alleles(), &child, p1, 1.0 - p1).unwrap();
        let total = child.sum();
        prop_assert!((split.parent1.sum() - total).abs() <= 1e-10 * total.max(1.0));
        prop_assert!((split.parent2.sum() - total).abs() <= 1e-10 * total.max(1.0));
    }

    #[test]
    fn proptest_split_to_one_parent(child in partials(6)) {
        let split = split_top_of_branch_partials(child.max_alleles(), &child, 1.0, 0.0).unwrap();
        assert_matrices_close(&split.parent1, &child);

        let mut everything_missing = PatternMatrix::new(child.max_alleles()).unwrap();
        everything_missing.set_no_allele_probability(child.sum());
        assert_matrices_close(&split.parent2, &everything_missing);
    }

    #[test]
    fn proptest_split_into_larger_bound(child in partials(4), extra in 1usize..3) {
        let bound = child.max_alleles() + extra;
        let split = split_top_of_branch_partials(bound, &child, 0.5, 0.5).unwrap();
        prop_assert_eq!(split.parent1.max_alleles(), bound);
        for (n, _, p) in split.parent1.iter() {
            if n > child.max_alleles() {
                prop_assert_eq!(p, 0.0);
            }
        }
    }
}
