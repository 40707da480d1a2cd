/// Python bindings for the partials kernels
///
/// Arrays cross the boundary as flat `float64` vectors in the crate's
/// triangular layout.

use numpy::{PyArray1, PyReadonlyArray1};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::error::LikelihoodError;
use crate::matrix::{triangular_len, PatternMatrix};
use crate::merge;
use crate::split;

fn to_py_err(e: LikelihoodError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Bound of a full triangle with `len` cells
fn bound_for_len(len: usize) -> PyResult<usize> {
    let mut max_alleles = 0;
    loop {
        let cells = triangular_len(max_alleles).map_err(to_py_err)?;
        if cells == len {
            return Ok(max_alleles);
        }
        if cells > len {
            return Err(PyValueError::new_err(format!(
                "{} values do not form a triangular partials matrix",
                len
            )));
        }
        max_alleles += 1;
    }
}

/// Split child partials between two parents of an admixture node
///
/// Args:
///     max_alleles: Bound of both output matrices
///     child_partials: Full child triangle, `(0,0)` first
///     prob_to_parent1: Probability each copy goes to parent 1
///     prob_to_parent2: Probability each copy goes to parent 2
///
/// Returns:
///     (parent1_partials, parent2_partials)
#[pyfunction]
fn split_top_of_branch_partials<'py>(
    py: Python<'py>,
    max_alleles: usize,
    child_partials: PyReadonlyArray1<'py, f64>,
    prob_to_parent1: f64,
    prob_to_parent2: f64,
) -> PyResult<(Bound<'py, PyArray1<f64>>, Bound<'py, PyArray1<f64>>)> {
    let values = child_partials.as_array().to_vec();
    let child_bound = bound_for_len(values.len())?;
    let child = PatternMatrix::from_flat(child_bound, values).map_err(to_py_err)?;

    // Release GIL during computation
    let result = py
        .allow_threads(|| {
            split::split_top_of_branch_partials(max_alleles, &child, prob_to_parent1, prob_to_parent2)
        })
        .map_err(to_py_err)?;

    Ok((
        PyArray1::from_vec_bound(py, result.parent1.into_flat()),
        PyArray1::from_vec_bound(py, result.parent2.into_flat()),
    ))
}

/// Merge two children's partials into their parent's
///
/// Args:
///     max_alleles1, max_alleles2: Children's bounds
///     no_allele_prob1, no_allele_prob2: Children's no-allele masses
///     partials1, partials2: Children's `n >= 1` cells
///     rescale: Hypergeometric pooling when true
///
/// Returns:
///     (max_alleles, merged n >= 1 cells, merged no-allele mass)
#[pyfunction]
#[pyo3(signature = (max_alleles1, max_alleles2, no_allele_prob1, no_allele_prob2, partials1, partials2, rescale=true))]
#[allow(clippy::too_many_arguments)]
fn merge_top_of_branch_partials<'py>(
    py: Python<'py>,
    max_alleles1: usize,
    max_alleles2: usize,
    no_allele_prob1: f64,
    no_allele_prob2: f64,
    partials1: PyReadonlyArray1<'py, f64>,
    partials2: PyReadonlyArray1<'py, f64>,
    rescale: bool,
) -> PyResult<(usize, Bound<'py, PyArray1<f64>>, f64)> {
    let partials1 = partials1.as_array().to_vec();
    let partials2 = partials2.as_array().to_vec();

    let merged = py
        .allow_threads(|| {
            merge::merge_top_of_branch_partials(
                max_alleles1,
                max_alleles2,
                no_allele_prob1,
                no_allele_prob2,
                &partials1,
                &partials2,
                rescale,
            )
        })
        .map_err(to_py_err)?;

    Ok((
        merged.max_alleles,
        PyArray1::from_vec_bound(py, merged.pattern_probs),
        merged.no_allele_probability,
    ))
}

#[pymodule]
fn biallelic_partials(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(split_top_of_branch_partials, m)?)?;
    m.add_function(wrap_pyfunction!(merge_top_of_branch_partials, m)?)?;
    Ok(())
}
