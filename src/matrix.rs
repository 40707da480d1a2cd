/// Triangular allele-count probability matrix
///
/// For one lineage and one site pattern, cell `(n, r)` holds the likelihood
/// contribution of `n` sampled allele copies of which `r` are red. Cells live
/// in one contiguous buffer at offset `n(n+1)/2 + r`, so `(0,0)` (the
/// no-allele mass) is the first element and the `n >= 1` cells follow it in
/// row-major order.

use std::fmt;

use crate::error::{LikelihoodError, Result};

/// Number of cells in a triangle with bound `max_alleles`, checked against
/// `usize` overflow.
pub fn triangular_len(max_alleles: usize) -> Result<usize> {
    max_alleles
        .checked_add(1)
        .and_then(|a| a.checked_mul(max_alleles.checked_add(2)?))
        .map(|cells| cells / 2)
        .ok_or_else(|| {
            LikelihoodError::invalid_argument(format!(
                "allele bound {} overflows matrix storage",
                max_alleles
            ))
        })
}

/// Number of `n >= 1` cells, the length of a flattened allele partials vector.
pub fn allele_cell_count(max_alleles: usize) -> Result<usize> {
    triangular_len(max_alleles).map(|len| len - 1)
}

#[inline]
pub(crate) fn offset(allele_count: usize, red_allele_count: usize) -> usize {
    allele_count * (allele_count + 1) / 2 + red_allele_count
}

/// Offset into a flattened vector that omits `(0,0)`; requires `n >= 1`.
#[inline]
pub(crate) fn allele_offset(allele_count: usize, red_allele_count: usize) -> usize {
    offset(allele_count, red_allele_count) - 1
}

/// Zero-filled cell buffer; an allocation the allocator cannot satisfy is an
/// `InvalidArgument` rather than an abort.
pub(crate) fn zeroed_cells(len: usize) -> Result<Vec<f64>> {
    let mut cells = Vec::new();
    cells.try_reserve_exact(len).map_err(|e| {
        LikelihoodError::invalid_argument(format!("cannot allocate {} matrix cells: {}", len, e))
    })?;
    cells.resize(len, 0.0);
    Ok(cells)
}

#[derive(Clone, Debug, PartialEq)]
pub struct PatternMatrix {
    max_alleles: usize,
    probs: Vec<f64>,
}

impl PatternMatrix {
    /// All cells zero
    pub fn new(max_alleles: usize) -> Result<Self> {
        let len = triangular_len(max_alleles)?;
        Ok(Self {
            max_alleles,
            probs: zeroed_cells(len)?,
        })
    }

    /// Leaf partials for an observed pattern: probability 1 at `(n, r)`.
    ///
    /// A population without data for the pattern (`n == 0`) gets a bound-0
    /// matrix whose only cell, the no-allele mass, is 1.
    pub fn leaf(allele_count: usize, red_allele_count: usize) -> Result<Self> {
        if red_allele_count > allele_count {
            return Err(LikelihoodError::out_of_range(
                allele_count,
                red_allele_count,
                allele_count,
            ));
        }
        let mut m = Self::new(allele_count)?;
        m.probs[offset(allele_count, red_allele_count)] = 1.0;
        Ok(m)
    }

    /// Leaf partials for dominant markers.
    ///
    /// `individuals` diploid samples of which `red_individuals` show the red
    /// phenotype. The matrix bound is `2 * individuals`, and each cell
    /// `(2n, k)` gets the probability that `k` red alleles produce exactly
    /// `red_individuals` red phenotypes.
    pub fn dominant_leaf(individuals: usize, red_individuals: usize) -> Result<Self> {
        if red_individuals > individuals {
            return Err(LikelihoodError::invalid_argument(format!(
                "{} red individuals out of {} sampled",
                red_individuals, individuals
            )));
        }
        let allele_count = individuals.checked_mul(2).ok_or_else(|| {
            LikelihoodError::invalid_argument(format!(
                "{} diploid individuals overflow the allele count",
                individuals
            ))
        })?;
        if red_individuals == 0 {
            return Self::leaf(allele_count, 0);
        }

        let mut m = Self::new(allele_count)?;
        let n = individuals as f64;
        let reds = red_individuals as f64;
        let mut p = 1.0;
        for r in 1..=red_individuals {
            let r = r as f64;
            p = p * 2.0 * (n - r + 1.0) / (2.0 * n - r + 1.0);
        }
        for k in red_individuals..=(2 * red_individuals) {
            if k > red_individuals {
                let kf = k as f64;
                p = p * (2.0 * reds - kf + 1.0) * kf / (2.0 * (kf - reds) * (2.0 * n - kf + 1.0));
            }
            m.probs[offset(allele_count, k)] = p;
        }
        Ok(m)
    }

    /// Rebuild from a full flattened triangle (including `(0,0)`).
    pub fn from_flat(max_alleles: usize, values: Vec<f64>) -> Result<Self> {
        let expected = triangular_len(max_alleles)?;
        if values.len() != expected {
            return Err(LikelihoodError::invalid_argument(format!(
                "flattened matrix with bound {} needs {} values, got {}",
                max_alleles,
                expected,
                values.len()
            )));
        }
        Ok(Self {
            max_alleles,
            probs: values,
        })
    }

    /// Rebuild from the `n >= 1` cells plus the separately tracked no-allele
    /// probability.
    pub fn from_allele_partials(
        max_alleles: usize,
        no_allele_probability: f64,
        partials: &[f64],
    ) -> Result<Self> {
        let expected = allele_cell_count(max_alleles)?;
        if partials.len() != expected {
            return Err(LikelihoodError::invalid_argument(format!(
                "allele partials with bound {} need {} values, got {}",
                max_alleles,
                expected,
                partials.len()
            )));
        }
        let mut probs = Vec::with_capacity(expected + 1);
        probs.push(no_allele_probability);
        probs.extend_from_slice(partials);
        Ok(Self { max_alleles, probs })
    }

    pub fn max_alleles(&self) -> usize {
        self.max_alleles
    }

    /// The whole triangle, row-major from `(0,0)`
    pub fn flatten(&self) -> &[f64] {
        &self.probs
    }

    pub fn into_flat(self) -> Vec<f64> {
        self.probs
    }

    /// The `n >= 1` cells only, as passed to the merge engine
    pub fn allele_partials(&self) -> &[f64] {
        &self.probs[1..]
    }

    #[inline]
    fn checked_offset(&self, allele_count: usize, red_allele_count: usize) -> Result<usize> {
        if red_allele_count > allele_count || allele_count > self.max_alleles {
            return Err(LikelihoodError::out_of_range(
                allele_count,
                red_allele_count,
                self.max_alleles,
            ));
        }
        Ok(offset(allele_count, red_allele_count))
    }

    pub fn get(&self, allele_count: usize, red_allele_count: usize) -> Result<f64> {
        let i = self.checked_offset(allele_count, red_allele_count)?;
        Ok(self.probs[i])
    }

    pub fn set(&mut self, allele_count: usize, red_allele_count: usize, value: f64) -> Result<()> {
        let i = self.checked_offset(allele_count, red_allele_count)?;
        self.probs[i] = value;
        Ok(())
    }

    /// Accumulate into a cell
    pub fn add(&mut self, allele_count: usize, red_allele_count: usize, value: f64) -> Result<()> {
        let i = self.checked_offset(allele_count, red_allele_count)?;
        self.probs[i] += value;
        Ok(())
    }

    /// The `(0,0)` cell
    pub fn no_allele_probability(&self) -> f64 {
        self.probs[0]
    }

    pub fn set_no_allele_probability(&mut self, probability: f64) {
        self.probs[0] = probability;
    }

    pub(crate) fn cells_mut(&mut self) -> &mut [f64] {
        &mut self.probs
    }

    /// Sum over every cell, `(0,0)` included
    pub fn sum(&self) -> f64 {
        self.probs.iter().sum()
    }

    /// `(n, r, probability)` for every cell in storage order
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..=self.max_alleles)
            .flat_map(|n| (0..=n).map(move |r| (n, r)))
            .zip(self.probs.iter())
            .map(|((n, r), &p)| (n, r, p))
    }

    /// Divide every cell by the largest one and return `ln` of that factor.
    ///
    /// All-zero or non-finite matrices are left alone and report `0.0`.
    pub fn rescale(&mut self) -> f64 {
        let max = self.probs.iter().copied().fold(0.0_f64, f64::max);
        if max <= 0.0 || !max.is_finite() {
            return 0.0;
        }
        let inv = 1.0 / max;
        self.probs.iter_mut().for_each(|p| *p *= inv);
        max.ln()
    }
}

impl fmt::Display for PatternMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for n in 0..=self.max_alleles {
            let row = &self.probs[offset(n, 0)..=offset(n, n)];
            for (r, p) in row.iter().enumerate() {
                if r > 0 {
                    write!(f, "\t")?;
                }
                write!(f, "{}", p)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
