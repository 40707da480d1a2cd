/// Biallelic site patterns
///
/// Row `i` of each count matrix is one unique pattern, column `j` one
/// sampled population; `weights[i]` is how many sites show that pattern.

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView1};

use crate::error::{LikelihoodError, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct SitePatterns {
    /// Shape: [n_patterns, n_populations]
    red_allele_counts: Array2<u32>,
    /// Shape: [n_patterns, n_populations]
    allele_counts: Array2<u32>,
    weights: Vec<u32>,
}

impl SitePatterns {
    pub fn new(
        red_allele_counts: Array2<u32>,
        allele_counts: Array2<u32>,
        weights: Vec<u32>,
    ) -> Result<Self> {
        if red_allele_counts.dim() != allele_counts.dim() {
            return Err(LikelihoodError::invalid_argument(format!(
                "red allele counts have shape {:?} but allele counts {:?}",
                red_allele_counts.dim(),
                allele_counts.dim()
            )));
        }
        if weights.len() != allele_counts.nrows() {
            return Err(LikelihoodError::invalid_argument(format!(
                "{} pattern weights for {} patterns",
                weights.len(),
                allele_counts.nrows()
            )));
        }
        let consistent = red_allele_counts
            .iter()
            .zip(allele_counts.iter())
            .all(|(red, total)| red <= total);
        if !consistent {
            return Err(LikelihoodError::invalid_argument(
                "a pattern has more red alleles than sampled alleles",
            ));
        }
        Ok(Self {
            red_allele_counts,
            allele_counts,
            weights,
        })
    }

    /// Build from per-pattern rows
    pub fn from_rows(
        red_allele_counts: &[Vec<u32>],
        allele_counts: &[Vec<u32>],
        weights: Vec<u32>,
    ) -> Result<Self> {
        let n_populations = allele_counts.first().map_or(0, Vec::len);
        let to_array = |rows: &[Vec<u32>]| -> Result<Array2<u32>> {
            let flat: Vec<u32> = rows.iter().flatten().copied().collect();
            Array2::from_shape_vec((rows.len(), n_populations), flat).map_err(|e| {
                LikelihoodError::invalid_argument(format!("ragged pattern rows: {}", e))
            })
        };
        Self::new(
            to_array(red_allele_counts)?,
            to_array(allele_counts)?,
            weights,
        )
    }

    pub fn number_of_patterns(&self) -> usize {
        self.allele_counts.nrows()
    }

    pub fn number_of_populations(&self) -> usize {
        self.allele_counts.ncols()
    }

    pub fn red_allele_counts(&self, pattern: usize) -> ArrayView1<'_, u32> {
        self.red_allele_counts.row(pattern)
    }

    pub fn allele_counts(&self, pattern: usize) -> ArrayView1<'_, u32> {
        self.allele_counts.row(pattern)
    }

    pub fn weight(&self, pattern: usize) -> u32 {
        self.weights[pattern]
    }

    pub fn weights(&self) -> &[u32] {
        &self.weights
    }

    /// Total number of sites
    pub fn number_of_sites(&self) -> u64 {
        self.weights.iter().map(|&w| w as u64).sum()
    }

    /// Distinct allele-count vectors with the summed weight of the patterns
    /// that share them, in lexicographic order
    pub fn unique_allele_counts(&self) -> Vec<(Vec<u32>, u32)> {
        let mut unique: BTreeMap<Vec<u32>, u32> = BTreeMap::new();
        for (row, &weight) in self.allele_counts.outer_iter().zip(&self.weights) {
            *unique.entry(row.to_vec()).or_insert(0) += weight;
        }
        unique.into_iter().collect()
    }
}
