/// Binomial coefficients in floating point
///
/// Allele counts pooled across populations quickly push `C(n, k)` past the
/// range of 64-bit integers, so everything here is `f64`. Small rows come from
/// a shared Pascal's triangle built on first use; larger ones go through a
/// log-factorial table with a Stirling tail.

use once_cell::sync::Lazy;

/// Largest `n` covered by the shared Pascal's triangle
const SHARED_TABLE_MAX_N: usize = 256;

/// Largest `n` whose `ln(n!)` is tabulated exactly
const LN_FACTORIAL_TABLE_MAX_N: usize = 1024;

static LN_FACTORIALS: Lazy<Vec<f64>> = Lazy::new(|| {
    let mut table = Vec::with_capacity(LN_FACTORIAL_TABLE_MAX_N + 1);
    let mut acc = 0.0;
    table.push(acc);
    for i in 1..=LN_FACTORIAL_TABLE_MAX_N {
        acc += (i as f64).ln();
        table.push(acc);
    }
    table
});

static SHARED_TABLE: Lazy<BinomialTable> = Lazy::new(|| BinomialTable::new(SHARED_TABLE_MAX_N));

/// Natural log of `n!`
pub fn ln_factorial(n: usize) -> f64 {
    if n <= LN_FACTORIAL_TABLE_MAX_N {
        return LN_FACTORIALS[n];
    }
    // Stirling series; the truncation error is far below f64 precision here
    let x = n as f64;
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    x * x.ln() - x + 0.5 * (2.0 * std::f64::consts::PI * x).ln()
        + inv * (1.0 / 12.0 - inv2 * (1.0 / 360.0 - inv2 / 1260.0))
}

/// Natural log of `C(n, k)`; `-inf` when `k > n`
pub fn ln_n_choose_k(n: usize, k: usize) -> f64 {
    if k > n {
        return f64::NEG_INFINITY;
    }
    ln_factorial(n) - ln_factorial(k) - ln_factorial(n - k)
}

/// `C(n, k)` as a float; `0.0` when `k > n`
#[inline]
pub fn n_choose_k(n: usize, k: usize) -> f64 {
    if n <= SHARED_TABLE_MAX_N {
        return SHARED_TABLE.choose(n, k);
    }
    if k > n {
        return 0.0;
    }
    ln_n_choose_k(n, k).exp().round()
}

/// `C(n1, r1) C(n2, r2) / C(n1 + n2, r1 + r2)`: the probability that pooling
/// `n1` and `n2` alleles splits `r1 + r2` red copies as `r1` and `r2`.
///
/// Exact table ratios while the pooled row is tabulated, log space beyond it
/// where the coefficients themselves overflow `f64`.
pub fn hypergeometric_weight(n1: usize, r1: usize, n2: usize, r2: usize) -> f64 {
    if r1 > n1 || r2 > n2 {
        return 0.0;
    }
    let n = n1 + n2;
    let r = r1 + r2;
    if n <= SHARED_TABLE_MAX_N {
        return SHARED_TABLE.choose(n1, r1) * SHARED_TABLE.choose(n2, r2) / SHARED_TABLE.choose(n, r);
    }
    (ln_n_choose_k(n1, r1) + ln_n_choose_k(n2, r2) - ln_n_choose_k(n, r)).exp()
}

/// Pascal's triangle up to a fixed `max_n`, stored with the same triangular
/// offsets as [`crate::PatternMatrix`].
#[derive(Clone, Debug)]
pub struct BinomialTable {
    max_n: usize,
    coefficients: Vec<f64>,
}

impl BinomialTable {
    pub fn new(max_n: usize) -> Self {
        let mut coefficients = vec![0.0; (max_n + 1) * (max_n + 2) / 2];
        coefficients[0] = 1.0;
        for n in 1..=max_n {
            let row = n * (n + 1) / 2;
            let prev = (n - 1) * n / 2;
            coefficients[row] = 1.0;
            coefficients[row + n] = 1.0;
            for k in 1..n {
                coefficients[row + k] = coefficients[prev + k - 1] + coefficients[prev + k];
            }
        }
        Self { max_n, coefficients }
    }

    pub fn max_n(&self) -> usize {
        self.max_n
    }

    /// `C(n, k)`, falling back to [`n_choose_k`] beyond the table
    #[inline]
    pub fn choose(&self, n: usize, k: usize) -> f64 {
        if k > n {
            return 0.0;
        }
        if n > self.max_n {
            return n_choose_k(n, k);
        }
        self.coefficients[n * (n + 1) / 2 + k]
    }

    /// All of `C(n, 0..=n)`; `None` beyond the table
    pub fn row(&self, n: usize) -> Option<&[f64]> {
        if n > self.max_n {
            return None;
        }
        let start = n * (n + 1) / 2;
        Some(&self.coefficients[start..=start + n])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_hypergeometric_weight() {
        // C(2,1) C(1,1) / C(3,2)
        assert_relative_eq!(hypergeometric_weight(2, 1, 1, 1), 2.0 / 3.0, max_relative = 1e-15);
        assert_eq!(hypergeometric_weight(0, 0, 5, 2), 1.0);
        assert_eq!(hypergeometric_weight(1, 2, 5, 2), 0.0);

        // Past the Pascal table; C(600, 300)^2 overflows f64
        assert!((n_choose_k(600, 300) * n_choose_k(600, 300)).is_infinite());
        assert_relative_eq!(
            hypergeometric_weight(600, 300, 600, 300),
            0.046_037_104_429_075_89,
            max_relative = 1e-8
        );

        // Weights over every split of a fixed (n, r) sum to one
        let total: f64 = (0..=40).map(|r1| hypergeometric_weight(300, r1, 500, 40 - r1)).sum();
        assert_relative_eq!(total, 1.0, max_relative = 1e-9);
    }

    #[test]
    fn test_small_rows() {
        let table = BinomialTable::new(6);
        assert_eq!(table.row(4), Some(&[1.0, 4.0, 6.0, 4.0, 1.0][..]));
        assert_eq!(table.choose(6, 3), 20.0);
        assert_eq!(table.choose(3, 4), 0.0);
        assert_eq!(table.row(7), None);
    }

    #[test]
    fn test_table_beyond_bound_falls_back() {
        let table = BinomialTable::new(4);
        assert_eq!(table.choose(10, 3), 120.0);
    }

    #[test]
    fn test_large_coefficients_stay_finite() {
        // C(600, 300) is ~1.35e179, far beyond u64
        let c = n_choose_k(600, 300);
        assert!(c.is_finite());
        assert_relative_eq!(c.ln(), ln_n_choose_k(600, 300), max_relative = 1e-12);
    }

    #[test]
    fn test_ln_factorial_matches_table_at_seam() {
        let tabulated = LN_FACTORIALS[LN_FACTORIAL_TABLE_MAX_N];
        let stirling = ln_factorial(LN_FACTORIAL_TABLE_MAX_N + 1)
            - ((LN_FACTORIAL_TABLE_MAX_N + 1) as f64).ln();
        assert_relative_eq!(tabulated, stirling, max_relative = 1e-13);
    }

    #[test]
    fn test_ln_choose_out_of_range() {
        assert_eq!(ln_n_choose_k(2, 3), f64::NEG_INFINITY);
        assert_eq!(n_choose_k(2, 3), 0.0);
    }
}
