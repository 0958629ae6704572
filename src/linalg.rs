//! Small dense linear algebra for signature statistics
//!
//! Signatures only ever need a handful of operations on matrices of modest
//! size (feature dimension ~20, mixture components ~8-16), so everything is a
//! row-major `Vec<f64>` with explicit loops.
//!
//! Covariances are validated by Cholesky factorisation: a symmetric matrix is
//! positive-definite exactly when every pivot of `A = L·Lᵀ` is positive. The
//! same factor then gives the inverse needed by the KL divergence.

use crate::error::{Result, SimilarityError};
use std::ops::{Index, IndexMut};

/// Relative tolerance for symmetry checks.
const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// A pivot below this fraction of the largest diagonal entry is treated as
/// zero (numerically rank-deficient).
const PIVOT_TOLERANCE: f64 = 1e-12;

/// Row-major dense matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

/// Feature extractor output: one row per analysis frame, one column per
/// feature dimension.
pub type FeatureMatrix = Matrix;

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: vec![0.0; rows * cols] }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m[(i, i)] = 1.0;
        }
        m
    }

    /// Build from row-major data. Fails if `data.len() != rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(SimilarityError::invalid(format!(
                "matrix data has {} values, expected {}x{}",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Build from a list of equally long rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(SimilarityError::invalid(format!(
                    "row {} has {} columns, expected {}",
                    i,
                    row.len(),
                    cols
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self { rows: rows.len(), cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    pub fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> {
        // chunks(0) panics; a zero-width matrix has no data to chunk anyway
        self.data.chunks(self.cols.max(1))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn max_value(&self) -> f64 {
        self.data.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn transpose(&self) -> Matrix {
        let mut t = Matrix::zeros(self.cols, self.rows);
        for r in 0..self.rows {
            for c in 0..self.cols {
                t[(c, r)] = self[(r, c)];
            }
        }
        t
    }

    /// Element-wise sum of two matrices of the same shape.
    pub fn add(&self, other: &Matrix) -> Matrix {
        debug_assert_eq!((self.rows, self.cols), (other.rows, other.cols));
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().zip(&other.data).map(|(a, b)| a + b).collect(),
        }
    }

    pub fn is_symmetric(&self) -> bool {
        if !self.is_square() {
            return false;
        }
        let scale = self.data.iter().fold(0.0f64, |m, v| m.max(v.abs())).max(1.0);
        for i in 0..self.rows {
            for j in (i + 1)..self.cols {
                if (self[(i, j)] - self[(j, i)]).abs() > SYMMETRY_TOLERANCE * scale {
                    return false;
                }
            }
        }
        true
    }

    /// Per-column arithmetic mean. Empty matrices yield zeros.
    pub fn column_means(&self) -> Vec<f64> {
        column_means(self.iter_rows(), self.cols)
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (r, c): (usize, usize)) -> &f64 {
        &self.data[r * self.cols + c]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut f64 {
        &mut self.data[r * self.cols + c]
    }
}

/// Mean of a set of equally long vectors.
pub fn column_means<'a, I>(rows: I, dims: usize) -> Vec<f64>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    let mut sum = vec![0.0; dims];
    let mut n = 0usize;
    for row in rows {
        for (s, v) in sum.iter_mut().zip(row) {
            *s += v;
        }
        n += 1;
    }
    if n > 0 {
        for s in &mut sum {
            *s /= n as f64;
        }
    }
    sum
}

/// Unbiased sample covariance (denominator `n - 1`) around `means`.
///
/// Callers are expected to have checked `n >= 2`; with fewer samples the
/// result is all zeros, which the Cholesky check then rejects.
pub fn sample_covariance<'a, I>(rows: I, means: &[f64]) -> Matrix
where
    I: IntoIterator<Item = &'a [f64]>,
{
    let d = means.len();
    let mut cov = Matrix::zeros(d, d);
    let mut n = 0usize;
    let mut centered = vec![0.0; d];
    for row in rows {
        for k in 0..d {
            centered[k] = row[k] - means[k];
        }
        for i in 0..d {
            let ci = centered[i];
            for j in i..d {
                cov.data[i * d + j] += ci * centered[j];
            }
        }
        n += 1;
    }
    let denom = if n > 1 { (n - 1) as f64 } else { 1.0 };
    for i in 0..d {
        for j in i..d {
            let v = cov.data[i * d + j] / denom;
            cov.data[i * d + j] = v;
            cov.data[j * d + i] = v;
        }
    }
    cov
}

/// `tr(A·B)` without forming the product.
pub fn trace_of_product(a: &Matrix, b: &Matrix) -> f64 {
    debug_assert_eq!(a.cols, b.rows);
    debug_assert_eq!(a.rows, b.cols);
    let mut trace = 0.0;
    for i in 0..a.rows {
        for j in 0..a.cols {
            trace += a[(i, j)] * b[(j, i)];
        }
    }
    trace
}

/// `xᵀ·M·x`
pub fn quadratic_form(x: &[f64], m: &Matrix) -> f64 {
    let mut acc = 0.0;
    for i in 0..m.rows {
        for j in 0..m.cols {
            acc += x[i] * m[(i, j)] * x[j];
        }
    }
    acc
}

/// Lower-triangular Cholesky factor of a symmetric positive-definite matrix.
#[derive(Debug, Clone)]
pub struct Cholesky {
    l: Matrix,
}

impl Cholesky {
    /// Factor `a`, failing with `DegenerateDistribution` when it is not
    /// square, not symmetric, or not positive-definite.
    pub fn factor(a: &Matrix) -> Result<Self> {
        if !a.is_square() {
            return Err(SimilarityError::degenerate(format!(
                "covariance is {}x{}, not square",
                a.rows, a.cols
            )));
        }
        if a.data.iter().any(|v| !v.is_finite()) {
            return Err(SimilarityError::degenerate("covariance has non-finite entries"));
        }
        if !a.is_symmetric() {
            return Err(SimilarityError::degenerate("covariance is not symmetric"));
        }

        let n = a.rows;
        let max_diag = (0..n).map(|i| a[(i, i)].abs()).fold(0.0f64, f64::max);
        let floor = PIVOT_TOLERANCE * max_diag.max(f64::MIN_POSITIVE);
        let mut l = Matrix::zeros(n, n);

        for j in 0..n {
            let mut pivot = a[(j, j)];
            for k in 0..j {
                pivot -= l[(j, k)] * l[(j, k)];
            }
            if pivot <= floor {
                return Err(SimilarityError::degenerate(format!(
                    "covariance is not positive-definite (pivot {} = {:.3e})",
                    j, pivot
                )));
            }
            let diag = pivot.sqrt();
            l[(j, j)] = diag;

            for i in (j + 1)..n {
                let mut v = a[(i, j)];
                for k in 0..j {
                    v -= l[(i, k)] * l[(j, k)];
                }
                l[(i, j)] = v / diag;
            }
        }

        Ok(Self { l })
    }

    pub fn dim(&self) -> usize {
        self.l.rows
    }

    /// Solve `A·x = b` by forward then backward substitution.
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let n = self.dim();
        let l = &self.l;

        let mut y = vec![0.0; n];
        for i in 0..n {
            let mut v = b[i];
            for k in 0..i {
                v -= l[(i, k)] * y[k];
            }
            y[i] = v / l[(i, i)];
        }

        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let mut v = y[i];
            for k in (i + 1)..n {
                v -= l[(k, i)] * x[k];
            }
            x[i] = v / l[(i, i)];
        }
        x
    }

    /// `A⁻¹`, symmetrised to remove round-off asymmetry.
    pub fn inverse(&self) -> Matrix {
        let n = self.dim();
        let mut inv = Matrix::zeros(n, n);
        let mut e = vec![0.0; n];
        for c in 0..n {
            e.iter_mut().for_each(|v| *v = 0.0);
            e[c] = 1.0;
            let col = self.solve(&e);
            for r in 0..n {
                inv[(r, c)] = col[r];
            }
        }
        for i in 0..n {
            for j in (i + 1)..n {
                let v = 0.5 * (inv[(i, j)] + inv[(j, i)]);
                inv[(i, j)] = v;
                inv[(j, i)] = v;
            }
        }
        inv
    }
}
