//! Quadratic-Chi histogram distance
//!
//! A cross-bin chi-squared distance: bins that are close under the ground
//! distance partially cancel each other, and each bin's difference is
//! normalised by the (similarity-weighted) mass around it, which damps the
//! influence of large bins.
//!
//! ```text
//! A[i][j] = 1 − D[i][j] / max(D)
//! q(k)    = (h1[k] − h2[k]) / ( Σ_c (h1[c] + h2[c])·A[c][k] )^m      m = 0.5
//! QCD     = sqrt( Σ_i Σ_j q(i)·q(j)·A[i][j] )
//! ```

use crate::error::{Result, SimilarityError};
use crate::linalg::Matrix;

/// Normalisation exponent `m`.
const NORMALIZATION_EXPONENT: f64 = 0.5;

/// Quadratic-Chi distance between two histograms over the same `n` bins.
pub fn quadratic_chi_distance(h1: &[f64], h2: &[f64], ground: &Matrix) -> Result<f64> {
    let n = h1.len();
    if h2.len() != n || ground.rows() != n || ground.cols() != n {
        return Err(SimilarityError::invalid(format!(
            "histograms of {} and {} bins with a {}x{} ground distance matrix",
            n,
            h2.len(),
            ground.rows(),
            ground.cols()
        )));
    }
    if h1.iter().chain(h2).any(|w| !w.is_finite() || *w < 0.0) {
        return Err(SimilarityError::invalid("histogram weights must be finite and non-negative"));
    }
    if ground.as_slice().iter().any(|d| !d.is_finite() || *d < 0.0) {
        return Err(SimilarityError::invalid("ground distances must be finite and non-negative"));
    }

    let similarity = similarity_matrix(ground);

    let mut q = vec![0.0; n];
    for k in 0..n {
        let numerator = h1[k] - h2[k];
        let mass: f64 = (0..n).map(|c| (h1[c] + h2[c]) * similarity[(c, k)]).sum();
        let denominator = mass.max(0.0).powf(NORMALIZATION_EXPONENT);

        q[k] = if numerator == 0.0 {
            0.0
        } else if denominator == 0.0 {
            return Err(SimilarityError::invalid(format!(
                "bin {} has mass but no similar bins under the ground distance",
                k
            )));
        } else {
            numerator / denominator
        };
    }

    let mut radicand = 0.0;
    for i in 0..n {
        if q[i] == 0.0 {
            continue;
        }
        for j in 0..n {
            radicand += q[i] * q[j] * similarity[(i, j)];
        }
    }

    // Round-off can leave a tiny negative where the exact value is zero.
    Ok(radicand.max(0.0).sqrt())
}

/// `A = 1 − D / max(D)`; an all-zero `D` means every bin is the same bin.
fn similarity_matrix(ground: &Matrix) -> Matrix {
    let max = ground.max_value();
    let mut a = Matrix::zeros(ground.rows(), ground.cols());
    for i in 0..ground.rows() {
        for j in 0..ground.cols() {
            a[(i, j)] = if max > 0.0 { 1.0 - ground[(i, j)] / max } else { 1.0 };
        }
    }
    a
}
