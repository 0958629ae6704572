//! Single-Gaussian signatures
//!
//! The whole track collapses to one multivariate Gaussian over its frames:
//! the column means and sample covariance of the feature matrix. This is the
//! Mandel & Ellis representation, cheap to store (`d + d²` numbers) and
//! compared in closed form with the symmetric KL divergence.

use super::{COVARIANCE, MEANS};
use crate::distance::Gaussian;
use crate::error::{Result, SimilarityError};
use crate::linalg::{sample_covariance, FeatureMatrix};
use crate::signature::{NumericArray, Signature};

/// Fit a Gaussian to every frame of `features`.
///
/// Needs at least `d + 1` frames; fewer can never give a full-rank
/// covariance.
pub fn build_gaussian(features: &FeatureMatrix) -> Result<Gaussian> {
    super::check_features(features)?;
    let (frames, dims) = (features.rows(), features.cols());
    if frames <= dims {
        return Err(SimilarityError::degenerate(format!(
            "{} frames cannot give a full-rank {}-dimensional covariance",
            frames, dims
        )));
    }

    let means = features.column_means();
    let covariance = sample_covariance(features.iter_rows(), &means);
    Gaussian::new(means, covariance)
}

pub fn gaussian_to_signature(g: &Gaussian) -> Signature {
    Signature::new()
        .with(MEANS, NumericArray::vector(g.means().to_vec()))
        .with(COVARIANCE, NumericArray::matrix(g.covariance()))
}

pub fn gaussian_from_signature(sig: &Signature) -> Result<Gaussian> {
    Gaussian::new(sig.vector(MEANS)?.to_vec(), sig.matrix(COVARIANCE)?)
}
