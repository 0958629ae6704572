//! Signature builders: feature matrix in, statistical summary out
//!
//! - [`gaussian`]: one Gaussian over all frames
//! - [`mixture`]: K-means clusters, one Gaussian per cluster

pub mod gaussian;
pub mod mixture;

pub use gaussian::{build_gaussian, gaussian_from_signature, gaussian_to_signature};
pub use mixture::{build_mixture, ClusteringParams, Mixture};

use crate::error::{Result, SimilarityError};
use crate::linalg::FeatureMatrix;

// Signature field names shared by builders and engines.
pub const MEANS: &str = "means";
pub const COVARIANCE: &str = "covariance";
pub const COVARIANCES: &str = "covariances";
pub const WEIGHTS: &str = "weights";

/// Reject empty or non-finite feature matrices before any statistics.
pub(crate) fn check_features(features: &FeatureMatrix) -> Result<()> {
    if features.rows() == 0 || features.cols() == 0 {
        return Err(SimilarityError::degenerate(format!(
            "empty feature matrix ({}x{})",
            features.rows(),
            features.cols()
        )));
    }
    if features.as_slice().iter().any(|v| !v.is_finite()) {
        return Err(SimilarityError::invalid("feature matrix contains non-finite values"));
    }
    Ok(())
}
