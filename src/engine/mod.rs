//! Similarity engines
//!
//! An engine bundles three things under one identifier: a signature builder,
//! a distance rule, and the conversion from distance to similarity. Everything
//! downstream (storage, search, the CLI) talks to `dyn Engine` only.
//!
//! # Built-in Engines
//!
//! | Identifier | Signature | Distance |
//! |------------|-----------|----------|
//! | `Mandel_Ellis_v01` | single Gaussian | symmetric KL |
//! | `GMM_EMD_v01` | K-means mixture | EMD, KL ground distance |
//! | `GMM_QCD_v01` | K-means mixture | Quadratic-Chi over both mixtures' components |
//! | `Compound_v01` | all of the above | rank-fused at search time |
//!
//! Atomic engines map a distance `d` to `1 / (1 + d)`, so identical
//! signatures score exactly 1 and scores fall towards 0 with distance.

pub mod compound;
pub mod gmm;
pub mod mandel_ellis;
pub mod registry;

pub use compound::CompoundEngine;
pub use gmm::{GmmEmdEngine, GmmQcdEngine};
pub use mandel_ellis::MandelEllisEngine;
pub use registry::EngineRegistry;

use crate::error::{Result, SimilarityError};
use crate::linalg::FeatureMatrix;
use crate::signature::Signature;
use serde::Serialize;
use std::collections::BTreeMap;

/// Result of comparing two signatures.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SimilarityScore {
    /// Final similarity in `(0, 1]`.
    Scalar(f64),
    /// Raw per-sub-engine similarities, fused during search.
    Partial(BTreeMap<String, f64>),
}

impl SimilarityScore {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            SimilarityScore::Scalar(s) => Some(*s),
            SimilarityScore::Partial(_) => None,
        }
    }
}

/// A named signature + distance strategy.
pub trait Engine: Send + Sync {
    /// Globally unique, stable identifier. Stored alongside every signature.
    fn identifier(&self) -> &str;

    fn extract_signature(&self, features: &FeatureMatrix, sample_rate: u32) -> Result<Signature>;

    fn measure_similarity(&self, a: &Signature, b: &Signature) -> Result<SimilarityScore>;

    /// Whether the underlying distance is a true metric (triangle inequality
    /// holds), which an index structure could exploit.
    fn allows_metric_indexing(&self) -> bool {
        false
    }

    /// Sub-engine weights. Empty for atomic engines.
    fn partial_weights(&self) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }

    fn is_compound(&self) -> bool {
        !self.partial_weights().is_empty()
    }

    /// Engines reporting the same key build identical signatures from the
    /// same features, so a compound engine extracts that signature once.
    fn signature_key(&self) -> Option<String> {
        None
    }
}

/// `1 / (1 + d)` for a distance `d >= 0`.
pub fn similarity_from_distance(distance: f64) -> Result<f64> {
    if !distance.is_finite() || distance < 0.0 {
        return Err(SimilarityError::degenerate(format!(
            "distance {} cannot be turned into a similarity",
            distance
        )));
    }
    Ok(1.0 / (1.0 + distance))
}


#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_similarity_from_distance() {
        assert_eq!(similarity_from_distance(0.0).unwrap(), 1.0);
        assert_eq!(similarity_from_distance(1.0).unwrap(), 0.5);
        assert!(similarity_from_distance(1e9).unwrap() > 0.0);
    }

    #[test]
    fn test_similarity_rejects_bad_distances() {
        assert!(similarity_from_distance(-0.1).is_err());
        assert!(similarity_from_distance(f64::NAN).is_err());
        assert!(similarity_from_distance(f64::INFINITY).is_err());
    }

    proptest! {
        #[test]
        fn prop_similarity_is_bounded_and_decreasing(
            distance in 0.0f64..1e6,
            delta in 1e-3f64..1e3,
        ) {
            let near = similarity_from_distance(distance).unwrap();
            let far = similarity_from_distance(distance + delta).unwrap();
            prop_assert!(near > 0.0 && near <= 1.0);
            prop_assert!(far > 0.0);
            prop_assert!(far < near, "s({}) = {} is not below s({}) = {}", distance + delta, far, distance, near);
        }
    }

    #[test]
    fn test_score_serializes_untagged() {
        let json = serde_json::to_string(&SimilarityScore::Scalar(0.5)).unwrap();
        assert_eq!(json, "0.5");

        let mut partial = BTreeMap::new();
        partial.insert("a".to_string(), 0.25);
        let json = serde_json::to_string(&SimilarityScore::Partial(partial)).unwrap();
        assert_eq!(json, r#"{"a":0.25}"#);
    }
}
