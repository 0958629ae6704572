//! Mandel & Ellis single-Gaussian engine
//!
//! One Gaussian per track, compared with the symmetric KL divergence.

use super::{similarity_from_distance, Engine, SimilarityScore};
use crate::builder::{build_gaussian, gaussian_from_signature, gaussian_to_signature};
use crate::distance::symmetric_kl;
use crate::error::Result;
use crate::linalg::FeatureMatrix;
use crate::signature::Signature;

pub const MANDEL_ELLIS_ID: &str = "Mandel_Ellis_v01";

#[derive(Debug, Default, Clone)]
pub struct MandelEllisEngine;

impl MandelEllisEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for MandelEllisEngine {
    fn identifier(&self) -> &str {
        MANDEL_ELLIS_ID
    }

    fn extract_signature(&self, features: &FeatureMatrix, _sample_rate: u32) -> Result<Signature> {
        let g = build_gaussian(features).map_err(|e| e.context(MANDEL_ELLIS_ID))?;
        Ok(gaussian_to_signature(&g))
    }

    fn measure_similarity(&self, a: &Signature, b: &Signature) -> Result<SimilarityScore> {
        let ga = gaussian_from_signature(a).map_err(|e| e.context(MANDEL_ELLIS_ID))?;
        let gb = gaussian_from_signature(b).map_err(|e| e.context(MANDEL_ELLIS_ID))?;
        let distance = symmetric_kl(&ga, &gb)?;
        Ok(SimilarityScore::Scalar(similarity_from_distance(distance)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::synthetic_features;
    use crate::error::SimilarityError;

    #[test]
    fn test_self_similarity_is_one() {
        let engine = MandelEllisEngine::new();
        let sig = engine.extract_signature(&synthetic_features(1, 0.0, 200, 4), 22050).unwrap();
        let score = engine.measure_similarity(&sig, &sig).unwrap().as_scalar().unwrap();
        assert!((score - 1.0).abs() < 1e-9, "self similarity {}", score);
    }

    #[test]
    fn test_closer_tracks_score_higher() {
        let engine = MandelEllisEngine::new();
        let query = engine.extract_signature(&synthetic_features(1, 0.0, 200, 4), 22050).unwrap();
        let near = engine.extract_signature(&synthetic_features(2, 0.5, 200, 4), 22050).unwrap();
        let far = engine.extract_signature(&synthetic_features(3, 20.0, 200, 4), 22050).unwrap();

        let near = engine.measure_similarity(&query, &near).unwrap().as_scalar().unwrap();
        let far = engine.measure_similarity(&query, &far).unwrap().as_scalar().unwrap();
        assert!(near > far, "near {} vs far {}", near, far);
        assert!(far > 0.0 && near < 1.0);
    }

    #[test]
    fn test_symmetric() {
        let engine = MandelEllisEngine::new();
        let a = engine.extract_signature(&synthetic_features(4, 0.0, 100, 3), 22050).unwrap();
        let b = engine.extract_signature(&synthetic_features(5, 2.0, 100, 3), 22050).unwrap();
        assert_eq!(
            engine.measure_similarity(&a, &b).unwrap(),
            engine.measure_similarity(&b, &a).unwrap()
        );
    }

    #[test]
    fn test_error_names_engine() {
        let engine = MandelEllisEngine::new();
        let err = engine.measure_similarity(&Signature::new(), &Signature::new()).unwrap_err();
        assert!(matches!(err, SimilarityError::InvalidSignature(_)));
        assert!(err.to_string().contains(MANDEL_ELLIS_ID));
    }
}
