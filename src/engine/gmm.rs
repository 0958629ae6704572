//! Mixture-model engines
//!
//! Both engines share the K-means mixture signature and the KL divergence
//! between components as ground distance. They differ in how the two
//! weighted component sets are compared:
//!
//! - `GMM_EMD_v01` solves the transport problem between the two weight
//!   vectors (frame counts), so a longer track does not dominate: surplus
//!   mass goes to a free dummy bin.
//! - `GMM_QCD_v01` lays both mixtures over their joint component set,
//!   `h1 = [p_a; 0]`, `h2 = [0; p_b]` with weights as proportions, and takes
//!   the Quadratic-Chi distance under the full pairwise KL matrix.

use super::{similarity_from_distance, Engine, SimilarityScore};
use crate::builder::{build_mixture, ClusteringParams, Mixture};
use crate::distance::{earth_movers_distance, kl_ground_distances, quadratic_chi_distance};
use crate::error::Result;
use crate::linalg::FeatureMatrix;
use crate::signature::Signature;

pub const GMM_EMD_ID: &str = "GMM_EMD_v01";
pub const GMM_QCD_ID: &str = "GMM_QCD_v01";

fn extract(id: &str, features: &FeatureMatrix, params: &ClusteringParams) -> Result<Signature> {
    let mixture = build_mixture(features, params).map_err(|e| e.context(id))?;
    Ok(mixture.to_signature())
}

/// Both mixture engines store the same signature for the same parameters.
fn mixture_key(params: &ClusteringParams) -> String {
    format!("kmeans_mixture/{}/{}/{}", params.clusters, params.max_iterations, params.seed)
}

fn decode_pair(id: &str, a: &Signature, b: &Signature) -> Result<(Mixture, Mixture)> {
    let ma = Mixture::from_signature(a).map_err(|e| e.context(id))?;
    let mb = Mixture::from_signature(b).map_err(|e| e.context(id))?;
    Ok((ma, mb))
}

#[derive(Debug, Clone, Default)]
pub struct GmmEmdEngine {
    params: ClusteringParams,
}

impl GmmEmdEngine {
    pub fn new(params: ClusteringParams) -> Self {
        Self { params }
    }
}

impl Engine for GmmEmdEngine {
    fn identifier(&self) -> &str {
        GMM_EMD_ID
    }

    fn extract_signature(&self, features: &FeatureMatrix, _sample_rate: u32) -> Result<Signature> {
        extract(GMM_EMD_ID, features, &self.params)
    }

    fn signature_key(&self) -> Option<String> {
        Some(mixture_key(&self.params))
    }

    fn measure_similarity(&self, a: &Signature, b: &Signature) -> Result<SimilarityScore> {
        let (ma, mb) = decode_pair(GMM_EMD_ID, a, b)?;
        let ground = kl_ground_distances(ma.components(), mb.components())
            .map_err(|e| e.context(GMM_EMD_ID))?;
        let distance = earth_movers_distance(ma.weights(), mb.weights(), &ground)
            .map_err(|e| e.context(GMM_EMD_ID))?;
        Ok(SimilarityScore::Scalar(similarity_from_distance(distance)?))
    }
}

#[derive(Debug, Clone, Default)]
pub struct GmmQcdEngine {
    params: ClusteringParams,
}

impl GmmQcdEngine {
    pub fn new(params: ClusteringParams) -> Self {
        Self { params }
    }
}

impl Engine for GmmQcdEngine {
    fn identifier(&self) -> &str {
        GMM_QCD_ID
    }

    fn extract_signature(&self, features: &FeatureMatrix, _sample_rate: u32) -> Result<Signature> {
        extract(GMM_QCD_ID, features, &self.params)
    }

    fn signature_key(&self) -> Option<String> {
        Some(mixture_key(&self.params))
    }

    fn measure_similarity(&self, a: &Signature, b: &Signature) -> Result<SimilarityScore> {
        let (ma, mb) = decode_pair(GMM_QCD_ID, a, b)?;

        let joint: Vec<_> = ma.components().iter().chain(mb.components()).cloned().collect();
        let ground = kl_ground_distances(&joint, &joint).map_err(|e| e.context(GMM_QCD_ID))?;

        let (ka, kb) = (ma.components().len(), mb.components().len());
        let mut h1 = ma.proportions();
        h1.resize(ka + kb, 0.0);
        let mut h2 = vec![0.0; ka];
        h2.extend(mb.proportions());

        let distance = quadratic_chi_distance(&h1, &h2, &ground).map_err(|e| e.context(GMM_QCD_ID))?;
        Ok(SimilarityScore::Scalar(similarity_from_distance(distance)?))
    }
}
