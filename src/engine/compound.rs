//! Compound engine: several atomic engines under one identifier
//!
//! Raw similarities from different engines live on different scales (a KL
//! engine's `1/(1+d)` crowds near zero, a QCD engine's does not), so they
//! cannot simply be averaged per pair. The compound engine instead reports
//! every sub-engine's raw score and lets the search stage replace each with
//! its rank in the candidate population before weighting.

use super::{Engine, SimilarityScore};
use crate::error::{Result, SimilarityError};
use crate::linalg::FeatureMatrix;
use crate::signature::Signature;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

pub const COMPOUND_ID: &str = "Compound_v01";

struct Part {
    engine: Arc<dyn Engine>,
    weight: f64,
}

pub struct CompoundEngine {
    identifier: String,
    parts: BTreeMap<String, Part>,
}

impl std::fmt::Debug for CompoundEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompoundEngine")
            .field("identifier", &self.identifier)
            .field("weights", &self.partial_weights())
            .finish()
    }
}

impl CompoundEngine {
    /// Build from `(name, engine, weight)` entries.
    ///
    /// Names become signature namespaces and must be unique and free of `.`.
    /// Weights must be finite and non-negative with a positive sum.
    /// Sub-engines must themselves be atomic.
    pub fn new(
        identifier: impl Into<String>,
        entries: Vec<(String, Arc<dyn Engine>, f64)>,
    ) -> Result<Self> {
        let identifier = identifier.into();
        let config_error =
            |msg: String| SimilarityError::invalid(msg).context(&identifier);

        if entries.is_empty() {
            return Err(config_error("compound engine needs at least one sub-engine".into()));
        }

        let mut parts = BTreeMap::new();
        let mut total = 0.0;
        for (name, engine, weight) in entries {
            if name.is_empty() || name.contains('.') {
                return Err(config_error(format!("invalid sub-engine name '{}'", name)));
            }
            if !weight.is_finite() || weight < 0.0 {
                return Err(config_error(format!("weight {} for '{}' must be >= 0", weight, name)));
            }
            if engine.is_compound() {
                return Err(config_error(format!(
                    "sub-engine '{}' ({}) is itself compound",
                    name,
                    engine.identifier()
                )));
            }
            if parts.contains_key(&name) {
                return Err(config_error(format!("sub-engine '{}' listed twice", name)));
            }
            total += weight;
            parts.insert(name, Part { engine, weight });
        }
        if total <= 0.0 {
            return Err(config_error("compound weights sum to zero".into()));
        }

        debug!(engine = %identifier, parts = parts.len(), "compound engine built");
        Ok(Self { identifier, parts })
    }
}

impl Engine for CompoundEngine {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn extract_signature(&self, features: &FeatureMatrix, sample_rate: u32) -> Result<Signature> {
        let mut built: HashMap<String, Signature> = HashMap::new();
        let mut merged = Signature::new();
        for (name, part) in &self.parts {
            let key = part.engine.signature_key();
            let sig = match key.as_ref().and_then(|k| built.get(k)) {
                Some(sig) => sig.clone(),
                None => {
                    let sig = part
                        .engine
                        .extract_signature(features, sample_rate)
                        .map_err(|e| e.context(&self.identifier))?;
                    if let Some(k) = key {
                        built.insert(k, sig.clone());
                    }
                    sig
                }
            };
            merged = merged.merge(sig.namespaced(name))?;
        }
        debug!(engine = %self.identifier, built = built.len(), parts = self.parts.len(), "compound signature extracted");
        Ok(merged)
    }

    fn measure_similarity(&self, a: &Signature, b: &Signature) -> Result<SimilarityScore> {
        let mut scores = BTreeMap::new();
        for (name, part) in &self.parts {
            let score = part
                .engine
                .measure_similarity(&a.scoped(name), &b.scoped(name))
                .map_err(|e| e.context(&self.identifier))?;
            let scalar = score.as_scalar().ok_or_else(|| {
                SimilarityError::invalid(format!("sub-engine '{}' returned a partial score", name))
            })?;
            scores.insert(name.clone(), scalar);
        }
        Ok(SimilarityScore::Partial(scores))
    }

    fn partial_weights(&self) -> BTreeMap<String, f64> {
        self.parts.iter().map(|(name, part)| (name.clone(), part.weight)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ClusteringParams;
    use crate::engine::gmm::{GmmEmdEngine, GMM_EMD_ID, GMM_QCD_ID};
    use crate::engine::mandel_ellis::MANDEL_ELLIS_ID;
    use crate::engine::test_support::synthetic_features;
    use crate::engine::{GmmQcdEngine, MandelEllisEngine};
    use crate::signature::NumericArray;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn two_part(w1: f64, w2: f64) -> Result<CompoundEngine> {
        let params = ClusteringParams { clusters: 2, max_iterations: 50, seed: 1 };
        CompoundEngine::new(
            COMPOUND_ID,
            vec![
                (MANDEL_ELLIS_ID.to_string(), Arc::new(MandelEllisEngine::new()) as Arc<dyn Engine>, w1),
                (GMM_QCD_ID.to_string(), Arc::new(GmmQcdEngine::new(params)) as Arc<dyn Engine>, w2),
            ],
        )
    }

    #[test]
    fn test_signature_is_namespaced_union() {
        let engine = two_part(1.0, 2.0).unwrap();
        let sig = engine.extract_signature(&synthetic_features(1, 0.0, 200, 3), 22050).unwrap();

        let names: Vec<&str> = sig.field_names().collect();
        assert!(names.contains(&"Mandel_Ellis_v01.means"));
        assert!(names.contains(&"Mandel_Ellis_v01.covariance"));
        assert!(names.contains(&"GMM_QCD_v01.weights"));
        assert_eq!(sig.len(), 5);
    }

    #[test]
    fn test_similarity_is_partial_per_sub_engine() {
        let engine = two_part(1.0, 2.0).unwrap();
        let a = engine.extract_signature(&synthetic_features(1, 0.0, 200, 3), 22050).unwrap();
        let b = engine.extract_signature(&synthetic_features(2, 1.0, 200, 3), 22050).unwrap();

        match engine.measure_similarity(&a, &b).unwrap() {
            SimilarityScore::Partial(scores) => {
                assert_eq!(scores.len(), 2);
                assert!(scores.values().all(|s| *s > 0.0 && *s <= 1.0));
            }
            other => panic!("expected partial score, got {:?}", other),
        }
        assert!(engine.is_compound());
        assert_eq!(engine.partial_weights()[GMM_QCD_ID], 2.0);
    }

    #[test]
    fn test_rejects_bad_weights() {
        assert!(two_part(-1.0, 1.0).is_err());
        assert!(two_part(0.0, 0.0).is_err());
        assert!(two_part(f64::NAN, 1.0).is_err());
        assert!(two_part(0.0, 1.0).is_ok());
    }

    #[test]
    fn test_rejects_nested_compound() {
        let inner: Arc<dyn Engine> = Arc::new(two_part(1.0, 1.0).unwrap());
        let result = CompoundEngine::new("outer", vec![("inner".to_string(), inner, 1.0)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_dotted_and_duplicate_names() {
        let me: Arc<dyn Engine> = Arc::new(MandelEllisEngine::new());
        assert!(CompoundEngine::new("c", vec![("a.b".to_string(), me.clone(), 1.0)]).is_err());
        assert!(CompoundEngine::new(
            "c",
            vec![("a".to_string(), me.clone(), 1.0), ("a".to_string(), me, 1.0)]
        )
        .is_err());
        assert!(CompoundEngine::new("c", vec![]).is_err());
    }

    // ==========================================================================
    // SHARED SIGNATURE TESTS
    // ==========================================================================

    struct CountingEngine {
        key: Option<&'static str>,
        extracted: Arc<AtomicUsize>,
    }

    impl Engine for CountingEngine {
        fn identifier(&self) -> &str {
            "Counting"
        }

        fn extract_signature(&self, _features: &FeatureMatrix, _sample_rate: u32) -> Result<Signature> {
            self.extracted.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(Signature::new().with("value", NumericArray::scalar(1.0)))
        }

        fn measure_similarity(&self, _a: &Signature, _b: &Signature) -> Result<SimilarityScore> {
            Ok(SimilarityScore::Scalar(1.0))
        }

        fn signature_key(&self) -> Option<String> {
            self.key.map(str::to_string)
        }
    }

    fn counting_compound(key: Option<&'static str>) -> (CompoundEngine, Arc<AtomicUsize>) {
        let extracted = Arc::new(AtomicUsize::new(0));
        let entries = ["a", "b", "c"]
            .iter()
            .map(|name| {
                let engine: Arc<dyn Engine> = Arc::new(CountingEngine { key, extracted: extracted.clone() });
                (name.to_string(), engine, 1.0)
            })
            .collect();
        (CompoundEngine::new("counted", entries).unwrap(), extracted)
    }

    #[test]
    fn test_equal_signature_keys_extract_once() {
        let (engine, extracted) = counting_compound(Some("shared"));
        let sig = engine.extract_signature(&synthetic_features(4, 0.0, 50, 3), 22050).unwrap();

        assert_eq!(extracted.load(AtomicOrdering::SeqCst), 1);
        let names: Vec<&str> = sig.field_names().collect();
        assert_eq!(names, vec!["a.value", "b.value", "c.value"]);
    }

    #[test]
    fn test_unkeyed_engines_extract_per_part() {
        let (engine, extracted) = counting_compound(None);
        let sig = engine.extract_signature(&synthetic_features(4, 0.0, 50, 3), 22050).unwrap();

        assert_eq!(extracted.load(AtomicOrdering::SeqCst), 3);
        assert_eq!(sig.len(), 3);
    }

    #[test]
    fn test_mixture_engines_share_one_clustering() {
        let params = ClusteringParams { clusters: 2, max_iterations: 50, seed: 1 };
        let engine = CompoundEngine::new(
            "mixtures",
            vec![
                (GMM_EMD_ID.to_string(), Arc::new(GmmEmdEngine::new(params)) as Arc<dyn Engine>, 1.0),
                (GMM_QCD_ID.to_string(), Arc::new(GmmQcdEngine::new(params)) as Arc<dyn Engine>, 1.0),
            ],
        )
        .unwrap();
        let features = synthetic_features(5, 0.0, 200, 3);
        let sig = engine.extract_signature(&features, 22050).unwrap();

        let alone = GmmEmdEngine::new(params).extract_signature(&features, 22050).unwrap();
        for field in alone.field_names() {
            let emd = sig.get(&format!("{}.{}", GMM_EMD_ID, field)).unwrap();
            let qcd = sig.get(&format!("{}.{}", GMM_QCD_ID, field)).unwrap();
            assert_eq!(emd, qcd);
            assert_eq!(emd, alone.get(field).unwrap());
        }

        let other = ClusteringParams { seed: 2, ..params };
        assert_ne!(GmmEmdEngine::new(params).signature_key(), GmmQcdEngine::new(other).signature_key());
        assert_eq!(GmmEmdEngine::new(params).signature_key(), GmmQcdEngine::new(params).signature_key());
    }

    #[test]
    fn test_missing_sub_signature_is_invalid() {
        let engine = two_part(1.0, 1.0).unwrap();
        let a = engine.extract_signature(&synthetic_features(3, 0.0, 200, 3), 22050).unwrap();
        let err = engine.measure_similarity(&a, &Signature::new()).unwrap_err();
        assert!(matches!(err, SimilarityError::InvalidSignature(_)));
    }
}
