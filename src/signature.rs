//! Signatures: named bundles of numeric arrays
//!
//! A signature is whatever an engine's builder produces for one track: a
//! single Gaussian is `{means, covariance}`, a mixture adds `weights` and
//! stacks per-component matrices. Storage only ever sees the generic form,
//! a map from field name to a shaped `f64` array, serialised as JSON:
//!
//! ```text
//! {
//!   "means":      {"shape": [20],     "data": [...]},
//!   "covariance": {"shape": [20, 20], "data": [...]}
//! }
//! ```
//!
//! Compound engines namespace each sub-engine's fields as
//! `<sub-engine>.<field>` so two sub-engines can never write the same key.

use crate::error::{Result, SimilarityError};
use crate::linalg::Matrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const NAMESPACE_SEPARATOR: char = '.';

/// A row-major array of `f64` with an explicit shape.
///
/// Shape `[]` is a scalar, `[n]` a vector, `[r, c]` a matrix and
/// `[k, r, c]` a stack of `k` matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericArray {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl NumericArray {
    pub fn scalar(value: f64) -> Self {
        Self { shape: vec![], data: vec![value] }
    }

    pub fn vector(values: Vec<f64>) -> Self {
        Self { shape: vec![values.len()], data: values }
    }

    pub fn matrix(m: &Matrix) -> Self {
        Self { shape: vec![m.rows(), m.cols()], data: m.as_slice().to_vec() }
    }

    /// Stack equally shaped matrices into a `[k, r, c]` array.
    pub fn stack(matrices: &[Matrix]) -> Self {
        let (r, c) = matrices.first().map(|m| (m.rows(), m.cols())).unwrap_or((0, 0));
        let mut data = Vec::with_capacity(matrices.len() * r * c);
        for m in matrices {
            debug_assert_eq!((m.rows(), m.cols()), (r, c));
            data.extend_from_slice(m.as_slice());
        }
        Self { shape: vec![matrices.len(), r, c], data }
    }

    fn expected_len(&self) -> usize {
        self.shape.iter().product()
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.expected_len() != self.data.len() {
            return Err(SimilarityError::invalid(format!(
                "field '{}' has shape {:?} but {} values",
                name,
                self.shape,
                self.data.len()
            )));
        }
        Ok(())
    }
}

/// Immutable-by-convention bundle of named arrays produced by an engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature {
    fields: BTreeMap<String, NumericArray>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert used by signature builders.
    pub fn with(mut self, name: impl Into<String>, array: NumericArray) -> Self {
        self.fields.insert(name.into(), array);
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    pub fn get(&self, name: &str) -> Result<&NumericArray> {
        self.fields
            .get(name)
            .ok_or_else(|| SimilarityError::invalid(format!("missing field '{}'", name)))
    }

    pub fn scalar(&self, name: &str) -> Result<f64> {
        let arr = self.get(name)?;
        if !arr.shape.is_empty() || arr.data.len() != 1 {
            return Err(shape_error(name, "a scalar", &arr.shape));
        }
        Ok(arr.data[0])
    }

    pub fn vector(&self, name: &str) -> Result<&[f64]> {
        let arr = self.get(name)?;
        if arr.shape.len() != 1 {
            return Err(shape_error(name, "a vector", &arr.shape));
        }
        arr.validate(name)?;
        Ok(&arr.data)
    }

    pub fn matrix(&self, name: &str) -> Result<Matrix> {
        let arr = self.get(name)?;
        if arr.shape.len() != 2 {
            return Err(shape_error(name, "a matrix", &arr.shape));
        }
        Matrix::from_vec(arr.shape[0], arr.shape[1], arr.data.clone())
            .map_err(|e| e.context(name))
    }

    /// Split a `[k, r, c]` field back into its `k` matrices.
    pub fn matrix_stack(&self, name: &str) -> Result<Vec<Matrix>> {
        let arr = self.get(name)?;
        if arr.shape.len() != 3 {
            return Err(shape_error(name, "a matrix stack", &arr.shape));
        }
        arr.validate(name)?;
        let (r, c) = (arr.shape[1], arr.shape[2]);
        if r * c == 0 {
            return Ok(vec![Matrix::zeros(r, c); arr.shape[0]]);
        }
        arr.data
            .chunks(r * c)
            .map(|chunk| Matrix::from_vec(r, c, chunk.to_vec()))
            .collect()
    }

    /// Prefix every field with `namespace.`.
    pub fn namespaced(self, namespace: &str) -> Signature {
        let fields = self
            .fields
            .into_iter()
            .map(|(k, v)| (format!("{}{}{}", namespace, NAMESPACE_SEPARATOR, k), v))
            .collect();
        Signature { fields }
    }

    /// Fields under `namespace.`, with the prefix removed.
    pub fn scoped(&self, namespace: &str) -> Signature {
        let prefix = format!("{}{}", namespace, NAMESPACE_SEPARATOR);
        let fields = self
            .fields
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|rest| (rest.to_string(), v.clone())))
            .collect();
        Signature { fields }
    }

    /// Union of two signatures. Fails if any key appears in both.
    pub fn merge(mut self, other: Signature) -> Result<Signature> {
        for (k, v) in other.fields {
            if self.fields.contains_key(&k) {
                return Err(SimilarityError::invalid(format!(
                    "field '{}' written by more than one sub-engine",
                    k
                )));
            }
            self.fields.insert(k, v);
        }
        Ok(self)
    }

    /// Serialise to the JSON interchange bundle.
    pub fn to_bundle(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| SimilarityError::invalid(format!("cannot encode bundle: {}", e)))
    }

    /// Parse a JSON bundle, checking every array's shape against its data.
    pub fn from_bundle(json: &str) -> Result<Signature> {
        let sig: Signature = serde_json::from_str(json)
            .map_err(|e| SimilarityError::invalid(format!("cannot decode bundle: {}", e)))?;
        for (name, arr) in &sig.fields {
            arr.validate(name)?;
        }
        Ok(sig)
    }
}

fn shape_error(name: &str, expected: &str, shape: &[usize]) -> SimilarityError {
    SimilarityError::invalid(format!("field '{}' should be {}, has shape {:?}", name, expected, shape))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian_signature() -> Signature {
        Signature::new()
            .with("means", NumericArray::vector(vec![0.0, 1.0]))
            .with("covariance", NumericArray::matrix(&Matrix::identity(2)))
    }

    #[test]
    fn test_typed_accessors() {
        let sig = gaussian_signature().with("tempo", NumericArray::scalar(120.0));
        assert_eq!(sig.vector("means").unwrap(), &[0.0, 1.0]);
        assert_eq!(sig.matrix("covariance").unwrap(), Matrix::identity(2));
        assert_eq!(sig.scalar("tempo").unwrap(), 120.0);
    }

    #[test]
    fn test_wrong_shape_is_invalid_signature() {
        let sig = gaussian_signature();
        assert!(matches!(sig.matrix("means"), Err(SimilarityError::InvalidSignature(_))));
        assert!(matches!(sig.scalar("covariance"), Err(SimilarityError::InvalidSignature(_))));
        assert!(matches!(sig.vector("weights"), Err(SimilarityError::InvalidSignature(_))));
    }

    #[test]
    fn test_matrix_stack_round_trip() {
        let a = Matrix::identity(2);
        let b = Matrix::from_rows(&[vec![2.0, 0.5], vec![0.5, 3.0]]).unwrap();
        let sig = Signature::new().with("covariances", NumericArray::stack(&[a.clone(), b.clone()]));
        assert_eq!(sig.matrix_stack("covariances").unwrap(), vec![a, b]);
    }

    // ==========================================================================
    // NAMESPACING
    // ==========================================================================
    //
    // Compound signatures are the union of their sub-engines' fields, each
    // under its own prefix. Scoping must give back exactly what the
    // sub-engine wrote.
    // ==========================================================================

    #[test]
    fn test_namespace_then_scope_recovers_fields() {
        let original = gaussian_signature();
        let merged = original
            .clone()
            .namespaced("Mandel_Ellis_v01")
            .merge(gaussian_signature().namespaced("other"))
            .unwrap();

        assert_eq!(merged.len(), 4);
        assert!(merged.field_names().any(|n| n == "Mandel_Ellis_v01.means"));
        assert_eq!(merged.scoped("Mandel_Ellis_v01"), original);
        assert!(merged.scoped("missing").is_empty());
    }

    #[test]
    fn test_merge_rejects_collision() {
        let a = gaussian_signature().namespaced("x");
        let b = gaussian_signature().namespaced("x");
        assert!(matches!(a.merge(b), Err(SimilarityError::InvalidSignature(_))));
    }

    #[test]
    fn test_scope_does_not_match_partial_prefix() {
        let sig = gaussian_signature().namespaced("gmm");
        assert!(sig.scoped("gm").is_empty());
    }

    #[test]
    fn test_bundle_round_trip() {
        let sig = gaussian_signature();
        let json = sig.to_bundle().unwrap();
        assert!(json.contains("\"shape\":[2,2]"));
        assert_eq!(Signature::from_bundle(&json).unwrap(), sig);
    }

    #[test]
    fn test_bundle_rejects_inconsistent_shape() {
        let json = r#"{"means": {"shape": [3], "data": [1.0, 2.0]}}"#;
        assert!(matches!(
            Signature::from_bundle(json),
            Err(SimilarityError::InvalidSignature(_))
        ));
        assert!(Signature::from_bundle("not json").is_err());
    }
}
