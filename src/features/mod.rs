//! Acoustic feature extraction
//!
//! Decoding and framing sit outside the similarity core: engines only ever
//! see a [`FeatureMatrix`](crate::linalg::FeatureMatrix). This module is the
//! reference extractor used by the CLI.
//!
//! - [`decode`]: any symphonia-supported file to mono PCM
//! - [`mfcc`]: MFCC frames from PCM

pub mod decode;
pub mod mfcc;

pub use decode::{decode_bytes, decode_file};
pub use mfcc::{MfccExtractor, MfccParams};

use crate::error::Result;
use crate::linalg::FeatureMatrix;
use std::path::Path;

/// PCM samples in, one feature row per frame out.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, samples: &[f64], sample_rate: u32) -> Result<FeatureMatrix>;
}

/// Decode `path` and run `extractor` over it. Returns the features and the
/// sample rate they were computed at.
pub fn extract_file(
    path: &Path,
    extractor: &dyn FeatureExtractor,
    max_seconds: Option<f64>,
) -> Result<(FeatureMatrix, u32)> {
    let (samples, sample_rate) = decode_file(path, max_seconds)?;
    let features = extractor
        .extract(&samples, sample_rate)
        .map_err(|e| e.context(&path.display().to_string()))?;
    Ok((features, sample_rate))
}
