//! Mel-frequency cepstral coefficients
//!
//! Per frame: Hann window → FFT → power spectrum → triangular mel filterbank
//! → log → DCT-II, keeping the first `n_mfcc` coefficients (c0 included).
//! The result is one row per frame, the feature matrix every engine consumes.

use super::FeatureExtractor;
use crate::error::{Result, SimilarityError};
use crate::linalg::{FeatureMatrix, Matrix};
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

/// Floor for mel energies before the log, so silence stays finite.
const ENERGY_FLOOR: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MfccParams {
    pub n_mfcc: usize,
    pub n_mels: usize,
    pub frame_size: usize,
    pub hop_size: usize,
    pub min_freq: f64,
    /// Upper edge of the filterbank; Nyquist when unset.
    pub max_freq: Option<f64>,
    /// Only the first `max_seconds` of each recording are analysed.
    pub max_seconds: Option<f64>,
}

impl Default for MfccParams {
    fn default() -> Self {
        Self {
            n_mfcc: 20,
            n_mels: 40,
            frame_size: 2048,
            hop_size: 512,
            min_freq: 0.0,
            max_freq: None,
            max_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MfccExtractor {
    params: MfccParams,
}

impl MfccExtractor {
    pub fn new(params: MfccParams) -> Self {
        Self { params }
    }

    fn check_params(&self, sample_rate: u32) -> Result<()> {
        let p = &self.params;
        if p.frame_size < 2 || p.hop_size == 0 || p.n_mels == 0 || p.n_mfcc == 0 {
            return Err(SimilarityError::invalid(format!("unusable MFCC parameters {:?}", p)));
        }
        if p.n_mfcc > p.n_mels {
            return Err(SimilarityError::invalid(format!(
                "{} coefficients requested from {} mel bands",
                p.n_mfcc, p.n_mels
            )));
        }
        if sample_rate == 0 {
            return Err(SimilarityError::invalid("sample rate is zero"));
        }
        Ok(())
    }
}

impl FeatureExtractor for MfccExtractor {
    fn extract(&self, samples: &[f64], sample_rate: u32) -> Result<FeatureMatrix> {
        self.check_params(sample_rate)?;
        let p = &self.params;
        if samples.len() < p.frame_size {
            return Err(SimilarityError::degenerate(format!(
                "{} samples is shorter than one {}-sample frame",
                samples.len(),
                p.frame_size
            )));
        }

        let nyquist = sample_rate as f64 / 2.0;
        let max_freq = p.max_freq.unwrap_or(nyquist).min(nyquist);
        let filters = mel_filterbank(p.n_mels, p.frame_size, sample_rate, p.min_freq, max_freq);
        let dct = dct_matrix(p.n_mfcc, p.n_mels);
        let window = hanning_window(p.frame_size);

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(p.frame_size);

        let num_frames = (samples.len() - p.frame_size) / p.hop_size + 1;
        let mut data = Vec::with_capacity(num_frames * p.n_mfcc);
        let mut buffer = vec![Complex::new(0.0, 0.0); p.frame_size];
        let half = p.frame_size / 2 + 1;

        for frame in 0..num_frames {
            let start = frame * p.hop_size;
            for (slot, (&s, &w)) in buffer
                .iter_mut()
                .zip(samples[start..start + p.frame_size].iter().zip(&window))
            {
                *slot = Complex::new(s * w, 0.0);
            }
            fft.process(&mut buffer);

            let power: Vec<f64> = buffer[..half].iter().map(|c| c.norm_sqr()).collect();
            let log_mel: Vec<f64> = filters
                .iter()
                .map(|filter| {
                    let energy: f64 = filter.iter().zip(&power).map(|(f, p)| f * p).sum();
                    energy.max(ENERGY_FLOOR).ln()
                })
                .collect();

            for row in &dct {
                data.push(row.iter().zip(&log_mel).map(|(d, l)| d * l).sum());
            }
        }

        debug!(frames = num_frames, coefficients = p.n_mfcc, sample_rate, "extracted MFCCs");
        Matrix::from_vec(num_frames, p.n_mfcc, data)
    }
}

fn hanning_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (size - 1) as f64).cos()))
        .collect()
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10.0f64.powf(mel / 2595.0) - 1.0)
}

/// Triangular filters evenly spaced on the mel scale, one weight per FFT bin
/// up to Nyquist. Triangles are evaluated at each bin's centre frequency, so
/// narrow low-frequency filters never collapse to zero width.
fn mel_filterbank(
    num_filters: usize,
    frame_size: usize,
    sample_rate: u32,
    min_freq: f64,
    max_freq: f64,
) -> Vec<Vec<f64>> {
    let bins = frame_size / 2 + 1;
    let bin_hz = sample_rate as f64 / frame_size as f64;
    let (min_mel, max_mel) = (hz_to_mel(min_freq), hz_to_mel(max_freq));

    let edges: Vec<f64> = (0..num_filters + 2)
        .map(|i| mel_to_hz(min_mel + (max_mel - min_mel) * i as f64 / (num_filters + 1) as f64))
        .collect();

    (0..num_filters)
        .map(|m| {
            let (left, centre, right) = (edges[m], edges[m + 1], edges[m + 2]);
            (0..bins)
                .map(|k| {
                    let f = k as f64 * bin_hz;
                    let rising = (f - left) / (centre - left);
                    let falling = (right - f) / (right - centre);
                    rising.min(falling).max(0.0)
                })
                .collect()
        })
        .collect()
}

/// Orthonormal DCT-II rows.
fn dct_matrix(num_coeffs: usize, num_filters: usize) -> Vec<Vec<f64>> {
    let n = num_filters as f64;
    (0..num_coeffs)
        .map(|k| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            (0..num_filters)
                .map(|i| scale * (PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n)).cos())
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sample_rate: u32, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / sample_rate as f64).sin())
            .collect()
    }

    // ==========================================================================
    // BUILDING BLOCKS
    // ==========================================================================

    #[test]
    fn test_hanning_window_shape() {
        let window = hanning_window(101);
        assert!(window[0].abs() < 1e-12);
        assert!(window[100].abs() < 1e-12);
        assert!((window[50] - 1.0).abs() < 1e-12);
        for i in 0..50 {
            assert!((window[i] - window[100 - i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_mel_scale_round_trip() {
        for hz in [0.0, 440.0, 1000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
        // 1000 Hz is ~1000 mel by construction of the scale.
        assert!((hz_to_mel(1000.0) - 1000.0).abs() < 1.0);
    }

    #[test]
    fn test_filterbank_triangles() {
        let filters = mel_filterbank(26, 2048, 22050, 0.0, 11025.0);
        assert_eq!(filters.len(), 26);
        for (m, filter) in filters.iter().enumerate() {
            assert_eq!(filter.len(), 1025);
            assert!(filter.iter().all(|w| (0.0..=1.0).contains(w)));
            assert!(filter.iter().any(|w| *w > 0.0), "filter {} is empty", m);
        }
    }

    #[test]
    fn test_dct_rows_are_orthonormal() {
        let dct = dct_matrix(13, 26);
        for a in 0..13 {
            for b in 0..13 {
                let dot: f64 = dct[a].iter().zip(&dct[b]).map(|(x, y)| x * y).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-10, "rows {} {}: {}", a, b, dot);
            }
        }
    }

    // ==========================================================================
    // EXTRACTION
    // ==========================================================================

    #[test]
    fn test_frame_count_and_width() {
        let extractor = MfccExtractor::default();
        let features = extractor.extract(&sine(440.0, 22050, 22050), 22050).unwrap();
        assert_eq!(features.rows(), (22050 - 2048) / 512 + 1);
        assert_eq!(features.cols(), 20);
        assert!(features.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_silence_stays_finite() {
        let extractor = MfccExtractor::default();
        let features = extractor.extract(&vec![0.0; 4096], 22050).unwrap();
        assert!(features.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_different_tones_give_different_features() {
        let extractor = MfccExtractor::default();
        let low = extractor.extract(&sine(200.0, 22050, 8192), 22050).unwrap().column_means();
        let high = extractor.extract(&sine(5000.0, 22050, 8192), 22050).unwrap().column_means();
        let gap: f64 = low.iter().zip(&high).map(|(a, b)| (a - b).abs()).sum();
        assert!(gap > 1.0, "gap {}", gap);
    }

    #[test]
    fn test_rejects_short_input_and_bad_params() {
        let extractor = MfccExtractor::default();
        assert!(matches!(
            extractor.extract(&[0.1; 100], 22050),
            Err(SimilarityError::DegenerateDistribution(_))
        ));

        let bad = MfccExtractor::new(MfccParams { n_mfcc: 50, ..MfccParams::default() });
        assert!(bad.extract(&[0.0; 4096], 22050).is_err());
        assert!(extractor.extract(&[0.0; 4096], 0).is_err());
    }
}
