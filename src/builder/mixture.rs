//! Gaussian mixture signatures via K-means
//!
//! # How Mixture Signatures Work
//!
//! A single Gaussian blurs a track with a quiet verse and a loud chorus into
//! one blob. Clustering the frames first keeps those modes apart:
//!
//! 1. **K-means++ seeding**: the first centroid is a random frame, each next
//!    one is drawn with probability proportional to its squared distance from
//!    the nearest centroid so far.
//! 2. **Lloyd iterations**: assign every frame to its nearest centroid,
//!    recompute centroids, repeat until no assignment changes.
//! 3. **Per-cluster Gaussian**: mean and covariance of the member frames,
//!    weighted by the member count.
//!
//! Seeding is the only randomness in the whole pipeline. It draws from a
//! `Pcg32` seeded from the configured seed, so the same features always give
//! the same signature.

use super::{check_features, COVARIANCES, MEANS, WEIGHTS};
use crate::distance::Gaussian;
use crate::error::{Result, SimilarityError};
use crate::linalg::{column_means, sample_covariance, FeatureMatrix, Matrix};
use crate::signature::{NumericArray, Signature};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Clustering parameters. Part of an engine's identity: changing them changes
/// the signature shape or content.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringParams {
    pub clusters: usize,
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self { clusters: 8, max_iterations: 100, seed: 0x5EED_A55E }
    }
}

/// Weighted set of Gaussian components. Weights are frame counts.
#[derive(Debug, Clone)]
pub struct Mixture {
    components: Vec<Gaussian>,
    weights: Vec<f64>,
}

impl Mixture {
    pub fn components(&self) -> &[Gaussian] {
        &self.components
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Weights normalised to sum to one.
    pub fn proportions(&self) -> Vec<f64> {
        let total: f64 = self.weights.iter().sum();
        self.weights.iter().map(|w| w / total).collect()
    }

    pub fn to_signature(&self) -> Signature {
        let dims = self.components.first().map(|g| g.dim()).unwrap_or(0);
        let means: Vec<f64> = self.components.iter().flat_map(|g| g.means().to_vec()).collect();
        let covariances: Vec<Matrix> =
            self.components.iter().map(|g| g.covariance().clone()).collect();

        Signature::new()
            .with(WEIGHTS, NumericArray::vector(self.weights.clone()))
            .with(
                MEANS,
                NumericArray { shape: vec![self.components.len(), dims], data: means },
            )
            .with(COVARIANCES, NumericArray::stack(&covariances))
    }

    pub fn from_signature(sig: &Signature) -> Result<Mixture> {
        let weights = sig.vector(WEIGHTS)?.to_vec();
        let means = sig.matrix(MEANS)?;
        let covariances = sig.matrix_stack(COVARIANCES)?;

        if means.rows() != weights.len() || covariances.len() != weights.len() {
            return Err(SimilarityError::invalid(format!(
                "mixture has {} weights, {} mean rows and {} covariances",
                weights.len(),
                means.rows(),
                covariances.len()
            )));
        }
        if weights.is_empty() {
            return Err(SimilarityError::invalid("mixture has no components"));
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(SimilarityError::invalid("mixture weights must be non-negative"));
        }

        let components = means
            .iter_rows()
            .zip(covariances)
            .enumerate()
            .map(|(c, (m, cov))| {
                Gaussian::new(m.to_vec(), cov).map_err(|e| e.context(&format!("component {}", c)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Mixture { components, weights })
    }
}

/// Cluster the frames and fit one Gaussian per cluster.
pub fn build_mixture(features: &FeatureMatrix, params: &ClusteringParams) -> Result<Mixture> {
    check_features(features)?;
    let k = params.clusters;
    let (frames, dims) = (features.rows(), features.cols());
    if k == 0 {
        return Err(SimilarityError::invalid("mixture needs at least one cluster"));
    }
    if frames < k {
        return Err(SimilarityError::degenerate(format!(
            "{} frames cannot form {} clusters",
            frames, k
        )));
    }

    let assignments = kmeans(features, k, params.max_iterations, params.seed);

    let mut components = Vec::with_capacity(k);
    let mut weights = Vec::with_capacity(k);
    for c in 0..k {
        let members: Vec<&[f64]> = features
            .iter_rows()
            .zip(&assignments)
            .filter(|(_, &a)| a == c)
            .map(|(row, _)| row)
            .collect();

        if members.len() < dims {
            return Err(SimilarityError::degenerate(format!(
                "cluster {} has {} frames for {} dimensions (rank-deficient)",
                c,
                members.len(),
                dims
            )));
        }

        let means = column_means(members.iter().copied(), dims);
        let covariance = sample_covariance(members.iter().copied(), &means);
        let gaussian = Gaussian::new(means, covariance)
            .map_err(|e| e.context(&format!("cluster {} ({} frames)", c, members.len())))?;

        components.push(gaussian);
        weights.push(members.len() as f64);
    }

    Ok(Mixture { components, weights })
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index of the nearest centroid and its squared distance; ties go to the
/// lower index.
fn nearest(row: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (c, centroid) in centroids.iter().enumerate() {
        let d = squared_distance(row, centroid);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

fn kmeans_plus_plus(features: &FeatureMatrix, k: usize, rng: &mut Pcg32) -> Vec<Vec<f64>> {
    let n = features.rows();
    let mut centroids = vec![features.row(rng.gen_range(0..n)).to_vec()];
    let mut closest: Vec<f64> =
        features.iter_rows().map(|r| squared_distance(r, &centroids[0])).collect();

    while centroids.len() < k {
        let total: f64 = closest.iter().sum();
        let pick = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut acc = 0.0;
            let mut chosen = n - 1;
            for (i, d) in closest.iter().enumerate() {
                acc += d;
                if acc >= target && *d > 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        } else {
            // Every frame coincides with a centroid already.
            rng.gen_range(0..n)
        };

        let centroid = features.row(pick).to_vec();
        for (i, row) in features.iter_rows().enumerate() {
            closest[i] = closest[i].min(squared_distance(row, &centroid));
        }
        centroids.push(centroid);
    }
    centroids
}

/// Lloyd's algorithm from k-means++ seeds. Returns one cluster index per frame.
fn kmeans(features: &FeatureMatrix, k: usize, max_iterations: usize, seed: u64) -> Vec<usize> {
    let mut rng = Pcg32::seed_from_u64(seed);
    let dims = features.cols();
    let mut centroids = kmeans_plus_plus(features, k, &mut rng);
    let mut assignments: Vec<usize> = features.iter_rows().map(|r| nearest(r, &centroids).0).collect();

    let mut iterations = 0;
    for _ in 0..max_iterations {
        iterations += 1;

        let mut sums = vec![vec![0.0; dims]; k];
        let mut counts = vec![0usize; k];
        for (row, &c) in features.iter_rows().zip(&assignments) {
            counts[c] += 1;
            for (s, v) in sums[c].iter_mut().zip(row) {
                *s += v;
            }
        }
        for c in 0..k {
            if counts[c] > 0 {
                centroids[c] = sums[c].iter().map(|s| s / counts[c] as f64).collect();
            }
        }

        // An empty cluster takes over the frame worst served by its centroid.
        for c in 0..k {
            if counts[c] == 0 {
                let far = features
                    .iter_rows()
                    .zip(&assignments)
                    .enumerate()
                    .map(|(i, (row, &a))| (i, squared_distance(row, &centroids[a])))
                    .fold((0, f64::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
                centroids[c] = features.row(far.0).to_vec();
                counts[assignments[far.0]] -= 1;
                assignments[far.0] = c;
                counts[c] = 1;
            }
        }

        let next: Vec<usize> = features.iter_rows().map(|r| nearest(r, &centroids).0).collect();
        if next == assignments {
            break;
        }
        assignments = next;
    }

    debug!(clusters = k, frames = features.rows(), iterations, "k-means finished");
    assignments
}
