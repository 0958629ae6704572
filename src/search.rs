//! Top-K search over a candidate corpus
//!
//! # Pipeline
//!
//! 1. **Load** candidates sequentially from the caller's iterator (typically a
//!    database cursor), at most [`SCORING_CHUNK`] at a time. Load failures
//!    are counted and skipped.
//! 2. **Score** each loaded chunk against the query on the rayon pool, then
//!    drop its signatures before the next chunk is pulled. Only references
//!    and scores outlive a chunk. Comparison failures are counted and skipped.
//! 3. **Fuse** compound scores: each sub-engine's raw scores are replaced by
//!    their 1-based ascending rank over the population, divided by the
//!    population size, and summed with normalised weights. This puts every
//!    sub-engine on the same uniform scale regardless of its distance.
//! 4. **Select** the best `K` with a bounded min-heap.
//! 5. **Standardise** each selected score against the whole population:
//!    the χ² (5 dof) CDF of `(score − mean) / std`.
//!
//! Ties are broken by enumeration order. Rank fusion sorts stably, so equal
//! raw scores take ranks in candidate order; selection keeps the earlier of
//! two equal final scores.

use crate::engine::{Engine, SimilarityScore};
use crate::error::{Result, SimilarityError};
use crate::signature::Signature;
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use tracing::{debug, info, warn};

/// Degrees of freedom of the χ² distribution used for standardisation.
const STANDARDIZATION_DOF: f64 = 5.0;

/// Candidates held in memory at once while scoring.
pub const SCORING_CHUNK: usize = 256;

/// One corpus entry: an opaque reference (track id, path, ...) and its stored
/// signature for the engine being queried.
#[derive(Debug, Clone)]
pub struct Candidate<R> {
    pub reference: R,
    pub signature: Signature,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult<R> {
    pub reference: R,
    /// Raw similarity for atomic engines, fused rank score for compound ones.
    pub similarity: f64,
    /// Corpus-relative score in `[0, 1)`.
    pub standardized: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome<R> {
    /// Best first, at most `K` entries.
    pub results: Vec<RankedResult<R>>,
    /// Candidates that were scored.
    pub population: usize,
    /// Candidates that failed to load or compare.
    pub skipped: usize,
    pub mean: f64,
    pub std_dev: f64,
}

/// Heap entry. "Greater" means better: higher score, then earlier index.
#[derive(Debug, Clone, Copy)]
struct Entry {
    score: f64,
    index: usize,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.index.cmp(&self.index))
    }
}

/// Rank `candidates` by similarity to `query` and return the best `k`.
///
/// Fails with `EmptyCorpus` only when no candidate at all could be scored.
pub fn search<R, I>(
    engine: &dyn Engine,
    query: &Signature,
    candidates: I,
    k: usize,
) -> Result<SearchOutcome<R>>
where
    R: Send,
    I: IntoIterator<Item = Result<Candidate<R>>>,
{
    let mut skipped = 0usize;
    let weights = engine.partial_weights();
    let compound = !weights.is_empty();

    let mut references = Vec::new();
    let mut scores = Vec::new();
    let mut chunk: Vec<Candidate<R>> = Vec::with_capacity(SCORING_CHUNK);
    let mut candidates = candidates.into_iter().enumerate().peekable();

    while candidates.peek().is_some() {
        for (i, candidate) in candidates.by_ref().take(SCORING_CHUNK) {
            match candidate {
                Ok(c) => chunk.push(c),
                Err(e) => {
                    skipped += 1;
                    warn!(candidate = i, error = %e, "skipping candidate that failed to load");
                }
            }
        }

        let measured: Vec<(R, Result<SimilarityScore>)> = chunk
            .par_drain(..)
            .map(|c| {
                let score = engine
                    .measure_similarity(query, &c.signature)
                    .and_then(|s| check_score_shape(s, &weights));
                (c.reference, score)
            })
            .collect();

        for (reference, score) in measured {
            match score {
                Ok(s) => {
                    references.push(Some(reference));
                    scores.push(s);
                }
                Err(e) => {
                    skipped += 1;
                    warn!(engine = engine.identifier(), error = %e, "skipping candidate that failed to compare");
                }
            }
        }
        debug!(scored = scores.len(), skipped, "chunk scored");
    }

    if scores.is_empty() {
        return Err(SimilarityError::EmptyCorpus { skipped });
    }

    let scalars = if compound {
        fuse_ranks(&scores, &weights)
    } else {
        scores.iter().filter_map(SimilarityScore::as_scalar).collect()
    };
    let (mean, std_dev) = mean_and_std(&scalars);

    let mut results = Vec::with_capacity(k.min(scalars.len()));
    for entry in top_k(&scalars, k) {
        if let Some(reference) = references[entry.index].take() {
            results.push(RankedResult {
                reference,
                similarity: entry.score,
                standardized: standardize(entry.score, mean, std_dev),
            });
        }
    }

    info!(
        engine = engine.identifier(),
        population = scalars.len(),
        skipped,
        returned = results.len(),
        "search finished"
    );

    Ok(SearchOutcome { results, population: scalars.len(), skipped, mean, std_dev })
}

/// Atomic engines must return scalars; compound ones a partial score
/// covering every weighted sub-engine.
fn check_score_shape(score: SimilarityScore, weights: &BTreeMap<String, f64>) -> Result<SimilarityScore> {
    match &score {
        SimilarityScore::Scalar(s) if weights.is_empty() && s.is_finite() => {}
        SimilarityScore::Partial(parts) if !weights.is_empty() => {
            let missing = weights
                .keys()
                .find(|key| !parts.get(*key).map_or(false, |v| v.is_finite()));
            if let Some(key) = missing {
                return Err(SimilarityError::invalid(format!(
                    "partial score has no finite value for '{}'",
                    key
                )));
            }
        }
        other => {
            return Err(SimilarityError::invalid(format!("unexpected score shape {:?}", other)))
        }
    }
    Ok(score)
}

/// Replace each sub-engine's raw scores by `rank / n`, then take the
/// weighted sum with weights normalised to one.
///
/// Ranks are 1-based in ascending order, so the best candidate of a
/// sub-engine gets `n / n = 1`. Equal scores keep enumeration order.
pub(crate) fn fuse_ranks(scores: &[SimilarityScore], weights: &BTreeMap<String, f64>) -> Vec<f64> {
    let n = scores.len();
    let total: f64 = weights.values().sum();
    let mut fused = vec![0.0; n];

    for (key, weight) in weights {
        let share = weight / total;
        let raw: Vec<f64> = scores
            .iter()
            .map(|s| match s {
                SimilarityScore::Partial(parts) => parts.get(key).copied().unwrap_or(0.0),
                SimilarityScore::Scalar(v) => *v,
            })
            .collect();

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| raw[a].total_cmp(&raw[b]));
        for (position, &i) in order.iter().enumerate() {
            fused[i] += (position + 1) as f64 / n as f64 * share;
        }
    }

    debug!(population = n, sub_engines = weights.len(), "rank fusion done");
    fused
}

/// Best `k` entries, best first.
fn top_k(scores: &[f64], k: usize) -> Vec<Entry> {
    if k == 0 {
        return Vec::new();
    }
    let mut heap: BinaryHeap<Reverse<Entry>> = BinaryHeap::with_capacity(k + 1);
    for (index, &score) in scores.iter().enumerate() {
        let entry = Entry { score, index };
        if heap.len() < k {
            heap.push(Reverse(entry));
        } else if let Some(Reverse(worst)) = heap.peek() {
            if score > worst.score {
                heap.pop();
                heap.push(Reverse(entry));
            }
        }
    }

    let mut best: Vec<Entry> = heap.into_iter().map(|Reverse(e)| e).collect();
    best.sort_by(|a, b| b.cmp(a));
    best
}

/// Mean and population standard deviation.
///
/// A population of equal scores has a standard deviation of exactly zero,
/// whatever round-off the summation picks up.
fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let Some(&first) = values.first() else {
        return (0.0, 0.0);
    };
    if values.iter().all(|v| *v == first) {
        return (first, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    let std_dev = variance.max(0.0).sqrt();
    if std_dev <= f64::EPSILON * mean.abs().max(1.0) * 8.0 {
        return (mean, 0.0);
    }
    (mean, std_dev)
}

fn standardize(score: f64, mean: f64, std_dev: f64) -> f64 {
    if std_dev > 0.0 {
        chi_squared_cdf((score - mean) / std_dev, STANDARDIZATION_DOF)
    } else {
        0.0
    }
}

// ============================================================================
// χ² distribution
// ============================================================================

/// CDF of the χ² distribution with `dof` degrees of freedom.
pub fn chi_squared_cdf(x: f64, dof: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    regularized_lower_gamma(dof / 2.0, x / 2.0)
}

const GAMMA_EPSILON: f64 = 1e-14;
const GAMMA_MAX_ITERATIONS: usize = 500;

/// `P(a, x) = γ(a, x) / Γ(a)`: power series below `a + 1`, Lentz continued
/// fraction for the upper tail above it.
fn regularized_lower_gamma(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    let log_prefix = a * x.ln() - x - ln_gamma(a);

    if x < a + 1.0 {
        let mut term = 1.0 / a;
        let mut sum = term;
        let mut denom = a;
        for _ in 0..GAMMA_MAX_ITERATIONS {
            denom += 1.0;
            term *= x / denom;
            sum += term;
            if term.abs() < sum.abs() * GAMMA_EPSILON {
                break;
            }
        }
        (sum.ln() + log_prefix).exp().min(1.0)
    } else {
        let tiny = 1e-300;
        let mut b = x + 1.0 - a;
        let mut c = 1.0 / tiny;
        let mut d = 1.0 / b;
        let mut h = d;
        for i in 1..=GAMMA_MAX_ITERATIONS {
            let an = -(i as f64) * (i as f64 - a);
            b += 2.0;
            d = an * d + b;
            if d.abs() < tiny {
                d = tiny;
            }
            c = b + an / c;
            if c.abs() < tiny {
                c = tiny;
            }
            d = 1.0 / d;
            let delta = d * c;
            h *= delta;
            if (delta - 1.0).abs() < GAMMA_EPSILON {
                break;
            }
        }
        (1.0 - (log_prefix.exp() * h)).max(0.0)
    }
}

/// Lanczos approximation (g = 7, n = 9).
fn ln_gamma(x: f64) -> f64 {
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_59,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_571_6e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        // Reflection: Γ(x)Γ(1−x) = π / sin(πx)
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut acc = COEFFICIENTS[0];
    for (i, c) in COEFFICIENTS.iter().enumerate().skip(1) {
        acc += c / (x + i as f64);
    }
    let t = x + 7.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}
