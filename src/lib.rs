//! asse - Audio similarity search over statistical signatures
//!
//! asse summarises each recording's acoustic feature frames as a statistical
//! signature, stores the signatures in SQLite, and ranks a corpus by
//! similarity to a query track.
//!
//! # Overview
//!
//! A recording becomes a matrix of MFCC frames. Frame order is thrown away:
//! what is kept is the *distribution* of the frames, either as one Gaussian
//! or as a small mixture of Gaussians found by K-means. Two recordings are
//! similar when their distributions are close.
//!
//! # Engines
//!
//! 1. **Mandel-Ellis**: one Gaussian per track, compared by symmetric
//!    Kullback-Leibler divergence.
//!
//! 2. **GMM + EMD**: K-means mixtures compared by Earth Mover's Distance,
//!    with symmetric KL between components as the ground distance.
//!
//! 3. **GMM + QCD**: the same mixtures compared by the Quadratic-Chi
//!    cross-bin histogram distance.
//!
//! 4. **Compound**: a weighted blend of the above, fused by rank at search
//!    time so no single distance scale dominates.
//!
//! # Quick Start
//!
//! ```no_run
//! use asse::{extract_file, search, Config, Database, Engine, EngineRegistry, MfccExtractor, SignatureStore};
//!
//! let config = Config::default();
//! let registry = EngineRegistry::with_defaults(&config)?;
//! let engine = registry.get("Mandel_Ellis_v01")?;
//!
//! let extractor = MfccExtractor::new(config.features.clone());
//! let (features, rate) = extract_file("query.flac".as_ref(), &extractor, None)?;
//! let query = engine.extract_signature(&features, rate)?;
//!
//! let db = Database::open_at(&config.database)?;
//! let outcome = search(engine.as_ref(), &query, db.candidates("library", engine.identifier())?, 10)?;
//! for r in &outcome.results {
//!     println!("{:.3} {:.3} {}", r.similarity, r.standardized, r.reference.path);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Standardised Scores
//!
//! Raw similarities are not comparable across queries. Every result also
//! carries a corpus-relative score: the χ² (5 dof) CDF of its z-score within
//! the scored population, a number in `[0, 1)`.
//!
//! # Modules
//!
//! - [`linalg`], [`distance`]: matrices, Cholesky, KL, EMD, QCD
//! - [`builder`]: Gaussian and K-means mixture signature builders
//! - [`signature`]: named numeric arrays and their JSON bundle form
//! - [`engine`]: the `Engine` trait, built-in engines and the registry
//! - [`search`]: top-K ranking, rank fusion and standardisation
//! - [`features`]: audio decoding and MFCC extraction
//! - [`db`], [`schema`]: SQLite signature store
//! - [`report`]: Output formatters (JSON, CSV)

pub mod builder;
pub mod config;
pub mod db;
pub mod distance;
pub mod engine;
pub mod error;
pub mod features;
pub mod linalg;
pub mod report;
pub mod schema;
pub mod search;
pub mod signature;

pub use config::Config;
pub use db::{Database, DbSummary, SignatureStore, TrackRef, CURRENT_SCHEMA};
pub use engine::{CompoundEngine, Engine, EngineRegistry, SimilarityScore};
pub use error::{Result, SimilarityError};
pub use features::{extract_file, FeatureExtractor, MfccExtractor, MfccParams};
pub use linalg::{FeatureMatrix, Matrix};
pub use search::{search, Candidate, RankedResult, SearchOutcome};
pub use signature::{NumericArray, Signature};
