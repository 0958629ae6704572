//! TOML configuration
//!
//! Every field has a default, so an empty file (or no file at all) is a valid
//! configuration. CLI flags override the handful of top-level settings.
//!
//! ```toml
//! database = "corpus.db"
//! default_engine = "GMM_EMD_v01"
//! results = 20
//!
//! [features]
//! n_mfcc = 20
//! frame_size = 2048
//!
//! [clustering]
//! clusters = 8
//! seed = 42
//!
//! [compound.weights]
//! Mandel_Ellis_v01 = 1.0
//! GMM_EMD_v01 = 2.0
//! ```

use crate::builder::ClusteringParams;
use crate::engine::gmm::{GMM_EMD_ID, GMM_QCD_ID};
use crate::engine::mandel_ellis::MANDEL_ELLIS_ID;
use crate::features::MfccParams;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database holding tracks and signatures.
    pub database: PathBuf,
    pub default_engine: String,
    /// Number of results returned by a search.
    pub results: usize,
    /// Worker threads for indexing and scoring; 0 lets rayon decide.
    pub jobs: usize,
    pub features: MfccParams,
    pub clustering: ClusteringParams,
    pub compound: CompoundConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("asse.db"),
            default_engine: MANDEL_ELLIS_ID.to_string(),
            results: 10,
            jobs: 0,
            features: MfccParams::default(),
            clustering: ClusteringParams::default(),
            compound: CompoundConfig::default(),
        }
    }
}

/// Weights of the built-in compound engine, keyed by sub-engine identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompoundConfig {
    pub weights: BTreeMap<String, f64>,
}

impl Default for CompoundConfig {
    fn default() -> Self {
        let weights = [MANDEL_ELLIS_ID, GMM_EMD_ID, GMM_QCD_ID]
            .iter()
            .map(|id| (id.to_string(), 1.0))
            .collect();
        Self { weights }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Load `path` if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.compound.weights.len(), 3);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            results = 25

            [clustering]
            clusters = 4

            [compound.weights]
            GMM_EMD_v01 = 3.0
            "#,
        )
        .unwrap();

        assert_eq!(config.results, 25);
        assert_eq!(config.clustering.clusters, 4);
        assert_eq!(config.clustering.max_iterations, ClusteringParams::default().max_iterations);
        assert_eq!(config.features, MfccParams::default());
        // A weights table replaces the default table entirely.
        assert_eq!(config.compound.weights.len(), 1);
        assert_eq!(config.compound.weights[GMM_EMD_ID], 3.0);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_engine = \"GMM_QCD_v01\"").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.default_engine, GMM_QCD_ID);
    }

    #[test]
    fn test_load_reports_path_on_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "results = \"many\"").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));

        assert!(Config::load(Path::new("/nonexistent/asse.toml")).is_err());
        assert_eq!(Config::load_or_default(None).unwrap(), Config::default());
    }
}
