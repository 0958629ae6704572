//! Engine registry
//!
//! Identifier → engine lookup. Identifiers are stored with every signature,
//! so once registered an identifier is never rebound.

use super::compound::{CompoundEngine, COMPOUND_ID};
use super::{Engine, GmmEmdEngine, GmmQcdEngine, MandelEllisEngine};
use crate::config::Config;
use crate::error::{Result, SimilarityError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
pub struct EngineRegistry {
    engines: BTreeMap<String, Arc<dyn Engine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in engines, configured from `config`, plus the compound
    /// engine over `config.compound.weights`.
    pub fn with_defaults(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(MandelEllisEngine::new()))?;
        registry.register(Arc::new(GmmEmdEngine::new(config.clustering)))?;
        registry.register(Arc::new(GmmQcdEngine::new(config.clustering)))?;

        let entries = config
            .compound
            .weights
            .iter()
            .map(|(id, weight)| Ok((id.clone(), registry.get(id)?, *weight)))
            .collect::<Result<Vec<_>>>()?;
        registry.register(Arc::new(CompoundEngine::new(COMPOUND_ID, entries)?))?;

        Ok(registry)
    }

    pub fn register(&mut self, engine: Arc<dyn Engine>) -> Result<()> {
        let id = engine.identifier().to_string();
        if self.engines.contains_key(&id) {
            return Err(SimilarityError::DuplicateEngine(id));
        }
        debug!(engine = %id, compound = engine.is_compound(), "registered engine");
        self.engines.insert(id, engine);
        Ok(())
    }

    pub fn get(&self, identifier: &str) -> Result<Arc<dyn Engine>> {
        self.engines
            .get(identifier)
            .cloned()
            .ok_or_else(|| SimilarityError::UnknownEngine(identifier.to_string()))
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.engines.keys().map(|k| k.as_str())
    }

    pub fn engines(&self) -> impl Iterator<Item = &Arc<dyn Engine>> {
        self.engines.values()
    }
}
