//! Checker registry.

use std::collections::HashMap;
use std::sync::Arc;
use pharmaqa_core::Dimension;

use crate::checks::{
    AccuracyChecker, Checker, CompletenessChecker, ConsistencyChecker, TimelinessChecker,
    UniquenessChecker,
};
use crate::config::QualityConfig;
use crate::validator::AccuracyValidator;

/// Registry holding one checker per dimension.
pub struct CheckerRegistry {
    checkers: HashMap<Dimension, Arc<dyn Checker>>,
}

impl CheckerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            checkers: HashMap::new(),
        }
    }

    /// The five standard checkers built from a config.
    pub fn with_defaults(config: &QualityConfig, validator: Arc<dyn AccuracyValidator>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CompletenessChecker::new(config.completeness.clone())));
        registry.register(Arc::new(AccuracyChecker::new(
            config.accuracy.clone(),
            config.timestamps.clone(),
            validator,
        )));
        registry.register(Arc::new(TimelinessChecker::new(config.timestamps.clone())));
        registry.register(Arc::new(ConsistencyChecker::new(config.consistency.clone())));
        registry.register(Arc::new(UniquenessChecker::new(config.uniqueness.clone())));
        registry
    }

    /// Register a checker, replacing any other for its dimension.
    pub fn register(&mut self, checker: Arc<dyn Checker>) -> Option<Arc<dyn Checker>> {
        self.checkers.insert(checker.dimension(), checker)
    }

    /// Remove the checker of a dimension.
    pub fn unregister(&mut self, dimension: Dimension) -> Option<Arc<dyn Checker>> {
        self.checkers.remove(&dimension)
    }

    /// Checker of a dimension.
    pub fn get(&self, dimension: Dimension) -> Option<Arc<dyn Checker>> {
        self.checkers.get(&dimension).cloned()
    }

    /// Registered dimensions in canonical order.
    pub fn dimensions(&self) -> Vec<Dimension> {
        let mut dimensions: Vec<_> = self.checkers.keys().copied().collect();
        dimensions.sort();
        dimensions
    }
}

impl Default for CheckerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
