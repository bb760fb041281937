//! Uniqueness: share of documents whose identity value is not a repeat.

use std::collections::BTreeMap;
use async_trait::async_trait;
use pharmaqa_core::{Dimension, DimensionResult};
use pharmaqa_storage::DocumentStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{store_failure, CheckContext, Checker};

/// Duplicate groups listed in a result's details.
const MAX_REPORTED_GROUPS: usize = 10;

/// Uniqueness settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UniquenessConfig {
    /// Identity field per collection
    pub identity_fields: BTreeMap<String, String>,

    /// Identity field of collections not listed above
    pub default_identity_field: String,
}

impl Default for UniquenessConfig {
    fn default() -> Self {
        Self {
            identity_fields: BTreeMap::new(),
            default_identity_field: "id".to_string(),
        }
    }
}

impl UniquenessConfig {
    /// Identity field of a collection.
    pub fn identity_for(&self, collection: &str) -> &str {
        self.identity_fields
            .get(collection)
            .unwrap_or(&self.default_identity_field)
    }
}

/// Finds repeated identity values through a term aggregation.
///
/// Only the extra occurrences count: a value seen three times is two duplicates.
pub struct UniquenessChecker {
    config: UniquenessConfig,
}

impl UniquenessChecker {
    /// Create a checker.
    pub fn new(config: UniquenessConfig) -> Self {
        Self { config }
    }

    async fn check_collection(
        &self,
        collection: &str,
        ctx: &CheckContext,
        store: &dyn DocumentStore,
    ) -> DimensionResult {
        let dimension = Dimension::Uniqueness;
        let field = self.config.identity_for(collection);

        let total = match store.count(collection, None).await {
            Ok(n) => n,
            Err(e) => return store_failure(dimension, collection, collection, e),
        };
        let groups = if total == 0 {
            BTreeMap::new()
        } else {
            match store.aggregate_term_counts(collection, field, 2).await {
                Ok(groups) => groups,
                Err(e) => return store_failure(dimension, collection, collection, e),
            }
        };

        let duplicates: u64 = groups.values().map(|n| n.saturating_sub(1)).sum();
        let score = if total == 0 {
            1.0
        } else {
            total.saturating_sub(duplicates) as f64 / total as f64
        };
        debug!(collection, field, total, duplicates, score, "uniqueness evaluated");

        let mut worst: Vec<(&String, &u64)> = groups.iter().collect();
        worst.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let top: Vec<Value> = worst
            .into_iter()
            .take(MAX_REPORTED_GROUPS)
            .map(|(value, count)| json!({ "value": value, "count": count }))
            .collect();

        DimensionResult::scored(dimension, Some(collection.to_string()), score, ctx.threshold(dimension), total)
            .with_detail("identityField", field)
            .with_detail("duplicateGroups", groups.len())
            .with_detail("duplicateCount", duplicates)
            .with_detail("topDuplicates", top)
    }
}

#[async_trait]
impl Checker for UniquenessChecker {
    fn dimension(&self) -> Dimension {
        Dimension::Uniqueness
    }

    async fn run(
        &self,
        collections: &[String],
        ctx: &CheckContext,
        store: &dyn DocumentStore,
    ) -> Vec<DimensionResult> {
        let mut results = Vec::with_capacity(collections.len());
        for collection in collections {
            results.push(self.check_collection(collection, ctx, store).await);
        }
        results
    }
}
