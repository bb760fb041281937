//! Completeness: share of documents with every required field filled in.

use std::collections::BTreeMap;
use async_trait::async_trait;
use pharmaqa_core::{Dimension, DimensionResult};
use pharmaqa_storage::DocumentStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{ratio, store_failure, CheckContext, Checker};

/// Completeness settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletenessConfig {
    /// Required fields per collection
    pub required_fields: BTreeMap<String, Vec<String>>,

    /// Required fields of collections not listed above
    pub default_required: Vec<String>,

    /// Most documents examined per collection
    pub sample_limit: usize,
}

impl Default for CompletenessConfig {
    fn default() -> Self {
        let fields = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let required_fields = BTreeMap::from([
            ("brands".to_string(), fields(&["id", "name", "manufacturer"])),
            ("trials".to_string(), fields(&["id", "title", "phase", "status", "sponsor"])),
            ("regulatory".to_string(), fields(&["id", "dataType", "brand", "source"])),
            ("patents".to_string(), fields(&["id", "title", "assignee", "filingDate"])),
            ("alerts".to_string(), fields(&["id", "title", "severity", "source", "createdAt"])),
        ]);
        Self {
            required_fields,
            default_required: fields(&["id"]),
            sample_limit: 1000,
        }
    }
}

impl CompletenessConfig {
    /// Required fields of a collection.
    pub fn required_for(&self, collection: &str) -> &[String] {
        self.required_fields
            .get(collection)
            .unwrap_or(&self.default_required)
    }
}

/// Counts documents whose required fields are all present and non-empty.
///
/// There is no partial credit: one missing field makes the document incomplete.
pub struct CompletenessChecker {
    config: CompletenessConfig,
}

impl CompletenessChecker {
    /// Create a checker.
    pub fn new(config: CompletenessConfig) -> Self {
        Self { config }
    }

    async fn check_collection(
        &self,
        collection: &str,
        ctx: &CheckContext,
        store: &dyn DocumentStore,
    ) -> DimensionResult {
        let dimension = Dimension::Completeness;
        let docs = match store.sample(collection, None, self.config.sample_limit).await {
            Ok(docs) => docs,
            Err(e) => return store_failure(dimension, collection, collection, e),
        };

        let required = self.config.required_for(collection);
        let mut complete = 0u64;
        let mut missing: BTreeMap<&str, u64> = BTreeMap::new();
        for doc in &docs {
            let mut is_complete = true;
            for field in required {
                if !doc.has_value(field) {
                    is_complete = false;
                    *missing.entry(field.as_str()).or_default() += 1;
                }
            }
            if is_complete {
                complete += 1;
            }
        }

        let total = docs.len() as u64;
        let score = ratio(complete, total);
        debug!(collection, total, complete, score, "completeness evaluated");

        let missing: Map<String, Value> = missing
            .into_iter()
            .map(|(field, n)| (field.to_string(), json!(n)))
            .collect();
        DimensionResult::scored(dimension, Some(collection.to_string()), score, ctx.threshold(dimension), total)
            .with_detail("requiredFields", json!(required))
            .with_detail("completeDocuments", complete)
            .with_detail("missingFields", Value::Object(missing))
    }
}

#[async_trait]
impl Checker for CompletenessChecker {
    fn dimension(&self) -> Dimension {
        Dimension::Completeness
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
