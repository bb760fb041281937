//! Consistency: primary entities that have at least one related record.

use std::collections::HashMap;
use async_trait::async_trait;
use pharmaqa_core::{Dimension, DimensionResult, Filter};
use pharmaqa_storage::DocumentStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ratio, store_failure, CheckContext, Checker};

/// Unlinked entities listed in a result's details.
const MAX_REPORTED_ORPHANS: usize = 10;

/// A cross-collection reference: each `primary` entity should be matched by
/// at least one `dependent` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyRule {
    /// Collection of entities to verify
    pub primary: String,

    /// Field holding the join value on the primary side
    pub primary_field: String,

    /// Collection expected to reference the entity
    pub dependent: String,

    /// Field holding the join value on the dependent side
    pub dependent_field: String,

    /// Field used to name unlinked entities in diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_field: Option<String>,

    /// Require exact equality instead of a token match
    #[serde(default)]
    pub exact: bool,
}

impl ConsistencyRule {
    /// `primary.field -> dependent.field`
    pub fn describe(&self) -> String {
        format!(
            "{}.{} -> {}.{}",
            self.primary, self.primary_field, self.dependent, self.dependent_field
        )
    }

    fn related_filter(&self, key: &str) -> Filter {
        if self.exact {
            Filter::term(self.dependent_field.clone(), key)
        } else {
            Filter::matches_text(self.dependent_field.clone(), key)
        }
    }
}

/// Consistency settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsistencyConfig {
    /// Cross-collection rules
    pub rules: Vec<ConsistencyRule>,

    /// Most primary entities examined per rule
    pub entity_limit: usize,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            // Sponsors are usually a subsidiary's legal name ("Merck Sharp &
            // Dohme Corp." for "Merck & Co."), so the default is a token match.
            rules: vec![ConsistencyRule {
                primary: "brands".to_string(),
                primary_field: "manufacturer".to_string(),
                dependent: "trials".to_string(),
                dependent_field: "sponsor".to_string(),
                label_field: Some("name".to_string()),
                exact: false,
            }],
            entity_limit: 100,
        }
    }
}

/// Verifies cross-collection references for each configured rule.
///
/// Collections passed to `run` select rules by their primary collection. An
/// entity without related records is an inconsistency, never an error.
pub struct ConsistencyChecker {
    config: ConsistencyConfig,
}

impl ConsistencyChecker {
    /// Create a checker.
    pub fn new(config: ConsistencyConfig) -> Self {
        Self { config }
    }

    async fn check_rule(
        &self,
        rule: &ConsistencyRule,
        ctx: &CheckContext,
        store: &dyn DocumentStore,
    ) -> DimensionResult {
        let dimension = Dimension::Consistency;
        let entities = match store
            .sample(&rule.primary, Some(&Filter::exists(rule.primary_field.clone())), self.config.entity_limit)
            .await
        {
            Ok(docs) => docs,
            Err(e) => return store_failure(dimension, &rule.primary, &rule.primary, e),
        };

        // Entities sharing a join value share one lookup.
        let mut related: HashMap<String, u64> = HashMap::new();
        let mut linked = 0u64;
        let mut orphans: Vec<String> = Vec::new();
        let mut examined = 0u64;
        for entity in &entities {
            let Some(key) = entity.key_text(&rule.primary_field) else {
                continue;
            };
            examined += 1;

            let count = match related.get(&key) {
                Some(n) => *n,
                None => {
                    let n = match store.count(&rule.dependent, Some(&rule.related_filter(&key))).await {
                        Ok(n) => n,
                        Err(e) => return store_failure(dimension, &rule.primary, &rule.dependent, e),
                    };
                    related.insert(key.clone(), n);
                    n
                }
            };

            if count > 0 {
                linked += 1;
            } else if orphans.len() < MAX_REPORTED_ORPHANS {
                let label = rule
                    .label_field
                    .as_deref()
                    .and_then(|f| entity.key_text(f))
                    .unwrap_or(key);
                orphans.push(label);
            }
        }

        let score = ratio(linked, examined);
        debug!(rule = %rule.describe(), examined, linked, score, "consistency evaluated");

        DimensionResult::scored(dimension, Some(rule.primary.clone()), score, ctx.threshold(dimension), examined)
            .with_detail("rule", rule.describe())
            .with_detail("linkedEntities", linked)
            .with_detail("unlinkedEntities", examined - linked)
            .with_detail("unlinked", orphans)
    }
}

#[async_trait]
impl Checker for ConsistencyChecker {
    fn dimension(&self) -> Dimension {
        Dimension::Consistency
    }

    async fn run(
        &self,
        collections: &[String],
        ctx: &CheckContext,
        store: &dyn DocumentStore,
    ) -> Vec<DimensionResult> {
        let mut results = Vec::new();
        for collection in collections {
            let rules: Vec<&ConsistencyRule> = self
                .config
                .rules
                .iter()
                .filter(|r| &r.primary == collection)
                .collect();
            if rules.is_empty() {
                warn!(collection = %collection, "no consistency rule has this collection as primary");
                continue;
            }
            for rule in rules {
                results.push(self.check_rule(rule, ctx, store).await);
            }
        }
        results
    }
}
