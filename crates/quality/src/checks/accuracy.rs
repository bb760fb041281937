//! Accuracy: share of recent documents an injected validator judges correct.

use std::collections::BTreeMap;
use std::sync::Arc;
use async_trait::async_trait;
use chrono::Duration;
use pharmaqa_core::{CheckFailure, Dimension, DimensionResult, Filter};
use pharmaqa_storage::DocumentStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{store_failure, CheckContext, Checker};
use crate::config::TimestampFields;
use crate::validator::{default_rules, AccuracyRule, AccuracyValidator};

/// Inaccurate documents listed in a result's details.
const MAX_REPORTED_FINDINGS: usize = 5;

/// Accuracy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccuracyConfig {
    /// Documents judged per collection, most recent first
    pub sample_size: usize,

    /// Only documents newer than this are sampled
    pub lookback_days: u32,

    /// Rules for the rule-based validator, per collection
    pub rules: BTreeMap<String, Vec<AccuracyRule>>,
}

impl Default for AccuracyConfig {
    fn default() -> Self {
        Self {
            sample_size: 50,
            lookback_days: 7,
            rules: default_rules(),
        }
    }
}

/// Submits a bounded recent sample to an [`AccuracyValidator`].
///
/// Documents the validator cannot judge are excluded from the ratio. When
/// nothing is left to judge the collection fails with `InsufficientSample`.
pub struct AccuracyChecker {
    config: AccuracyConfig,
    timestamps: TimestampFields,
    validator: Arc<dyn AccuracyValidator>,
}

impl AccuracyChecker {
    /// Create a checker.
    pub fn new(
        config: AccuracyConfig,
        timestamps: TimestampFields,
        validator: Arc<dyn AccuracyValidator>,
    ) -> Self {
        Self { config, timestamps, validator }
    }

    async fn check_collection(
        &self,
        collection: &str,
        ctx: &CheckContext,
        store: &dyn DocumentStore,
    ) -> DimensionResult {
        let dimension = Dimension::Accuracy;
        let field = self.timestamps.field_for(collection);
        let since = ctx.now - Duration::days(i64::from(self.config.lookback_days));
        let filter = Filter::since(field, since);

        let docs = match store.sample(collection, Some(&filter), self.config.sample_size).await {
            Ok(docs) => docs,
            Err(e) => return store_failure(dimension, collection, collection, e),
        };

        let mut accurate = 0u64;
        let mut inaccurate = 0u64;
        let mut excluded = 0u64;
        let mut findings: Vec<Value> = Vec::new();
        for doc in &docs {
            match self.validator.judge(collection, doc).await {
                Ok(judgment) if judgment.accurate => accurate += 1,
                Ok(judgment) => {
                    inaccurate += 1;
                    if findings.len() < MAX_REPORTED_FINDINGS {
                        findings.push(json!({
                            "id": doc.key_text("id"),
                            "reason": judgment.reason,
                        }));
                    }
                }
                Err(e) => {
                    excluded += 1;
                    debug!(collection, "document excluded from accuracy: {}", e);
                }
            }
        }

        if excluded > 0 {
            warn!(collection, excluded, sampled = docs.len(), "validator could not judge some documents");
        }

        let judged = accurate + inaccurate;
        if judged == 0 {
            return DimensionResult::failed(
                dimension,
                Some(collection.to_string()),
                CheckFailure::InsufficientSample {
                    collection: collection.to_string(),
                    excluded,
                },
            );
        }

        let score = accurate as f64 / judged as f64;
        debug!(collection, judged, accurate, excluded, score, "accuracy evaluated");

        DimensionResult::scored(dimension, Some(collection.to_string()), score, ctx.threshold(dimension), judged)
            .with_detail("accurateDocuments", accurate)
            .with_detail("excludedDocuments", excluded)
            .with_detail("lookbackDays", self.config.lookback_days)
            .with_detail("inaccurate", findings)
    }
}

#[async_trait]
impl Checker for AccuracyChecker {
    fn dimension(&self) -> Dimension {
        Dimension::Accuracy
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::fixtures;
    use crate::validator::{Judgment, RuleValidator, ValidatorError};
    use pharmaqa_core::Document;
    use pharmaqa_storage::InMemoryStore;

    /// Judges by the `verdict` field: "ok", "bad", anything else is an outage.
    struct ScriptedValidator;

    #[async_trait]
    impl AccuracyValidator for ScriptedValidator {
        async fn judge(&self, _collection: &str, document: &Document) -> Result<Judgment, ValidatorError> {
            match document.text("verdict") {
                Some("ok") => Ok(Judgment::accurate("fine")),
                Some("bad") => Ok(Judgment::inaccurate("wrong")),
                _ => Err(ValidatorError::Unavailable("model timeout".into())),
            }
        }
    }

    fn checker(validator: Arc<dyn AccuracyValidator>) -> AccuracyChecker {
        AccuracyChecker::new(AccuracyConfig::default(), TimestampFields::default(), validator)
    }

    fn scripted(verdicts: &[&str]) -> InMemoryStore {
        InMemoryStore::new().with_default_timestamp_field("processedAt").with_documents(
            "regulatory",
            verdicts.iter().enumerate().map(|(i, v)| {
                Document::new()
                    .with("id", format!("reg-{}", i))
                    .with("verdict", *v)
                    .with("processedAt", fixtures::hours_ago(i as i64 + 1))
            }),
        )
    }

    #[tokio::test]
    async fn test_validator_outages_are_excluded_not_inaccurate() {
        let store = scripted(&["ok", "ok", "ok", "bad", "down", "down"]);
        let results = checker(Arc::new(ScriptedValidator))
            .run(&["regulatory".to_string()], &fixtures::ctx(), &store)
            .await;
        let result = &results[0];
        assert_eq!(result.sample_size, 4);
        assert_eq!(result.score, 0.75);
        assert_eq!(result.details["excludedDocuments"], 2);
        assert_eq!(result.details["inaccurate"][0]["id"], "reg-3");
    }

    #[tokio::test]
    async fn test_all_excluded_is_insufficient_sample() {
        let store = scripted(&["down", "down"]);
        let results = checker(Arc::new(ScriptedValidator))
            .run(&["regulatory".to_string()], &fixtures::ctx(), &store)
            .await;
        assert_eq!(
            results[0].failure,
            Some(CheckFailure::InsufficientSample { collection: "regulatory".into(), excluded: 2 })
        );
    }

    #[tokio::test]
    async fn test_no_recent_documents_is_insufficient_sample() {
        let store = InMemoryStore::new().with_documents(
            "regulatory",
            vec![Document::new().with("id", "old").with("processedAt", fixtures::hours_ago(24 * 30))],
        );
        let results = checker(Arc::new(ScriptedValidator))
            .run(&["regulatory".to_string()], &fixtures::ctx(), &store)
            .await;
        assert!(matches!(
            results[0].failure,
            Some(CheckFailure::InsufficientSample { excluded: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_rule_validator_on_fixture() {
        let validator = RuleValidator::new(&default_rules()).unwrap();
        let results = checker(Arc::new(validator))
            .run(&["brands".to_string()], &fixtures::ctx(), &fixtures::store())
            .await;
        // Tecentriq's riskScore of 152 is out of range.
        let result = &results[0];
        assert_eq!(result.sample_size, 3);
        assert!((result.score - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(result.details["inaccurate"][0]["id"], "tecentriq-1");
    }

    #[tokio::test]
    async fn test_sample_is_bounded() {
        let verdicts = vec!["ok"; 80];
        let store = scripted(&verdicts);
        let results = checker(Arc::new(ScriptedValidator))
            .run(&["regulatory".to_string()], &fixtures::ctx(), &store)
            .await;
        assert_eq!(results[0].sample_size, 50);
    }
}
