//! Quality configuration, loaded once per process.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use pharmaqa_core::{Dimension, QualityThresholds};
use serde::{Deserialize, Serialize};

use crate::alert::AlertingConfig;
use crate::checks::{AccuracyConfig, CompletenessConfig, ConsistencyConfig, UniquenessConfig};
use crate::engine::EngineConfig;
use crate::error::QualityError;

/// Collections each dimension runs over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionPlan(BTreeMap<Dimension, Vec<String>>);

impl CollectionPlan {
    /// Empty plan.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style setter for one dimension.
    pub fn with(mut self, dimension: Dimension, collections: &[&str]) -> Self {
        self.0
            .insert(dimension, collections.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Collections of a dimension (empty when unplanned).
    pub fn for_dimension(&self, dimension: Dimension) -> &[String] {
        self.0.get(&dimension).map(Vec::as_slice).unwrap_or_default()
    }

    /// Plan running every dimension over the same collections.
    pub fn uniform(collections: &[String]) -> Self {
        Self(
            Dimension::ALL
                .into_iter()
                .map(|d| (d, collections.to_vec()))
                .collect(),
        )
    }
}

impl Default for CollectionPlan {
    fn default() -> Self {
        Self::new()
            .with(Dimension::Completeness, &["brands", "trials", "alerts", "regulatory", "patents"])
            .with(Dimension::Accuracy, &["trials", "regulatory", "brands"])
            .with(Dimension::Timeliness, &["brands", "trials", "alerts", "regulatory"])
            .with(Dimension::Consistency, &["brands"])
            .with(Dimension::Uniqueness, &["brands", "trials", "alerts"])
    }
}

/// Timestamp field of each collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimestampFields {
    /// Per-collection field
    pub fields: HashMap<String, String>,

    /// Field of collections not listed above
    pub default: String,
}

impl Default for TimestampFields {
    fn default() -> Self {
        Self {
            fields: HashMap::from([
                ("brands".to_string(), "lastUpdated".to_string()),
                ("alerts".to_string(), "createdAt".to_string()),
            ]),
            default: "processedAt".to_string(),
        }
    }
}

impl TimestampFields {
    /// Timestamp field of a collection.
    pub fn field_for(&self, collection: &str) -> &str {
        self.fields.get(collection).unwrap_or(&self.default)
    }
}

/// Complete configuration of the quality engine.
///
/// Every section has production defaults, so a config file only needs the
/// values it changes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QualityConfig {
    /// Pass thresholds
    pub thresholds: QualityThresholds,

    /// Collections per dimension
    pub collections: CollectionPlan,

    /// Timestamp fields used for freshness and sampling order
    pub timestamps: TimestampFields,

    /// Completeness settings
    pub completeness: CompletenessConfig,

    /// Accuracy settings
    pub accuracy: AccuracyConfig,

    /// Consistency settings
    pub consistency: ConsistencyConfig,

    /// Uniqueness settings
    pub uniqueness: UniquenessConfig,

    /// Orchestrator settings
    pub engine: EngineConfig,

    /// Alert policy and delivery
    pub alerting: AlertingConfig,
}

impl QualityConfig {
    /// Load a JSON config file. Missing sections take their defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, QualityError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            QualityError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|e| {
            QualityError::InvalidConfig(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), QualityError> {
        self.thresholds
            .validate()
            .map_err(|e| QualityError::InvalidConfig(e.to_string()))?;

        if self.engine.timeout_ms == 0 {
            return Err(QualityError::InvalidConfig("engine.timeoutMs must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.alerting.critical_below) {
            return Err(QualityError::InvalidConfig(format!(
                "alerting.criticalBelow must be within [0, 1], got {}",
                self.alerting.critical_below
            )));
        }
        if self.accuracy.sample_size == 0 || self.completeness.sample_limit == 0 {
            return Err(QualityError::InvalidConfig("sample sizes must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_plan() {
        let config = QualityConfig::default();
        assert_eq!(config.collections.for_dimension(Dimension::Completeness).len(), 5);
        assert_eq!(config.collections.for_dimension(Dimension::Consistency), ["brands"]);
        assert_eq!(config.timestamps.field_for("brands"), "lastUpdated");
        assert_eq!(config.timestamps.field_for("trials"), "processedAt");
        assert_eq!(config.completeness.required_for("alerts").len(), 5);
        assert_eq!(config.uniqueness.identity_for("trials"), "id");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: QualityConfig = serde_json::from_value(json!({
            "thresholds": {
                "completeness": 0.8,
                "accuracy": 0.9,
                "timelinessHours": 48,
                "consistency": 0.9,
                "uniqueness": 0.95
            },
            "collections": { "uniqueness": ["patents"] },
            "engine": { "timeoutMs": 5000 }
        }))
        .unwrap();

        assert_eq!(config.thresholds.timeliness_hours, 48);
        assert_eq!(config.collections.for_dimension(Dimension::Uniqueness), ["patents"]);
        assert!(config.collections.for_dimension(Dimension::Accuracy).is_empty());
        assert_eq!(config.engine.timeout_ms, 5000);
        assert!(config.engine.parallel);
        assert_eq!(config.accuracy.sample_size, 50);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = QualityConfig::default();
        config.thresholds.accuracy = 1.5;
        assert!(matches!(config.validate(), Err(QualityError::InvalidConfig(_))));

        let mut config = QualityConfig::default();
        config.engine.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_uniform_plan() {
        let plan = CollectionPlan::uniform(&["trials".to_string()]);
        for dimension in Dimension::ALL {
            assert_eq!(plan.for_dimension(dimension), ["trials"]);
        }
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quality.json");
        tokio::fs::write(&path, r#"{"alerting": {"criticalBelow": 0.4}}"#).await.unwrap();
        let config = QualityConfig::load(&path).await.unwrap();
        assert_eq!(config.alerting.critical_below, 0.4);

        tokio::fs::write(&path, "not json").await.unwrap();
        assert!(QualityConfig::load(&path).await.is_err());
    }
}
