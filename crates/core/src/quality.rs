//! Quality model - dimensions, thresholds, results and reports.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::error::CoreError;
use crate::id::ReportId;
use crate::Time;

/// One axis of data quality.
///
/// Declaration order is the canonical report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    /// Required fields are present
    Completeness,
    /// Sampled documents are judged correct
    Accuracy,
    /// Documents were refreshed recently
    Timeliness,
    /// Related records exist across collections
    Consistency,
    /// Identity values are not duplicated
    Uniqueness,
}

impl Dimension {
    /// All dimensions in canonical order.
    pub const ALL: [Dimension; 5] = [
        Dimension::Completeness,
        Dimension::Accuracy,
        Dimension::Timeliness,
        Dimension::Consistency,
        Dimension::Uniqueness,
    ];

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Completeness => "completeness",
            Dimension::Accuracy => "accuracy",
            Dimension::Timeliness => "timeliness",
            Dimension::Consistency => "consistency",
            Dimension::Uniqueness => "uniqueness",
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dimension {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dimension::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::UnknownDimension(s.to_string()))
    }
}

/// What a quality run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    /// Completeness only
    Completeness,
    /// Accuracy only
    Accuracy,
    /// Timeliness only
    Timeliness,
    /// Consistency only
    Consistency,
    /// Uniqueness only
    Uniqueness,
    /// Completeness and consistency
    Quick,
    /// All five dimensions
    Comprehensive,
}

impl CheckType {
    /// Dimensions this check type runs, in canonical order.
    pub fn dimensions(&self) -> Vec<Dimension> {
        match self {
            CheckType::Completeness => vec![Dimension::Completeness],
            CheckType::Accuracy => vec![Dimension::Accuracy],
            CheckType::Timeliness => vec![Dimension::Timeliness],
            CheckType::Consistency => vec![Dimension::Consistency],
            CheckType::Uniqueness => vec![Dimension::Uniqueness],
            CheckType::Quick => vec![Dimension::Completeness, Dimension::Consistency],
            CheckType::Comprehensive => Dimension::ALL.to_vec(),
        }
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::Completeness => "completeness",
            CheckType::Accuracy => "accuracy",
            CheckType::Timeliness => "timeliness",
            CheckType::Consistency => "consistency",
            CheckType::Uniqueness => "uniqueness",
            CheckType::Quick => "quick",
            CheckType::Comprehensive => "comprehensive",
        }
    }
}

impl From<Dimension> for CheckType {
    fn from(dimension: Dimension) -> Self {
        match dimension {
            Dimension::Completeness => CheckType::Completeness,
            Dimension::Accuracy => CheckType::Accuracy,
            Dimension::Timeliness => CheckType::Timeliness,
            Dimension::Consistency => CheckType::Consistency,
            Dimension::Uniqueness => CheckType::Uniqueness,
        }
    }
}

impl std::fmt::Display for CheckType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "quick" => Ok(CheckType::Quick),
            "comprehensive" => Ok(CheckType::Comprehensive),
            other => other
                .parse::<Dimension>()
                .map(CheckType::from)
                .map_err(|_| CoreError::UnknownCheckType(s.to_string())),
        }
    }
}

/// Pass thresholds, fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityThresholds {
    /// Minimum share of complete documents
    pub completeness: f64,
    /// Minimum share of accurate documents
    pub accuracy: f64,
    /// Age (hours) under which a document counts as recent
    pub timeliness_hours: u32,
    /// Minimum share of recent documents
    #[serde(default = "default_timeliness_ratio")]
    pub timeliness_ratio: f64,
    /// Minimum share of entities with related records
    pub consistency: f64,
    /// Minimum share of non-duplicate documents
    pub uniqueness: f64,
}

fn default_timeliness_ratio() -> f64 {
    0.70
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            completeness: 0.85,
            accuracy: 0.90,
            timeliness_hours: 24,
            timeliness_ratio: default_timeliness_ratio(),
            consistency: 0.95,
            uniqueness: 0.98,
        }
    }
}

impl QualityThresholds {
    /// Score a dimension must reach to meet its threshold.
    pub fn threshold_for(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Completeness => self.completeness,
            Dimension::Accuracy => self.accuracy,
            Dimension::Timeliness => self.timeliness_ratio,
            Dimension::Consistency => self.consistency,
            Dimension::Uniqueness => self.uniqueness,
        }
    }

    /// Reject ratios outside `[0, 1]` and a zero freshness window.
    pub fn validate(&self) -> Result<(), CoreError> {
        for dimension in Dimension::ALL {
            let value = self.threshold_for(dimension);
            if !(0.0..=1.0).contains(&value) {
                return Err(CoreError::InvalidThreshold {
                    name: dimension.to_string(),
                    value,
                });
            }
        }
        if self.timeliness_hours == 0 {
            return Err(CoreError::InvalidThreshold {
                name: "timelinessHours".to_string(),
                value: 0.0,
            });
        }
        Ok(())
    }
}

/// Why a checker could not produce a score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CheckFailure {
    /// The document store could not be reached
    #[error("collection '{collection}' unavailable: {message}")]
    CollectionUnavailable {
        /// Collection being queried
        collection: String,
        /// Store error text
        message: String,
    },

    /// Every sampled document was excluded from judgment
    #[error("no judgeable documents in '{collection}' ({excluded} excluded)")]
    #[serde(rename_all = "camelCase")]
    InsufficientSample {
        /// Collection being sampled
        collection: String,
        /// Documents the validator could not judge
        excluded: u64,
    },

    /// The run deadline passed before the checker finished
    #[error("timed out after {after_ms} ms")]
    #[serde(rename_all = "camelCase")]
    Timeout {
        /// Run timeout in milliseconds
        after_ms: u64,
    },

    /// The checker crashed
    #[error("internal checker error: {message}")]
    Internal {
        /// Panic or error text
        message: String,
    },
}

impl CheckFailure {
    /// Store outages may clear up on a retry; the rest will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CheckFailure::CollectionUnavailable { .. })
    }
}

/// Output of one checker for one collection (or for a cross-collection rule).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionResult {
    /// Dimension evaluated
    #[serde(rename = "dimensionName")]
    pub dimension: Dimension,

    /// Collection evaluated, if the check is per-collection
    #[serde(rename = "collectionName")]
    pub collection: Option<String>,

    /// Score in `[0, 1]`; meaningless when `failure` is set
    pub score: f64,

    /// Whether `score` reached the dimension threshold
    pub meets_threshold: bool,

    /// Number of documents or entities examined
    pub sample_size: u64,

    /// Free-form diagnostics
    #[serde(default)]
    pub details: Map<String, Value>,

    /// Set when the checker itself could not run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<CheckFailure>,
}

impl DimensionResult {
    /// A successful evaluation.
    pub fn scored(
        dimension: Dimension,
        collection: Option<String>,
        score: f64,
        threshold: f64,
        sample_size: u64,
    ) -> Self {
        let score = score.clamp(0.0, 1.0);
        Self {
            dimension,
            collection,
            score,
            meets_threshold: score >= threshold,
            sample_size,
            details: Map::new(),
            failure: None,
        }
    }

    /// A checker-level failure. Carries no opinion about quality.
    pub fn failed(dimension: Dimension, collection: Option<String>, failure: CheckFailure) -> Self {
        Self {
            dimension,
            collection,
            score: 0.0,
            meets_threshold: false,
            sample_size: 0,
            details: Map::new(),
            failure: Some(failure),
        }
    }

    /// Attach a diagnostic value.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Whether the result carries a score.
    pub fn is_usable(&self) -> bool {
        self.failure.is_none()
    }

    /// The score, unless the check failed.
    pub fn usable_score(&self) -> Option<f64> {
        self.is_usable().then_some(self.score)
    }
}

/// Three-valued outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Healthy
    Pass,
    /// Above the failure floor but under a threshold
    Warn,
    /// Below the failure floor
    Fail,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Verdict::Pass => "pass",
            Verdict::Warn => "warn",
            Verdict::Fail => "fail",
        })
    }
}

/// Aggregate artifact of one run. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    /// Unique, time-derived id
    pub id: ReportId,

    /// What the run covered
    pub check_type: CheckType,

    /// When the run finished
    pub timestamp: Time,

    /// Results in canonical dimension order
    pub dimension_results: Vec<DimensionResult>,

    /// Mean of the successfully evaluated dimensions
    pub overall_score: f64,

    /// Pass, warn or fail
    pub verdict: Verdict,
}

impl QualityReport {
    /// Build a report stamped with a fresh id and the current time.
    pub fn new(
        check_type: CheckType,
        dimension_results: Vec<DimensionResult>,
        overall_score: f64,
        verdict: Verdict,
    ) -> Self {
        Self {
            id: ReportId::new(),
            check_type,
            timestamp: chrono::Utc::now(),
            dimension_results,
            overall_score,
            verdict,
        }
    }

    /// Object key: `{checkType}-{timestamp}`.
    pub fn storage_key(&self) -> String {
        format!(
            "{}-{}",
            self.check_type,
            self.timestamp.format("%Y%m%dT%H%M%S%.3fZ")
        )
    }

    /// Results whose checker failed.
    pub fn failed_results(&self) -> impl Iterator<Item = &DimensionResult> {
        self.dimension_results.iter().filter(|r| !r.is_usable())
    }

    /// Whether any checker failed during the run.
    pub fn is_degraded(&self) -> bool {
        self.failed_results().next().is_some()
    }
}
