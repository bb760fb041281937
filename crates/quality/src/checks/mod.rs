//! Quality dimension checkers.
//!
//! Each checker evaluates one dimension over a list of collections and returns
//! one `DimensionResult` per collection. Store errors are folded into the
//! result as a failure; a checker never returns an error and never retries.

mod completeness;
mod accuracy;
mod timeliness;
mod consistency;
mod uniqueness;

pub use completeness::{CompletenessChecker, CompletenessConfig};
pub use accuracy::{AccuracyChecker, AccuracyConfig};
pub use timeliness::TimelinessChecker;
pub use consistency::{ConsistencyChecker, ConsistencyConfig, ConsistencyRule};
pub use uniqueness::{UniquenessChecker, UniquenessConfig};

use async_trait::async_trait;
use pharmaqa_core::{CheckFailure, Dimension, DimensionResult, QualityThresholds, Time};
use pharmaqa_storage::{DocumentStore, StorageError};
use tracing::warn;

/// Read-only inputs shared by the checkers of one run.
#[derive(Debug, Clone)]
pub struct CheckContext {
    /// Thresholds fixed for the run
    pub thresholds: QualityThresholds,

    /// Reference time for freshness windows
    pub now: Time,
}

impl CheckContext {
    /// Context evaluated against the current time.
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self::at(thresholds, chrono::Utc::now())
    }

    /// Context pinned to a given time.
    pub fn at(thresholds: QualityThresholds, now: Time) -> Self {
        Self { thresholds, now }
    }

    /// Threshold of a dimension.
    pub fn threshold(&self, dimension: Dimension) -> f64 {
        self.thresholds.threshold_for(dimension)
    }
}

/// A quality dimension checker.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Dimension this checker evaluates.
    fn dimension(&self) -> Dimension;

    /// Evaluate the given collections.
    async fn run(
        &self,
        collections: &[String],
        ctx: &CheckContext,
        store: &dyn DocumentStore,
    ) -> Vec<DimensionResult>;
}

/// `numerator / denominator`, or 1.0 for an empty denominator.
pub(crate) fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        1.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Record a store error as a failed result.
pub(crate) fn store_failure(
    dimension: Dimension,
    collection: &str,
    failed_collection: &str,
    err: StorageError,
) -> DimensionResult {
    warn!(%dimension, collection = failed_collection, "store query failed: {}", err);
    DimensionResult::failed(
        dimension,
        Some(collection.to_string()),
        CheckFailure::CollectionUnavailable {
            collection: failed_collection.to_string(),
            message: err.to_string(),
        },
    )
}
