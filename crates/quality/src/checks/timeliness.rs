//! Timeliness: share of documents refreshed inside the freshness window.

use async_trait::async_trait;
use chrono::Duration;
use pharmaqa_core::{Dimension, DimensionResult, Filter};
use pharmaqa_storage::DocumentStore;
use tracing::debug;

use super::{ratio, store_failure, CheckContext, Checker};
use crate::config::TimestampFields;

/// Compares each collection's timestamp field against `now - timelinessHours`.
pub struct TimelinessChecker {
    timestamps: TimestampFields,
}

impl TimelinessChecker {
    /// Create a checker reading the given timestamp fields.
    pub fn new(timestamps: TimestampFields) -> Self {
        Self { timestamps }
    }

    async fn check_collection(
        &self,
        collection: &str,
        ctx: &CheckContext,
        store: &dyn DocumentStore,
    ) -> DimensionResult {
        let dimension = Dimension::Timeliness;
        let field = self.timestamps.field_for(collection);
        let window_hours = ctx.thresholds.timeliness_hours;
        let cutoff = ctx.now - Duration::hours(i64::from(window_hours));

        let total = match store.count(collection, None).await {
            Ok(n) => n,
            Err(e) => return store_failure(dimension, collection, collection, e),
        };
        let recent = if total == 0 {
            0
        } else {
            match store.count(collection, Some(&Filter::since(field, cutoff))).await {
                Ok(n) => n,
                Err(e) => return store_failure(dimension, collection, collection, e),
            }
        };

        let score = ratio(recent, total);
        debug!(collection, field, total, recent, score, "timeliness evaluated");

        DimensionResult::scored(dimension, Some(collection.to_string()), score, ctx.threshold(dimension), total)
            .with_detail("timestampField", field)
            .with_detail("windowHours", window_hours)
            .with_detail("recentDocuments", recent)
            .with_detail("staleDocuments", total.saturating_sub(recent))
    }
}

#[async_trait]
impl Checker for TimelinessChecker {
    fn dimension(&self) -> Dimension {
        Dimension::Timeliness
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
