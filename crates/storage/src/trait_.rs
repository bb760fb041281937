//! Storage trait abstractions.

use std::collections::BTreeMap;
use async_trait::async_trait;
use pharmaqa_core::{Alert, Document, Filter, QualityReport, ReportId};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client setup error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backing store could not be reached for a collection
    #[error("collection '{collection}' unavailable: {reason}")]
    CollectionUnavailable {
        /// Collection name
        collection: String,
        /// What went wrong
        reason: String,
    },

    /// Item already written; reports are persisted exactly once
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Shorthand for an unavailable collection.
    pub fn unavailable(collection: &str, reason: impl Into<String>) -> Self {
        StorageError::CollectionUnavailable {
            collection: collection.to_string(),
            reason: reason.into(),
        }
    }
}

/// Queryable document collections.
///
/// This is the only view of the document store the quality checkers get.
/// Collections are addressed by name and never modified through this trait.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Number of documents matching `filter` (all documents when `None`).
    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<u64>;

    /// Up to `limit` matching documents.
    ///
    /// Most recent first when the collection has a timestamp field, otherwise
    /// in a collection-defined order that is stable across calls.
    async fn sample(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<Document>>;

    /// Values of `field` occurring at least `min_count` times, with their counts.
    async fn aggregate_term_counts(
        &self,
        collection: &str,
        field: &str,
        min_count: u64,
    ) -> Result<BTreeMap<String, u64>>;
}

/// Persistence for quality reports and the alerts raised from them.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Persist a report. Fails with `AlreadyExists` if the id was saved before.
    async fn save_report(&self, report: &QualityReport) -> Result<()>;

    /// Load a report by id.
    async fn load_report(&self, id: ReportId) -> Result<Option<QualityReport>>;

    /// All reports, oldest first.
    async fn list_reports(&self) -> Result<Vec<QualityReport>>;

    /// Persist an alert.
    async fn save_alert(&self, alert: &Alert) -> Result<()>;

    /// All alerts, oldest first.
    async fn list_alerts(&self) -> Result<Vec<Alert>>;
}
