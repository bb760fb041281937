//! In-memory stores.
//!
//! `InMemoryStore` is the fixture document store used by tests and by the CLI
//! when pointed at a JSON dump; `InMemoryReportStore` keeps reports in a Vec.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use async_trait::async_trait;
use pharmaqa_core::{Alert, Document, Filter, QualityReport, ReportId};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::{DocumentStore, ReportStore, Result, StorageError};

/// Document collections held in memory.
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    timestamp_fields: HashMap<String, String>,
    default_timestamp_field: Option<String>,
    unavailable: RwLock<HashSet<String>>,
    latency: Option<Duration>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            timestamp_fields: HashMap::new(),
            default_timestamp_field: None,
            unavailable: RwLock::new(HashSet::new()),
            latency: None,
        }
    }

    /// Build from a JSON object mapping collection names to arrays of documents.
    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(StorageError::Other(
                "fixture must be an object of collection name to documents".to_string(),
            ));
        };

        let mut store = Self::new();
        for (name, docs) in map {
            let Value::Array(items) = docs else {
                return Err(StorageError::Other(format!(
                    "fixture collection '{}' is not an array",
                    name
                )));
            };
            let docs = items
                .into_iter()
                .filter_map(Document::from_value)
                .collect::<Vec<_>>();
            store = store.with_documents(name, docs);
        }
        Ok(store)
    }

    /// Load a fixture file (see [`InMemoryStore::from_json`]).
    pub async fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(serde_json::from_str(&json)?)
    }

    /// Append documents to a collection.
    pub fn with_documents(
        mut self,
        collection: impl Into<String>,
        docs: impl IntoIterator<Item = Document>,
    ) -> Self {
        self.collections
            .get_mut()
            .entry(collection.into())
            .or_default()
            .extend(docs);
        self
    }

    /// Field used to order samples of one collection, newest first.
    pub fn with_timestamp_field(mut self, collection: impl Into<String>, field: impl Into<String>) -> Self {
        self.timestamp_fields.insert(collection.into(), field.into());
        self
    }

    /// Ordering field for collections without their own.
    pub fn with_default_timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.default_timestamp_field = Some(field.into());
        self
    }

    /// Delay every call, to exercise timeouts.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Add a document at runtime.
    pub async fn insert(&self, collection: &str, doc: Document) {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .push(doc);
    }

    /// Simulate an outage (or recovery) of one collection.
    pub async fn set_unavailable(&self, collection: &str, unavailable: bool) {
        let mut set = self.unavailable.write().await;
        if unavailable {
            set.insert(collection.to_string());
        } else {
            set.remove(collection);
        }
    }

    async fn enter(&self, collection: &str) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.read().await.contains(collection) {
            return Err(StorageError::unavailable(collection, "simulated outage"));
        }
        Ok(())
    }

    fn timestamp_field(&self, collection: &str) -> Option<&str> {
        self.timestamp_fields
            .get(collection)
            .or(self.default_timestamp_field.as_ref())
            .map(String::as_str)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<u64> {
        self.enter(collection).await?;
        let collections = self.collections.read().await;
        let count = collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.map_or(true, |f| f.matches(d))).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn sample(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<Document>> {
        self.enter(collection).await?;
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matching: Vec<&Document> = docs
            .iter()
            .filter(|d| filter.map_or(true, |f| f.matches(d)))
            .collect();

        if let Some(field) = self.timestamp_field(collection) {
            // Stable sort keeps insertion order among equal or missing timestamps.
            matching.sort_by(|a, b| b.timestamp(field).cmp(&a.timestamp(field)));
        }

        debug!(collection, matched = matching.len(), limit, "sampling fixture collection");
        Ok(matching.into_iter().take(limit).cloned().collect())
    }

    async fn aggregate_term_counts(
        &self,
        collection: &str,
        field: &str,
        min_count: u64,
    ) -> Result<BTreeMap<String, u64>> {
        self.enter(collection).await?;
        let collections = self.collections.read().await;
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for doc in collections.get(collection).into_iter().flatten() {
            if let Some(key) = doc.key_text(field) {
                *counts.entry(key).or_default() += 1;
            }
        }
        counts.retain(|_, n| *n >= min_count);
        Ok(counts)
    }
}

/// Reports and alerts kept in memory.
#[derive(Default)]
pub struct InMemoryReportStore {
    reports: Mutex<Vec<QualityReport>>,
    alerts: Mutex<Vec<Alert>>,
}

impl InMemoryReportStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn save_report(&self, report: &QualityReport) -> Result<()> {
        let mut reports = self.reports.lock().await;
        if reports.iter().any(|r| r.id == report.id) {
            return Err(StorageError::AlreadyExists(report.id.to_string()));
        }
        reports.push(report.clone());
        Ok(())
    }

    async fn load_report(&self, id: ReportId) -> Result<Option<QualityReport>> {
        Ok(self.reports.lock().await.iter().find(|r| r.id == id).cloned())
    }

    async fn list_reports(&self) -> Result<Vec<QualityReport>> {
        Ok(self.reports.lock().await.clone())
    }

    async fn save_alert(&self, alert: &Alert) -> Result<()> {
        self.alerts.lock().await.push(alert.clone());
        Ok(())
    }

    async fn list_alerts(&self) -> Result<Vec<Alert>> {
        Ok(self.alerts.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmaqa_core::{CheckType, Verdict};
    use serde_json::json;

    fn trial(id: &str, processed: &str) -> Document {
        Document::new().with("id", id).with("processedAt", processed)
    }

    fn store() -> InMemoryStore {
        InMemoryStore::new()
            .with_default_timestamp_field("processedAt")
            .with_documents(
                "trials",
                vec![
                    trial("NCT00000001", "2026-10-01T00:00:00Z"),
                    trial("NCT00000002", "2026-10-03T00:00:00Z"),
                    Document::new().with("id", "NCT00000003"),
                    trial("NCT00000002", "2026-10-02T00:00:00Z"),
                ],
            )
    }

    #[tokio::test]
    async fn test_count_with_and_without_filter() {
        let store = store();
        assert_eq!(store.count("trials", None).await.unwrap(), 4);
        let filter = Filter::exists("processedAt");
        assert_eq!(store.count("trials", Some(&filter)).await.unwrap(), 3);
        assert_eq!(store.count("patents", None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sample_is_newest_first_and_limited() {
        let store = store();
        let sample = store.sample("trials", None, 3).await.unwrap();
        let stamps: Vec<_> = sample.iter().map(|d| d.text("processedAt")).collect();
        assert_eq!(
            stamps,
            vec![
                Some("2026-10-03T00:00:00Z"),
                Some("2026-10-02T00:00:00Z"),
                Some("2026-10-01T00:00:00Z"),
            ]
        );
    }

    #[tokio::test]
    async fn test_sample_without_timestamp_field_keeps_insertion_order() {
        let store = InMemoryStore::new().with_documents(
            "brands",
            vec![
                Document::new().with("id", "b"),
                Document::new().with("id", "a"),
            ],
        );
        let first = store.sample("brands", None, 10).await.unwrap();
        let second = store.sample("brands", None, 10).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].text("id"), Some("b"));
    }

    #[tokio::test]
    async fn test_aggregate_term_counts_respects_min_count() {
        let counts = store().aggregate_term_counts("trials", "id", 2).await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts.get("NCT00000002"), Some(&2));
    }

    #[tokio::test]
    async fn test_unavailable_collection_errors() {
        let store = store();
        store.set_unavailable("trials", true).await;
        let err = store.count("trials", None).await.unwrap_err();
        assert!(matches!(err, StorageError::CollectionUnavailable { .. }));

        store.set_unavailable("trials", false).await;
        assert!(store.count("trials", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_from_json_fixture() {
        let store = InMemoryStore::from_json(json!({
            "brands": [{"id": "keytruda-1"}, {"id": "opdivo-1"}, "not a document"],
            "alerts": []
        }))
        .unwrap();
        assert_eq!(store.count("brands", None).await.unwrap(), 2);
        assert_eq!(store.count("alerts", None).await.unwrap(), 0);

        assert!(InMemoryStore::from_json(json!({"brands": {}})).is_err());
        assert!(InMemoryStore::from_json(json!([])).is_err());
    }

    #[tokio::test]
    async fn test_report_store_rejects_second_save() {
        let store = InMemoryReportStore::new();
        let report = QualityReport::new(CheckType::Uniqueness, vec![], 1.0, Verdict::Pass);
        store.save_report(&report).await.unwrap();
        assert!(matches!(
            store.save_report(&report).await,
            Err(StorageError::AlreadyExists(_))
        ));
        assert_eq!(store.load_report(report.id).await.unwrap(), Some(report));
    }
}
