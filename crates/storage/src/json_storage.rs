//! JSON file storage for quality reports and alerts.
//!
//! Layout under the root directory:
//! - `reports/{checkType}-{timestamp}.json` - one object per run, with
//!   `-{reportId}` appended when two runs share a timestamp
//! - `index/{reportId}.json` - id index pointing at the report key
//! - `alerts/{alertId}.json` - alerts raised from reports

use std::path::{Path, PathBuf};
use pharmaqa_core::{Alert, AlertId, QualityReport, ReportId};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{ReportStore, Result, StorageError};

/// Entry of the id index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexEntry {
    id: ReportId,
    key: String,
    check_type: String,
    timestamp: pharmaqa_core::Time,
}

/// File-based JSON report store.
pub struct JsonReportStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonReportStore {
    /// Create the store, making the `reports/`, `index/` and `alerts/`
    /// subdirectories if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("reports")).await?;
        fs::create_dir_all(root.join("index")).await?;
        fs::create_dir_all(root.join("alerts")).await?;

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn report_path(&self, key: &str) -> PathBuf {
        self.root.join("reports").join(format!("{}.json", key))
    }
    fn index_path(&self, id: ReportId) -> PathBuf {
        self.root.join("index").join(format!("{}.json", id))
    }
    fn alert_path(&self, id: AlertId) -> PathBuf {
        self.root.join("alerts").join(format!("{}.json", id))
    }
}

#[async_trait::async_trait]
impl ReportStore for JsonReportStore {
    async fn save_report(&self, report: &QualityReport) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let index_path = self.index_path(report.id);
        if fs::try_exists(&index_path).await? {
            return Err(StorageError::AlreadyExists(report.id.to_string()));
        }

        let mut key = report.storage_key();
        if fs::try_exists(self.report_path(&key)).await? {
            // Another run of the same check type in the same millisecond.
            key = format!("{}-{}", key, report.id);
        }
        let path = self.report_path(&key);

        let entry = IndexEntry {
            id: report.id,
            key: key.clone(),
            check_type: report.check_type.to_string(),
            timestamp: report.timestamp,
        };
        let report_json = serde_json::to_string_pretty(report)?;
        let entry_json = serde_json::to_string_pretty(&entry)?;

        write_atomic(&path, report_json.as_bytes()).await?;
        if let Err(e) = write_atomic(&index_path, entry_json.as_bytes()).await {
            if let Err(cleanup) = fs::remove_file(&path).await {
                warn!(path = %path.display(), "failed to remove unindexed report: {}", cleanup);
            }
            return Err(e);
        }

        debug!(report_id = %report.id, key = %key, "stored quality report");
        Ok(())
    }

    async fn load_report(&self, id: ReportId) -> Result<Option<QualityReport>> {
        let Some(entry) = read_json::<IndexEntry>(&self.index_path(id)).await? else {
            return Ok(None);
        };
        match read_json(&self.report_path(&entry.key)).await? {
            Some(report) => Ok(Some(report)),
            None => Err(StorageError::NotFound(format!(
                "report {} is indexed at '{}' but the object is missing",
                id, entry.key
            ))),
        }
    }

    async fn list_reports(&self) -> Result<Vec<QualityReport>> {
        let mut reports = list_dir(&self.root.join("reports")).await?;
        reports.sort_by(|a: &QualityReport, b| a.timestamp.cmp(&b.timestamp));
        Ok(reports)
    }

    async fn save_alert(&self, alert: &Alert) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let json = serde_json::to_string_pretty(alert)?;
        write_atomic(&self.alert_path(alert.id), json.as_bytes()).await?;
        Ok(())
    }

    async fn list_alerts(&self) -> Result<Vec<Alert>> {
        let mut alerts = list_dir(&self.root.join("alerts")).await?;
        alerts.sort_by(|a: &Alert, b| a.created_at.cmp(&b.created_at));
        Ok(alerts)
    }
}

/// Write through a temp file renamed into place, so readers never see a
/// partial object.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json(&entry.path()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => warn!(path = %entry.path().display(), "skipping unreadable file: {}", e),
        }
    }
    Ok(items)
}
