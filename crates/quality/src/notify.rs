//! Alert delivery: sinks and an at-least-once dispatcher.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use pharmaqa_core::Alert;
use reqwest::{Client, ClientBuilder};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Errors raised while delivering an alert.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The receiver answered with a non-success status
    #[error("sink rejected alert (status {status}): {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// The sink is not accepting alerts
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// A notification destination.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Name used in logs and dispatch reports.
    fn name(&self) -> &str;

    /// Deliver one alert.
    async fn publish(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Emits alerts as structured log events.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn publish(&self, alert: &Alert) -> Result<(), NotifyError> {
        warn!(
            alert_id = %alert.id,
            report_id = %alert.related_report_id,
            severity = %alert.severity,
            "{}: {}",
            alert.title,
            alert.description
        );
        Ok(())
    }
}

/// POSTs alerts as JSON to a webhook.
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    /// Create a sink for `url`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = ClientBuilder::new().timeout(timeout).build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        &self.url
    }

    async fn publish(&self, alert: &Alert) -> Result<(), NotifyError> {
        let response = self.client.post(&self.url).json(alert).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected { status, body });
        }
        debug!(url = %self.url, alert_id = %alert.id, "alert delivered to webhook");
        Ok(())
    }
}

/// Keeps delivered alerts in memory, optionally failing the first attempts.
#[derive(Default)]
pub struct MemorySink {
    alerts: Mutex<Vec<Alert>>,
    failures_remaining: AtomicUsize,
}

impl MemorySink {
    /// Create an always-available sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink that rejects the next `failures` attempts.
    pub fn failing(failures: usize) -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
            failures_remaining: AtomicUsize::new(failures),
        }
    }

    /// Alerts delivered so far.
    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().await.clone()
    }
}

#[async_trait]
impl AlertSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, alert: &Alert) -> Result<(), NotifyError> {
        let rejected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(NotifyError::Unavailable("simulated outage".into()));
        }
        self.alerts.lock().await.push(alert.clone());
        Ok(())
    }
}

/// Outcome of delivering one alert to every sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Sinks that accepted the alert
    pub delivered: Vec<String>,
    /// Sinks that rejected every attempt
    pub failed: Vec<String>,
}

impl DispatchReport {
    /// Whether every sink accepted the alert.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Delivers alerts to every sink, retrying each a bounded number of times.
pub struct AlertDispatcher {
    sinks: Vec<Arc<dyn AlertSink>>,
    attempts: u32,
    backoff: Duration,
}

impl AlertDispatcher {
    /// Create a dispatcher without sinks.
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }

    /// Add a sink.
    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Attempts per sink (at least one).
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Pause between attempts.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Number of configured sinks.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Deliver an alert. Failures are reported, never raised.
    pub async fn dispatch(&self, alert: &Alert) -> DispatchReport {
        let mut report = DispatchReport::default();
        for sink in &self.sinks {
            if self.deliver(sink.as_ref(), alert).await {
                report.delivered.push(sink.name().to_string());
            } else {
                report.failed.push(sink.name().to_string());
            }
        }
        info!(
            alert_id = %alert.id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "alert dispatched"
        );
        report
    }

    async fn deliver(&self, sink: &dyn AlertSink, alert: &Alert) -> bool {
        for attempt in 1..=self.attempts {
            match sink.publish(alert).await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(sink = sink.name(), attempt, max = self.attempts, "alert delivery failed: {}", e);
                    if attempt < self.attempts {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }
        false
    }
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmaqa_core::{AlertId, AlertSeverity, ReportId};

    fn alert() -> Alert {
        Alert {
            id: AlertId::new(),
            title: "Data Quality Issue: Uniqueness".into(),
            severity: AlertSeverity::Medium,
            related_report_id: ReportId::new(),
            description: "uniqueness 0.80".into(),
            source: "Data Quality Pipeline".into(),
            why_it_matters: "duplicates".into(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_retries_until_delivered() {
        let sink = Arc::new(MemorySink::failing(2));
        let dispatcher = AlertDispatcher::new()
            .with_sink(sink.clone())
            .with_attempts(3)
            .with_backoff(Duration::ZERO);

        let alert = alert();
        let report = dispatcher.dispatch(&alert).await;
        assert!(report.is_complete());
        assert_eq!(report.delivered, vec!["memory".to_string()]);
        assert_eq!(sink.alerts().await, vec![alert]);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_are_reported() {
        let flaky = Arc::new(MemorySink::failing(5));
        let healthy = Arc::new(MemorySink::new());
        let dispatcher = AlertDispatcher::new()
            .with_sink(flaky.clone())
            .with_sink(Arc::new(LogSink))
            .with_sink(healthy.clone())
            .with_attempts(2)
            .with_backoff(Duration::ZERO);

        let report = dispatcher.dispatch(&alert()).await;
        assert_eq!(report.failed, vec!["memory".to_string()]);
        assert_eq!(report.delivered, vec!["log".to_string(), "memory".to_string()]);
        assert!(flaky.alerts().await.is_empty());
        assert_eq!(healthy.alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_webhook_fails() {
        let sink = WebhookSink::new("http://127.0.0.1:9/hook", Duration::from_millis(500)).unwrap();
        assert!(sink.publish(&alert()).await.is_err());
    }

    #[tokio::test]
    async fn test_webhook_posts_alert_json() {
        let (url, server) = crate::testing::serve(vec![(200, "{}".into())]).await;
        let sink = WebhookSink::new(format!("{}/hooks/quality", url), Duration::from_secs(5)).unwrap();
        let alert = alert();

        sink.publish(&alert).await.unwrap();
        let requests = server.await.unwrap();
        assert_eq!(requests[0]["id"], serde_json::json!(alert.id.to_string()));
        assert_eq!(requests[0]["title"], "Data Quality Issue: Uniqueness");
    }

    #[tokio::test]
    async fn test_webhook_non_success_is_rejected() {
        let (url, server) = crate::testing::serve(vec![(503, "\"maintenance\"".into())]).await;
        let sink = WebhookSink::new(url, Duration::from_secs(5)).unwrap();

        match sink.publish(&alert()).await.unwrap_err() {
            NotifyError::Rejected { status, body } => {
                assert_eq!(status, 503);
                assert!(body.contains("maintenance"));
            }
            other => panic!("unexpected error: {other}"),
        }
        server.await.unwrap();
    }
}
