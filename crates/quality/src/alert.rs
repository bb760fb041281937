//! Alert policy: whether a report raises an alert, and how loudly.

use pharmaqa_core::{Alert, AlertId, AlertSeverity, CheckType, QualityReport, QualityThresholds, Verdict};
use serde::{Deserialize, Serialize};

use crate::scorer::dimension_scores;

/// Source recorded on raised alerts.
pub const ALERT_SOURCE: &str = "Data Quality Pipeline";

/// Alert policy and delivery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertingConfig {
    /// Overall scores below this are critical
    pub critical_below: f64,

    /// Worst dimensions named in the alert description
    pub summary_dimensions: usize,

    /// Delivery attempts per sink
    pub delivery_attempts: u32,

    /// Pause between delivery attempts, in milliseconds
    pub retry_backoff_ms: u64,

    /// Webhook receiving alerts as JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            critical_below: 0.5,
            summary_dimensions: 3,
            delivery_attempts: 3,
            retry_backoff_ms: 200,
            webhook_url: None,
        }
    }
}

/// Decides whether a report raises an alert.
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    thresholds: QualityThresholds,
    critical_below: f64,
    summary_dimensions: usize,
}

impl AlertPolicy {
    /// Create a policy.
    pub fn new(thresholds: QualityThresholds, config: &AlertingConfig) -> Self {
        Self {
            thresholds,
            critical_below: config.critical_below,
            summary_dimensions: config.summary_dimensions,
        }
    }

    /// Severity for a report, or `None` when it passed.
    pub fn severity(&self, report: &QualityReport) -> Option<AlertSeverity> {
        match report.verdict {
            Verdict::Pass => None,
            _ if report.overall_score < self.critical_below => Some(AlertSeverity::Critical),
            Verdict::Fail => Some(AlertSeverity::High),
            Verdict::Warn => Some(AlertSeverity::Medium),
        }
    }

    /// Build the alert for a report that did not pass.
    pub fn evaluate(&self, report: &QualityReport) -> Option<Alert> {
        let severity = self.severity(report)?;
        Some(Alert {
            id: AlertId::new(),
            title: format!("Data Quality Issue: {}", title_case(report.check_type)),
            severity,
            related_report_id: report.id,
            description: self.summary(report),
            source: ALERT_SOURCE.to_string(),
            why_it_matters: "Poor data quality can lead to incorrect competitive intelligence \
                             and business decisions."
                .to_string(),
            created_at: chrono::Utc::now(),
        })
    }

    /// One-line diagnosis naming the worst dimensions first.
    pub fn summary(&self, report: &QualityReport) -> String {
        let mut scores = dimension_scores(&report.dimension_results, &self.thresholds);
        scores.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.dimension.cmp(&b.dimension)));

        let worst: Vec<String> = scores
            .iter()
            .take(self.summary_dimensions)
            .map(|d| {
                let marker = if d.meets_threshold() { "meets" } else { "below" };
                format!("{} {:.2} ({} {:.2})", d.dimension, d.score, marker, d.threshold)
            })
            .collect();

        let mut summary = format!(
            "Overall quality score {:.2} ({}). Worst dimensions: {}.",
            report.overall_score,
            report.verdict,
            worst.join(", ")
        );

        let mut unknown: Vec<String> = report
            .failed_results()
            .map(|r| match &r.collection {
                Some(c) => format!("{}/{}", r.dimension, c),
                None => r.dimension.to_string(),
            })
            .collect();
        unknown.dedup();
        if !unknown.is_empty() {
            summary.push_str(&format!(" Not evaluated: {}.", unknown.join(", ")));
        }
        summary
    }
}

fn title_case(check_type: CheckType) -> String {
    let name = check_type.as_str();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
