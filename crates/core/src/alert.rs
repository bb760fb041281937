//! Alert model - operator-facing notices raised from quality reports.

use serde::{Deserialize, Serialize};
use crate::id::{AlertId, ReportId};
use crate::Time;

/// Alert severity, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational
    Low,
    /// Below a threshold
    Medium,
    /// Below the failure floor
    High,
    /// Store is badly degraded
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        })
    }
}

/// An alert raised because a report crossed a severity boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Unique identifier
    pub id: AlertId,

    /// One-line headline
    pub title: String,

    /// Severity
    pub severity: AlertSeverity,

    /// Report that triggered the alert
    pub related_report_id: ReportId,

    /// Diagnostic summary, worst dimensions first
    pub description: String,

    /// Producer of the alert
    pub source: String,

    /// Business impact statement
    pub why_it_matters: String,

    /// When raised
    pub created_at: Time,
}
