//! pharmaqa core data models.
//!
//! This crate defines the documents, dimensions, results, reports and alerts
//! shared by the storage and quality crates.

#![warn(missing_docs)]

mod id;
mod error;
mod document;
mod quality;
mod alert;

pub use id::{AlertId, ReportId};
pub use error::CoreError;
pub use document::{Bound, Document, Filter, is_empty_value, parse_timestamp};
pub use quality::{
    CheckFailure, CheckType, Dimension, DimensionResult, QualityReport,
    QualityThresholds, Verdict,
};
pub use alert::{Alert, AlertSeverity};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
