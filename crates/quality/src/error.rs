//! Errors surfaced by quality runs.

use pharmaqa_core::{CheckType, CoreError};
use pharmaqa_storage::StorageError;

/// Errors that abort a quality run.
///
/// Checker-level problems never show up here; they are recorded in the
/// report as `DimensionResult::failure`.
#[derive(Debug, thiserror::Error)]
pub enum QualityError {
    /// Every checker failed, so there is nothing to score
    #[error("no usable dimensions: all {failed} results of the {check_type} run failed")]
    NoUsableDimensions {
        /// Run that produced nothing
        check_type: CheckType,
        /// Number of failed results
        failed: usize,
    },

    /// The report could not be persisted
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration rejected at load time
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Core model error
    #[error(transparent)]
    Core(#[from] CoreError),
}
