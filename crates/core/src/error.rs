//! Errors raised by the core model.

/// Errors from parsing or validating core types.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    /// Unknown dimension name
    #[error("unknown quality dimension: {0}")]
    UnknownDimension(String),

    /// Unknown check type name
    #[error("unknown check type: {0}")]
    UnknownCheckType(String),

    /// Threshold outside its valid range
    #[error("invalid threshold {name}: {value}")]
    InvalidThreshold {
        /// Threshold name
        name: String,
        /// Offending value
        value: f64,
    },
}
