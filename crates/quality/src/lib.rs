//! Data quality scoring and alerting.
//!
//! Quality dimension checkers, the scorer, the engine that runs them
//! together, and the alert policy with its delivery sinks.

#![warn(missing_docs)]

pub mod checks;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod scorer;
pub mod validator;
pub mod judge;
pub mod alert;
pub mod notify;

#[cfg(test)]
mod testing;

pub use checks::{CheckContext, Checker};
pub use config::{CollectionPlan, QualityConfig, TimestampFields};
pub use engine::{
    BasicQualityEngine, CheckRequest, EngineConfig, NotificationStatus, QualityEngine, RunOutcome,
    RunSummary,
};
pub use error::QualityError;
pub use registry::CheckerRegistry;
pub use scorer::{DimensionScore, ScoreOutcome, Scorer, FAIL_BELOW};
pub use validator::{AccuracyRule, AccuracyValidator, Judgment, RuleValidator, ValidatorError};
pub use judge::LlmJudgeValidator;
pub use alert::{AlertPolicy, AlertingConfig};
pub use notify::{AlertDispatcher, AlertSink, DispatchReport, LogSink, MemorySink, NotifyError, WebhookSink};
