//! Quality engine - runs checkers, scores, persists and alerts.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use futures::FutureExt;
use pharmaqa_core::{
    Alert, CheckFailure, CheckType, Dimension, DimensionResult, QualityReport, QualityThresholds,
    ReportId, Verdict,
};
use pharmaqa_storage::{DocumentStore, ReportStore};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::alert::AlertPolicy;
use crate::checks::{CheckContext, Checker};
use crate::config::{CollectionPlan, QualityConfig};
use crate::error::QualityError;
use crate::notify::{AlertDispatcher, LogSink, WebhookSink};
use crate::registry::CheckerRegistry;
use crate::scorer::Scorer;
use crate::validator::AccuracyValidator;

/// Configuration for the quality engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Run-level timeout in milliseconds
    pub timeout_ms: u64,
    /// Run checkers concurrently (otherwise one after another)
    pub parallel: bool,
    /// Extra attempts for a checker whose every result hit a store outage
    pub checker_retries: u32,
    /// Pause before a retry, in milliseconds
    pub retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 120_000,
            parallel: true,
            checker_retries: 1,
            retry_backoff_ms: 250,
        }
    }
}

impl EngineConfig {
    /// Run-level timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Pause before a retry.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Trigger for one quality run.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckRequest {
    /// What to check
    pub check_type: CheckType,
    /// Collections overriding the configured plan for every dimension
    pub collections: Option<Vec<String>>,
}

impl CheckRequest {
    /// Request using the configured collections.
    pub fn new(check_type: CheckType) -> Self {
        Self { check_type, collections: None }
    }

    /// Restrict every dimension to these collections.
    pub fn with_collections(mut self, collections: Vec<String>) -> Self {
        self.collections = Some(collections);
        self
    }
}

/// Externally visible result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Id of the persisted report
    pub report_id: ReportId,
    /// Overall score
    pub overall_score: f64,
    /// Pass, warn or fail
    pub verdict: Verdict,
}

/// How alert delivery went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum NotificationStatus {
    /// The report passed; nothing to send
    NotRequired,
    /// Every sink accepted the alert
    Delivered,
    /// Some sinks never accepted the alert; the report still stands
    #[serde(rename_all = "camelCase")]
    Degraded {
        /// Sinks that failed
        failed_sinks: Vec<String>,
    },
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The persisted report
    pub report: QualityReport,
    /// Alert raised from the report, if any
    pub alert: Option<Alert>,
    /// Alert delivery status
    pub notification: NotificationStatus,
}

impl RunOutcome {
    /// The trigger-contract view of the run.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            report_id: self.report.id,
            overall_score: self.report.overall_score,
            verdict: self.report.verdict,
        }
    }
}

/// Quality engine.
#[async_trait]
pub trait QualityEngine: Send + Sync {
    /// Run the checkers of `check_type` over `plan`, then score, persist the
    /// report and raise an alert when it did not pass.
    async fn run_check(
        &self,
        check_type: CheckType,
        plan: &CollectionPlan,
        thresholds: &QualityThresholds,
    ) -> Result<RunOutcome, QualityError>;

    /// Trigger contract: run with the configured plan and thresholds.
    async fn run_quality_check(&self, request: CheckRequest) -> Result<RunSummary, QualityError>;
}

/// One checker's share of a run.
struct Job {
    dimension: Dimension,
    checker: Arc<dyn Checker>,
    collections: Vec<String>,
}

/// Default quality engine.
pub struct BasicQualityEngine {
    store: Arc<dyn DocumentStore>,
    reports: Arc<dyn ReportStore>,
    registry: CheckerRegistry,
    dispatcher: AlertDispatcher,
    config: QualityConfig,
}

impl BasicQualityEngine {
    /// Create an engine with the standard checkers and a log sink.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        reports: Arc<dyn ReportStore>,
        validator: Arc<dyn AccuracyValidator>,
    ) -> Self {
        let config = QualityConfig::default();
        Self {
            store,
            reports,
            registry: CheckerRegistry::with_defaults(&config, validator),
            dispatcher: AlertDispatcher::new().with_sink(Arc::new(LogSink)),
            config,
        }
    }

    /// Create an engine from a config, adding a webhook sink when one is set.
    pub fn from_config(
        config: QualityConfig,
        store: Arc<dyn DocumentStore>,
        reports: Arc<dyn ReportStore>,
        validator: Arc<dyn AccuracyValidator>,
    ) -> Result<Self, QualityError> {
        config.validate()?;

        let alerting = &config.alerting;
        let mut dispatcher = AlertDispatcher::new()
            .with_sink(Arc::new(LogSink))
            .with_attempts(alerting.delivery_attempts)
            .with_backoff(Duration::from_millis(alerting.retry_backoff_ms));
        if let Some(url) = &alerting.webhook_url {
            let sink = WebhookSink::new(url.clone(), Duration::from_secs(10))
                .map_err(|e| QualityError::InvalidConfig(format!("webhook {}: {}", url, e)))?;
            dispatcher = dispatcher.with_sink(Arc::new(sink));
        }

        Ok(Self {
            store,
            reports,
            registry: CheckerRegistry::with_defaults(&config, validator),
            dispatcher,
            config,
        })
    }

    /// Replace the checker registry.
    pub fn with_registry(mut self, registry: CheckerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the alert dispatcher.
    pub fn with_dispatcher(mut self, dispatcher: AlertDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Set the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config.engine = config;
        self
    }

    /// Effective configuration.
    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Run the checkers and gather their results in canonical order.
    ///
    /// Checkers report through a channel; whatever has not arrived by the
    /// deadline is cancelled and recorded as timed out.
    pub async fn collect(
        &self,
        dimensions: &[Dimension],
        plan: &CollectionPlan,
        ctx: &CheckContext,
    ) -> Vec<DimensionResult> {
        let engine = &self.config.engine;
        let deadline = Instant::now() + engine.timeout();

        let mut slots: BTreeMap<Dimension, Vec<DimensionResult>> = BTreeMap::new();
        let mut jobs = Vec::new();
        for &dimension in dimensions {
            let collections = plan.for_dimension(dimension).to_vec();
            if collections.is_empty() {
                debug!(%dimension, "no collections planned, skipping");
                continue;
            }
            match self.registry.get(dimension) {
                Some(checker) => jobs.push(Job { dimension, checker, collections }),
                None => {
                    warn!(%dimension, "no checker registered");
                    let failure = CheckFailure::Internal {
                        message: format!("no checker registered for {}", dimension),
                    };
                    slots.insert(dimension, failed_all(dimension, &collections, failure));
                }
            }
        }
        let pending: Vec<(Dimension, Vec<String>)> = jobs
            .iter()
            .map(|job| (job.dimension, job.collections.clone()))
            .collect();

        let (tx, mut rx) = mpsc::channel::<(Dimension, Vec<DimensionResult>)>(jobs.len().max(1));
        let mut tasks = JoinSet::new();
        let retries = engine.checker_retries;
        let backoff = engine.retry_backoff();

        if engine.parallel {
            for job in jobs {
                let tx = tx.clone();
                let store = self.store.clone();
                let ctx = ctx.clone();
                tasks.spawn(async move {
                    let results = run_guarded(&job, &ctx, store.as_ref(), retries, backoff).await;
                    let _ = tx.send((job.dimension, results)).await;
                });
            }
        } else {
            let tx = tx.clone();
            let store = self.store.clone();
            let ctx = ctx.clone();
            tasks.spawn(async move {
                for job in jobs {
                    let results = run_guarded(&job, &ctx, store.as_ref(), retries, backoff).await;
                    if tx.send((job.dimension, results)).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let gathered = tokio::time::timeout_at(deadline, async {
            while let Some((dimension, results)) = rx.recv().await {
                // One write per dimension slot.
                slots.entry(dimension).or_insert(results);
            }
        })
        .await;
        let timed_out = gathered.is_err();
        tasks.shutdown().await;

        for (dimension, collections) in pending {
            if slots.contains_key(&dimension) {
                continue;
            }
            let failure = if timed_out {
                warn!(%dimension, timeout_ms = engine.timeout_ms, "checker cancelled at run timeout");
                CheckFailure::Timeout { after_ms: engine.timeout_ms }
            } else {
                error!(%dimension, "checker task ended without reporting");
                CheckFailure::Internal { message: "checker task ended without reporting".into() }
            };
            slots.insert(dimension, failed_all(dimension, &collections, failure));
        }

        slots.into_values().flatten().collect()
    }

    async fn raise_alert(
        &self,
        report: &QualityReport,
        thresholds: &QualityThresholds,
    ) -> (Option<Alert>, NotificationStatus) {
        let policy = AlertPolicy::new(thresholds.clone(), &self.config.alerting);
        let Some(alert) = policy.evaluate(report) else {
            return (None, NotificationStatus::NotRequired);
        };
        info!(alert_id = %alert.id, severity = %alert.severity, "raising quality alert");

        if let Err(e) = self.reports.save_alert(&alert).await {
            warn!(alert_id = %alert.id, "failed to persist alert: {}", e);
        }

        let delivery = self.dispatcher.dispatch(&alert).await;
        let status = if delivery.is_complete() {
            NotificationStatus::Delivered
        } else {
            warn!(alert_id = %alert.id, failed = ?delivery.failed, "alert delivery degraded");
            NotificationStatus::Degraded { failed_sinks: delivery.failed }
        };
        (Some(alert), status)
    }
}

#[async_trait]
impl QualityEngine for BasicQualityEngine {
    async fn run_check(
        &self,
        check_type: CheckType,
        plan: &CollectionPlan,
        thresholds: &QualityThresholds,
    ) -> Result<RunOutcome, QualityError> {
        thresholds.validate()?;
        let ctx = CheckContext::new(thresholds.clone());
        let dimensions = check_type.dimensions();
        info!(%check_type, parallel = self.config.engine.parallel, "starting quality run");

        let results = self.collect(&dimensions, plan, &ctx).await;

        let Some(outcome) = Scorer::new(thresholds.clone()).score(&results) else {
            error!(%check_type, failed = results.len(), "no dimension produced a usable score");
            return Err(QualityError::NoUsableDimensions { check_type, failed: results.len() });
        };

        let report = QualityReport::new(check_type, results, outcome.overall_score, outcome.verdict);
        self.reports.save_report(&report).await?;
        info!(
            report_id = %report.id,
            overall_score = report.overall_score,
            verdict = %report.verdict,
            degraded = report.is_degraded(),
            "quality report stored"
        );

        let (alert, notification) = self.raise_alert(&report, thresholds).await;
        Ok(RunOutcome { report, alert, notification })
    }

    async fn run_quality_check(&self, request: CheckRequest) -> Result<RunSummary, QualityError> {
        let plan = match &request.collections {
            Some(collections) => CollectionPlan::uniform(collections),
            None => self.config.collections.clone(),
        };
        let outcome = self
            .run_check(request.check_type, &plan, &self.config.thresholds)
            .await?;
        Ok(outcome.summary())
    }
}

/// Run one checker, turning a panic into an `Internal` failure and retrying
/// while every result is a store outage.
async fn run_guarded(
    job: &Job,
    ctx: &CheckContext,
    store: &dyn DocumentStore,
    retries: u32,
    backoff: Duration,
) -> Vec<DimensionResult> {
    let mut attempt = 0;
    loop {
        let run = job.checker.run(&job.collections, ctx, store);
        let results = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(results) => results,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(dimension = %job.dimension, "checker panicked: {}", message);
                return failed_all(job.dimension, &job.collections, CheckFailure::Internal { message });
            }
        };

        let retryable = !results.is_empty()
            && results
                .iter()
                .all(|r| r.failure.as_ref().is_some_and(CheckFailure::is_retryable));
        if retryable && attempt < retries {
            attempt += 1;
            warn!(dimension = %job.dimension, attempt, "store unavailable, retrying checker");
            tokio::time::sleep(backoff).await;
            continue;
        }
        debug!(dimension = %job.dimension, results = results.len(), "checker finished");
        return results;
    }
}

fn failed_all(dimension: Dimension, collections: &[String], failure: CheckFailure) -> Vec<DimensionResult> {
    if collections.is_empty() {
        return vec![DimensionResult::failed(dimension, None, failure)];
    }
    collections
        .iter()
        .map(|c| DimensionResult::failed(dimension, Some(c.clone()), failure.clone()))
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "checker panicked".to_string()
    }
}
