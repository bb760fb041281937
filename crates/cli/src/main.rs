//! pharmaqa CLI - data quality audits for the competitive-intelligence store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pharmaqa_core::{CheckType, ReportId};
use pharmaqa_quality::{
    AccuracyValidator, BasicQualityEngine, CheckRequest, LlmJudgeValidator, QualityConfig,
    QualityEngine, RuleValidator,
};
use pharmaqa_storage::{DocumentStore, InMemoryStore, JsonReportStore, ReportStore, SearchIndexStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pharmaqa")]
#[command(about = "Data quality scoring and alerting for pharma intelligence data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding reports and alerts
    #[arg(long, global = true, default_value = ".pharmaqa")]
    store: PathBuf,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a quality check and print {reportId, overallScore, verdict}
    Run {
        /// completeness, accuracy, timeliness, consistency, uniqueness, quick or comprehensive
        #[arg(long, default_value = "comprehensive")]
        check_type: CheckType,

        /// Restrict every dimension to these collections
        #[arg(long = "collection")]
        collections: Vec<String>,

        /// JSON fixture mapping collection names to documents
        #[arg(long, conflicts_with = "search_url", required_unless_present = "search_url")]
        fixture: Option<PathBuf>,

        /// Search index endpoint
        #[arg(long)]
        search_url: Option<String>,

        /// Search index user
        #[arg(long, requires = "search_password")]
        search_user: Option<String>,

        /// Search index password
        #[arg(long, requires = "search_user")]
        search_password: Option<String>,

        /// Judge accuracy with a language model at this URL instead of rules
        #[arg(long)]
        judge_url: Option<String>,

        /// Model used by the judge
        #[arg(long, default_value = "llama3")]
        judge_model: String,

        /// Also deliver alerts to this webhook
        #[arg(long)]
        webhook: Option<String>,
    },
    /// List stored reports
    Reports,
    /// Print one report
    Show {
        /// Report ID
        id: String,
    },
    /// List raised alerts
    Alerts,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries only results.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Run {
            check_type,
            collections,
            fixture,
            search_url,
            search_user,
            search_password,
            judge_url,
            judge_model,
            webhook,
        } => {
            if webhook.is_some() {
                config.alerting.webhook_url = webhook;
            }

            let store: Arc<dyn DocumentStore> = match (fixture, search_url) {
                (Some(path), _) => Arc::new(fixture_store(&path, &config).await?),
                (None, Some(url)) => {
                    let mut store = SearchIndexStore::new(url, Duration::from_secs(30))?
                        .with_default_timestamp_field(config.timestamps.default.clone());
                    for (collection, field) in &config.timestamps.fields {
                        store = store.with_timestamp_field(collection.clone(), field.clone());
                    }
                    if let (Some(user), Some(password)) = (search_user, search_password) {
                        store = store.with_credentials(user, password);
                    }
                    Arc::new(store)
                }
                (None, None) => anyhow::bail!("either --fixture or --search-url is required"),
            };

            let validator: Arc<dyn AccuracyValidator> = match judge_url {
                Some(url) => Arc::new(LlmJudgeValidator::new(url, judge_model, Duration::from_secs(60))?),
                None => Arc::new(RuleValidator::new(&config.accuracy.rules)?),
            };

            let reports: Arc<dyn ReportStore> = Arc::new(open_reports(&cli.store).await?);
            let engine = BasicQualityEngine::from_config(config, store, reports, validator)?;

            let mut request = CheckRequest::new(check_type);
            if !collections.is_empty() {
                request = request.with_collections(collections);
            }

            let summary = engine
                .run_quality_check(request)
                .await
                .with_context(|| format!("{} quality check failed", check_type))?;
            info!(report_id = %summary.report_id, "run complete");
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Reports => {
            let reports = open_reports(&cli.store).await?.list_reports().await?;
            if reports.is_empty() {
                println!("No reports found.");
            }
            for report in reports {
                let failed = report.failed_results().count();
                println!(
                    "{}  {:<13}  {}  {:.3}  {}{}",
                    report.id,
                    report.check_type,
                    report.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    report.overall_score,
                    report.verdict,
                    if failed > 0 { format!("  ({} failed)", failed) } else { String::new() }
                );
            }
        }
        Commands::Show { id } => {
            let id: ReportId = id.parse().with_context(|| format!("invalid report id: {}", id))?;
            match open_reports(&cli.store).await?.load_report(id).await? {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                None => anyhow::bail!("report not found: {}", id),
            }
        }
        Commands::Alerts => {
            let alerts = open_reports(&cli.store).await?.list_alerts().await?;
            if alerts.is_empty() {
                println!("No alerts raised.");
            }
            for alert in alerts {
                println!(
                    "[{}] {}  {}  report {}\n    {}",
                    alert.severity,
                    alert.created_at.format("%Y-%m-%d %H:%M:%S"),
                    alert.title,
                    alert.related_report_id,
                    alert.description
                );
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn load_config(path: Option<&Path>) -> Result<QualityConfig> {
    match path {
        Some(path) => Ok(QualityConfig::load(path).await?),
        None => Ok(QualityConfig::default()),
    }
}

async fn open_reports(root: &Path) -> Result<JsonReportStore> {
    JsonReportStore::new(root)
        .await
        .with_context(|| format!("cannot open report store at {}", root.display()))
}

async fn fixture_store(path: &Path, config: &QualityConfig) -> Result<InMemoryStore> {
    let mut store = InMemoryStore::load(path)
        .await
        .with_context(|| format!("cannot load fixture {}", path.display()))?
        .with_default_timestamp_field(config.timestamps.default.clone());
    for (collection, field) in &config.timestamps.fields {
        store = store.with_timestamp_field(collection.clone(), field.clone());
    }
    Ok(store)
}
