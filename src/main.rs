//! # docbatch CLI
//!
//! The `docbatch` binary drives the chunking and batch-inference pipeline
//! from the command line: trigger handling, document processing, job
//! polling, and job inspection.
//!
//! ## Usage
//!
//! ```bash
//! docbatch --config ./config/docbatch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docbatch trigger '<json>'` | Act on a queue-style trigger message |
//! | `docbatch process --project <P>` | Chunk a project's documents and submit one batch |
//! | `docbatch poll` | Advance every known job by one status check |
//! | `docbatch jobs` | List known batch jobs |
//! | `docbatch status <job-id>` | Show one job's persisted metadata |
//!
//! ## Examples
//!
//! ```bash
//! # Count chunks and requests without submitting
//! docbatch process --project CFA009660 --dry-run
//!
//! # Submit, then poll until terminal (e.g. from cron)
//! docbatch process --project CFA009660
//! docbatch poll
//!
//! # Inspect
//! docbatch jobs --project CFA009660
//! docbatch status batch_abc123
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docbatch::batch_api::{BatchService, JobState, OpenAiBatchClient};
use docbatch::categories::Category;
use docbatch::config::{load_config, Config};
use docbatch::models::TriggerMessage;
use docbatch::notify::LogNotifier;
use docbatch::orchestrator::Orchestrator;
use docbatch::pipeline::{handle_trigger, process_project};
use docbatch::store::{FsStore, ObjectStore};
use docbatch::store_s3::S3Store;

/// docbatch CLI — token-bounded chunking and asynchronous batch-inference
/// orchestration for project document analysis.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docbatch.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docbatch",
    about = "docbatch — chunk project documents and orchestrate batch inference jobs",
    version,
    long_about = "docbatch chunks extracted project documents into token-bounded overlapping \
    segments, builds addressable batched inference requests, drives the provider's asynchronous \
    batch job lifecycle, and reconciles JSONL results back to per-chunk records."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docbatch.toml`. Store, chunking, and batch
    /// service settings are read from this file.
    #[arg(long, global = true, default_value = "./config/docbatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Act on a trigger message.
    ///
    /// Takes the same JSON payload a queue binding would deliver
    /// (`{"project_name": ..., "queue_type": ...}`), validates it, and
    /// runs the full process flow for the named project.
    Trigger {
        /// Trigger message as a JSON string.
        message: String,
    },

    /// Chunk a project's documents and submit one batch job.
    ///
    /// Scans extraction output for the project, chunks documents whose
    /// stored chunks are missing or stale, builds one request per
    /// applicable (category, chunk), and submits a single batch job.
    /// Refused while the project already has a job in flight.
    Process {
        /// Project name (e.g. `CFA009660`).
        #[arg(long)]
        project: String,

        /// Only process this document.
        #[arg(long)]
        document: Option<String>,

        /// Restrict requests to one category (`audit`, `product`,
        /// `disbursement`).
        #[arg(long)]
        category: Option<String>,

        /// Chunk and count requests without submitting a job.
        #[arg(long)]
        dry_run: bool,
    },

    /// Advance every known batch job by one status check.
    ///
    /// Stateless: pending work is reconstructed from the store, completed
    /// jobs are reconciled exactly once, dead jobs raise one critical
    /// notification. Safe to run from cron or a timer.
    Poll,

    /// List known batch jobs, newest first.
    Jobs {
        /// Only jobs for this project.
        #[arg(long)]
        project: Option<String>,
    },

    /// Show one job's persisted metadata.
    Status {
        /// Provider job id.
        job_id: String,
    },
}

/// Placeholder for commands that never reach the provider (dry runs,
/// store-only inspection). Any use is a bug.
struct UnavailableService;

#[async_trait]
impl BatchService for UnavailableService {
    async fn upload_input(&self, _jsonl: &str) -> Result<String> {
        bail!("Batch service not configured for this command")
    }
    async fn create_job(&self, _input: &str, _window: &str) -> Result<String> {
        bail!("Batch service not configured for this command")
    }
    async fn job_status(&self, _job_id: &str) -> Result<JobState> {
        bail!("Batch service not configured for this command")
    }
    async fn download_output(&self, _file_id: &str) -> Result<String> {
        bail!("Batch service not configured for this command")
    }
}

fn build_store(config: &Config) -> Result<Box<dyn ObjectStore>> {
    if let Some(ref s3) = config.store.s3 {
        return Ok(Box::new(S3Store::new(s3.clone())?));
    }
    match config.store.root {
        Some(ref root) => Ok(Box::new(FsStore::new(root.clone()))),
        None => bail!("No store backend configured"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    // Correlates all log lines of one run, the way a queue-triggered
    // invocation would carry its invocation id.
    let invocation_id = uuid::Uuid::new_v4();
    tracing::debug!(%invocation_id, "docbatch invocation started");

    let cfg = load_config(&cli.config)?;
    let store = build_store(&cfg)?;
    let notifier = LogNotifier;

    match cli.command {
        Commands::Trigger { message } => {
            let message: TriggerMessage =
                serde_json::from_str(&message).map_err(|e| anyhow::anyhow!(
                    "Invalid trigger message JSON: {}",
                    e
                ))?;
            let service = OpenAiBatchClient::new(cfg.batch.clone())?;
            let report = handle_trigger(store.as_ref(), &service, &notifier, &cfg, &message).await?;
            print_report(&report);
        }
        Commands::Process {
            project,
            document,
            category,
            dry_run,
        } => {
            let category = category.as_deref().map(Category::parse).transpose()?;
            let report = if dry_run {
                process_project(
                    store.as_ref(),
                    &UnavailableService,
                    &notifier,
                    &cfg,
                    &project,
                    document.as_deref(),
                    category,
                    true,
                )
                .await?
            } else {
                let service = OpenAiBatchClient::new(cfg.batch.clone())?;
                process_project(
                    store.as_ref(),
                    &service,
                    &notifier,
                    &cfg,
                    &project,
                    document.as_deref(),
                    category,
                    false,
                )
                .await?
            };
            print_report(&report);
        }
        Commands::Poll => {
            let service = OpenAiBatchClient::new(cfg.batch.clone())?;
            let orchestrator = Orchestrator {
                store: store.as_ref(),
                service: &service,
                notifier: &notifier,
                config: &cfg.batch,
            };
            let report = orchestrator.poll_tick().await?;
            println!(
                "Checked {} job(s): {} completed, {} dead, {} in flight, {} reprocessed, {} error(s)",
                report.checked,
                report.completed,
                report.dead,
                report.in_flight,
                report.reprocessed,
                report.errors
            );
        }
        Commands::Jobs { project } => {
            let orchestrator = Orchestrator {
                store: store.as_ref(),
                service: &UnavailableService,
                notifier: &notifier,
                config: &cfg.batch,
            };
            let infos = orchestrator.job_infos(project.as_deref()).await?;
            if infos.is_empty() {
                println!("No batch jobs found.");
            }
            for info in infos {
                println!(
                    "{}  {}  {}  {} request(s)  created {}",
                    info.job_id,
                    info.project,
                    info.status,
                    info.total_requests,
                    info.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
        }
        Commands::Status { job_id } => {
            let orchestrator = Orchestrator {
                store: store.as_ref(),
                service: &UnavailableService,
                notifier: &notifier,
                config: &cfg.batch,
            };
            let info = orchestrator.job_info(&job_id).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }

    Ok(())
}

fn print_report(report: &docbatch::pipeline::ProcessReport) {
    println!(
        "{} document(s): {} chunked, {} up to date; {} request(s)",
        report.documents, report.chunked, report.skipped, report.requests
    );
    match (&report.job_id, report.submitted) {
        (Some(job_id), true) => println!("Submitted batch job {}", job_id),
        (Some(job_id), false) => {
            println!("Not submitted: job {} is already pending for this project", job_id)
        }
        (None, _) => println!("No batch job submitted."),
    }
}
