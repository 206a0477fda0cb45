//! Command-line interface of the `reelforge` binary.
//!
//! Every command exits 0 on success. `run` exits 1 when jobs were abandoned
//! or failed, `gate` exits 1 on a FAIL verdict, and any operational error
//! exits 2.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::info;

use reelforge_core::config::DEFAULT_CONFIG_PATH;
use reelforge_core::{
    create_audit_system, load_config, validate_config, AuditEvent, AuditStore, CancelOutcome,
    Config, EpisodePlan, Job, JobFilter, JobState, OrchestratorError, RunSummary, ScoreInputs,
    SqliteAuditStore,
};

use crate::api::create_router;
use crate::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

/// Actor recorded in audit events for commands run from the terminal.
const CLI_ACTOR: &str = "cli";

/// Exit code for operational errors.
pub const EXIT_OPERATIONAL: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "reelforge", version, about = "Generation-job orchestrator for ranked product videos")]
pub struct Cli {
    /// Configuration file
    #[arg(
        long,
        short,
        global = true,
        env = "REELFORGE_CONFIG",
        default_value = DEFAULT_CONFIG_PATH
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the HTTP API and run the dispatch loops
    Serve,

    /// Recover in-flight jobs, drain the queue and print a summary
    Run {
        /// Only drain this backend
        #[arg(long)]
        backend: Option<String>,
    },

    /// Register an episode plan and enqueue its assets
    Enqueue {
        /// Episode plan (TOML)
        plan: PathBuf,
    },

    /// Show jobs
    Status {
        #[arg(long)]
        episode: Option<String>,

        /// Only jobs in this state (e.g. "abandoned")
        #[arg(long)]
        state: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Force-retry an abandoned, failed or cancelled job
    Retry { job_id: String },

    /// Cancel a job
    Cancel {
        job_id: String,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Evaluate the quality gate for an episode revision
    Gate {
        episode: String,

        /// Score inputs (TOML)
        #[arg(long)]
        scores: PathBuf,
    },
}

/// Load configuration, wire the application and run one command.
///
/// Returns the process exit code.
pub async fn run(cli: Cli) -> Result<i32> {
    info!("Loading configuration from {:?}", cli.config);
    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    validate_config(&config).context("Configuration validation failed")?;

    let config_hash = config_hash(&config);

    let audit_store: Arc<dyn AuditStore> = Arc::new(
        SqliteAuditStore::new(&config.database.path).context("Failed to create audit store")?,
    );
    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(audit_writer.run());

    let state = Arc::new(AppState::from_config(
        config,
        audit_handle.clone(),
        audit_store,
    )?);

    let result = match cli.command {
        Command::Serve => serve(Arc::clone(&state), config_hash).await,
        Command::Run { backend } => run_queue(&state, backend).await,
        Command::Enqueue { plan } => enqueue(&state, &plan).await,
        Command::Status {
            episode,
            state: state_filter,
            json,
        } => status(&state, episode, state_filter, json),
        Command::Retry { job_id } => retry(&state, &job_id).await,
        Command::Cancel { job_id, reason } => cancel(&state, &job_id, reason).await,
        Command::Gate { episode, scores } => gate(&state, &episode, &scores).await,
    };

    // Every AuditHandle clone must be gone before the writer's channel closes.
    drop(state);
    drop(audit_handle);
    let _ = writer_handle.await;

    result
}

fn config_hash(config: &Config) -> String {
    let config_json = serde_json::to_string(config).unwrap_or_default();
    let hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    hash[..16].to_string()
}

async fn serve(state: Arc<AppState>, config_hash: String) -> Result<i32> {
    state
        .audit()
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash,
        })
        .await;

    let addr = SocketAddr::new(state.config().server.host, state.config().server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    if state.config().orchestrator.enabled {
        state.orchestrator().start().await;
    } else {
        info!("Orchestrator disabled in config");
    }

    info!("Starting server on {}", addr);
    let served = axum::serve(listener, create_router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    info!("Server shutting down...");
    if state.orchestrator().is_running() {
        state.orchestrator().stop().await;
    }

    state
        .audit()
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    served?;
    Ok(0)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn run_queue(state: &AppState, backend: Option<String>) -> Result<i32> {
    let orchestrator = state.orchestrator();

    let mut summary = match orchestrator.recover().await {
        Ok(summary) => summary,
        Err(OrchestratorError::Halted { backend, reason }) => RunSummary {
            halted: Some(format!("{}: {}", backend, reason)),
            ..Default::default()
        },
        Err(e) => return Err(e).context("Recovery failed"),
    };

    if summary.halted.is_none() {
        let drained = match backend {
            Some(backend) => orchestrator.run_backends_until_idle(&[backend]).await,
            None => orchestrator.run_until_idle().await,
        }
        .context("Dispatch failed")?;
        summary.merge(drained);
    }

    println!("{}", format_summary(&summary));
    Ok(summary.exit_code())
}

fn format_summary(summary: &RunSummary) -> String {
    let mut out = format!(
        "processed {}: {} succeeded ({} salvaged), {} retried, {} abandoned, {} failed, {} cancelled",
        summary.processed,
        summary.succeeded,
        summary.salvaged,
        summary.retried,
        summary.abandoned,
        summary.failed,
        summary.cancelled,
    );
    if summary.recovered > 0 {
        out.push_str(&format!("\nrecovered after restart: {}", summary.recovered));
    }
    if summary.deferred > 0 {
        out.push_str(&format!("\ndeferred by open circuits: {}", summary.deferred));
    }
    if let Some(ref reason) = summary.halted {
        out.push_str(&format!("\nHALTED: {}", reason));
    }
    out
}

async fn enqueue(state: &AppState, path: &Path) -> Result<i32> {
    let plan = EpisodePlan::load(path)?;
    let outcome = state.queue().enqueue_plan(&plan, CLI_ACTOR).await?;

    for job in &outcome.jobs {
        let marker = if job.deduplicated {
            "existing"
        } else {
            "queued"
        };
        println!("{}  {:<8}  {}", job.job_id, marker, job.job.dedup_key);
    }
    println!(
        "episode {}: {} enqueued, {} already active",
        outcome.episode,
        outcome.enqueued(),
        outcome.deduplicated()
    );
    Ok(0)
}

fn status(
    state: &AppState,
    episode: Option<String>,
    state_filter: Option<String>,
    json: bool,
) -> Result<i32> {
    let mut filter = JobFilter::new().with_limit(i64::MAX);
    if let Some(episode) = episode {
        filter = filter.with_episode(episode);
    }
    if let Some(state_type) = state_filter {
        if !JobState::ALL_TYPES.contains(&state_type.as_str()) {
            bail!(
                "unknown job state '{}', expected one of: {}",
                state_type,
                JobState::ALL_TYPES.join(", ")
            );
        }
        filter = filter.with_state(state_type);
    }

    let jobs = state.queue().list(&filter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
    } else {
        print!("{}", format_jobs(&jobs));
    }
    Ok(0)
}

fn format_jobs(jobs: &[Job]) -> String {
    let mut out = format!(
        "{:<36}  {:<20}  {:<10}  {:<16}  {:>8}  {}\n",
        "ID", "EPISODE", "BACKEND", "STATE", "ATTEMPTS", "DETAIL"
    );
    for job in jobs {
        out.push_str(&format!(
            "{:<36}  {:<20}  {:<10}  {:<16}  {:>8}  {}\n",
            job.id,
            job.episode(),
            job.backend(),
            job.state.state_type(),
            job.attempts,
            state_detail(&job.state)
        ));
    }
    out
}

fn state_detail(state: &JobState) -> String {
    match state {
        JobState::Queued => String::new(),
        JobState::Dispatched { submission_key, .. } => format!("submission {}", submission_key),
        JobState::RetryScheduled {
            error, retry_at, ..
        } => format!("retry at {}: {}", retry_at.to_rfc3339(), error),
        JobState::Succeeded {
            artifact, salvaged, ..
        } => {
            let location = artifact.stored_path.as_deref().unwrap_or(&artifact.location);
            if *salvaged {
                format!("{} (salvaged after cancel)", location)
            } else {
                location.to_string()
            }
        }
        JobState::Failed { error, .. } => error.clone(),
        JobState::Abandoned {
            reason,
            error_class,
            ..
        } => format!("{} ({})", reason, error_class),
        JobState::Cancelled {
            cancelled_by,
            reason,
            ..
        } => match reason {
            Some(reason) => format!("by {}: {}", cancelled_by, reason),
            None => format!("by {}", cancelled_by),
        },
    }
}

async fn retry(state: &AppState, job_id: &str) -> Result<i32> {
    let outcome = state.queue().resubmit(job_id, CLI_ACTOR).await?;
    if outcome.deduplicated {
        println!("{} already active as {}", job_id, outcome.job_id);
    } else {
        println!("{} resubmitted as {}", job_id, outcome.job_id);
    }
    Ok(0)
}

async fn cancel(state: &AppState, job_id: &str, reason: Option<String>) -> Result<i32> {
    match state.queue().cancel(job_id, CLI_ACTOR, reason).await? {
        CancelOutcome::Cancelled(job) => println!("{} cancelled", job.id),
        CancelOutcome::Requested(job) => {
            println!("{} is in flight; cancellation requested", job.id)
        }
    }
    Ok(0)
}

async fn gate(state: &AppState, episode: &str, scores: &Path) -> Result<i32> {
    let content = std::fs::read_to_string(scores)
        .with_context(|| format!("Failed to read scores from {:?}", scores))?;
    let inputs = ScoreInputs::from_toml_str(&content)?;

    let manifest = state
        .queue()
        .manifest(episode)?
        .ok_or_else(|| anyhow!("episode not registered: {}", episode))?;

    let result = state.gate().run(&manifest, &inputs).await?;

    println!(
        "{} revision {}: {} (score {:.2}, threshold {:.2})",
        result.episode, result.revision, result.verdict, result.score, result.threshold
    );
    for hard_fail in &result.hard_fails {
        println!("  hard-fail {}: {}", hard_fail, hard_fail.description());
    }
    for missing in &result.missing_assets {
        println!("  missing asset {}", missing);
    }

    Ok(if result.verdict.is_pass() { 0 } else { 1 })
}
