mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands, ConfigCommand, DlqCommand, WorkerCommand};
use queuectl_core::clock::{to_iso, Clock, SystemClock};
use queuectl_core::config::resolve_db_path;
use queuectl_core::error::QueueError;
use queuectl_core::executor::ShellExecutor;
use queuectl_core::model::{JobState, NewJob};
use queuectl_core::render;
use queuectl_core::store::Store;
use queuectl_core::supervisor::Supervisor;
use queuectl_core::worker::WorkerRuntime;

#[derive(serde::Deserialize)]
struct JobSubmission {
    id: Option<String>,
    command: String,
    max_retries: Option<i64>,
    run_at: Option<String>,
    priority: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,queuectl=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let db_path = resolve_db_path();
    let store = Store::connect(&db_path).await.context("failed to open store")?;

    match cli.command {
        Commands::Enqueue { job_json } => cmd_enqueue(&store, &job_json).await,
        Commands::List { state } => cmd_list(&store, state).await,
        Commands::Status => cmd_status(&store).await,
        Commands::Config { command } => match command {
            ConfigCommand::Get => cmd_config_get(&store).await,
            ConfigCommand::Set { key, value } => cmd_config_set(&store, &key, &value).await,
        },
        Commands::Worker { command } => match command {
            WorkerCommand::Start { count } => cmd_worker_start(store, db_path, count).await,
            WorkerCommand::Stop => cmd_worker_stop(&store).await,
        },
        Commands::Dlq { command } => match command {
            DlqCommand::List => cmd_dlq_list(&store).await,
            DlqCommand::Retry { job_id } => cmd_dlq_retry(&store, &job_id).await,
        },
        Commands::WorkerRun { worker_id } => cmd_worker_run(store, worker_id).await,
    }
}

async fn cmd_enqueue(store: &Store, job_json: &str) -> Result<()> {
    let submission: JobSubmission = serde_json::from_str(job_json).map_err(QueueError::InvalidJson)?;

    if submission.command.trim().is_empty() {
        return Err(QueueError::MissingCommand.into());
    }

    let cfg = store.get_config().await?;
    let default_max_retries: i64 = cfg.get("max_retries").and_then(|v| v.parse().ok()).unwrap_or(3);

    let now = Utc::now();
    let created_at = to_iso(now);
    let id = submission.id.unwrap_or_else(|| format!("job-{}", now.timestamp()));
    let due_at = submission.run_at.unwrap_or_else(|| created_at.clone());

    store
        .insert_job(NewJob {
            id: id.clone(),
            command: submission.command,
            max_retries: submission.max_retries.unwrap_or(default_max_retries),
            priority: submission.priority.unwrap_or(0),
            due_at,
            created_at,
        })
        .await?;

    println!("Enqueued job {id}");
    Ok(())
}

async fn cmd_list(store: &Store, state: Option<String>) -> Result<()> {
    let state = state.map(|s| s.parse::<JobState>()).transpose().map_err(anyhow::Error::msg)?;
    let jobs = store.list_jobs(state).await?;
    render::print_jobs(&jobs);
    Ok(())
}

async fn cmd_status(store: &Store) -> Result<()> {
    let counts = store.count_by_state().await?;
    let workers = store.list_workers_not_stopped().await?;
    render::print_status(&counts, &workers);
    Ok(())
}

async fn cmd_config_get(store: &Store) -> Result<()> {
    let cfg = store.get_config().await?;
    render::print_config(&cfg);
    Ok(())
}

async fn cmd_config_set(store: &Store, key: &str, value: &str) -> Result<()> {
    store.set_config(key, value).await?;
    println!("Set {key} = {value}");
    Ok(())
}

async fn cmd_worker_start(store: Store, db_path: String, count: usize) -> Result<()> {
    let supervisor = Supervisor::new(store, db_path);
    supervisor.start_workers(count).await
}

async fn cmd_worker_stop(store: &Store) -> Result<()> {
    // A freestanding `worker stop` invocation (separate from the process
    // that ran `worker start`) only has the DB to go on, matching §4.6
    // step 2's "scan `workers` for status='running' rows from prior
    // invocations".
    let stale = store.list_running_workers().await?;
    if stale.is_empty() {
        println!("No workers running");
        return Ok(());
    }
    for w in &stale {
        #[cfg(unix)]
        unsafe {
            libc::kill(w.pid as i32, libc::SIGTERM);
        }
    }
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    store.mark_running_workers_stopped(Utc::now()).await?;
    println!("Stopped workers");
    Ok(())
}

async fn cmd_dlq_list(store: &Store) -> Result<()> {
    let jobs = store.dlq_list().await?;
    render::print_dlq(&jobs);
    Ok(())
}

async fn cmd_dlq_retry(store: &Store, job_id: &str) -> Result<()> {
    store.dlq_retry(job_id, Utc::now()).await?;
    println!("Reset job '{job_id}' to pending (will retry from beginning)");
    Ok(())
}

/// Entry point for a single worker process, re-invoked by the Supervisor
/// (see `supervisor::WORKER_RUN_SUBCOMMAND`). Installs its own signal
/// handlers and runs the claim/execute loop until signalled.
async fn cmd_worker_run(store: Store, worker_id: String) -> Result<()> {
    let store = Arc::new(store);
    let clock = Arc::new(SystemClock);
    let executor = Arc::new(ShellExecutor);
    let runtime = WorkerRuntime::new(Arc::clone(&store), executor, Arc::clone(&clock), worker_id.clone());

    let (tx, rx) = watch::channel(false);

    #[cfg(unix)]
    {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
                .expect("failed to install SIGINT handler");
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = sigint.recv() => {}
            }
            let _ = tx.send(true);
        });
    }

    runtime.run(rx).await;

    store
        .update_worker_status(&worker_id, queuectl_core::model::WorkerStatus::Stopped, None, Some(clock.now()))
        .await?;
    Ok(())
}
