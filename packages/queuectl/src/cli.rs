use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "queuectl", about = "Durable single-host job queue CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a job to the queue
    Enqueue {
        /// Job JSON: {id?, command, max_retries?, run_at?, priority?}
        job_json: String,
    },

    /// List jobs, optionally filtered by state
    List {
        #[arg(long)]
        state: Option<String>,
    },

    /// Show job/worker status
    Status,

    /// Get/set configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Worker process commands
    Worker {
        #[command(subcommand)]
        command: WorkerCommand,
    },

    /// Dead letter queue operations
    Dlq {
        #[command(subcommand)]
        command: DlqCommand,
    },

    /// Hidden: entry point for a single spawned worker process. The name
    /// must match [`crate::supervisor::WORKER_RUN_SUBCOMMAND`].
    #[command(hide = true, name = "__worker-run")]
    WorkerRun { worker_id: String },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show all config values
    Get,
    /// Set a config value
    Set { key: String, value: String },
}

#[derive(Subcommand)]
pub enum WorkerCommand {
    /// Start N workers and wait
    Start {
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Stop all running workers
    Stop,
}

#[derive(Subcommand)]
pub enum DlqCommand {
    /// List all jobs in the DLQ
    List,
    /// Re-admit a dead job
    Retry { job_id: String },
}
