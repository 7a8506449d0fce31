//! Spawns worker runtimes as independent OS processes, registers them,
//! propagates shutdown, reaps them (§4.6).
//!
//! Rust has no direct equivalent of Python's `multiprocessing.Process`
//! forking an already-initialized interpreter; the idiomatic translation is
//! for the supervisor to re-invoke its own binary with a hidden
//! `__worker-run <id>` subcommand (see SPEC_FULL.md REDESIGN FLAGS). Each
//! child is therefore a genuine separate OS process, matching the
//! process-per-worker architecture the spec requires.

use std::process::Stdio;

use chrono::Utc;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::store::Store;

pub const WORKER_RUN_SUBCOMMAND: &str = "__worker-run";

pub struct Supervisor {
    store: Store,
    db_path: String,
    children: Vec<(String, Child)>,
}

impl Supervisor {
    pub fn new(store: Store, db_path: String) -> Self {
        Self { store, db_path, children: Vec::new() }
    }

    /// Spawn `count` worker processes and block until they all exit or a
    /// shutdown signal arrives.
    pub async fn start_workers(mut self, count: usize) -> anyhow::Result<()> {
        let exe = std::env::current_exe()?;

        for _ in 0..count {
            let worker_id = format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]);
            self.store.register_worker(&worker_id, std::process::id() as i64, Utc::now()).await?;

            let child = Command::new(&exe)
                .arg(WORKER_RUN_SUBCOMMAND)
                .arg(&worker_id)
                .env("QUEUECTL_DB", &self.db_path)
                .stdin(Stdio::null())
                .spawn()?;

            let pid = child.id().unwrap_or(0) as i64;
            self.store
                .update_worker_status(&worker_id, crate::model::WorkerStatus::Running, Some(pid), None)
                .await?;

            info!(worker_id = %worker_id, pid, "spawned worker process");
            self.children.push((worker_id, child));
        }

        println!("Started {} worker(s)", self.children.len());
        for (id, child) in &self.children {
            println!("  {} (PID: {})", id, child.id().unwrap_or(0));
        }

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = wait_all(&mut self.children) => {}
            _ = sigterm.recv() => {
                println!("\nReceived shutdown signal, stopping workers...");
                self.stop_workers().await?;
            }
            _ = sigint.recv() => {
                println!("\nReceived shutdown signal, stopping workers...");
                self.stop_workers().await?;
            }
        }

        Ok(())
    }

    /// Terminate every child this process spawned, then sweep `workers` for
    /// `running` rows left by a prior invocation and best-effort signal
    /// those pids too (§4.6 step 2).
    pub async fn stop_workers(&mut self) -> anyhow::Result<()> {
        for (id, child) in &mut self.children {
            if let Some(pid) = child.id() {
                send_signal(pid as i32, libc_sigterm());
                info!(worker_id = %id, pid, "sent SIGTERM");
            }
        }

        let stale = self.store.list_running_workers().await?;

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;

        for (id, child) in &mut self.children {
            match child.try_wait() {
                Ok(Some(_)) => {}
                _ => {
                    warn!(worker_id = %id, "worker still alive after grace period, killing");
                    let _ = child.start_kill();
                }
            }
        }

        for worker in &stale {
            // ProcessLookupError-equivalent (ESRCH) is ignored: the pid may
            // already be gone.
            send_signal(worker.pid as i32, libc_sigterm());
        }

        tokio::time::sleep(std::time::Duration::from_secs(1)).await;

        for worker in &stale {
            send_signal(worker.pid as i32, libc_sigkill());
        }

        self.store.mark_running_workers_stopped(Utc::now()).await?;
        println!("Stopped workers");
        Ok(())
    }
}

async fn wait_all(children: &mut [(String, Child)]) {
    for (id, child) in children.iter_mut() {
        match child.wait().await {
            Ok(status) => info!(worker_id = %id, ?status, "worker process exited"),
            Err(e) => error!(worker_id = %id, error = %e, "failed to wait on worker process"),
        }
    }
}

#[cfg(unix)]
fn send_signal(pid: i32, sig: i32) {
    // Best-effort; ESRCH (process already gone) is ignored, matching the
    // original's `except (ProcessLookupError, OSError): pass`.
    unsafe {
        libc::kill(pid, sig);
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: i32, _sig: i32) {}

#[cfg(unix)]
fn libc_sigterm() -> i32 {
    libc::SIGTERM
}

#[cfg(not(unix))]
fn libc_sigterm() -> i32 {
    0
}

#[cfg(unix)]
fn libc_sigkill() -> i32 {
    libc::SIGKILL
}

#[cfg(not(unix))]
fn libc_sigkill() -> i32 {
    0
}
