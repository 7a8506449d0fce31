//! The per-worker runtime: claim → execute → transition, plus a heartbeat
//! task (§4.5).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::executor::Executor;
use crate::retry::next_due_at;
use crate::store::Store;

pub struct WorkerRuntime<C: Clock> {
    pub store: Arc<Store>,
    pub executor: Arc<dyn Executor>,
    pub clock: Arc<C>,
    pub worker_id: String,
}

impl<C: Clock + 'static> WorkerRuntime<C> {
    pub fn new(store: Arc<Store>, executor: Arc<dyn Executor>, clock: Arc<C>, worker_id: String) -> Self {
        Self { store, executor, clock, worker_id }
    }

    /// Runs until `shutdown` is signalled. A job that is mid-execution is
    /// always allowed to finish or time out before the loop exits (§5).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.worker_id, "worker loop starting");

        let heartbeat_handle = {
            let store = Arc::clone(&self.store);
            let clock = Arc::clone(&self.clock);
            let worker_id = self.worker_id.clone();
            let mut shutdown_hb = shutdown.clone();
            tokio::spawn(async move {
                heartbeat_loop(store, clock, worker_id, &mut shutdown_hb).await;
            })
        };

        loop {
            if *shutdown.borrow() {
                break;
            }

            let cfg = match self.store.get_config().await {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!(worker_id = %self.worker_id, error = %e, "failed to read config");
                    sleep_or_shutdown(StdDuration::from_secs(1), &mut shutdown).await;
                    continue;
                }
            };
            let poll_interval: f64 = cfg.get("poll_interval").and_then(|v| v.parse().ok()).unwrap_or(0.5);
            let job_timeout: u64 = cfg.get("job_timeout").and_then(|v| v.parse().ok()).unwrap_or(120);
            let backoff_base: f64 = cfg.get("backoff_base").and_then(|v| v.parse().ok()).unwrap_or(2.0);

            let claimed = match self.store.claim_one(&self.worker_id, self.clock.now()).await {
                Ok(job) => job,
                Err(e) => {
                    error!(worker_id = %self.worker_id, error = %e, "claim failed");
                    sleep_or_shutdown(StdDuration::from_secs(1), &mut shutdown).await;
                    continue;
                }
            };

            let Some(job) = claimed else {
                sleep_or_shutdown(secs_to_duration(poll_interval), &mut shutdown).await;
                continue;
            };

            debug!(worker_id = %self.worker_id, job_id = %job.id, "claimed job");
            let outcome = self.executor.run(&job.command, job_timeout).await;
            let now = self.clock.now();

            if outcome.success {
                if let Err(e) = self.store.mark_completed(&job.id, now, &outcome.output).await {
                    error!(job_id = %job.id, error = %e, "failed to mark job completed");
                }
                info!(worker_id = %self.worker_id, job_id = %job.id, "job completed");
            } else {
                let new_attempts = job.attempts + 1;
                let error_msg = outcome.error.unwrap_or_else(|| "unknown error".to_string());
                let due_at = if new_attempts > job.max_retries {
                    None
                } else {
                    Some(next_due_at(now, new_attempts, backoff_base))
                };

                if let Err(e) = self
                    .store
                    .mark_failed(&job.id, now, new_attempts, job.max_retries, &error_msg, due_at)
                    .await
                {
                    error!(job_id = %job.id, error = %e, "failed to mark job failed");
                }

                if new_attempts > job.max_retries {
                    warn!(worker_id = %self.worker_id, job_id = %job.id, "job dead-lettered");
                } else {
                    warn!(worker_id = %self.worker_id, job_id = %job.id, attempt = new_attempts, "job failed, will retry");
                }
            }

            sleep_or_shutdown(StdDuration::from_millis(100), &mut shutdown).await;
        }

        heartbeat_handle.abort();
        info!(worker_id = %self.worker_id, "worker loop stopped");
    }
}

fn secs_to_duration(secs: f64) -> StdDuration {
    StdDuration::from_millis((secs.max(0.0) * 1000.0) as u64)
}

async fn sleep_or_shutdown(dur: StdDuration, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(dur) => {}
        _ = shutdown.changed() => {}
    }
}

/// Ticks every 5 seconds, writing `heartbeat_at` unconditionally; failures
/// are logged and swallowed (§7: "best-effort").
async fn heartbeat_loop<C: Clock>(
    store: Arc<Store>,
    clock: Arc<C>,
    worker_id: String,
    shutdown: &mut watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(StdDuration::from_secs(5));
    interval.tick().await; // skip the immediate first tick

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                if let Err(e) = store.update_heartbeat(&worker_id, clock.now()).await {
                    warn!(worker_id = %worker_id, error = %e, "heartbeat failed");
                }
            }
        }
    }
}
