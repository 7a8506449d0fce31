//! The durable SQLite-backed store (§4.1).
//!
//! `claim_one` is the serialization point for I1: it runs inside an
//! explicit `BEGIN IMMEDIATE` transaction, which takes SQLite's write lock
//! up front so two workers racing `claim_one` concurrently serialize on the
//! lock rather than both observing the same eligible row.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Executor as _, Row, SqlitePool};

use crate::clock::to_iso;
use crate::config::{default_config, is_known_key};
use crate::error::QueueError;
use crate::model::{truncate_output, Job, JobState, NewJob, WorkerRow, WorkerStatus, MAX_OUTPUT_BYTES};

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(db_path: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{db_path}"))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single writer connection keeps SQLite's single-writer model
            // explicit rather than accidental: concurrent claims still
            // serialize correctly through BEGIN IMMEDIATE, but we avoid
            // spurious SQLITE_BUSY from pool-level concurrent writers.
            .max_connections(1)
            .connect_with(options)
            .await?;

        pool.execute("PRAGMA journal_mode=WAL;").await?;

        let store = Self { pool };
        store.bootstrap_schema().await?;
        Ok(store)
    }

    async fn bootstrap_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                command TEXT NOT NULL,
                state TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                due_at TEXT NOT NULL,
                last_error TEXT,
                output TEXT,
                picked_by TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_state_due ON jobs(state, due_at);")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workers (
                id TEXT PRIMARY KEY,
                pid INTEGER NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                heartbeat_at TEXT NOT NULL,
                stopped_at TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        for (key, value) in default_config() {
            sqlx::query("INSERT INTO config(key, value) VALUES (?, ?) ON CONFLICT(key) DO NOTHING")
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    // -- jobs ---------------------------------------------------------

    pub async fn insert_job(&self, job: NewJob) -> anyhow::Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs(id, command, state, attempts, max_retries, priority,
                              created_at, updated_at, due_at, last_error, output, picked_by)
            VALUES (?, ?, 'pending', 0, ?, ?, ?, ?, ?, NULL, NULL, NULL)
            "#,
        )
        .bind(&job.id)
        .bind(&job.command)
        .bind(job.max_retries)
        .bind(job.priority)
        .bind(&job.created_at)
        .bind(&job.created_at)
        .bind(&job.due_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(QueueError::DuplicateId(job.id).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically claim the next eligible job for `worker_id` (§4.3).
    pub async fn claim_one(&self, worker_id: &str, now: DateTime<Utc>) -> anyhow::Result<Option<Job>> {
        let now_iso = to_iso(now);
        let mut conn = self.pool.acquire().await?;
        conn.execute("BEGIN IMMEDIATE;").await?;

        let candidate: Option<String> = sqlx::query(
            r#"
            SELECT id FROM jobs
            WHERE state IN ('pending', 'failed') AND due_at <= ?
            ORDER BY priority DESC, due_at ASC, created_at ASC
            LIMIT 1
            "#,
        )
        .bind(&now_iso)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row: sqlx::sqlite::SqliteRow| row.get::<String, _>("id"));

        let Some(id) = candidate else {
            conn.execute("COMMIT;").await?;
            return Ok(None);
        };

        let affected = sqlx::query(
            r#"
            UPDATE jobs SET state = 'processing', picked_by = ?, updated_at = ?
            WHERE id = ? AND state IN ('pending', 'failed')
            "#,
        )
        .bind(worker_id)
        .bind(&now_iso)
        .bind(&id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if affected != 1 {
            // Lost the race to another worker claiming the same row between
            // our SELECT and UPDATE (can't happen under BEGIN IMMEDIATE, but
            // the conditional WHERE is kept as the real guarantee per §4.3).
            conn.execute("COMMIT;").await?;
            return Ok(None);
        }

        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
            .bind(&id)
            .fetch_one(&mut *conn)
            .await?;

        conn.execute("COMMIT;").await?;
        Ok(Some(job))
    }

    pub async fn mark_completed(&self, id: &str, now: DateTime<Utc>, output: &str) -> anyhow::Result<()> {
        let now_iso = to_iso(now);
        let truncated = truncate_output(output, MAX_OUTPUT_BYTES);
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'completed', attempts = attempts + 1, output = ?,
                last_error = NULL, picked_by = NULL, updated_at = ?
            WHERE id = ? AND state = 'processing'
            "#,
        )
        .bind(truncated)
        .bind(now_iso)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// A job that just failed: either re-queued with backoff, or dead-lettered.
    pub async fn mark_failed(
        &self,
        id: &str,
        now: DateTime<Utc>,
        new_attempts: i64,
        max_retries: i64,
        error: &str,
        due_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        let now_iso = to_iso(now);
        if new_attempts > max_retries {
            sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'dead', attempts = ?, last_error = ?, picked_by = NULL, updated_at = ?
                WHERE id = ? AND state = 'processing'
                "#,
            )
            .bind(new_attempts)
            .bind(error)
            .bind(now_iso)
            .bind(id)
            .execute(&self.pool)
            .await?;
        } else {
            let due_iso = to_iso(due_at.expect("retry path always computes a due_at"));
            sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'failed', attempts = ?, due_at = ?, last_error = ?,
                    picked_by = NULL, updated_at = ?
                WHERE id = ? AND state = 'processing'
                "#,
            )
            .bind(new_attempts)
            .bind(due_iso)
            .bind(error)
            .bind(now_iso)
            .bind(id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn list_jobs(&self, state: Option<JobState>) -> anyhow::Result<Vec<Job>> {
        let jobs = match state {
            Some(s) => {
                sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE state = ? ORDER BY rowid ASC")
                    .bind(s.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as::<_, Job>("SELECT * FROM jobs ORDER BY rowid ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(jobs)
    }

    pub async fn count_by_state(&self) -> anyhow::Result<BTreeMap<String, i64>> {
        let rows = sqlx::query("SELECT state, COUNT(*) as n FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = BTreeMap::new();
        for row in rows {
            counts.insert(row.get::<String, _>("state"), row.get::<i64, _>("n"));
        }
        Ok(counts)
    }

    // -- workers --------------------------------------------------------

    pub async fn register_worker(&self, id: &str, pid: i64, now: DateTime<Utc>) -> anyhow::Result<()> {
        let now_iso = to_iso(now);
        sqlx::query(
            "INSERT INTO workers(id, pid, status, started_at, heartbeat_at) VALUES (?, ?, 'starting', ?, ?)",
        )
        .bind(id)
        .bind(pid)
        .bind(&now_iso)
        .bind(&now_iso)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_worker_status(
        &self,
        id: &str,
        status: WorkerStatus,
        pid: Option<i64>,
        stopped_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        match (pid, stopped_at) {
            (Some(pid), _) => {
                sqlx::query("UPDATE workers SET status = ?, pid = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(pid)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
            (None, Some(stopped)) => {
                sqlx::query("UPDATE workers SET status = ?, stopped_at = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(to_iso(stopped))
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
            (None, None) => {
                sqlx::query("UPDATE workers SET status = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn mark_running_workers_stopped(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query("UPDATE workers SET status = 'stopped', stopped_at = ? WHERE status = 'running'")
            .bind(to_iso(now))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Heartbeat writes unconditionally by worker id (§5: "Heartbeat writes
    /// unconditionally by worker id").
    pub async fn update_heartbeat(&self, id: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query("UPDATE workers SET heartbeat_at = ? WHERE id = ?")
            .bind(to_iso(now))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_workers_not_stopped(&self) -> anyhow::Result<Vec<WorkerRow>> {
        let rows = sqlx::query_as::<_, WorkerRow>("SELECT * FROM workers WHERE status != 'stopped'")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn list_running_workers(&self) -> anyhow::Result<Vec<WorkerRow>> {
        let rows = sqlx::query_as::<_, WorkerRow>("SELECT * FROM workers WHERE status = 'running'")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    // -- config -----------------------------------------------------------

    pub async fn get_config(&self) -> anyhow::Result<BTreeMap<String, String>> {
        let mut cfg = default_config();
        let rows = sqlx::query("SELECT key, value FROM config")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            cfg.insert(row.get::<String, _>("key"), row.get::<String, _>("value"));
        }
        Ok(cfg)
    }

    pub async fn set_config(&self, key: &str, value: &str) -> anyhow::Result<()> {
        if !is_known_key(key) {
            return Err(QueueError::UnknownConfigKey(key.to_string()).into());
        }
        sqlx::query(
            "INSERT INTO config(key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- DLQ --------------------------------------------------------------

    pub async fn dlq_list(&self) -> anyhow::Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE state = 'dead' ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }

    pub async fn dlq_retry(&self, id: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        let now_iso = to_iso(now);
        let affected = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending', attempts = 0, due_at = ?, updated_at = ?,
                last_error = NULL, picked_by = NULL
            WHERE id = ? AND state = 'dead'
            "#,
        )
        .bind(&now_iso)
        .bind(&now_iso)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(QueueError::NotInDlq(id.to_string()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, SystemClock};

    async fn temp_store() -> Store {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        // leak the tempdir so the file survives for the store's lifetime in-test
        std::mem::forget(dir);
        Store::connect(path.to_str().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn insert_and_list_round_trips() {
        let store = temp_store().await;
        let now = SystemClock.now_iso();
        store
            .insert_job(NewJob {
                id: "j1".into(),
                command: "echo hi".into(),
                max_retries: 3,
                priority: 0,
                due_at: now.clone(),
                created_at: now,
            })
            .await
            .unwrap();

        let jobs = store.list_jobs(None).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "j1");
        assert_eq!(jobs[0].state(), JobState::Pending);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let store = temp_store().await;
        let now = SystemClock.now_iso();
        let new_job = || NewJob {
            id: "dup".into(),
            command: "echo hi".into(),
            max_retries: 3,
            priority: 0,
            due_at: now.clone(),
            created_at: now.clone(),
        };
        store.insert_job(new_job()).await.unwrap();
        let err = store.insert_job(new_job()).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn claim_one_transitions_to_processing_and_sets_picked_by() {
        let store = temp_store().await;
        let now = SystemClock.now();
        store
            .insert_job(NewJob {
                id: "j1".into(),
                command: "echo hi".into(),
                max_retries: 3,
                priority: 0,
                due_at: to_iso(now),
                created_at: to_iso(now),
            })
            .await
            .unwrap();

        let claimed = store.claim_one("worker-1", now).await.unwrap().unwrap();
        assert_eq!(claimed.state(), JobState::Processing);
        assert_eq!(claimed.picked_by.as_deref(), Some("worker-1"));

        // A second claim attempt finds nothing eligible.
        assert!(store.claim_one("worker-2", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_one_respects_due_at_in_the_future() {
        let store = temp_store().await;
        let now = SystemClock.now();
        let future = now + chrono::Duration::seconds(60);
        store
            .insert_job(NewJob {
                id: "future".into(),
                command: "echo hi".into(),
                max_retries: 3,
                priority: 0,
                due_at: to_iso(future),
                created_at: to_iso(now),
            })
            .await
            .unwrap();

        assert!(store.claim_one("worker-1", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dlq_retry_resets_job_fields() {
        let store = temp_store().await;
        let now = SystemClock.now();
        store
            .insert_job(NewJob {
                id: "j1".into(),
                command: "exit 1".into(),
                max_retries: 0,
                priority: 0,
                due_at: to_iso(now),
                created_at: to_iso(now),
            })
            .await
            .unwrap();
        store.claim_one("worker-1", now).await.unwrap();
        store.mark_failed("j1", now, 1, 0, "boom", None).await.unwrap();

        let dead = store.dlq_list().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].state(), JobState::Dead);

        store.dlq_retry("j1", now).await.unwrap();
        let jobs = store.list_jobs(Some(JobState::Pending)).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].attempts, 0);
        assert!(jobs[0].last_error.is_none());
        assert!(jobs[0].picked_by.is_none());
    }

    #[tokio::test]
    async fn dlq_retry_on_unknown_id_fails() {
        let store = temp_store().await;
        let err = store.dlq_retry("nope", SystemClock.now()).await.unwrap_err();
        assert!(err.to_string().contains("not found in DLQ"));
    }

    #[tokio::test]
    async fn set_config_rejects_unknown_keys() {
        let store = temp_store().await;
        let err = store.set_config("bogus", "1").await.unwrap_err();
        assert!(err.to_string().contains("unknown config key"));
    }

    #[tokio::test]
    async fn set_config_overrides_default() {
        let store = temp_store().await;
        store.set_config("max_retries", "9").await.unwrap();
        let cfg = store.get_config().await.unwrap();
        assert_eq!(cfg.get("max_retries").map(String::as_str), Some("9"));
    }
}
