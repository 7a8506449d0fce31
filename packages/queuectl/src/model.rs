//! Job and worker row types.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Bytes kept of a job's captured output (§I5).
pub const MAX_OUTPUT_BYTES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    pub fn all() -> [JobState; 5] {
        [
            JobState::Pending,
            JobState::Processing,
            JobState::Completed,
            JobState::Failed,
            JobState::Dead,
        ]
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job row as stored in `jobs`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: String,
    pub attempts: i64,
    pub max_retries: i64,
    pub priority: i64,
    pub created_at: String,
    pub updated_at: String,
    pub due_at: String,
    pub last_error: Option<String>,
    pub output: Option<String>,
    pub picked_by: Option<String>,
}

impl Job {
    pub fn state(&self) -> JobState {
        self.state.parse().expect("state column holds a valid JobState")
    }
}

/// Fields needed to insert a new job; `id`/`due_at`/`max_retries`/`priority`
/// default per §3 when the caller doesn't override them.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub command: String,
    pub max_retries: i64,
    pub priority: i64,
    pub due_at: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Running,
    Stopped,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Starting => "starting",
            WorkerStatus::Running => "running",
            WorkerStatus::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WorkerRow {
    pub id: String,
    pub pid: i64,
    pub status: String,
    pub started_at: String,
    pub heartbeat_at: String,
    pub stopped_at: Option<String>,
}

/// Truncate `s` to at most `max_bytes`, never splitting a UTF-8 char.
pub fn truncate_output(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_strings_intact() {
        assert_eq!(truncate_output("ok", 10_000), "ok");
    }

    #[test]
    fn truncate_never_splits_a_multibyte_char() {
        let s = "a".repeat(9_999) + "€"; // 3-byte char straddling the 10000 cut
        let truncated = truncate_output(&s, MAX_OUTPUT_BYTES);
        assert!(truncated.len() <= MAX_OUTPUT_BYTES);
        assert!(String::from_utf8(truncated.into_bytes()).is_ok());
    }

    #[test]
    fn job_state_round_trips_through_str() {
        for state in JobState::all() {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
    }
}
