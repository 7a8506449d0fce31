//! The subprocess launcher capability (§1: "the core only assumes an
//! *Executor* capability that turns a command string plus a timeout into
//! `(success, output, error)`").

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

/// Result of running a single job command.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, command: &str, timeout_secs: u64) -> ExecOutcome;
}

/// Runs the command through `sh -c`, capturing combined stdout+stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellExecutor;

#[async_trait]
impl Executor for ShellExecutor {
    async fn run(&self, command: &str, timeout_secs: u64) -> ExecOutcome {
        // kill_on_drop: without it, a timed-out child is orphaned when this
        // future is dropped instead of being reaped, since tokio doesn't
        // kill children on drop by default.
        let child = Command::new("sh").arg("-c").arg(command).kill_on_drop(true).output();

        match timeout(Duration::from_secs(timeout_secs), child).await {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                let success = output.status.success();
                let error = if success {
                    None
                } else {
                    Some(format!(
                        "Command failed with exit code {}",
                        output.status.code().unwrap_or(-1)
                    ))
                };
                ExecOutcome { success, output: combined, error }
            }
            Ok(Err(e)) => ExecOutcome {
                success: false,
                output: String::new(),
                error: Some(e.to_string()),
            },
            Err(_) => ExecOutcome {
                success: false,
                output: String::new(),
                error: Some(format!("Job timed out after {timeout_secs} seconds")),
            },
        }
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic executor for retry/backoff tests: fails the first
    /// `fail_times` calls, then succeeds.
    pub struct FlakyExecutor {
        pub fail_times: usize,
        calls: AtomicUsize,
    }

    impl FlakyExecutor {
        pub fn new(fail_times: usize) -> Self {
            Self { fail_times, calls: AtomicUsize::new(0) }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Executor for FlakyExecutor {
        async fn run(&self, _command: &str, _timeout_secs: u64) -> ExecOutcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                ExecOutcome {
                    success: false,
                    output: String::new(),
                    error: Some("Command failed with exit code 1".to_string()),
                }
            } else {
                ExecOutcome { success: true, output: "ok".to_string(), error: None }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shell_executor_captures_stdout() {
        let out = ShellExecutor.run("echo hi", 5).await;
        assert!(out.success);
        assert!(out.output.contains("hi"));
        assert!(out.error.is_none());
    }

    #[tokio::test]
    async fn shell_executor_reports_nonzero_exit() {
        let out = ShellExecutor.run("exit 7", 5).await;
        assert!(!out.success);
        assert_eq!(out.error.as_deref(), Some("Command failed with exit code 7"));
    }

    #[tokio::test]
    async fn shell_executor_reports_timeout() {
        let out = ShellExecutor.run("sleep 5", 1).await;
        assert!(!out.success);
        assert_eq!(out.error.as_deref(), Some("Job timed out after 1 seconds"));
    }
}
