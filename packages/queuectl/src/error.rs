//! Submission-time error taxonomy.
//!
//! Execution failures (timeouts, non-zero exits) are not represented here —
//! they are captured in-band on the job row (`last_error`) per the retry
//! state machine in [`crate::worker`]. This enum covers only the errors that
//! should abort a CLI invocation immediately.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("job must include 'command'")]
    MissingCommand,

    #[error("job with id '{0}' already exists")]
    DuplicateId(String),

    #[error("unknown config key: {0}")]
    UnknownConfigKey(String),

    #[error("job '{0}' not found in DLQ")]
    NotInDlq(String),
}
