//! Failure taxonomy for transcription jobs.

use std::path::PathBuf;
use std::time::Duration;

/// Everything that can go wrong between accepting a request and returning a
/// [`JobOutcome`](crate::transcription::JobOutcome).
///
/// Nothing in the core retries on any of these.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The source file is gone, usually because the request was already executed.
    #[error("source file is no longer available: {}", .0.display())]
    SourceUnavailable(PathBuf),

    #[error("failed to prepare output directory {}: {source}", .path.display())]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The worker executable could not be started.
    #[error("failed to launch worker '{program}': {source}")]
    WorkerLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The worker ran and exited non-zero. `exit_code` is -1 when it was killed by a signal.
    #[error("Whisper process failed with exit code {exit_code}: {}", .stderr.trim())]
    WorkerExecution {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Whisper process timed out after {}s", .0.as_secs())]
    WorkerTimeout(Duration),

    #[error("transcription job was cancelled")]
    Cancelled,

    /// Waiting on the process or draining its pipes failed.
    #[error("failed to supervise worker: {0}")]
    Supervision(String),
}

impl JobError {
    /// Captured stderr for failures that have any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            JobError::WorkerExecution { stderr, .. } => Some(stderr.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_message_carries_stderr() {
        let err = JobError::WorkerExecution {
            exit_code: 2,
            stdout: String::new(),
            stderr: "model not found\n".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("model not found"));
        assert!(message.contains("exit code 2"));
        assert_eq!(err.stderr(), Some("model not found\n"));
    }

    #[test]
    fn test_timeout_message() {
        let err = JobError::WorkerTimeout(Duration::from_secs(90));
        assert_eq!(err.to_string(), "Whisper process timed out after 90s");
        assert!(err.stderr().is_none());
    }
}
