//! # Process Supervisor
//!
//! Runs the external transcription worker and turns its lifetime into a typed
//! result.
//!
//! ## Lifecycle of one run:
//! 1. **Spawn** in a fresh process group, with stdin closed and stdout/stderr piped
//! 2. **Drain** both pipes on their own tasks, mirroring lines to the sink
//! 3. **Wait** for exit, racing the optional timeout and the cancellation token
//! 4. **Tear down** the process group, so helpers the worker started (ffmpeg and
//!    the like) never outlive it
//! 5. **Join** both drain tasks, bounded by the same deadline
//! 6. **Classify** the exit status
//!
//! The timeout covers the whole run: a worker that exits but leaves something
//! holding its pipes open still times out.

use crate::transcription::error::JobError;
use crate::transcription::sink::{LineBuffer, OutputSink, OutputStream};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const CHUNK_SIZE: usize = 8 * 1024;

/// How long to keep draining after the worker was killed.
const KILLED_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// What a worker that exited zero left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

enum Termination {
    Exited(ExitStatus),
    TimedOut(Duration),
    Cancelled,
}

/// The worker's process group. Whatever is still in it gets SIGKILL on drop,
/// including when the run future itself is dropped.
struct ProcessGroup {
    leader: Option<u32>,
}

impl ProcessGroup {
    fn new(leader: Option<u32>) -> Self {
        Self { leader }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.leader.take() {
            kill_process_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => tracing::debug!(pgid, "Killed worker process group"),
        // Nothing left in the group.
        Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pgid, "Failed to kill worker process group: {}", e),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// Launches worker processes and supervises them to completion.
pub struct ProcessSupervisor {
    sink: Arc<dyn OutputSink>,
    timeout: Option<Duration>,
}

impl ProcessSupervisor {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self { sink, timeout: None }
    }

    /// `None` lets the worker run as long as it likes.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `program` with `args` and wait for it.
    ///
    /// ## Returns:
    /// - **Ok(WorkerOutcome)**: exit code 0, with both streams fully captured
    /// - **Err(WorkerLaunch)**: the program could not be started
    /// - **Err(WorkerExecution)**: non-zero exit, carrying captured stderr
    /// - **Err(WorkerTimeout / Cancelled)**: the worker was killed
    pub async fn run(
        &self,
        program: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<WorkerOutcome, JobError> {
        tracing::info!(program = %program, args = ?args, "Launching worker");

        let deadline = self.timeout.map(|limit| Instant::now() + limit);

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| JobError::WorkerLaunch {
            program: program.to_string(),
            source,
        })?;

        let pid = child.id();
        let mut group = ProcessGroup::new(pid);
        tracing::debug!(pid = ?pid, "Worker started");

        let stdout_task = spawn_drain(child.stdout.take(), OutputStream::Stdout, self.sink.clone());
        let stderr_task = spawn_drain(child.stderr.take(), OutputStream::Stderr, self.sink.clone());

        let termination = match self.wait_for_exit(&mut child, deadline, cancel).await {
            Ok(termination) => termination,
            Err(e) => {
                stdout_task.abort();
                stderr_task.abort();
                return Err(e);
            }
        };

        // Leftovers in the group would keep reading the input and hold the pipes.
        group.kill();
        if !matches!(termination, Termination::Exited(_)) {
            // kill() also reaps the child.
            if let Err(e) = child.kill().await {
                tracing::warn!(pid = ?pid, "Failed to kill worker: {}", e);
            }
        }

        let drain_deadline = match termination {
            Termination::Exited(_) => deadline,
            _ => Some(Instant::now() + KILLED_DRAIN_GRACE),
        };
        let stdout = collect_drain(stdout_task, drain_deadline).await?;
        let stderr = collect_drain(stderr_task, drain_deadline).await?;

        match termination {
            Termination::Exited(status) => {
                let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
                    let limit = self.timeout.unwrap_or_default();
                    tracing::error!(
                        pid = ?pid,
                        timeout_secs = limit.as_secs(),
                        "Worker exited but its output stayed open past the timeout"
                    );
                    return Err(JobError::WorkerTimeout(limit));
                };
                classify_exit(pid, status, stdout, stderr)
            }
            Termination::TimedOut(limit) => {
                tracing::error!(pid = ?pid, timeout_secs = limit.as_secs(), "Worker timed out and was killed");
                Err(JobError::WorkerTimeout(limit))
            }
            Termination::Cancelled => {
                tracing::warn!(pid = ?pid, "Worker cancelled and was killed");
                Err(JobError::Cancelled)
            }
        }
    }

    async fn wait_for_exit(
        &self,
        child: &mut Child,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<Termination, JobError> {
        let timeout = self.timeout;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        let termination = tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| JobError::Supervision(format!("wait failed: {}", e)))?;
                Termination::Exited(status)
            }
            _ = expired => Termination::TimedOut(timeout.unwrap_or_default()),
            _ = cancel.cancelled() => Termination::Cancelled,
        };

        Ok(termination)
    }
}

fn classify_exit(
    pid: Option<u32>,
    status: ExitStatus,
    stdout: String,
    stderr: String,
) -> Result<WorkerOutcome, JobError> {
    if status.success() {
        tracing::debug!(pid = ?pid, "Worker exited successfully");
        return Ok(WorkerOutcome {
            stdout,
            stderr,
            exit_code: 0,
        });
    }

    // No code means the worker was killed by a signal.
    let exit_code = status.code().unwrap_or(-1);
    tracing::error!(pid = ?pid, exit_code, "Worker exited with failure");
    Err(JobError::WorkerExecution {
        exit_code,
        stdout,
        stderr,
    })
}

fn spawn_drain<R>(
    reader: Option<R>,
    stream: OutputStream,
    sink: Arc<dyn OutputSink>,
) -> JoinHandle<std::io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut captured = Vec::new();
        let Some(mut reader) = reader else {
            return Ok(captured);
        };

        let mut lines = LineBuffer::new();
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            let read = reader.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            if let Some(complete) = lines.push(&chunk[..read]) {
                sink.forward(stream, &complete);
            }
            captured.extend_from_slice(&chunk[..read]);
        }
        if let Some(rest) = lines.finish() {
            sink.forward(stream, &rest);
        }
        Ok(captured)
    })
}

/// Join a drain task. Past `deadline` the task is aborted and `None` returned.
async fn collect_drain(
    mut task: JoinHandle<std::io::Result<Vec<u8>>>,
    deadline: Option<Instant>,
) -> Result<Option<String>, JobError> {
    let joined = match deadline {
        None => (&mut task).await,
        Some(at) => match tokio::time::timeout_at(at, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort();
                return Ok(None);
            }
        },
    };

    let bytes = joined
        .map_err(|e| JobError::Supervision(format!("output drain task failed: {}", e)))?
        .map_err(|e| JobError::Supervision(format!("failed to read worker output: {}", e)))?;

    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::transcription::sink::{NullSink, RecordingSink};

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_captures_both_streams_on_success() {
        let sink = Arc::new(RecordingSink::new());
        let supervisor = ProcessSupervisor::new(sink.clone());

        let outcome = supervisor
            .run("/bin/sh", &sh("echo progress; echo loading >&2"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stdout, "progress\n");
        assert_eq!(outcome.stderr, "loading\n");
        assert_eq!(sink.collected(OutputStream::Stdout), "progress\n");
        assert_eq!(sink.collected(OutputStream::Stderr), "loading\n");
    }

    #[tokio::test]
    async fn test_large_output_is_fully_drained() {
        let supervisor = ProcessSupervisor::new(Arc::new(NullSink));

        // Well past a pipe buffer on both streams at once.
        let outcome = supervisor
            .run(
                "/bin/sh",
                &sh("i=0; while [ $i -lt 20000 ]; do echo line-$i; echo err-$i >&2; i=$((i+1)); done"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.stdout.lines().count(), 20000);
        assert_eq!(outcome.stderr.lines().count(), 20000);
        assert!(outcome.stdout.ends_with("line-19999\n"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let supervisor = ProcessSupervisor::new(Arc::new(NullSink));

        let err = supervisor
            .run("/bin/sh", &sh("echo model not found >&2; exit 2"), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            JobError::WorkerExecution { exit_code, stderr, .. } => {
                assert_eq!(exit_code, 2);
                assert_eq!(stderr.trim(), "model not found");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_executable_is_launch_error() {
        let supervisor = ProcessSupervisor::new(Arc::new(NullSink));

        let err = supervisor
            .run("/definitely/not/a/worker", &[], &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::WorkerLaunch { .. }));
    }

    #[tokio::test]
    async fn test_stdin_is_not_inherited() {
        let supervisor = ProcessSupervisor::new(Arc::new(NullSink));

        // `cat` returns immediately on a null stdin instead of blocking.
        let outcome = supervisor
            .run("/bin/sh", &sh("cat; echo done"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.stdout, "done\n");
    }

    #[tokio::test]
    async fn test_timeout_kills_worker() {
        let supervisor =
            ProcessSupervisor::new(Arc::new(NullSink)).with_timeout(Some(Duration::from_millis(200)));

        let started = std::time::Instant::now();
        let err = supervisor
            .run("/bin/sh", &sh("exec sleep 30"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::WorkerTimeout(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timeout_kills_processes_started_by_worker() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("helper-finished");
        // Not exec'd: the shell stays the leader and its helper is a separate process.
        let script = format!("( sleep 1 && touch '{}' ) &\nwait\n", marker.display());
        let supervisor =
            ProcessSupervisor::new(Arc::new(NullSink)).with_timeout(Some(Duration::from_millis(300)));

        let err = supervisor
            .run("/bin/sh", &sh(&script), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::WorkerTimeout(_)));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_cancellation_kills_processes_started_by_worker() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("helper-finished");
        let script = format!("( sleep 1 && touch '{}' ) &\nwait\n", marker.display());
        let supervisor = ProcessSupervisor::new(Arc::new(NullSink));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = supervisor.run("/bin/sh", &sh(&script), &cancel).await.unwrap_err();
        assert!(matches!(err, JobError::Cancelled));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_helpers_left_behind_after_exit_are_killed() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("helper-finished");
        let script = format!("( sleep 1 && touch '{}' ) &\necho done\n", marker.display());
        let supervisor = ProcessSupervisor::new(Arc::new(NullSink));

        let started = std::time::Instant::now();
        let outcome = supervisor
            .run("/bin/sh", &sh(&script), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.stdout, "done\n");
        assert!(started.elapsed() < Duration::from_millis(900));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_open_pipes_do_not_outlast_timeout() {
        let supervisor =
            ProcessSupervisor::new(Arc::new(NullSink)).with_timeout(Some(Duration::from_millis(500)));

        // The backgrounded sleep inherits stdout and would hold it for 6s.
        let started = std::time::Instant::now();
        let result = supervisor
            .run("/bin/sh", &sh("sleep 6 & echo done"), &CancellationToken::new())
            .await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(result.unwrap().stdout, "done\n");
    }

    #[tokio::test]
    async fn test_drain_past_deadline_is_abandoned() {
        let stuck = tokio::spawn(std::future::pending::<std::io::Result<Vec<u8>>>());
        let drained = collect_drain(stuck, Some(Instant::now() + Duration::from_millis(50)))
            .await
            .unwrap();
        assert!(drained.is_none());

        let done = tokio::spawn(async { Ok(b"done\n".to_vec()) });
        let drained = collect_drain(done, Some(Instant::now() + Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(drained.as_deref(), Some("done\n"));
    }

    #[tokio::test]
    async fn test_sink_receives_whole_lines() {
        let sink = Arc::new(RecordingSink::new());
        let supervisor = ProcessSupervisor::new(sink.clone());

        // Two writes that only form a line together.
        supervisor
            .run("/bin/sh", &sh("printf 'Grü'; sleep 0.1; printf 'ße\\n'"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.lines(OutputStream::Stdout), vec!["Grüße\n".to_string()]);
    }

    #[tokio::test]
    async fn test_cancellation_kills_worker() {
        let supervisor = ProcessSupervisor::new(Arc::new(NullSink));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = supervisor
            .run("/bin/sh", &sh("exec sleep 30"), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Cancelled));
    }
}
