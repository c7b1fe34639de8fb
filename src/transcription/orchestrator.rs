//! # Job Orchestrator
//!
//! Sequences one transcription job end to end:
//! 1. Check the source file still exists (a consumed request fails fast)
//! 2. Make sure the output directory exists
//! 3. Wait for a worker slot (bounded by `max_concurrent_jobs`)
//! 4. Run the worker through the [`ProcessSupervisor`]
//! 5. Delete the source file, whatever happened in 2-4
//! 6. Derive the artifact path, or surface the failure
//!
//! ## Cleanup Guarantee:
//! Step 5 runs strictly after the worker has exited (or was never launched),
//! so the worker always sees its input. A failed delete is logged, never
//! returned: the caller cares about the transcription, not the temp file.

use crate::config::WorkerConfig;
use crate::transcription::error::JobError;
use crate::transcription::job::{artifact_path_for, JobOutcome, TranscriptionRequest};
use crate::transcription::sink::{NullSink, OutputSink, TracingSink};
use crate::transcription::supervisor::ProcessSupervisor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// How to invoke the worker and where it writes.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Executable to launch (e.g. `python`).
    pub program: String,
    /// Optional script passed as the first argument (e.g. `whisper_transcribe.py`).
    pub script: Option<PathBuf>,
    pub output_dir: PathBuf,
    /// Value of `--output-formats`; also the artifact's extension.
    pub output_format: String,
}

impl WorkerSettings {
    /// Build the worker's argument list for one request.
    ///
    /// `[script] <input> --model <size> --language <lang> --output-dir <dir> --output-formats <fmt> [--is-video]`
    pub fn worker_args(&self, request: &TranscriptionRequest) -> Vec<String> {
        let mut args = Vec::with_capacity(11);
        if let Some(script) = &self.script {
            args.push(script.to_string_lossy().into_owned());
        }
        args.push(request.source_path.to_string_lossy().into_owned());
        args.push("--model".to_string());
        args.push(request.model_size.as_str().to_string());
        args.push("--language".to_string());
        args.push(request.language.clone());
        args.push("--output-dir".to_string());
        args.push(self.output_dir.to_string_lossy().into_owned());
        args.push("--output-formats".to_string());
        args.push(self.output_format.clone());
        if request.is_video {
            args.push("--is-video".to_string());
        }
        args
    }
}

/// Counters exposed on the health endpoints.
#[derive(Debug, Default)]
pub struct JobStats {
    active: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`JobStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStatsSnapshot {
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobStats {
    pub fn snapshot(&self) -> JobStatsSnapshot {
        JobStatsSnapshot {
            active: self.active.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the active counter however the job ends, including when the
/// job future is dropped mid-flight.
struct ActiveJob<'a>(&'a JobStats);

impl<'a> ActiveJob<'a> {
    fn enter(stats: &'a JobStats) -> Self {
        stats.active.fetch_add(1, Ordering::Relaxed);
        Self(stats)
    }
}

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

pub struct JobOrchestrator {
    settings: WorkerSettings,
    supervisor: ProcessSupervisor,
    permits: Arc<Semaphore>,
    max_concurrent_jobs: usize,
    shutdown: CancellationToken,
    stats: JobStats,
}

impl JobOrchestrator {
    pub fn new(settings: WorkerSettings, supervisor: ProcessSupervisor, max_concurrent_jobs: usize) -> Self {
        let max_concurrent_jobs = max_concurrent_jobs.max(1);
        Self {
            settings,
            supervisor,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs)),
            max_concurrent_jobs,
            shutdown: CancellationToken::new(),
            stats: JobStats::default(),
        }
    }

    /// Wire up an orchestrator from the `[worker]` config section.
    pub fn from_config(config: &WorkerConfig) -> Self {
        let sink: Arc<dyn OutputSink> = if config.mirror_output {
            Arc::new(TracingSink)
        } else {
            Arc::new(NullSink)
        };
        let timeout = (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs));
        let supervisor = ProcessSupervisor::new(sink).with_timeout(timeout);

        let settings = WorkerSettings {
            program: config.program.clone(),
            script: config.script.as_ref().filter(|s| !s.is_empty()).map(PathBuf::from),
            output_dir: config.output_dir.clone(),
            output_format: config.output_format.clone(),
        };

        Self::new(settings, supervisor, config.max_concurrent_jobs)
    }

    /// Cancelling this token kills every running worker and aborts queued jobs.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub fn stats(&self) -> JobStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent_jobs
    }

    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run one job to completion.
    pub async fn execute(&self, request: TranscriptionRequest) -> Result<JobOutcome, JobError> {
        let cancel = self.shutdown.child_token();
        self.execute_with_cancel(request, &cancel).await
    }

    /// Like [`execute`](Self::execute), but `cancel` can stop this job alone.
    pub async fn execute_with_cancel(
        &self,
        request: TranscriptionRequest,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, JobError> {
        // Replaying a consumed request must not launch a worker on a missing file.
        if !source_exists(&request.source_path).await {
            tracing::warn!(source = %request.source_path.display(), "Source file unavailable, refusing to run job");
            return Err(JobError::SourceUnavailable(request.source_path));
        }

        let _active = ActiveJob::enter(&self.stats);
        let result = self.run_worker(&request, cancel).await;

        remove_source(&request.source_path).await;

        match &result {
            Ok(outcome) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    source = %request.source_path.display(),
                    artifact = %outcome.output_artifact_path.display(),
                    "Transcription job completed"
                );
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(source = %request.source_path.display(), "Transcription job failed: {}", e);
                if let Some(stderr) = e.stderr().filter(|s| !s.trim().is_empty()) {
                    tracing::debug!(target: "worker", "Full worker stderr:\n{}", stderr);
                }
            }
        }

        result
    }

    async fn run_worker(
        &self,
        request: &TranscriptionRequest,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, JobError> {
        tokio::fs::create_dir_all(&self.settings.output_dir)
            .await
            .map_err(|source| JobError::OutputDirectory {
                path: self.settings.output_dir.clone(),
                source,
            })?;

        let _permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => {
                permit.map_err(|_| JobError::Cancelled)?
            }
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
        };

        let args = self.settings.worker_args(request);
        let outcome = self.supervisor.run(&self.settings.program, &args, cancel).await?;

        Ok(JobOutcome {
            succeeded: true,
            output_artifact_path: artifact_path_for(
                &self.settings.output_dir,
                &request.source_path,
                &self.settings.output_format,
            ),
            captured_stdout: outcome.stdout,
            captured_stderr: outcome.stderr,
            exit_code: outcome.exit_code,
        })
    }
}

async fn source_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

async fn remove_source(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(source = %path.display(), "Removed source media"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(source = %path.display(), "Source media already removed");
        }
        Err(e) => tracing::warn!(source = %path.display(), "Failed to clean up source media: {}", e),
    }
}
