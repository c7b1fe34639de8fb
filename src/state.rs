//! # Application State Management
//!
//! Shared state handed to every HTTP handler through `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: the effective configuration (read-only after startup)
//! - **orchestrator**: the single job orchestrator, so the worker-slot limit is global
//! - **artifacts**: the artifact store serving downloads
//! - **metrics**: request/error counters updated by the metrics middleware
//!
//! ## Arc<RwLock<T>> Pattern
//! Metrics change on every request, so they sit behind a reader-writer lock.
//! Everything else is immutable and only needs `Arc` to be shared across
//! actix worker threads.

use crate::artifacts::ArtifactStore;
use crate::config::AppConfig;
use crate::transcription::JobOrchestrator;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// The main application state that's shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,

    pub orchestrator: Arc<JobOrchestrator>,

    pub artifacts: Arc<ArtifactStore>,

    /// Performance metrics (constantly being updated by requests)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Request metrics collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of 4xx/5xx responses since server start
    pub error_count: u64,

    /// Key: route pattern (e.g., "GET /api/whisper/download/{filename}")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build the state from configuration.
    ///
    /// `shutdown` is handed to the orchestrator: cancelling it kills running
    /// workers and rejects queued jobs.
    pub fn new(config: AppConfig, shutdown: CancellationToken) -> Self {
        let orchestrator = JobOrchestrator::from_config(&config.worker).with_shutdown(shutdown);
        let artifacts = ArtifactStore::new(config.worker.output_dir.clone());
        Self::with_parts(config, orchestrator, artifacts)
    }

    /// Assemble the state from pre-built components.
    pub fn with_parts(config: AppConfig, orchestrator: JobOrchestrator, artifacts: ArtifactStore) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            artifacts: Arc::new(artifacts),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.request_count += 1;
    }

    /// Record the outcome of one request against its route.
    ///
    /// Error responses also bump the global error counter.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);

        if is_error {
            metrics.error_count += 1;
        }

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Get a snapshot of current metrics, so no lock is held while serializing.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        AppState::new(AppConfig::default(), CancellationToken::new())
    }

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let state = state();
        state.increment_request_count();
        state.increment_request_count();
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 2);
        assert_eq!(metrics.error_count, 1);

        let health = &metrics.endpoint_metrics["GET /health"];
        assert_eq!(health.request_count, 2);
        assert_eq!(health.average_duration_ms(), 20.0);
        assert_eq!(health.error_rate(), 0.5);
    }

    #[test]
    fn test_empty_endpoint_metric() {
        let metric = EndpointMetric::default();
        assert_eq!(metric.average_duration_ms(), 0.0);
        assert_eq!(metric.error_rate(), 0.0);
    }

    #[test]
    fn test_artifact_store_follows_worker_output_dir() {
        let state = state();
        assert_eq!(state.artifacts.root(), state.config.worker.output_dir.as_path());
    }
}
