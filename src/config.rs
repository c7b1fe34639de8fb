//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms set these)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_WORKER__TIMEOUT_SECS`, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys use a double underscore because several field names contain a
//! single one (`output_dir`, `timeout_secs`).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, worker, upload)
/// keeps each concern's knobs together and maps 1:1 onto TOML tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub worker: WorkerConfig,
    pub upload: UploadConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// How the external transcription worker is launched and supervised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Executable to run, e.g. `python` or a standalone worker binary
    pub program: String,

    /// Script handed to `program` as its first argument (empty or absent for none)
    #[serde(default)]
    pub script: Option<String>,

    /// Where the worker writes artifacts and downloads are served from
    pub output_dir: PathBuf,

    /// Where uploads are staged until their job finishes
    pub upload_dir: PathBuf,

    /// Passed as `--output-formats`; also the artifact file extension
    pub output_format: String,

    /// Kill the worker after this many seconds (0 = no limit)
    pub timeout_secs: u64,

    /// Upper bound on simultaneously running worker processes
    pub max_concurrent_jobs: usize,

    /// Mirror worker stdout/stderr into the application log
    pub mirror_output: bool,
}

/// Upload limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Largest accepted media file, in megabytes
    pub max_file_size_mb: u64,
}

impl UploadConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Provides default configuration values.
///
/// Default values ensure the application can start even if no configuration file exists.
/// They mirror the layout the worker script expects when run from the project root.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            worker: WorkerConfig {
                program: "python".to_string(),
                script: Some("whisper_transcribe.py".to_string()),
                output_dir: PathBuf::from("output"),
                upload_dir: PathBuf::from("uploads"),
                output_format: "srt".to_string(),
                timeout_secs: 3600,
                max_concurrent_jobs: default_concurrency(),
                mirror_output: true,
            },
            upload: UploadConfig {
                max_file_size_mb: 500, // Video files get big
            },
        }
    }
}

/// One worker per available core; transcription is CPU bound.
fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_WORKER__PROGRAM=/opt/whisper/bin/worker`: Use a different worker
    /// - `APP_WORKER__MAX_CONCURRENT_JOBS=2`: Limit concurrent workers
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what's wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.worker.program.trim().is_empty() {
            return Err(anyhow::anyhow!("Worker program must not be empty"));
        }

        if self.worker.max_concurrent_jobs == 0 {
            return Err(anyhow::anyhow!("Max concurrent jobs must be greater than 0"));
        }

        let format = &self.worker.output_format;
        if format.is_empty() || format.contains(|c: char| !c.is_ascii_alphanumeric()) {
            return Err(anyhow::anyhow!(
                "Output format must be a plain extension like 'srt', got '{}'",
                format
            ));
        }

        if self.upload.max_file_size_mb == 0 {
            return Err(anyhow::anyhow!("Upload size limit must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.worker.output_format, "srt");
        assert_eq!(config.upload.max_file_size_bytes(), 500 * 1024 * 1024);
        assert!(config.worker.max_concurrent_jobs >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.worker.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.worker.output_format = "../srt".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.worker.program = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_survive_config_round_trip() {
        let built = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .build()
            .unwrap();
        let config: AppConfig = built.try_deserialize().unwrap();
        assert_eq!(config.worker.script.as_deref(), Some("whisper_transcribe.py"));
        assert_eq!(config.worker.timeout_secs, 3600);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let toml = r#"
            [worker]
            program = "/opt/whisper/worker"
            max_concurrent_jobs = 2
        "#;
        let built = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap();
        let config: AppConfig = built.try_deserialize().unwrap();
        assert_eq!(config.worker.program, "/opt/whisper/worker");
        assert_eq!(config.worker.max_concurrent_jobs, 2);
        assert_eq!(config.worker.output_format, "srt");
    }
}
