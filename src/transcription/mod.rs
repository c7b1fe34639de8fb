//! # Transcription Module
//!
//! Orchestrates transcription jobs run by an external Whisper worker process.
//! Speech recognition itself happens out of process; this module owns launching
//! the worker, capturing its output, classifying how it ended, and cleaning up
//! the uploaded source file.
//!
//! ## Key Components:
//! - **Process Supervisor**: spawns the worker and drains stdout/stderr concurrently
//! - **Job Orchestrator**: admission control, cleanup and artifact path derivation
//! - **Output Sinks**: pluggable live mirroring of worker output
//!
//! ## Worker Contract:
//! `<worker> <input> --model <size> --language <lang> --output-dir <dir> --output-formats srt [--is-video]`
//! Exit 0 means `<dir>/<input stem>.srt` was written; anything else is a failure
//! described on stderr.

pub mod error;         // Job failure taxonomy
pub mod job;           // Request/outcome data model
pub mod model;         // Whisper model sizes
pub mod orchestrator;  // Job sequencing and cleanup
pub mod sink;          // Worker output mirroring
pub mod supervisor;    // Worker process lifecycle

pub use error::JobError;
pub use job::{MediaKind, TranscriptionRequest};
pub use model::ModelSize;
pub use orchestrator::JobOrchestrator;
