//! # Job Data Model
//!
//! Types that flow through one transcription job:
//! - **TranscriptionRequest**: what the caller asked for (consumed by the orchestrator)
//! - **JobOutcome**: what the worker produced (immutable once built)
//! - **MediaKind**: audio or video, as advertised to the worker and echoed to the caller

use crate::transcription::model::ModelSize;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// File extensions treated as video regardless of the declared content type.
pub const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mkv", "avi", "mov", "webm"];

/// Extensions accepted for upload when the content type is not audio/* or video/*.
pub const MEDIA_EXTENSIONS: [&str; 10] = [
    "wav", "mp3", "ogg", "m4a", "flac", "mp4", "mkv", "avi", "mov", "webm",
];

/// Whether an upload is audio or video.
///
/// Purely advisory: it selects the worker's `--is-video` flag and is echoed in
/// the response, but never decides whether an upload is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Classify from the declared content type and original filename.
    pub fn classify(content_type: Option<&str>, filename: Option<&str>) -> Self {
        let declared_video = content_type
            .map(|ct| ct.trim().to_ascii_lowercase().starts_with("video/"))
            .unwrap_or(false);

        let video_extension = filename
            .and_then(extension_of)
            .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false);

        if declared_video || video_extension {
            MediaKind::Video
        } else {
            MediaKind::Audio
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, MediaKind::Video)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// Upload filter: audio/* or video/* content types, or a known media extension.
pub fn is_supported_media(content_type: Option<&str>, filename: Option<&str>) -> bool {
    let declared_media = content_type
        .map(|ct| {
            let ct = ct.trim().to_ascii_lowercase();
            ct.starts_with("audio/") || ct.starts_with("video/")
        })
        .unwrap_or(false);

    declared_media
        || filename
            .and_then(extension_of)
            .map(|ext| MEDIA_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// One transcription job as submitted by the caller.
///
/// The orchestrator takes this by value: once `execute` returns, the file at
/// `source_path` has been deleted and the request cannot be replayed.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub source_path: PathBuf,
    pub language: String,
    pub model_size: ModelSize,
    pub is_video: bool,
}

impl TranscriptionRequest {
    pub const DEFAULT_LANGUAGE: &'static str = "en";

    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            language: Self::DEFAULT_LANGUAGE.to_string(),
            model_size: ModelSize::default(),
            is_video: false,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_model_size(mut self, model_size: ModelSize) -> Self {
        self.model_size = model_size;
        self
    }

    pub fn with_media_kind(mut self, kind: MediaKind) -> Self {
        self.is_video = kind.is_video();
        self
    }
}

/// Result of a successful job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub succeeded: bool,
    pub output_artifact_path: PathBuf,
    pub captured_stdout: String,
    pub captured_stderr: String,
    pub exit_code: i32,
}

impl JobOutcome {
    /// The artifact's bare filename, as used in download URLs.
    pub fn artifact_file_name(&self) -> Option<&str> {
        self.output_artifact_path
            .file_name()
            .and_then(|name| name.to_str())
    }
}

/// `<output_dir>/<source stem>.<extension>`.
///
/// The worker names its output the same way, so this never needs to look at
/// what the worker actually wrote.
pub fn artifact_path_for(output_dir: &Path, source_path: &Path, extension: &str) -> PathBuf {
    let stem = source_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_dir.join(format!("{}.{}", stem, extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_content_type() {
        assert_eq!(MediaKind::classify(Some("video/mp4"), Some("x.bin")), MediaKind::Video);
        assert_eq!(MediaKind::classify(Some("audio/wav"), Some("x.wav")), MediaKind::Audio);
    }

    #[test]
    fn test_classify_by_extension() {
        assert_eq!(
            MediaKind::classify(Some("application/octet-stream"), Some("Talk.MKV")),
            MediaKind::Video
        );
        assert_eq!(MediaKind::classify(None, Some("clip.webm")), MediaKind::Video);
        assert_eq!(MediaKind::classify(None, Some("clip.flac")), MediaKind::Audio);
        assert_eq!(MediaKind::classify(None, None), MediaKind::Audio);
    }

    #[test]
    fn test_supported_media_filter() {
        assert!(is_supported_media(Some("audio/mpeg"), None));
        assert!(is_supported_media(Some("application/octet-stream"), Some("a.m4a")));
        assert!(!is_supported_media(Some("text/plain"), Some("notes.txt")));
        assert!(!is_supported_media(None, Some("noextension")));
    }

    #[test]
    fn test_request_builder_defaults() {
        let request = TranscriptionRequest::new("/tmp/clip.wav");
        assert_eq!(request.language, "en");
        assert_eq!(request.model_size, ModelSize::Medium);
        assert!(!request.is_video);

        let request = request
            .with_language("fr")
            .with_model_size(ModelSize::Tiny)
            .with_media_kind(MediaKind::Video);
        assert_eq!(request.language, "fr");
        assert_eq!(request.model_size, ModelSize::Tiny);
        assert!(request.is_video);
    }

    #[test]
    fn test_artifact_path_replaces_extension() {
        let path = artifact_path_for(Path::new("/srv/output"), Path::new("/up/clip.wav"), "srt");
        assert_eq!(path, PathBuf::from("/srv/output/clip.srt"));

        let path = artifact_path_for(
            Path::new("out"),
            Path::new("media-1700000000000-abc.tar.mp4"),
            "srt",
        );
        assert_eq!(path, PathBuf::from("out/media-1700000000000-abc.tar.srt"));
    }

    #[test]
    fn test_artifact_file_name() {
        let outcome = JobOutcome {
            succeeded: true,
            output_artifact_path: PathBuf::from("/srv/output/clip.srt"),
            captured_stdout: String::new(),
            captured_stderr: String::new(),
            exit_code: 0,
        };
        assert_eq!(outcome.artifact_file_name(), Some("clip.srt"));
    }
}
