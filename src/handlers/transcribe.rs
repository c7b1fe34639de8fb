//! # Transcription Endpoint
//!
//! `POST /api/whisper/transcribe` stages the uploaded media, hands it to the
//! job orchestrator and renders the outcome.
//!
//! ## Request:
//! Multipart form data:
//! - `media` (required): the audio or video file
//! - `language` (optional, default `en`)
//! - `modelSize` (optional, default `medium`): tiny, base, small, medium, large
//!
//! ## Response:
//! ```json
//! {
//!   "success": true,
//!   "message": "Transcription completed successfully",
//!   "data": {
//!     "file": "output/media-1700000000000-3f2a....srt",
//!     "downloadUrl": "/api/whisper/download/media-1700000000000-3f2a....srt",
//!     "mediaType": "audio"
//!   }
//! }
//! ```

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::transcription::job::is_supported_media;
use crate::transcription::{MediaKind, ModelSize, TranscriptionRequest};
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

/// Prefix of every download URL handed back to clients.
pub const DOWNLOAD_PREFIX: &str = "/api/whisper/download";

/// Plain form fields are tiny; anything bigger is not a language code.
const MAX_TEXT_FIELD_BYTES: usize = 1024;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionData {
    pub file: String,
    pub download_url: String,
    pub media_type: MediaKind,
}

#[derive(Debug, Serialize)]
pub struct TranscriptionResponse {
    pub success: bool,
    pub message: String,
    pub data: TranscriptionData,
}

/// An upload written to the staging directory.
///
/// Until ownership passes to the orchestrator via [`StagedUpload::into_path`],
/// dropping this deletes the file, so rejected requests leave nothing behind.
struct StagedUpload {
    path: PathBuf,
    kind: MediaKind,
    armed: bool,
}

impl StagedUpload {
    fn into_path(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(upload = %self.path.display(), "Failed to remove rejected upload: {}", e);
            }
        }
    }
}

#[derive(Default)]
struct TranscriptionForm {
    media: Option<StagedUpload>,
    language: Option<String>,
    model_size: Option<String>,
}

pub async fn transcribe_media(
    state: web::Data<AppState>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let config = state.get_config();
    let form = read_form(
        payload,
        &config.worker.upload_dir,
        config.upload.max_file_size_bytes(),
    )
    .await?;

    let language = parse_language(form.language.as_deref())?;
    let model_size = parse_model_size(form.model_size.as_deref())?;
    let upload = form
        .media
        .ok_or_else(|| AppError::BadRequest("No media file provided".to_string()))?;

    let media_kind = upload.kind;
    let request = TranscriptionRequest::new(upload.into_path())
        .with_language(language)
        .with_model_size(model_size)
        .with_media_kind(media_kind);

    tracing::info!(
        source = %request.source_path.display(),
        language = %request.language,
        model = %request.model_size,
        media = media_kind.as_str(),
        "Starting transcription job"
    );

    // Spawned so a client hanging up does not abort the job half-way through
    // its cleanup.
    let orchestrator = state.orchestrator.clone();
    let outcome = tokio::spawn(async move { orchestrator.execute(request).await }.in_current_span())
        .await
        .map_err(|e| AppError::Internal(format!("Transcription task failed: {}", e)))??;

    let filename = outcome
        .artifact_file_name()
        .ok_or_else(|| AppError::Internal("Worker artifact has no file name".to_string()))?;

    Ok(HttpResponse::Ok().json(TranscriptionResponse {
        success: true,
        message: "Transcription completed successfully".to_string(),
        data: TranscriptionData {
            file: outcome.output_artifact_path.display().to_string(),
            download_url: format!("{}/{}", DOWNLOAD_PREFIX, filename),
            media_type: media_kind,
        },
    }))
}

async fn read_form(
    mut payload: Multipart,
    upload_dir: &Path,
    max_file_size: u64,
) -> AppResult<TranscriptionForm> {
    let mut form = TranscriptionForm::default();

    while let Some(item) = payload.next().await {
        let mut field: Field =
            item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

        let content_disposition = field
            .content_disposition()
            .ok_or_else(|| AppError::BadRequest("Missing content disposition".to_string()))?;
        let field_name = content_disposition
            .get_name()
            .ok_or_else(|| AppError::BadRequest("Missing field name".to_string()))?
            .to_string();
        let filename = content_disposition.get_filename().map(|s| s.to_string());

        match field_name.as_str() {
            "media" => {
                if form.media.is_some() {
                    return Err(AppError::BadRequest(
                        "Only one media file may be uploaded".to_string(),
                    ));
                }
                let content_type = field.content_type().map(|m| m.essence_str().to_string());
                form.media = Some(
                    stage_upload(
                        &mut field,
                        upload_dir,
                        filename.as_deref(),
                        content_type.as_deref(),
                        max_file_size,
                    )
                    .await?,
                );
            }
            "language" => form.language = Some(read_text_field(&mut field).await?),
            "modelSize" => form.model_size = Some(read_text_field(&mut field).await?),
            _ => {
                // Drain unknown parts so the stream can advance.
                while let Some(chunk) = field.next().await {
                    chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
                }
            }
        }
    }

    Ok(form)
}

async fn stage_upload(
    field: &mut Field,
    upload_dir: &Path,
    original_name: Option<&str>,
    content_type: Option<&str>,
    max_file_size: u64,
) -> AppResult<StagedUpload> {
    if !is_supported_media(content_type, original_name) {
        return Err(AppError::BadRequest(
            "Only audio and video files are allowed!".to_string(),
        ));
    }

    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to prepare upload directory: {}", e)))?;

    let staged = StagedUpload {
        path: upload_dir.join(staged_file_name(original_name)),
        kind: MediaKind::classify(content_type, original_name),
        armed: true,
    };

    let mut file = tokio::fs::File::create(&staged.path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to store upload: {}", e)))?;

    let mut written: u64 = 0;
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
        written += chunk.len() as u64;
        if written > max_file_size {
            return Err(AppError::BadRequest(format!(
                "File too large (max: {} bytes)",
                max_file_size
            )));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to store upload: {}", e)))?;
    }
    file.flush()
        .await
        .map_err(|e| AppError::Internal(format!("Failed to store upload: {}", e)))?;

    tracing::debug!(upload = %staged.path.display(), bytes = written, "Upload staged");
    Ok(staged)
}

async fn read_text_field(field: &mut Field) -> AppResult<String> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
        if bytes.len() + chunk.len() > MAX_TEXT_FIELD_BYTES {
            return Err(AppError::BadRequest("Form field too large".to_string()));
        }
        bytes.extend_from_slice(&chunk);
    }
    String::from_utf8(bytes)
        .map(|s| s.trim().to_string())
        .map_err(|_| AppError::BadRequest("Form field is not valid UTF-8".to_string()))
}

/// `media-<unix millis>-<uuid>.<ext>`, keeping only a plain alphanumeric extension.
fn staged_file_name(original_name: Option<&str>) -> String {
    let extension = original_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();

    format!(
        "media-{}-{}{}",
        chrono::Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple(),
        extension
    )
}

fn parse_language(value: Option<&str>) -> AppResult<String> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(TranscriptionRequest::DEFAULT_LANGUAGE.to_string()),
        Some(lang)
            if lang.len() <= 16
                && lang.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') =>
        {
            Ok(lang.to_string())
        }
        Some(lang) => Err(AppError::ValidationError(format!("Invalid language: {}", lang))),
    }
}

fn parse_model_size(value: Option<&str>) -> AppResult<ModelSize> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(ModelSize::default()),
        Some(size) => size
            .parse()
            .map_err(|e| AppError::ValidationError(format!("Invalid model size: {}", e))),
    }
}
