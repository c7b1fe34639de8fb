//! `GET /api/whisper/download/{filename}` streams a finished subtitle file.
//!
//! The artifact is resolved (and its existence checked) before any byte is
//! written, so a missing or rejected name is a clean 404 and never a partial
//! body.

use crate::error::AppResult;
use crate::state::AppState;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpResponse};

pub const SUBTITLE_CONTENT_TYPE: &str = "text/srt";

pub async fn download_artifact(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let filename = path.into_inner();

    let artifact = state.artifacts.resolve(&filename).await?;
    let stream = state.artifacts.open_for_read(&artifact).await?;

    tracing::debug!(artifact = %artifact.display(), "Streaming artifact");

    Ok(HttpResponse::Ok()
        .content_type(SUBTITLE_CONTENT_TYPE)
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(filename)],
        })
        .streaming(stream))
}
