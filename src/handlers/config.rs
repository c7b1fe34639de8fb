use crate::transcription::ModelSize;
use crate::{error::AppResult, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Read-only view of the effective configuration.
///
/// ## Endpoint: `GET /api/v1/config`
pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.get_config();
    let orchestrator = &state.orchestrator;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "worker": {
                "program": config.worker.program,
                "script": config.worker.script,
                "output_dir": config.worker.output_dir,
                "upload_dir": config.worker.upload_dir,
                "output_format": config.worker.output_format,
                "timeout_secs": config.worker.timeout_secs,
                "max_concurrent_jobs": orchestrator.max_concurrent_jobs(),
                "mirror_output": config.worker.mirror_output
            },
            "upload": {
                "max_file_size_mb": config.upload.max_file_size_mb
            }
        },
        "models": ModelSize::ALL
            .iter()
            .map(|size| json!({
                "name": size,
                "description": size.description(),
                "default": *size == ModelSize::default()
            }))
            .collect::<Vec<_>>()
    })))
}
