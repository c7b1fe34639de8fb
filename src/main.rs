//! # Subtitle Forge - Main Application Entry Point
//!
//! HTTP front end for an external Whisper transcription worker. Clients upload
//! audio or video, the server runs the worker on it and serves the resulting
//! subtitle file for download.
//!
//! ## Application Architecture:
//! - **config**: Handles application configuration (TOML files + environment variables)
//! - **state**: Shared application state, job orchestrator and metrics
//! - **transcription**: Worker process supervision and job orchestration
//! - **artifacts**: Read-only access to produced subtitle files
//! - **health**: System health and metrics endpoints
//! - **middleware**: Custom request processing logic (logging, metrics)
//! - **handlers**: HTTP request handlers for API endpoints
//! - **error**: Custom error types and HTTP error responses

mod artifacts;      // Artifact store (artifacts.rs)
mod config;         // Configuration management (config.rs)
mod error;          // Error handling types (error.rs)
mod handlers;       // HTTP request handlers (handlers/ directory)
mod health;         // Health check endpoints (health.rs)
mod middleware;     // Custom middleware (middleware/ directory)
mod state;          // Application state management (state.rs)
mod transcription;  // Worker supervision (transcription/ directory)

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use crate::config::AppConfig;
use crate::state::AppState;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Creates shared application state** including the job orchestrator
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown**, killing any running workers
#[actix_web::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        program = %config.worker.program,
        output_dir = %config.worker.output_dir.display(),
        max_concurrent_jobs = config.worker.max_concurrent_jobs,
        timeout_secs = config.worker.timeout_secs,
        "Worker configured"
    );

    let shutdown = CancellationToken::new();
    let app_state = AppState::new(config.clone(), shutdown.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Middleware executes in reverse order of registration for responses
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(configure_routes)
    })
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Whichever finishes first wins
    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            // Kill running workers first so in-flight requests can finish
            // with an error instead of holding up the graceful stop.
            shutdown.cancel();
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Register every route. Shared by `main` and the handler tests.
fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(
                web::scope("/whisper")
                    .route("/transcribe", web::post().to(handlers::transcribe_media))
                    .route("/download/{filename}", web::get().to(handlers::download_artifact)),
            )
            .service(
                web::scope("/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config)),
            ),
    )
    // Also provide health check at root level for convenience
    .route("/health", web::get().to(health::health_check));
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "subtitle_forge=debug,worker=info")
/// - If not set, defaults to "subtitle_forge=debug,worker=info,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "subtitle_forge=debug,worker=info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received SIGINT");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test};

    #[actix_web::test]
    async fn test_health_routes_are_mounted() {
        let state = AppState::new(AppConfig::default(), CancellationToken::new());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .wrap(middleware::MetricsMiddleware)
                .configure(configure_routes),
        )
        .await;

        for uri in ["/health", "/api/v1/health", "/api/v1/metrics", "/api/v1/config"] {
            let response = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        }

        let response = test::call_service(&app, test::TestRequest::get().uri("/api/v1/metrics").to_request()).await;
        let json: serde_json::Value = test::read_body_json(response).await;
        let endpoints = json["endpoints"].as_array().unwrap();
        assert!(endpoints
            .iter()
            .any(|e| e["endpoint"] == "GET /api/v1/health"));
    }
}
