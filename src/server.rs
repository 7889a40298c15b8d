//! HTTP front end. `POST /find` takes raw image bytes and answers with the
//! matched identity names.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{info, warn};
use serde_json::{json, Value};

use crate::error::FindError;
use crate::matcher::MatchService;

pub const SERVICE_NAME: &str = "Face recognition API";

/// Error body: `{"error": {"status": "<code>", "detail": "<message>"}}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl From<FindError> for ApiError {
    fn from(err: FindError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::UNPROCESSABLE_ENTITY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        Self {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "status": self.status.as_u16().to_string(),
                "detail": self.detail,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

pub fn router(service: Arc<MatchService>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(about))
        .route("/health", get(health))
        .route("/find", post(find))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(service)
}

async fn about() -> Json<Value> {
    Json(json!({
        "data": {
            "name": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        }
    }))
}

async fn health(State(service): State<Arc<MatchService>>) -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "identities": service.index().len(),
        }
    }))
}

async fn find(
    State(service): State<Arc<MatchService>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = body?;
    // Model inference and the index scan are CPU-bound
    let result = tokio::task::spawn_blocking(move || service.find(&body))
        .await
        .map_err(|e| ApiError::internal(format!("lookup task failed: {}", e)))?;

    match result {
        Ok(names) => Ok(Json(json!({ "data": { "names": names } }))),
        Err(err) => {
            warn!("Lookup failed: {}", err);
            Err(err.into())
        }
    }
}

/// Bind `host:port` and serve until Ctrl+C or SIGTERM.
pub async fn serve(
    host: &str,
    port: u16,
    service: Arc<MatchService>,
    max_body_bytes: usize,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .with_context(|| format!("binding {}:{}", host, port))?;
    info!("Server running at http://{}", listener.local_addr()?);

    axum::serve(listener, router(service, max_body_bytes))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving requests")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
