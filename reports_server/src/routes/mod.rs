//! Report service HTTP routes — upload listener and download listener.

pub mod upload;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, Uri};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::services::ingest_service::ReportIngestor;

/// Shared state for upload handlers.
#[derive(Clone)]
pub struct ReportsRouterState {
    pub ingestor: Arc<ReportIngestor>,
    pub max_upload_bytes: usize,
}

impl ReportsRouterState {
    pub fn new(ingestor: Arc<ReportIngestor>) -> Self {
        let max_upload_bytes = ingestor.config().max_upload_bytes;
        Self {
            ingestor,
            max_upload_bytes,
        }
    }
}

/// Build the upload listener's router.
///
/// Any POST path is accepted, `/health` included; its last segment names the
/// stored file.
pub fn upload_router(state: ReportsRouterState) -> Router {
    let limit = state.max_upload_bytes;
    Router::new()
        .route("/health", get(health).post(upload_handler))
        .route("/", post(upload_handler))
        .route("/{*path}", post(upload_handler))
        .layer(DefaultBodyLimit::max(limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the download listener's router, serving stored artifacts as files.
pub fn download_router(root: impl Into<PathBuf>) -> Router {
    Router::new()
        .fallback_service(ServeDir::new(root.into()))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn upload_handler(
    State(state): State<ReportsRouterState>,
    uri: Uri,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    upload::handle_upload(&state, &uri, &headers, multipart).await
}
