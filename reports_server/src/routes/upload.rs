//! Upload handler — turns one multipart POST into an ingestion request.
//!
//! Headers are checked before any body byte is read, and the body is read
//! chunk by chunk against the size limit, so a rejected upload never costs
//! more than the limit in memory.

use axum::body::Bytes;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::Multipart;
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use crate::error::IngestError;
use crate::models::upload::{filename_from_path, UploadMeta, UploadRequest, UPLOAD_FIELD};
use crate::routes::ReportsRouterState;

/// Body written on a successful upload.
pub const SUCCESS: &str = "SUCCESS";

pub async fn handle_upload(
    state: &ReportsRouterState,
    uri: &Uri,
    headers: &HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    match receive_and_ingest(state, uri, headers, multipart).await {
        Ok(()) => {
            crate::metrics::upload_finished("success");
            (StatusCode::OK, SUCCESS).into_response()
        }
        Err(e) => {
            crate::metrics::upload_finished(e.outcome());
            if e.status().is_server_error() {
                tracing::error!(path = %uri.path(), code = %e.code(), "Upload failed: {e}");
            } else {
                tracing::warn!(path = %uri.path(), code = %e.code(), "Upload rejected: {e}");
            }
            e.into_response()
        }
    }
}

async fn receive_and_ingest(
    state: &ReportsRouterState,
    uri: &Uri,
    headers: &HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(), IngestError> {
    let meta = UploadMeta::from_headers(headers)?;
    check_declared_length(headers, state.max_upload_bytes)?;

    let mut multipart =
        multipart.map_err(|rejection| IngestError::InvalidFile(rejection.body_text()))?;
    let (part_name, bytes) = read_upload_part(&mut multipart, state.max_upload_bytes).await?;

    let filename = filename_from_path(uri.path())?
        .or(part_name)
        .ok_or_else(|| IngestError::InvalidFile("no file name in path or part".to_string()))?;

    let outcome = state
        .ingestor
        .ingest(UploadRequest {
            meta,
            filename,
            bytes,
        })
        .await?;

    tracing::info!(
        artifact = %outcome.key,
        url = %outcome.url,
        index = outcome.index.as_str(),
        artifact_index_revision = outcome.artifact_index_revision,
        activity_revision = outcome.activity_revision,
        "Report ingested"
    );
    Ok(())
}

/// Reject up front when the client already announces an oversize body.
fn check_declared_length(headers: &HeaderMap, limit: usize) -> Result<(), IngestError> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    match declared {
        Some(len) if len > limit as u64 => Err(IngestError::PayloadTooLarge { limit }),
        _ => Ok(()),
    }
}

/// Find the `upload` part and read it, never holding more than `limit` bytes.
async fn read_upload_part(
    multipart: &mut Multipart,
    limit: usize,
) -> Result<(Option<String>, Bytes), IngestError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let part_name = field.file_name().map(str::to_string);
        let mut buf = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, limit))? {
            if buf.len() + chunk.len() > limit {
                return Err(IngestError::PayloadTooLarge { limit });
            }
            buf.extend_from_slice(&chunk);
        }
        return Ok((part_name, Bytes::from(buf)));
    }

    Err(IngestError::InvalidFile(format!(
        "no \"{UPLOAD_FIELD}\" part in request"
    )))
}

fn multipart_error(e: MultipartError, limit: usize) -> IngestError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        IngestError::PayloadTooLarge { limit }
    } else {
        IngestError::InvalidFile(e.body_text())
    }
}
