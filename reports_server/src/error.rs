//! Request-level failures and their wire representation.
//!
//! The response body is a bare code string; the status separates uploader
//! mistakes (400) from server-side failures (500).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::services::artifact_store::StorageError;
use crate::services::location::ResolveError;
use crate::services::metadata_service::MergeError;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Required header absent or empty
    #[error("missing required header {0}")]
    MissingField(&'static str),

    /// Header value cannot be used as a storage path segment
    #[error("header {0} is not a usable path segment")]
    InvalidField(&'static str),

    /// Body crossed the configured size limit
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Multipart body unreadable or without a usable file part
    #[error("invalid file part: {0}")]
    InvalidFile(String),

    /// Artifact could not be persisted; nothing else ran
    #[error("artifact storage failed: {0}")]
    Storage(#[from] StorageError),

    /// Artifact stored, but its public URL could not be determined
    #[error("artifact location unresolved: {0}")]
    Location(#[from] ResolveError),

    /// Artifact stored, but a metadata record could not be updated
    #[error("metadata merge failed: {0}")]
    Merge(#[from] MergeError),
}

impl IngestError {
    /// Code string written as the response body.
    pub fn code(&self) -> String {
        match self {
            IngestError::MissingField(name) => format!("MISSING_FIELD({name})"),
            IngestError::InvalidField(name) => format!("INVALID_FIELD({name})"),
            IngestError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE".to_string(),
            IngestError::InvalidFile(_) => "INVALID_FILE".to_string(),
            IngestError::Storage(_) => "STORAGE_WRITE_FAILED".to_string(),
            IngestError::Location(_) => "LOCATION_UNRESOLVED".to_string(),
            IngestError::Merge(MergeError::Conflict { .. }) => "MERGE_CONFLICT".to_string(),
            IngestError::Merge(MergeError::ActivityNotFound(_)) => {
                "ACTIVITY_NOT_FOUND".to_string()
            }
            IngestError::Merge(MergeError::Timeout { .. }) => "TIMEOUT".to_string(),
            IngestError::Merge(MergeError::Store(_)) => "METADATA_STORE_FAILED".to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::MissingField(_)
            | IngestError::InvalidField(_)
            | IngestError::PayloadTooLarge { .. }
            | IngestError::InvalidFile(_) => StatusCode::BAD_REQUEST,
            IngestError::Storage(_) | IngestError::Location(_) | IngestError::Merge(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short label for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            IngestError::MissingField(_) | IngestError::InvalidField(_) => "invalid_request",
            IngestError::PayloadTooLarge { .. } => "too_large",
            IngestError::InvalidFile(_) => "invalid_file",
            IngestError::Storage(_) => "storage_failed",
            IngestError::Location(_) | IngestError::Merge(_) => "metadata_failed",
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        (self.status(), self.code()).into_response()
    }
}
