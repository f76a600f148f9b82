//! Ingestion pipeline configuration — loaded from environment variables.

use std::time::Duration;

/// Default cap on an upload request body (2 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct IngestConfig {
    /// Index-ingest URL summaries are POSTed to. Empty disables indexing.
    pub index_url: String,
    /// Externally reachable base URL of the download service.
    pub public_base_url: Option<String>,
    /// Maximum accepted request body, in bytes.
    pub max_upload_bytes: usize,
    /// Conditional-write attempts per metadata merge.
    pub merge_attempts: u32,
    /// Deadline for the whole ingestion of one upload.
    pub request_timeout: Duration,
    /// Timeout for a single index delivery.
    pub index_timeout: Duration,
    /// Metadata database pool size.
    pub db_max_connections: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            index_url: String::new(),
            public_base_url: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            merge_attempts: 5,
            request_timeout: Duration::from_secs(30),
            index_timeout: Duration::from_secs(10),
            db_max_connections: 5,
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let index_url = std::env::var("REPORTS_INDEX_URL").unwrap_or_default();
        let public_base_url = std::env::var("REPORTS_PUBLIC_URL")
            .ok()
            .filter(|s| !s.is_empty());
        let max_upload_bytes = std::env::var("REPORTS_MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_upload_bytes);
        let merge_attempts = std::env::var("REPORTS_MERGE_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.merge_attempts);
        let request_timeout = std::env::var("REPORTS_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);
        let index_timeout = std::env::var("REPORTS_INDEX_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.index_timeout);
        let db_max_connections = std::env::var("REPORTS_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.db_max_connections);

        if index_url.is_empty() {
            tracing::warn!("REPORTS_INDEX_URL not set -- JUnit summaries will not be indexed");
        }
        if public_base_url.is_none() {
            tracing::warn!("REPORTS_PUBLIC_URL not set -- report links will use the local download listener");
        }

        Self {
            index_url,
            public_base_url,
            max_upload_bytes,
            merge_attempts,
            request_timeout,
            index_timeout,
            db_max_connections,
        }
    }
}
