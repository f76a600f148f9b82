//! Report ingestion — takes one upload from validated request to linked report.
//!
//! Storage is the commit point: once the artifact is written, indexing
//! problems are only logged and metadata problems are reported as such,
//! never as a lost upload.

use std::sync::Arc;

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::models::artifact_index::ArtifactIndexKey;
use crate::models::build_activity::BuildActivityKey;
use crate::models::upload::{ArtifactKey, UploadRequest};
use crate::services::artifact_store::ArtifactStore;
use crate::services::index_sink::IndexSink;
use crate::services::location::LocationResolver;
use crate::services::metadata_service::{self, MergePolicy};
use crate::services::metadata_store::MetadataStore;
use crate::services::transcoder;

/// What happened to the summary of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    /// Not a JUnit report.
    Skipped,
    Delivered,
    TranscodeFailed,
    DeliveryFailed,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Skipped => "skipped",
            IndexStatus::Delivered => "delivered",
            IndexStatus::TranscodeFailed => "transcode_failed",
            IndexStatus::DeliveryFailed => "delivery_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub key: ArtifactKey,
    pub url: String,
    pub index: IndexStatus,
    pub artifact_index_revision: i64,
    pub activity_revision: i64,
}

/// The ingestion coordinator. Collaborators are injected so that tests can
/// substitute any of them.
pub struct ReportIngestor {
    artifacts: Arc<dyn ArtifactStore>,
    index: Arc<dyn IndexSink>,
    metadata: Arc<dyn MetadataStore>,
    locations: Arc<dyn LocationResolver>,
    config: IngestConfig,
}

impl ReportIngestor {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        index: Arc<dyn IndexSink>,
        metadata: Arc<dyn MetadataStore>,
        locations: Arc<dyn LocationResolver>,
        config: IngestConfig,
    ) -> Self {
        Self {
            artifacts,
            index,
            metadata,
            locations,
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub async fn ingest(&self, upload: UploadRequest) -> Result<IngestOutcome, IngestError> {
        upload.validate()?;
        let deadline = tokio::time::Instant::now() + self.config.request_timeout;
        let key = upload.artifact_key();
        let meta = &upload.meta;

        if let Err(e) = self.artifacts.put(&key, &upload.bytes).await {
            tracing::error!(artifact = %key, "Artifact write failed: {e}");
            return Err(e.into());
        }
        crate::metrics::upload_bytes(upload.bytes.len());

        let index = if meta.is_junit_xml() {
            self.index_summary(&key, &upload.bytes).await
        } else {
            IndexStatus::Skipped
        };

        let url = self.locations.resolve(&key).await.map_err(|e| {
            tracing::error!(artifact = %key, "Cannot resolve public URL: {e}");
            e
        })?;

        let policy = MergePolicy::new(self.config.merge_attempts).with_deadline(deadline);
        let index_key = ArtifactIndexKey::new(&meta.org, &meta.app);
        let activity_key =
            BuildActivityKey::new(&meta.org, &meta.app, &meta.branch, &meta.build_number);

        // Both merges run even if the first fails; the first error is returned.
        let index_merge = metadata_service::merge_artifact_index(
            self.metadata.as_ref(),
            &index_key,
            &meta.version,
            &key.filename,
            &url,
            &policy,
        )
        .await;
        if let Err(e) = &index_merge {
            tracing::error!(record = %index_key, artifact = %key, "Artifact index merge failed: {e}");
        }

        let activity_merge = metadata_service::merge_build_activity(
            self.metadata.as_ref(),
            &activity_key,
            &key.filename,
            &url,
            &policy,
        )
        .await;
        if let Err(e) = &activity_merge {
            tracing::error!(record = %activity_key, artifact = %key, "Build activity merge failed: {e}");
        }

        let index_record = index_merge?;
        let activity = activity_merge?;

        Ok(IngestOutcome {
            key,
            url,
            index,
            artifact_index_revision: index_record.revision,
            activity_revision: activity.revision,
        })
    }

    async fn index_summary(&self, key: &ArtifactKey, xml: &[u8]) -> IndexStatus {
        let summary = match transcoder::to_summary(xml, &key.org, &key.app, &key.version) {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(artifact = %key, "JUnit report not transcoded: {e}");
                crate::metrics::index_delivery("transcode_failed");
                return IndexStatus::TranscodeFailed;
            }
        };

        match self.index.send(&summary).await {
            Ok(()) => {
                tracing::info!(artifact = %key, "Summary sent to index");
                crate::metrics::index_delivery("delivered");
                IndexStatus::Delivered
            }
            Err(e) => {
                tracing::warn!(artifact = %key, "Summary delivery failed: {e}");
                crate::metrics::index_delivery("delivery_failed");
                IndexStatus::DeliveryFailed
            }
        }
    }
}
