//! Metadata store client — revisioned records with conditional writes.
//!
//! Collections: artifact indexes keyed by (org, app) and build activities
//! keyed by (org, app, branch, build number). Every write is conditional on
//! the revision the writer last read; merging lives in `metadata_service`.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::artifact_index::{ArtifactIndex, ArtifactIndexKey};
use crate::models::build_activity::{BuildActivity, BuildActivityKey};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metadata backend error: {0}")]
    Backend(String),

    #[error("metadata connection unavailable: {0}")]
    Connection(String),

    #[error("stored record is not valid: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// A record together with the revision it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub revision: i64,
    pub record: T,
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome<T> {
    /// Revision matched; the record now holds the written value.
    Updated(Versioned<T>),
    /// Someone else wrote first; re-read and merge again.
    Conflict,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_artifact_index(
        &self,
        key: &ArtifactIndexKey,
    ) -> Result<Option<Versioned<ArtifactIndex>>, StoreError>;

    /// Create an empty index unless one exists, and return whichever record
    /// is current afterwards. Concurrent callers all observe the same record.
    async fn create_artifact_index(
        &self,
        key: &ArtifactIndexKey,
    ) -> Result<Versioned<ArtifactIndex>, StoreError>;

    async fn update_artifact_index(
        &self,
        key: &ArtifactIndexKey,
        expected_revision: i64,
        index: &ArtifactIndex,
    ) -> Result<CasOutcome<ArtifactIndex>, StoreError>;

    async fn get_build_activity(
        &self,
        key: &BuildActivityKey,
    ) -> Result<Option<Versioned<BuildActivity>>, StoreError>;

    async fn update_build_activity(
        &self,
        key: &BuildActivityKey,
        expected_revision: i64,
        activity: &BuildActivity,
    ) -> Result<CasOutcome<BuildActivity>, StoreError>;
}
