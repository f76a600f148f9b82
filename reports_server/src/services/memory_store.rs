//! In-process metadata store.
//!
//! Used when no database is configured and as the backing store in tests.
//! Each operation takes the lock once, so create-if-absent and
//! compare-and-set are atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::models::artifact_index::{ArtifactIndex, ArtifactIndexKey};
use crate::models::build_activity::{BuildActivity, BuildActivityKey};
use crate::services::metadata_store::{CasOutcome, MetadataStore, StoreError, Versioned};

#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    indexes: RwLock<HashMap<ArtifactIndexKey, Versioned<ArtifactIndex>>>,
    activities: RwLock<HashMap<BuildActivityKey, Versioned<BuildActivity>>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a build activity, as the build system would.
    pub fn insert_build_activity(&self, key: BuildActivityKey, activity: BuildActivity) {
        self.activities.write().insert(
            key,
            Versioned {
                revision: 1,
                record: activity,
            },
        );
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get_artifact_index(
        &self,
        key: &ArtifactIndexKey,
    ) -> Result<Option<Versioned<ArtifactIndex>>, StoreError> {
        Ok(self.indexes.read().get(key).cloned())
    }

    async fn create_artifact_index(
        &self,
        key: &ArtifactIndexKey,
    ) -> Result<Versioned<ArtifactIndex>, StoreError> {
        let mut indexes = self.indexes.write();
        let current = indexes.entry(key.clone()).or_insert_with(|| Versioned {
            revision: 1,
            record: ArtifactIndex::new(),
        });
        Ok(current.clone())
    }

    async fn update_artifact_index(
        &self,
        key: &ArtifactIndexKey,
        expected_revision: i64,
        index: &ArtifactIndex,
    ) -> Result<CasOutcome<ArtifactIndex>, StoreError> {
        let mut indexes = self.indexes.write();
        Ok(compare_and_set(
            indexes.get_mut(key),
            expected_revision,
            index,
        ))
    }

    async fn get_build_activity(
        &self,
        key: &BuildActivityKey,
    ) -> Result<Option<Versioned<BuildActivity>>, StoreError> {
        Ok(self.activities.read().get(key).cloned())
    }

    async fn update_build_activity(
        &self,
        key: &BuildActivityKey,
        expected_revision: i64,
        activity: &BuildActivity,
    ) -> Result<CasOutcome<BuildActivity>, StoreError> {
        let mut activities = self.activities.write();
        Ok(compare_and_set(
            activities.get_mut(key),
            expected_revision,
            activity,
        ))
    }
}

fn compare_and_set<T: Clone>(
    current: Option<&mut Versioned<T>>,
    expected_revision: i64,
    value: &T,
) -> CasOutcome<T> {
    match current {
        Some(current) if current.revision == expected_revision => {
            current.revision += 1;
            current.record = value.clone();
            CasOutcome::Updated(current.clone())
        }
        _ => CasOutcome::Conflict,
    }
}
