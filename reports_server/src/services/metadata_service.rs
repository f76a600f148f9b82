//! Metadata merges — optimistic read-modify-write with bounded retries.
//!
//! Two uploads for the same (org, app) may race. Each merge re-reads the
//! record after a lost write and reapplies only its own entry, so neither
//! upload's link is dropped. No lock is held across the store round trips.

use std::future::Future;

use thiserror::Error;
use tokio::time::Instant;

use crate::models::artifact_index::{ArtifactIndex, ArtifactIndexKey};
use crate::models::build_activity::{BuildActivity, BuildActivityKey};
use crate::services::metadata_store::{CasOutcome, MetadataStore, StoreError, Versioned};

const ARTIFACT_INDEX: &str = "artifact_index";
const BUILD_ACTIVITY: &str = "build_activity";

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("{record} merge lost {attempts} conditional writes in a row")]
    Conflict { record: &'static str, attempts: u32 },

    #[error("build activity {0} does not exist")]
    ActivityNotFound(BuildActivityKey),

    #[error("{record} merge ran past the request deadline")]
    Timeout { record: &'static str },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Bounds on a single merge.
#[derive(Debug, Clone, Copy)]
pub struct MergePolicy {
    pub max_attempts: u32,
    pub deadline: Option<Instant>,
}

impl MergePolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    async fn bounded<T, F>(&self, record: &'static str, op: F) -> Result<T, MergeError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, op)
                .await
                .map_err(|_| MergeError::Timeout { record })?
                .map_err(MergeError::from),
            None => op.await.map_err(MergeError::from),
        }
    }
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Record `filename → url` under `version` in the (org, app) artifact index.
pub async fn merge_artifact_index(
    store: &dyn MetadataStore,
    key: &ArtifactIndexKey,
    version: &str,
    filename: &str,
    url: &str,
    policy: &MergePolicy,
) -> Result<Versioned<ArtifactIndex>, MergeError> {
    for attempt in 1..=policy.max_attempts {
        let current = policy
            .bounded(ARTIFACT_INDEX, load_or_create_index(store, key))
            .await?;

        let mut next = current.record.clone();
        if !next.upsert(version, filename, url) {
            return Ok(current);
        }

        match policy
            .bounded(
                ARTIFACT_INDEX,
                store.update_artifact_index(key, current.revision, &next),
            )
            .await?
        {
            CasOutcome::Updated(updated) => {
                tracing::debug!(
                    record = %key,
                    version,
                    filename,
                    revision = updated.revision,
                    attempt,
                    "Artifact index merged"
                );
                return Ok(updated);
            }
            CasOutcome::Conflict => {
                crate::metrics::merge_conflict(ARTIFACT_INDEX);
                tracing::debug!(record = %key, attempt, "Artifact index changed underneath, retrying");
            }
        }
    }

    Err(MergeError::Conflict {
        record: ARTIFACT_INDEX,
        attempts: policy.max_attempts,
    })
}

async fn load_or_create_index(
    store: &dyn MetadataStore,
    key: &ArtifactIndexKey,
) -> Result<Versioned<ArtifactIndex>, StoreError> {
    match store.get_artifact_index(key).await? {
        Some(current) => Ok(current),
        None => store.create_artifact_index(key).await,
    }
}

/// Append the report line to an existing build activity.
pub async fn merge_build_activity(
    store: &dyn MetadataStore,
    key: &BuildActivityKey,
    filename: &str,
    url: &str,
    policy: &MergePolicy,
) -> Result<Versioned<BuildActivity>, MergeError> {
    for attempt in 1..=policy.max_attempts {
        let current = policy
            .bounded(BUILD_ACTIVITY, store.get_build_activity(key))
            .await?
            .ok_or_else(|| MergeError::ActivityNotFound(key.clone()))?;

        let mut next = current.record.clone();
        if !next.annotate(filename, url) {
            return Ok(current);
        }

        match policy
            .bounded(
                BUILD_ACTIVITY,
                store.update_build_activity(key, current.revision, &next),
            )
            .await?
        {
            CasOutcome::Updated(updated) => {
                tracing::debug!(
                    record = %key,
                    filename,
                    revision = updated.revision,
                    attempt,
                    "Build activity annotated"
                );
                return Ok(updated);
            }
            CasOutcome::Conflict => {
                crate::metrics::merge_conflict(BUILD_ACTIVITY);
                tracing::debug!(record = %key, attempt, "Build activity changed underneath, retrying");
            }
        }
    }

    Err(MergeError::Conflict {
        record: BUILD_ACTIVITY,
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Barrier;

    use crate::models::artifact_index::ReportLink;
    use crate::services::memory_store::MemoryMetadataStore;

    /// Holds the first `gated` artifact-index reads at a barrier until all of
    /// them have read, so every gated merge writes against the same revision.
    struct InterleavingStore {
        inner: MemoryMetadataStore,
        barrier: Barrier,
        gated: usize,
        reads: AtomicUsize,
        writes: AtomicUsize,
    }

    impl InterleavingStore {
        fn new(gated: usize) -> Self {
            Self {
                inner: MemoryMetadataStore::new(),
                barrier: Barrier::new(gated),
                gated,
                reads: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MetadataStore for InterleavingStore {
        async fn get_artifact_index(
            &self,
            key: &ArtifactIndexKey,
        ) -> Result<Option<Versioned<ArtifactIndex>>, StoreError> {
            let current = self.inner.get_artifact_index(key).await?;
            if self.reads.fetch_add(1, Ordering::SeqCst) < self.gated {
                self.barrier.wait().await;
            }
            Ok(current)
        }

        async fn create_artifact_index(
            &self,
            key: &ArtifactIndexKey,
        ) -> Result<Versioned<ArtifactIndex>, StoreError> {
            self.inner.create_artifact_index(key).await
        }

        async fn update_artifact_index(
            &self,
            key: &ArtifactIndexKey,
            expected_revision: i64,
            index: &ArtifactIndex,
        ) -> Result<CasOutcome<ArtifactIndex>, StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner
                .update_artifact_index(key, expected_revision, index)
                .await
        }

        async fn get_build_activity(
            &self,
            key: &BuildActivityKey,
        ) -> Result<Option<Versioned<BuildActivity>>, StoreError> {
            self.inner.get_build_activity(key).await
        }

        async fn update_build_activity(
            &self,
            key: &BuildActivityKey,
            expected_revision: i64,
            activity: &BuildActivity,
        ) -> Result<CasOutcome<BuildActivity>, StoreError> {
            self.inner
                .update_build_activity(key, expected_revision, activity)
                .await
        }
    }

    /// Reads normally, loses every conditional write.
    struct AlwaysConflicting {
        inner: MemoryMetadataStore,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl MetadataStore for AlwaysConflicting {
        async fn get_artifact_index(
            &self,
            key: &ArtifactIndexKey,
        ) -> Result<Option<Versioned<ArtifactIndex>>, StoreError> {
            self.inner.get_artifact_index(key).await
        }

        async fn create_artifact_index(
            &self,
            key: &ArtifactIndexKey,
        ) -> Result<Versioned<ArtifactIndex>, StoreError> {
            self.inner.create_artifact_index(key).await
        }

        async fn update_artifact_index(
            &self,
            _key: &ArtifactIndexKey,
            _expected_revision: i64,
            _index: &ArtifactIndex,
        ) -> Result<CasOutcome<ArtifactIndex>, StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(CasOutcome::Conflict)
        }

        async fn get_build_activity(
            &self,
            key: &BuildActivityKey,
        ) -> Result<Option<Versioned<BuildActivity>>, StoreError> {
            self.inner.get_build_activity(key).await
        }

        async fn update_build_activity(
            &self,
            _key: &BuildActivityKey,
            _expected_revision: i64,
            _activity: &BuildActivity,
        ) -> Result<CasOutcome<BuildActivity>, StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(CasOutcome::Conflict)
        }
    }

    /// Every read stalls well past any test deadline.
    struct Stalled;

    #[async_trait]
    impl MetadataStore for Stalled {
        async fn get_artifact_index(
            &self,
            _key: &ArtifactIndexKey,
        ) -> Result<Option<Versioned<ArtifactIndex>>, StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }

        async fn create_artifact_index(
            &self,
            _key: &ArtifactIndexKey,
        ) -> Result<Versioned<ArtifactIndex>, StoreError> {
            Err(StoreError::Backend("unreachable".into()))
        }

        async fn update_artifact_index(
            &self,
            _key: &ArtifactIndexKey,
            _expected_revision: i64,
            _index: &ArtifactIndex,
        ) -> Result<CasOutcome<ArtifactIndex>, StoreError> {
            Err(StoreError::Backend("unreachable".into()))
        }

        async fn get_build_activity(
            &self,
            _key: &BuildActivityKey,
        ) -> Result<Option<Versioned<BuildActivity>>, StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }

        async fn update_build_activity(
            &self,
            _key: &BuildActivityKey,
            _expected_revision: i64,
            _activity: &BuildActivity,
        ) -> Result<CasOutcome<BuildActivity>, StoreError> {
            Err(StoreError::Backend("unreachable".into()))
        }
    }

    fn index_key() -> ArtifactIndexKey {
        ArtifactIndexKey::new("acme", "billing")
    }

    fn activity_key() -> BuildActivityKey {
        BuildActivityKey::new("acme", "billing", "master", "12")
    }

    #[tokio::test]
    async fn interleaved_merges_keep_both_entries() {
        let store = Arc::new(InterleavingStore::new(2));
        // Existing record, so both merges read it and race on the same revision.
        store.inner.create_artifact_index(&index_key()).await.unwrap();

        let a = {
            let store = store.clone();
            tokio::spawn(async move {
                merge_artifact_index(
                    store.as_ref(),
                    &index_key(),
                    "1.0",
                    "unit.xml",
                    "http://r/1.0/unit.xml",
                    &MergePolicy::default(),
                )
                .await
            })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move {
                merge_artifact_index(
                    store.as_ref(),
                    &index_key(),
                    "2.0",
                    "e2e.xml",
                    "http://r/2.0/e2e.xml",
                    &MergePolicy::default(),
                )
                .await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let record = store
            .inner
            .get_artifact_index(&index_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            record.record.entries("1.0"),
            [ReportLink::new("unit.xml", "http://r/1.0/unit.xml")]
        );
        assert_eq!(
            record.record.entries("2.0"),
            [ReportLink::new("e2e.xml", "http://r/2.0/e2e.xml")]
        );
        // One merge lost the race and wrote a second time.
        assert_eq!(store.writes.load(Ordering::SeqCst), 3);
        assert_eq!(record.revision, 3);
    }

    #[tokio::test]
    async fn first_upload_creates_the_index() {
        let store = MemoryMetadataStore::new();
        let merged = merge_artifact_index(
            &store,
            &index_key(),
            "1.0",
            "unit.xml",
            "http://r/unit.xml",
            &MergePolicy::default(),
        )
        .await
        .unwrap();
        assert_eq!(merged.record.len(), 1);
        assert!(store.get_artifact_index(&index_key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn disjoint_merges_commute() {
        let merges = [
            ("1.0", "unit.xml", "http://r/1.0/unit.xml"),
            ("1.0", "e2e.xml", "http://r/1.0/e2e.xml"),
            ("2.0", "unit.xml", "http://r/2.0/unit.xml"),
        ];

        let forward = MemoryMetadataStore::new();
        for (version, filename, url) in merges {
            merge_artifact_index(&forward, &index_key(), version, filename, url, &MergePolicy::default())
                .await
                .unwrap();
        }
        let backward = MemoryMetadataStore::new();
        for (version, filename, url) in merges.into_iter().rev() {
            merge_artifact_index(&backward, &index_key(), version, filename, url, &MergePolicy::default())
                .await
                .unwrap();
        }

        let forward = forward.get_artifact_index(&index_key()).await.unwrap().unwrap();
        let backward = backward.get_artifact_index(&index_key()).await.unwrap().unwrap();
        assert_eq!(forward.record, backward.record);
    }

    #[tokio::test]
    async fn repeated_merge_does_not_write() {
        let store = MemoryMetadataStore::new();
        let policy = MergePolicy::default();
        let first = merge_artifact_index(&store, &index_key(), "1.0", "a.xml", "http://r/a", &policy)
            .await
            .unwrap();
        let again = merge_artifact_index(&store, &index_key(), "1.0", "a.xml", "http://r/a", &policy)
            .await
            .unwrap();
        assert_eq!(first.revision, again.revision);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_conflict() {
        let store = AlwaysConflicting {
            inner: MemoryMetadataStore::new(),
            writes: AtomicUsize::new(0),
        };
        let err = merge_artifact_index(
            &store,
            &index_key(),
            "1.0",
            "unit.xml",
            "http://r/unit.xml",
            &MergePolicy::new(4),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            MergeError::Conflict {
                record: ARTIFACT_INDEX,
                attempts: 4
            }
        ));
        assert_eq!(store.writes.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn activity_merge_requires_existing_record() {
        let store = MemoryMetadataStore::new();
        let err = merge_build_activity(
            &store,
            &activity_key(),
            "unit.xml",
            "http://r/unit.xml",
            &MergePolicy::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MergeError::ActivityNotFound(ref k) if *k == activity_key()));
        assert!(store.get_build_activity(&activity_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn activity_merge_appends_and_keeps_prior_lines() {
        let store = MemoryMetadataStore::new();
        let mut existing = BuildActivity::default();
        existing.annotate("lint.txt", "http://r/lint.txt");
        store.insert_build_activity(activity_key(), existing);

        let merged = merge_build_activity(
            &store,
            &activity_key(),
            "unit.xml",
            "http://r/unit.xml",
            &MergePolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(
            merged.record.reports,
            [
                ReportLink::new("lint.txt", "http://r/lint.txt"),
                ReportLink::new("unit.xml", "http://r/unit.xml"),
            ]
        );
        assert_eq!(merged.revision, 2);
    }

    #[tokio::test]
    async fn activity_conflicts_are_bounded_too() {
        let store = AlwaysConflicting {
            inner: MemoryMetadataStore::new(),
            writes: AtomicUsize::new(0),
        };
        store
            .inner
            .insert_build_activity(activity_key(), BuildActivity::default());

        let err = merge_build_activity(
            &store,
            &activity_key(),
            "unit.xml",
            "http://r/unit.xml",
            &MergePolicy::new(2),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            MergeError::Conflict {
                record: BUILD_ACTIVITY,
                attempts: 2
            }
        ));
        assert_eq!(store.writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn deadline_aborts_the_merge() {
        let policy = MergePolicy::default()
            .with_deadline(Instant::now() + Duration::from_millis(50));

        let started = std::time::Instant::now();
        let err = merge_artifact_index(&Stalled, &index_key(), "1.0", "a.xml", "http://r/a", &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::Timeout { record: ARTIFACT_INDEX }));
        assert!(started.elapsed() < Duration::from_secs(5));

        let err = merge_build_activity(&Stalled, &activity_key(), "a.xml", "http://r/a", &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::Timeout { record: BUILD_ACTIVITY }));
    }
}
