//! PostgreSQL metadata store.
//!
//! Create-if-absent is `INSERT .. ON CONFLICT DO NOTHING`; the conditional
//! write is an `UPDATE` filtered on the expected revision, which also bumps it.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::models::artifact_index::{
    ArtifactIndex, ArtifactIndexKey, ArtifactIndexRow, NewArtifactIndexRow,
};
use crate::models::build_activity::{BuildActivity, BuildActivityKey, BuildActivityRow};
use crate::schema::{build_activities, report_artifact_indexes};
use crate::services::metadata_store::{CasOutcome, MetadataStore, StoreError, Versioned};

pub type PgPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    /// Build a pool and create the metadata tables if needed.
    pub async fn connect(database_url: &str, max_connections: usize) -> anyhow::Result<Self> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(manager)
            .max_size(max_connections)
            .build()
            .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;

        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;
            tracing::info!("Running report metadata migration...");
            crate::migration::run_migration(&mut conn).await?;
            tracing::info!("Report metadata migration completed.");
        }

        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<Object<AsyncPgConnection>, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

fn index_from_row(row: ArtifactIndexRow) -> Result<Versioned<ArtifactIndex>, StoreError> {
    Ok(Versioned {
        revision: row.revision,
        record: ArtifactIndex::from_json(row.versions)?,
    })
}

fn activity_from_row(row: BuildActivityRow) -> Result<Versioned<BuildActivity>, StoreError> {
    Ok(Versioned {
        revision: row.revision,
        record: BuildActivity::from_reports_json(row.report_links)?,
    })
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn get_artifact_index(
        &self,
        key: &ArtifactIndexKey,
    ) -> Result<Option<Versioned<ArtifactIndex>>, StoreError> {
        let mut conn = self.conn().await?;
        let row = report_artifact_indexes::table
            .filter(report_artifact_indexes::org.eq(&key.org))
            .filter(report_artifact_indexes::app.eq(&key.app))
            .select(ArtifactIndexRow::as_select())
            .first::<ArtifactIndexRow>(&mut conn)
            .await
            .optional()?;
        row.map(index_from_row).transpose()
    }

    async fn create_artifact_index(
        &self,
        key: &ArtifactIndexKey,
    ) -> Result<Versioned<ArtifactIndex>, StoreError> {
        let mut conn = self.conn().await?;
        let new_row = NewArtifactIndexRow {
            org: key.org.clone(),
            app: key.app.clone(),
            revision: 1,
            versions: ArtifactIndex::new().to_json(),
        };
        let inserted = diesel::insert_into(report_artifact_indexes::table)
            .values(&new_row)
            .on_conflict((report_artifact_indexes::org, report_artifact_indexes::app))
            .do_nothing()
            .execute(&mut conn)
            .await?;
        if inserted > 0 {
            tracing::info!(record = %key, "Artifact index created");
        }

        let row = report_artifact_indexes::table
            .filter(report_artifact_indexes::org.eq(&key.org))
            .filter(report_artifact_indexes::app.eq(&key.app))
            .select(ArtifactIndexRow::as_select())
            .first::<ArtifactIndexRow>(&mut conn)
            .await?;
        index_from_row(row)
    }

    async fn update_artifact_index(
        &self,
        key: &ArtifactIndexKey,
        expected_revision: i64,
        index: &ArtifactIndex,
    ) -> Result<CasOutcome<ArtifactIndex>, StoreError> {
        let mut conn = self.conn().await?;
        let row = diesel::update(
            report_artifact_indexes::table
                .filter(report_artifact_indexes::org.eq(&key.org))
                .filter(report_artifact_indexes::app.eq(&key.app))
                .filter(report_artifact_indexes::revision.eq(expected_revision)),
        )
        .set((
            report_artifact_indexes::versions.eq(index.to_json()),
            report_artifact_indexes::revision.eq(expected_revision + 1),
            report_artifact_indexes::write_date.eq(Utc::now()),
        ))
        .returning(ArtifactIndexRow::as_returning())
        .get_result::<ArtifactIndexRow>(&mut conn)
        .await
        .optional()?;

        match row {
            Some(row) => Ok(CasOutcome::Updated(index_from_row(row)?)),
            None => Ok(CasOutcome::Conflict),
        }
    }

    async fn get_build_activity(
        &self,
        key: &BuildActivityKey,
    ) -> Result<Option<Versioned<BuildActivity>>, StoreError> {
        let mut conn = self.conn().await?;
        let row = build_activities::table
            .filter(build_activities::org.eq(&key.org))
            .filter(build_activities::app.eq(&key.app))
            .filter(build_activities::branch.eq(&key.branch))
            .filter(build_activities::build_number.eq(&key.build_number))
            .select(BuildActivityRow::as_select())
            .first::<BuildActivityRow>(&mut conn)
            .await
            .optional()?;
        row.map(activity_from_row).transpose()
    }

    async fn update_build_activity(
        &self,
        key: &BuildActivityKey,
        expected_revision: i64,
        activity: &BuildActivity,
    ) -> Result<CasOutcome<BuildActivity>, StoreError> {
        let mut conn = self.conn().await?;
        let row = diesel::update(
            build_activities::table
                .filter(build_activities::org.eq(&key.org))
                .filter(build_activities::app.eq(&key.app))
                .filter(build_activities::branch.eq(&key.branch))
                .filter(build_activities::build_number.eq(&key.build_number))
                .filter(build_activities::revision.eq(expected_revision)),
        )
        .set((
            build_activities::report_links.eq(activity.reports_json()),
            build_activities::revision.eq(expected_revision + 1),
            build_activities::write_date.eq(Utc::now()),
        ))
        .returning(BuildActivityRow::as_returning())
        .get_result::<BuildActivityRow>(&mut conn)
        .await
        .optional()?;

        match row {
            Some(row) => Ok(CasOutcome::Updated(activity_from_row(row)?)),
            None => Ok(CasOutcome::Conflict),
        }
    }
}
