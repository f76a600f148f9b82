//! Schema migration for the report metadata tables.

use diesel_async::AsyncPgConnection;
use diesel_async::SimpleAsyncConnection;

/// SQL migration for report metadata tables.
///
/// `build_activities` belongs to the build system; it is created here only so
/// a standalone deployment has somewhere for activities to live.
pub const MIGRATION_SQL: &str = r#"
-- ================================================================
-- Report metadata
-- ================================================================

CREATE TABLE IF NOT EXISTS report_artifact_indexes (
    org             VARCHAR(255) NOT NULL,
    app             VARCHAR(255) NOT NULL,
    revision        BIGINT NOT NULL DEFAULT 1,
    versions        JSONB NOT NULL DEFAULT '{}'::jsonb,
    write_date      TIMESTAMPTZ DEFAULT NOW(),
    PRIMARY KEY (org, app)
);

CREATE TABLE IF NOT EXISTS build_activities (
    org             VARCHAR(255) NOT NULL,
    app             VARCHAR(255) NOT NULL,
    branch          VARCHAR(255) NOT NULL,
    build_number    VARCHAR(64) NOT NULL,
    revision        BIGINT NOT NULL DEFAULT 1,
    report_links    JSONB NOT NULL DEFAULT '[]'::jsonb,
    write_date      TIMESTAMPTZ DEFAULT NOW(),
    PRIMARY KEY (org, app, branch, build_number)
);

CREATE INDEX IF NOT EXISTS idx_build_activities_app ON build_activities (org, app);
"#;

/// Run the report metadata migration.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("report metadata migration failed: {e}"))?;
    Ok(())
}
