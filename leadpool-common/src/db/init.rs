//! Database initialization
//!
//! Creates the database on first run and brings the schema up idempotently
//! (`CREATE TABLE IF NOT EXISTS` throughout, safe to call on every start).
//!
//! The uniqueness and cascade invariants of the system of record are
//! enforced here, in the schema itself, so no pipeline bug can violate
//! them: `leads.phone` and `providers.name` are UNIQUE, and submissions
//! carry a composite primary key with `ON DELETE CASCADE` to both parents.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Index DDL for the live aggregated projection.
///
/// Re-run by the materializer after a shadow swap, so the statements must
/// stay idempotent.
pub const OVERLAP_INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_overlap_phone ON lead_overlap (phone)",
    "CREATE INDEX IF NOT EXISTS idx_overlap_area ON lead_overlap (area)",
    "CREATE INDEX IF NOT EXISTS idx_overlap_primary ON lead_overlap (primary_provider)",
    "CREATE INDEX IF NOT EXISTS idx_overlap_count ON lead_overlap (provider_count)",
];

/// DDL for the aggregated projection, parameterized by table name so the
/// materializer can build a shadow copy with the identical shape.
pub fn overlap_table_sql(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            lead_id TEXT PRIMARY KEY,
            phone TEXT NOT NULL,
            area TEXT NOT NULL,
            all_providers TEXT NOT NULL,
            provider_count INTEGER NOT NULL,
            primary_provider TEXT,
            refreshed_at TIMESTAMP NOT NULL
        )
        "#
    )
}

/// Initialize database connection pool and schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // foreign_keys is a per-connection pragma; setting it through the
    // connect options applies it to every pool member, so cascade deletes
    // cannot silently stop working on a fresh connection.
    // WAL allows the materializer to read while the writer commits batches.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_leads_table(pool).await?;
    create_providers_table(pool).await?;
    create_submissions_table(pool).await?;
    create_lead_overlap_table(pool).await?;
    create_ingest_runs_table(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (1)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the leads table
///
/// One row per canonical phone; the UNIQUE constraint is the identity
/// invariant of the whole pipeline.
pub async fn create_leads_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS leads (
            guid TEXT PRIMARY KEY,
            phone TEXT NOT NULL UNIQUE,
            area TEXT NOT NULL,
            area_recognized INTEGER NOT NULL DEFAULT 1,
            created_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the providers table
pub async fn create_providers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS providers (
            guid TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the submissions junction table
///
/// Composite primary key collapses repeat submissions from the same
/// provider; cascades remove provenance rows with either parent.
pub async fn create_submissions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS submissions (
            lead_id TEXT NOT NULL REFERENCES leads(guid) ON DELETE CASCADE,
            provider_id TEXT NOT NULL REFERENCES providers(guid) ON DELETE CASCADE,
            submitted_at TIMESTAMP NOT NULL,
            PRIMARY KEY (lead_id, provider_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_submissions_provider ON submissions (provider_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the aggregated projection table and its indexes
pub async fn create_lead_overlap_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&overlap_table_sql("lead_overlap"))
        .execute(pool)
        .await?;

    for ddl in OVERLAP_INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}

/// Create the per-run audit table
pub async fn create_ingest_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_runs (
            guid TEXT PRIMARY KEY,
            started_at TIMESTAMP NOT NULL,
            finished_at TIMESTAMP NOT NULL,
            files_total INTEGER NOT NULL DEFAULT 0,
            rows_read INTEGER NOT NULL DEFAULT 0,
            rows_accepted INTEGER NOT NULL DEFAULT 0,
            rows_corrupt INTEGER NOT NULL DEFAULT 0,
            rows_unrecognized_area INTEGER NOT NULL DEFAULT 0,
            area_conflicts INTEGER NOT NULL DEFAULT 0,
            summary TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_database_creates_file_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("leadpool.db");

        let pool = init_database(&db_path).await.unwrap();
        assert!(db_path.exists());

        // All five tables queryable
        for table in [
            "leads",
            "providers",
            "submissions",
            "lead_overlap",
            "ingest_runs",
        ] {
            let count: i64 =
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                    .fetch_one(&pool)
                    .await
                    .unwrap();
            assert_eq!(count, 0, "table {} should exist and be empty", table);
        }
    }

    #[tokio::test]
    async fn test_init_database_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("leadpool.db");

        let pool = init_database(&db_path).await.unwrap();
        drop(pool);

        // Second open against the existing file must not fail
        let pool = init_database(&db_path).await.unwrap();
        let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn test_phone_uniqueness_enforced_by_schema() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database(&dir.path().join("leadpool.db")).await.unwrap();

        sqlx::query("INSERT INTO leads (guid, phone, area, created_at) VALUES ('a', '5551234567', 'X', '2024-01-01 00:00:00.000')")
            .execute(&pool)
            .await
            .unwrap();

        let dup = sqlx::query("INSERT INTO leads (guid, phone, area, created_at) VALUES ('b', '5551234567', 'Y', '2024-01-01 00:00:00.000')")
            .execute(&pool)
            .await;
        assert!(dup.is_err(), "duplicate phone must violate UNIQUE");
    }
}
