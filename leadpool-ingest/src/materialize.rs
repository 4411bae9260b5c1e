//! Aggregation materializer
//!
//! Derives the flat `lead_overlap` projection from the system of record.
//! Full rebuilds go into a shadow table that replaces the live one in a
//! single transaction, so a reader either sees the old projection or the
//! new one, never a partial build; a failed rebuild rolls back and leaves
//! the previous projection live.
//!
//! Determinism contract: the provider list is ordered by first submission
//! time with provider name as tie-break, and the primary provider is the
//! head of that list. Full and incremental refresh share one row builder,
//! so they cannot drift apart.

use futures::TryStreamExt;
use leadpool_common::db::init::{overlap_table_sql, OVERLAP_INDEXES};
use leadpool_common::db::models::OverlapRow;
use leadpool_common::{time, Error, Result};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::info;

const SHADOW_TABLE: &str = "lead_overlap_shadow";

/// Joined submissions ordered for deterministic grouping
const ORDERED_SUBMISSIONS_SQL: &str = r#"
    SELECT s.lead_id, l.phone, l.area, p.name
    FROM submissions s
    JOIN leads l ON l.guid = s.lead_id
    JOIN providers p ON p.guid = s.provider_id
    ORDER BY s.lead_id, s.submitted_at, p.name
"#;

/// Leads with no remaining submissions (historical stubs)
const ORPHAN_LEADS_SQL: &str = r#"
    SELECT guid, phone, area FROM leads
    WHERE guid NOT IN (SELECT lead_id FROM submissions)
    ORDER BY guid
"#;

/// Builds and refreshes the aggregated projection
pub struct Materializer {
    db: SqlitePool,
}

impl Materializer {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Recompute the whole projection from scratch and atomically swap it
    /// in. Returns the number of rows materialized.
    pub async fn rebuild_full(&self) -> Result<u64> {
        match self.rebuild_inner().await {
            Ok(rows) => {
                info!(rows, "Full projection rebuild complete");
                Ok(rows)
            }
            Err(Error::Materialize(msg)) => Err(Error::Materialize(msg)),
            Err(other) => Err(Error::Materialize(other.to_string())),
        }
    }

    async fn rebuild_inner(&self) -> Result<u64> {
        let refreshed_at = time::format_utc(time::now());
        let mut tx = self.db.begin().await?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", SHADOW_TABLE))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&overlap_table_sql(SHADOW_TABLE))
            .execute(&mut *tx)
            .await?;

        let mut rows_written: u64 = 0;

        // Stream the ordered join from a pool connection while writing
        // into the shadow table through the transaction; grouping needs
        // only one lead's submissions in memory at a time.
        {
            let mut stream = sqlx::query_as::<_, (String, String, String, String)>(
                ORDERED_SUBMISSIONS_SQL,
            )
            .fetch(&self.db);

            let mut current: Option<LeadGroup> = None;
            while let Some((lead_id, phone, area, name)) = stream.try_next().await? {
                match &mut current {
                    Some(group) if group.lead_id == lead_id => {
                        group.providers.push(name);
                    }
                    _ => {
                        if let Some(done) = current.take() {
                            insert_row(&mut tx, SHADOW_TABLE, &done.into_row(&refreshed_at))
                                .await?;
                            rows_written += 1;
                        }
                        current = Some(LeadGroup {
                            lead_id,
                            phone,
                            area,
                            providers: vec![name],
                        });
                    }
                }
            }
            if let Some(done) = current.take() {
                insert_row(&mut tx, SHADOW_TABLE, &done.into_row(&refreshed_at)).await?;
                rows_written += 1;
            }
        }

        // Zero-submission leads still get a projection row
        {
            let mut stream =
                sqlx::query_as::<_, (String, String, String)>(ORPHAN_LEADS_SQL).fetch(&self.db);
            while let Some((lead_id, phone, area)) = stream.try_next().await? {
                let group = LeadGroup {
                    lead_id,
                    phone,
                    area,
                    providers: Vec::new(),
                };
                insert_row(&mut tx, SHADOW_TABLE, &group.into_row(&refreshed_at)).await?;
                rows_written += 1;
            }
        }

        // The swap: readers see the old projection until this commits
        sqlx::query("DROP TABLE lead_overlap").execute(&mut *tx).await?;
        sqlx::query(&format!(
            "ALTER TABLE {} RENAME TO lead_overlap",
            SHADOW_TABLE
        ))
        .execute(&mut *tx)
        .await?;
        for ddl in OVERLAP_INDEXES {
            sqlx::query(ddl).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(rows_written)
    }

    /// Recompute the projection rows of exactly the given leads, in one
    /// transaction. Produces content identical to a full rebuild
    /// restricted to the same lead set.
    pub async fn refresh_incremental(&self, touched: &[String]) -> Result<u64> {
        if touched.is_empty() {
            return Ok(0);
        }

        let refreshed_at = time::format_utc(time::now());
        let mut tx = self.db.begin().await?;
        let mut rows_written: u64 = 0;

        for lead_id in touched {
            sqlx::query("DELETE FROM lead_overlap WHERE lead_id = ?")
                .bind(lead_id)
                .execute(&mut *tx)
                .await?;

            let lead: Option<(String, String)> =
                sqlx::query_as("SELECT phone, area FROM leads WHERE guid = ?")
                    .bind(lead_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            // A touched lead that no longer exists just loses its row
            let Some((phone, area)) = lead else { continue };

            let providers: Vec<(String,)> = sqlx::query_as(
                r#"
                SELECT p.name
                FROM submissions s
                JOIN providers p ON p.guid = s.provider_id
                WHERE s.lead_id = ?
                ORDER BY s.submitted_at, p.name
                "#,
            )
            .bind(lead_id)
            .fetch_all(&mut *tx)
            .await?;

            let group = LeadGroup {
                lead_id: lead_id.clone(),
                phone,
                area,
                providers: providers.into_iter().map(|(name,)| name).collect(),
            };
            insert_row(&mut tx, "lead_overlap", &group.into_row(&refreshed_at)).await?;
            rows_written += 1;
        }

        tx.commit().await?;
        info!(rows = rows_written, "Incremental projection refresh complete");
        Ok(rows_written)
    }

    /// Entire projection, phone-ordered (consumer/verification read path)
    pub async fn overlap_rows(&self) -> Result<Vec<OverlapRow>> {
        let rows = sqlx::query_as::<_, OverlapRow>(
            "SELECT * FROM lead_overlap ORDER BY phone",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// Equality lookup on canonical phone
    pub async fn overlap_by_phone(&self, phone: &str) -> Result<Option<OverlapRow>> {
        let row = sqlx::query_as::<_, OverlapRow>(
            "SELECT * FROM lead_overlap WHERE phone = ?",
        )
        .bind(phone)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }
}

/// One lead's ordered provider names, accumulated during grouping.
///
/// Submissions are unique per (lead, provider), so the incoming names are
/// already distinct.
struct LeadGroup {
    lead_id: String,
    phone: String,
    area: String,
    providers: Vec<String>,
}

impl LeadGroup {
    fn into_row(self, refreshed_at: &str) -> OverlapRow {
        let primary_provider = self.providers.first().cloned();
        OverlapRow {
            lead_id: self.lead_id,
            phone: self.phone,
            area: self.area,
            provider_count: self.providers.len() as i64,
            all_providers: self.providers.join(","),
            primary_provider,
            refreshed_at: refreshed_at.to_string(),
        }
    }
}

async fn insert_row(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    row: &OverlapRow,
) -> Result<()> {
    sqlx::query(&format!(
        r#"
        INSERT INTO {} (lead_id, phone, area, all_providers, provider_count,
                        primary_provider, refreshed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        table
    ))
    .bind(&row.lead_id)
    .bind(&row.phone)
    .bind(&row.area)
    .bind(&row.all_providers)
    .bind(row.provider_count)
    .bind(&row.primary_provider)
    .bind(&row.refreshed_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
