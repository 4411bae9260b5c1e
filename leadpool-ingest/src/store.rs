//! Storage layer over the system-of-record relations
//!
//! All writes go through upserts so re-running ingestion is idempotent;
//! a batch commits in one transaction, all or nothing. The schema itself
//! backs up every invariant (UNIQUE phone/name, composite submission key,
//! cascade deletes), so these queries cannot corrupt the relations even
//! when called out of order.

use crate::audit::RunStats;
use leadpool_common::config::OrphanPolicy;
use leadpool_common::db::models::{IngestRun, Lead, Provider, Submission};
use leadpool_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Identity-map entry for a known lead
#[derive(Debug, Clone)]
pub struct LeadEntry {
    pub guid: String,
    pub area: String,
}

/// Pending insert for a first-observed lead
#[derive(Debug, Clone)]
pub struct NewLead {
    pub guid: String,
    pub phone: String,
    pub area: String,
    pub area_recognized: bool,
    pub created_at: String,
}

/// Pending insert for a first-observed provider
#[derive(Debug, Clone)]
pub struct NewProvider {
    pub guid: String,
    pub name: String,
    pub created_at: String,
}

/// Pending submission upsert
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub lead_id: String,
    pub provider_id: String,
    pub submitted_at: String,
}

/// One transaction's worth of resolved writes
#[derive(Debug, Default)]
pub struct Batch {
    pub leads: Vec<NewLead>,
    pub providers: Vec<NewProvider>,
    pub submissions: Vec<NewSubmission>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.leads.is_empty() && self.providers.is_empty() && self.submissions.is_empty()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.len()
    }
}

/// Row counts actually written by a committed batch
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchOutcome {
    pub leads_created: u64,
    pub providers_created: u64,
    pub submissions_created: u64,
}

/// Result of a cascading provider delete
#[derive(Debug, Clone, Copy)]
pub struct ProviderDelete {
    pub submissions_removed: u64,
    pub leads_purged: u64,
}

/// Table row counts for the status report
#[derive(Debug, Clone, Copy)]
pub struct StoreCounts {
    pub leads: i64,
    pub providers: i64,
    pub submissions: i64,
    pub overlap_rows: i64,
}

/// Storage access for leads, providers, and submissions
#[derive(Clone)]
pub struct LeadStore {
    db: SqlitePool,
}

impl LeadStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Warm the dedup engine's identity maps from existing rows, so a
    /// re-run resolves previously ingested phones and providers instead of
    /// recreating them.
    pub async fn load_identity_maps(
        &self,
    ) -> Result<(HashMap<String, LeadEntry>, HashMap<String, String>)> {
        let lead_rows: Vec<(String, String, String)> =
            sqlx::query_as("SELECT phone, guid, area FROM leads")
                .fetch_all(&self.db)
                .await?;
        let mut leads = HashMap::with_capacity(lead_rows.len());
        for (phone, guid, area) in lead_rows {
            leads.insert(phone, LeadEntry { guid, area });
        }

        let provider_rows: Vec<(String, String)> =
            sqlx::query_as("SELECT name, guid FROM providers")
                .fetch_all(&self.db)
                .await?;
        let providers = provider_rows.into_iter().collect();

        debug!(
            leads = leads.len(),
            "Loaded identity maps from existing database state"
        );
        Ok((leads, providers))
    }

    /// Commit one batch transactionally.
    ///
    /// Submissions keep the earliest timestamp per (lead, provider) pair:
    /// a new pair inserts, a repeat with an earlier timestamp updates, and
    /// anything else is a no-op.
    pub async fn apply_batch(&self, batch: &Batch) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        if batch.is_empty() {
            return Ok(outcome);
        }

        let mut tx = self.db.begin().await?;

        for lead in &batch.leads {
            let result = sqlx::query(
                r#"
                INSERT INTO leads (guid, phone, area, area_recognized, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(phone) DO NOTHING
                "#,
            )
            .bind(&lead.guid)
            .bind(&lead.phone)
            .bind(&lead.area)
            .bind(lead.area_recognized)
            .bind(&lead.created_at)
            .execute(&mut *tx)
            .await?;
            outcome.leads_created += result.rows_affected();
        }

        for provider in &batch.providers {
            let result = sqlx::query(
                r#"
                INSERT INTO providers (guid, name, created_at)
                VALUES (?, ?, ?)
                ON CONFLICT(name) DO NOTHING
                "#,
            )
            .bind(&provider.guid)
            .bind(&provider.name)
            .bind(&provider.created_at)
            .execute(&mut *tx)
            .await?;
            outcome.providers_created += result.rows_affected();
        }

        for submission in &batch.submissions {
            let inserted = sqlx::query(
                r#"
                INSERT INTO submissions (lead_id, provider_id, submitted_at)
                VALUES (?, ?, ?)
                ON CONFLICT(lead_id, provider_id) DO NOTHING
                "#,
            )
            .bind(&submission.lead_id)
            .bind(&submission.provider_id)
            .bind(&submission.submitted_at)
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() > 0 {
                outcome.submissions_created += 1;
            } else {
                // Existing pair: only an earlier timestamp wins
                sqlx::query(
                    r#"
                    UPDATE submissions SET submitted_at = ?
                    WHERE lead_id = ? AND provider_id = ? AND submitted_at > ?
                    "#,
                )
                .bind(&submission.submitted_at)
                .bind(&submission.lead_id)
                .bind(&submission.provider_id)
                .bind(&submission.submitted_at)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// Look up a lead by canonical phone (audit/verification path)
    pub async fn lead_by_phone(&self, phone: &str) -> Result<Option<Lead>> {
        let lead = sqlx::query_as::<_, Lead>(
            "SELECT guid, phone, area, area_recognized, created_at FROM leads WHERE phone = ?",
        )
        .bind(phone)
        .fetch_optional(&self.db)
        .await?;
        Ok(lead)
    }

    /// Look up a provider by name
    pub async fn provider_by_name(&self, name: &str) -> Result<Option<Provider>> {
        let provider = sqlx::query_as::<_, Provider>(
            "SELECT guid, name, created_at FROM providers WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.db)
        .await?;
        Ok(provider)
    }

    /// All submissions attributed to a provider, oldest first
    pub async fn submissions_for_provider(&self, name: &str) -> Result<Vec<Submission>> {
        let rows = sqlx::query_as::<_, Submission>(
            r#"
            SELECT s.lead_id, s.provider_id, s.submitted_at
            FROM submissions s
            JOIN providers p ON p.guid = s.provider_id
            WHERE p.name = ?
            ORDER BY s.submitted_at, s.lead_id
            "#,
        )
        .bind(name)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// Row counts across the relations
    pub async fn counts(&self) -> Result<StoreCounts> {
        let leads: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leads")
            .fetch_one(&self.db)
            .await?;
        let providers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM providers")
            .fetch_one(&self.db)
            .await?;
        let submissions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM submissions")
            .fetch_one(&self.db)
            .await?;
        let overlap_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lead_overlap")
            .fetch_one(&self.db)
            .await?;
        Ok(StoreCounts {
            leads,
            providers,
            submissions,
            overlap_rows,
        })
    }

    /// Delete a provider; its submissions go with it via cascade.
    ///
    /// Leads left with zero submissions are purged or retained per the
    /// configured policy.
    pub async fn delete_provider(
        &self,
        name: &str,
        orphan_policy: OrphanPolicy,
    ) -> Result<ProviderDelete> {
        let mut tx = self.db.begin().await?;

        let guid: Option<String> =
            sqlx::query_scalar("SELECT guid FROM providers WHERE name = ?")
                .bind(name)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(guid) = guid else {
            return Err(Error::NotFound(format!("provider '{}'", name)));
        };

        let submissions_removed: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM submissions WHERE provider_id = ?")
                .bind(&guid)
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM providers WHERE guid = ?")
            .bind(&guid)
            .execute(&mut *tx)
            .await?;

        let leads_purged = match orphan_policy {
            OrphanPolicy::Retain => 0,
            OrphanPolicy::Purge => {
                let result = sqlx::query(
                    "DELETE FROM leads WHERE guid NOT IN (SELECT lead_id FROM submissions)",
                )
                .execute(&mut *tx)
                .await?;
                result.rows_affected()
            }
        };

        tx.commit().await?;

        info!(
            provider = name,
            submissions_removed, leads_purged, "Provider deleted"
        );
        Ok(ProviderDelete {
            submissions_removed: submissions_removed as u64,
            leads_purged,
        })
    }

    /// Remove all leads with zero remaining submissions
    pub async fn purge_orphan_leads(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM leads WHERE guid NOT IN (SELECT lead_id FROM submissions)",
        )
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Persist the audit record of a completed run
    pub async fn record_run(&self, stats: &RunStats) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingest_runs
                (guid, started_at, finished_at, files_total, rows_read,
                 rows_accepted, rows_corrupt, rows_unrecognized_area,
                 area_conflicts, summary)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(leadpool_common::time::format_utc(stats.started_at))
        .bind(leadpool_common::time::format_utc(stats.finished_at))
        .bind(stats.files_total as i64)
        .bind(stats.rows_read as i64)
        .bind(stats.rows_accepted as i64)
        .bind(stats.rows_corrupt as i64)
        .bind(stats.rows_unrecognized_area as i64)
        .bind(stats.area_conflicts as i64)
        .bind(stats.summary_json())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Most recent audit record, if any run has completed
    pub async fn last_run(&self) -> Result<Option<IngestRun>> {
        let run = sqlx::query_as::<_, IngestRun>(
            "SELECT * FROM ingest_runs ORDER BY finished_at DESC LIMIT 1",
        )
        .fetch_optional(&self.db)
        .await?;
        Ok(run)
    }
}
