//! Deduplication engine
//!
//! Fan-in pipeline: each source file is parsed by its own worker (bounded
//! by `max_parse_workers`), and all accepted rows flow through one bounded
//! channel into a single writer task. The writer owns the identity maps
//! (canonical phone -> lead id, provider name -> provider id), so two rows
//! with the same phone can never race into two leads; the bounded channel
//! keeps memory at one batch plus the channel capacity regardless of total
//! input size.
//!
//! Merge policy, explicit and tested:
//! - a lead is created on first observation of its phone; later rows with
//!   a differing area are counted as conflicts and never overwrite
//! - a (lead, provider) pair keeps its earliest submission timestamp
//! - re-running over identical input is a no-op (warm identity maps +
//!   upsert writes)

use crate::audit::{FileStats, RunStats};
use crate::normalize::AreaTable;
use crate::reader::{self, SourceFile};
use crate::store::{Batch, LeadStore, NewLead, NewProvider, NewSubmission};
use crate::validate::{self, CleanRow, RowOutcome};
use chrono::{DateTime, Utc};
use leadpool_common::config::{Config, InputConfig, NormalizerConfig};
use leadpool_common::{time, Error, Result};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

/// What one ingestion run produced
#[derive(Debug)]
pub struct IngestOutcome {
    pub stats: RunStats,
    /// Leads created or re-submitted during this run, for incremental
    /// projection refresh
    pub touched_leads: Vec<String>,
}

/// Run the full ingestion pipeline over the configured input directory.
///
/// Safe to abort and re-run: commits are per-batch and every write is an
/// upsert.
pub async fn run_ingest(pool: &SqlitePool, config: &Config) -> Result<IngestOutcome> {
    let started_at = time::now();
    let files = reader::discover(&config.input)?;
    info!(files = files.len(), "Starting ingestion run");

    let store = LeadStore::new(pool.clone());
    let mut stats = RunStats::new(started_at);

    let (row_tx, row_rx) = mpsc::channel::<CleanRow>(config.pipeline.channel_capacity);

    let writer = tokio::spawn(writer_task(
        store.clone(),
        row_rx,
        config.storage.batch_size,
    ));

    let area_table = Arc::new(AreaTable::new(&config.normalizer));
    let semaphore = Arc::new(Semaphore::new(config.pipeline.max_parse_workers));
    let mut workers: JoinSet<FileStats> = JoinSet::new();

    for source in files {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Internal(format!("Worker pool closed: {}", e)))?;
        let tx = row_tx.clone();
        let input = config.input.clone();
        let normalizer = config.normalizer.clone();
        let table = area_table.clone();

        workers.spawn(async move {
            let _permit = permit;
            // csv parsing is synchronous; keep it off the async workers
            tokio::task::spawn_blocking(move || {
                parse_file(&source, &input, &normalizer, &table, started_at, &tx)
            })
            .await
            .unwrap_or_else(|e| {
                warn!("Parse worker panicked: {}", e);
                FileStats::default()
            })
        });
    }
    // Writer's recv loop ends once all worker clones are gone
    drop(row_tx);

    while let Some(result) = workers.join_next().await {
        match result {
            Ok(file_stats) => stats.merge_file(&file_stats),
            Err(e) => return Err(Error::Internal(format!("Worker join failed: {}", e))),
        }
    }

    let writer_outcome = writer
        .await
        .map_err(|e| Error::Internal(format!("Writer join failed: {}", e)))??;

    stats.area_conflicts = writer_outcome.area_conflicts;
    stats.leads_created = writer_outcome.leads_created;
    stats.providers_created = writer_outcome.providers_created;
    stats.submissions_created = writer_outcome.submissions_created;
    stats.finished_at = time::now();

    store.record_run(&stats).await?;
    stats.log_summary();

    let mut touched: Vec<String> = writer_outcome.touched_leads.into_iter().collect();
    touched.sort();

    Ok(IngestOutcome {
        stats,
        touched_leads: touched,
    })
}

/// Parse one source file, classify every row, and push accepted rows to
/// the writer. Returns the file's audit counters.
fn parse_file(
    source: &SourceFile,
    input: &InputConfig,
    normalizer: &NormalizerConfig,
    table: &AreaTable,
    fallback_time: DateTime<Utc>,
    tx: &mpsc::Sender<CleanRow>,
) -> FileStats {
    let mut stats = FileStats::default();

    let stream = match reader::RowStream::open(source, input) {
        Ok(s) => s,
        Err(e) => {
            warn!(file = %source.path.display(), "Skipping unreadable file: {}", e);
            stats.record_file_error();
            return stats;
        }
    };

    for item in stream {
        stats.rows_read += 1;
        match item {
            Err(reason) => stats.record_corrupt(reason),
            Ok(raw) => match validate::classify(raw, table, normalizer, fallback_time) {
                RowOutcome::Corrupt(reason) => stats.record_corrupt(reason),
                RowOutcome::Accepted(clean) => {
                    stats.record_accepted(clean.area_recognized);
                    if tx.blocking_send(clean).is_err() {
                        // Writer is gone (storage error); its own error
                        // surfaces from run_ingest, stop parsing
                        break;
                    }
                }
            },
        }
    }

    stats
}

struct WriterOutcome {
    area_conflicts: u64,
    leads_created: u64,
    providers_created: u64,
    submissions_created: u64,
    touched_leads: HashSet<String>,
}

/// Single-writer upsert loop: owns the identity maps and commits batches.
async fn writer_task(
    store: LeadStore,
    mut rx: mpsc::Receiver<CleanRow>,
    batch_size: usize,
) -> Result<WriterOutcome> {
    let (mut lead_map, mut provider_map) = store.load_identity_maps().await?;

    let mut outcome = WriterOutcome {
        area_conflicts: 0,
        leads_created: 0,
        providers_created: 0,
        submissions_created: 0,
        touched_leads: HashSet::new(),
    };
    let mut batch = Batch::default();

    while let Some(row) = rx.recv().await {
        let created_at = time::format_utc(row.submitted_at);

        let provider_id = match provider_map.get(&row.provider) {
            Some(id) => id.clone(),
            None => {
                let id = Uuid::new_v4().to_string();
                provider_map.insert(row.provider.clone(), id.clone());
                batch.providers.push(NewProvider {
                    guid: id.clone(),
                    name: row.provider.clone(),
                    created_at: created_at.clone(),
                });
                id
            }
        };

        let lead_id = match lead_map.get(&row.phone) {
            Some(entry) => {
                if entry.area != row.area {
                    // First-seen area wins; disagreement is an anomaly,
                    // not an error
                    outcome.area_conflicts += 1;
                    warn!(
                        phone = %row.phone,
                        kept = %entry.area,
                        ignored = %row.area,
                        provider = %row.provider,
                        file = %row.file,
                        line = row.line,
                        "Area conflict, keeping first-seen area"
                    );
                }
                entry.guid.clone()
            }
            None => {
                let id = Uuid::new_v4().to_string();
                lead_map.insert(
                    row.phone.clone(),
                    crate::store::LeadEntry {
                        guid: id.clone(),
                        area: row.area.clone(),
                    },
                );
                batch.leads.push(NewLead {
                    guid: id.clone(),
                    phone: row.phone.clone(),
                    area: row.area.clone(),
                    area_recognized: row.area_recognized,
                    created_at: created_at.clone(),
                });
                id
            }
        };

        batch.submissions.push(NewSubmission {
            lead_id: lead_id.clone(),
            provider_id,
            submitted_at: time::format_utc(row.submitted_at),
        });
        outcome.touched_leads.insert(lead_id);

        if batch.submission_count() >= batch_size {
            flush(&store, &mut batch, &mut outcome).await?;
        }
    }

    flush(&store, &mut batch, &mut outcome).await?;
    Ok(outcome)
}

async fn flush(store: &LeadStore, batch: &mut Batch, outcome: &mut WriterOutcome) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let written = store.apply_batch(batch).await?;
    outcome.leads_created += written.leads_created;
    outcome.providers_created += written.providers_created;
    outcome.submissions_created += written.submissions_created;
    *batch = Batch::default();
    Ok(())
}
