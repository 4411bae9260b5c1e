//! Database models
//!
//! Timestamps are stored as TEXT in the fixed format produced by
//! [`crate::time::format_utc`] and kept as strings here; callers that need
//! a `DateTime` parse with [`crate::time::parse_utc`].

use serde::{Deserialize, Serialize};

/// A unique contactable entity, identified by canonical phone
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Lead {
    pub guid: String,
    pub phone: String,
    pub area: String,
    pub area_recognized: bool,
    pub created_at: String,
}

/// An upstream data source
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Provider {
    pub guid: String,
    pub name: String,
    pub created_at: String,
}

/// Provenance junction row: this provider submitted this lead.
///
/// `submitted_at` is the earliest submission time observed for the pair.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Submission {
    pub lead_id: String,
    pub provider_id: String,
    pub submitted_at: String,
}

/// One row of the derived aggregation, keyed by lead.
///
/// `all_providers` is comma-joined, ordered by first submission time with
/// name as tie-break; `primary_provider` is NULL only for a lead with zero
/// remaining submissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OverlapRow {
    pub lead_id: String,
    pub phone: String,
    pub area: String,
    pub all_providers: String,
    pub provider_count: i64,
    pub primary_provider: Option<String>,
    pub refreshed_at: String,
}

/// Audit record of one completed ingestion run
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IngestRun {
    pub guid: String,
    pub started_at: String,
    pub finished_at: String,
    pub files_total: i64,
    pub rows_read: i64,
    pub rows_accepted: i64,
    pub rows_corrupt: i64,
    pub rows_unrecognized_area: i64,
    pub area_conflicts: i64,
    pub summary: String,
}
