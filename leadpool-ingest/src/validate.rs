//! Row classification
//!
//! Applies the field normalizer to a raw parsed row and classifies it as
//! accepted or corrupt. Corrupt rows are dropped and counted, never fatal:
//! one bad row costs one row, not the run.

use crate::normalize::{self, AreaTable, FieldRejection};
use chrono::{DateTime, Utc};
use leadpool_common::config::NormalizerConfig;
use leadpool_common::time;
use std::fmt;

/// A row as parsed from a source file, before normalization.
///
/// Missing columns surface as None and are classified here rather than in
/// the reader.
#[derive(Debug, Clone)]
pub struct RawRow {
    pub provider: Option<String>,
    pub file: String,
    pub line: u64,
    pub phone: Option<String>,
    pub area: Option<String>,
    pub submitted_at: Option<String>,
}

/// A fully normalized, accepted row ready for the dedup engine
#[derive(Debug, Clone)]
pub struct CleanRow {
    pub provider: String,
    pub phone: String,
    pub area: String,
    pub area_recognized: bool,
    pub submitted_at: DateTime<Utc>,
    pub file: String,
    pub line: u64,
}

/// Why a row was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorruptReason {
    /// Row bytes could not be read or decoded
    UnreadableRow,
    /// No provider identity could be attributed to the row
    MissingProvider,
    /// Phone column absent or empty
    MissingPhone,
    /// Phone present but does not normalize
    InvalidPhone,
    /// Area rejected under `reject_unknown_areas`
    UnknownArea,
}

impl fmt::Display for CorruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = match self {
            CorruptReason::UnreadableRow => "unreadable_row",
            CorruptReason::MissingProvider => "missing_provider",
            CorruptReason::MissingPhone => "missing_phone",
            CorruptReason::InvalidPhone => "invalid_phone",
            CorruptReason::UnknownArea => "unknown_area",
        };
        write!(f, "{}", key)
    }
}

/// Classification result: a tagged variant, not a null-riddled record
#[derive(Debug, Clone)]
pub enum RowOutcome {
    Accepted(CleanRow),
    Corrupt(CorruptReason),
}

/// Classify one raw row.
///
/// Rows without a parseable `submitted_at` fall back to `fallback_time`
/// (the run start), so first-submission tie-breaks stay deterministic
/// within a run.
pub fn classify(
    row: RawRow,
    table: &AreaTable,
    config: &NormalizerConfig,
    fallback_time: DateTime<Utc>,
) -> RowOutcome {
    let provider = match row.provider {
        Some(p) if !p.trim().is_empty() => p,
        _ => return RowOutcome::Corrupt(CorruptReason::MissingProvider),
    };

    let raw_phone = match row.phone {
        Some(p) if !p.trim().is_empty() => p,
        _ => return RowOutcome::Corrupt(CorruptReason::MissingPhone),
    };

    let phone = match normalize::normalize_phone(&raw_phone, config) {
        Ok(p) => p,
        Err(FieldRejection::InvalidPhone) => {
            return RowOutcome::Corrupt(CorruptReason::InvalidPhone)
        }
        Err(FieldRejection::UnknownArea) => unreachable!("phone normalization"),
    };

    let area = match table.normalize(row.area.as_deref().unwrap_or("")) {
        Ok(a) => a,
        Err(_) => return RowOutcome::Corrupt(CorruptReason::UnknownArea),
    };

    let submitted_at = row
        .submitted_at
        .as_deref()
        .and_then(time::parse_flexible)
        .unwrap_or(fallback_time);

    RowOutcome::Accepted(CleanRow {
        provider,
        phone,
        area: area.canonical,
        area_recognized: area.recognized,
        submitted_at,
        file: row.file,
        line: row.line,
    })
}
