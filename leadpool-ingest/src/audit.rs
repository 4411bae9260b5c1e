//! Per-run audit accounting
//!
//! Every run ends with one `RunStats`: how many rows were read, accepted,
//! dropped (and why), how many soft warnings were raised, and what the
//! writer actually created. Logged at the end of the run and persisted to
//! `ingest_runs` for operational visibility.

use crate::validate::CorruptReason;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

/// Counters for one parsed source file, accumulated worker-side
#[derive(Debug, Default, Clone)]
pub struct FileStats {
    pub rows_read: u64,
    pub rows_accepted: u64,
    pub rows_corrupt: u64,
    pub rows_unrecognized_area: u64,
    pub corrupt_reasons: BTreeMap<String, u64>,
}

impl FileStats {
    pub fn record_corrupt(&mut self, reason: CorruptReason) {
        self.rows_corrupt += 1;
        *self.corrupt_reasons.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn record_accepted(&mut self, area_recognized: bool) {
        self.rows_accepted += 1;
        if !area_recognized {
            self.rows_unrecognized_area += 1;
        }
    }

    /// A whole file could not be opened or sniffed
    pub fn record_file_error(&mut self) {
        *self
            .corrupt_reasons
            .entry("unreadable_file".to_string())
            .or_insert(0) += 1;
    }
}

/// Aggregated audit record of one ingestion run
#[derive(Debug, Clone)]
pub struct RunStats {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files_total: u64,
    pub rows_read: u64,
    pub rows_accepted: u64,
    pub rows_corrupt: u64,
    pub rows_unrecognized_area: u64,
    pub area_conflicts: u64,
    pub corrupt_reasons: BTreeMap<String, u64>,
    pub leads_created: u64,
    pub providers_created: u64,
    pub submissions_created: u64,
}

impl RunStats {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            files_total: 0,
            rows_read: 0,
            rows_accepted: 0,
            rows_corrupt: 0,
            rows_unrecognized_area: 0,
            area_conflicts: 0,
            corrupt_reasons: BTreeMap::new(),
            leads_created: 0,
            providers_created: 0,
            submissions_created: 0,
        }
    }

    /// Fold one file's counters into the run totals
    pub fn merge_file(&mut self, file: &FileStats) {
        self.files_total += 1;
        self.rows_read += file.rows_read;
        self.rows_accepted += file.rows_accepted;
        self.rows_corrupt += file.rows_corrupt;
        self.rows_unrecognized_area += file.rows_unrecognized_area;
        for (reason, count) in &file.corrupt_reasons {
            *self.corrupt_reasons.entry(reason.clone()).or_insert(0) += count;
        }
    }

    /// JSON blob stored in `ingest_runs.summary`
    pub fn summary_json(&self) -> String {
        json!({
            "corrupt_reasons": self.corrupt_reasons,
            "leads_created": self.leads_created,
            "providers_created": self.providers_created,
            "submissions_created": self.submissions_created,
        })
        .to_string()
    }

    pub fn log_summary(&self) {
        info!(
            files = self.files_total,
            rows_read = self.rows_read,
            accepted = self.rows_accepted,
            corrupt = self.rows_corrupt,
            unrecognized_area = self.rows_unrecognized_area,
            area_conflicts = self.area_conflicts,
            leads_created = self.leads_created,
            providers_created = self.providers_created,
            submissions_created = self.submissions_created,
            "Ingestion run complete"
        );
        for (reason, count) in &self.corrupt_reasons {
            info!(reason = %reason, count, "Corrupt rows");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stats_reason_counting() {
        let mut stats = FileStats::default();
        stats.rows_read = 3;
        stats.record_corrupt(CorruptReason::InvalidPhone);
        stats.record_corrupt(CorruptReason::InvalidPhone);
        stats.record_accepted(false);

        assert_eq!(stats.rows_corrupt, 2);
        assert_eq!(stats.rows_accepted, 1);
        assert_eq!(stats.rows_unrecognized_area, 1);
        assert_eq!(stats.corrupt_reasons.get("invalid_phone"), Some(&2));
    }

    #[test]
    fn test_merge_file_accumulates() {
        let mut run = RunStats::new(Utc::now());
        let mut a = FileStats::default();
        a.rows_read = 10;
        a.record_accepted(true);
        a.record_corrupt(CorruptReason::MissingPhone);

        let mut b = FileStats::default();
        b.rows_read = 5;
        b.record_corrupt(CorruptReason::MissingPhone);
        b.record_corrupt(CorruptReason::UnreadableRow);

        run.merge_file(&a);
        run.merge_file(&b);

        assert_eq!(run.files_total, 2);
        assert_eq!(run.rows_read, 15);
        assert_eq!(run.rows_corrupt, 3);
        assert_eq!(run.corrupt_reasons.get("missing_phone"), Some(&2));
        assert_eq!(run.corrupt_reasons.get("unreadable_row"), Some(&1));
    }

    #[test]
    fn test_summary_json_shape() {
        let mut run = RunStats::new(Utc::now());
        run.leads_created = 7;
        let parsed: serde_json::Value = serde_json::from_str(&run.summary_json()).unwrap();
        assert_eq!(parsed["leads_created"], 7);
        assert!(parsed["corrupt_reasons"].is_object());
    }
}
