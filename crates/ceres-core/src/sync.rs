//! Per-record outcomes and run statistics.
//!
//! Pure bookkeeping, decoupled from I/O and from the orchestrator loop.

use serde::Serialize;

use crate::upsert::UpsertReport;

/// Outcome of processing a single record during a harvest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    /// First time this `ckan_id` was seen
    Created,
    /// Existing row overwritten with different values
    Updated,
    /// Existing row already held exactly these values
    Unchanged,
    /// Record failed normalization and was not stored
    Skipped,
    /// Storage rejected the record
    Failed,
}

/// Statistics for a harvest run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub resources_created: usize,
    pub resources_updated: usize,
    pub resources_unchanged: usize,
    pub resources_pruned: u64,
    pub resources_skipped: usize,
}

impl SyncStats {
    /// Creates a new empty stats tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an outcome, incrementing the appropriate counter.
    pub fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Created => self.created += 1,
            SyncOutcome::Updated => self.updated += 1,
            SyncOutcome::Unchanged => self.unchanged += 1,
            SyncOutcome::Skipped => self.skipped += 1,
            SyncOutcome::Failed => self.failed += 1,
        }
    }

    /// Records a stored record together with its resource counters.
    pub fn record_upsert(&mut self, report: &UpsertReport) {
        self.record(report.outcome);
        self.resources_created += report.resources_created;
        self.resources_updated += report.resources_updated;
        self.resources_unchanged += report.resources_unchanged;
        self.resources_pruned += report.resources_pruned;
        self.resources_skipped += report.resources_skipped;
    }

    /// Returns the total number of processed records.
    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged + self.skipped + self.failed
    }

    /// Returns the number of records that ended up in storage.
    pub fn successful(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}
