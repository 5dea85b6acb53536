//! Progress reporting for harvest runs.
//!
//! The orchestrator emits [`HarvestEvent`]s; what happens to them (nothing,
//! structured logs, a progress bar) is up to the [`ProgressReporter`].

use crate::harvest::{HarvestReport, Termination};
use crate::sync::{SyncOutcome, SyncStats};

/// Events emitted during a harvest run.
#[derive(Debug, Clone)]
pub enum HarvestEvent<'a> {
    /// Run starting at offset 0.
    Started {
        page_size: u32,
    },

    /// A page came back from the catalog.
    PageFetched {
        offset: u64,
        records: usize,
        /// Catalog-reported total, if any.
        total: Option<u64>,
    },

    /// One record was written (or found unchanged).
    RecordStored {
        ckan_id: &'a str,
        title: &'a str,
        outcome: SyncOutcome,
        resource_count: usize,
    },

    /// One record could not be normalized or stored.
    RecordRejected {
        ckan_id: Option<&'a str>,
        outcome: SyncOutcome,
        error: &'a str,
    },

    /// Every record of a page has been handled.
    PageProcessed {
        offset: u64,
        records: usize,
        /// Records handled since the start of the run.
        running_total: usize,
        stats: &'a SyncStats,
    },

    /// Run reached a terminal state.
    Finished {
        report: &'a HarvestReport,
    },
}

/// Trait for reporting harvest progress.
///
/// The default implementation does nothing (silent mode), which is
/// appropriate for library usage where the caller doesn't need progress updates.
///
/// # Example
///
/// ```
/// use ceres_core::progress::{HarvestEvent, ProgressReporter};
///
/// struct PageCounter;
///
/// impl ProgressReporter for PageCounter {
///     fn report(&self, event: HarvestEvent<'_>) {
///         if let HarvestEvent::PageProcessed { running_total, .. } = event {
///             println!("{} records so far", running_total);
///         }
///     }
/// }
/// ```
pub trait ProgressReporter: Send + Sync {
    /// Called when a harvest event occurs.
    fn report(&self, event: HarvestEvent<'_>) {
        let _ = event;
    }
}

/// A no-op reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// A reporter that logs events using the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        use tracing::{debug, info, warn};

        match event {
            HarvestEvent::Started { page_size } => {
                info!(page_size, "Starting catalog harvest");
            }
            HarvestEvent::PageFetched {
                offset,
                records,
                total,
            } => {
                debug!(offset, records, ?total, "Page fetched");
            }
            HarvestEvent::RecordStored {
                ckan_id,
                title,
                outcome,
                resource_count,
            } => {
                let action = match outcome {
                    SyncOutcome::Created => "Created",
                    SyncOutcome::Updated => "Updated",
                    _ => "Unchanged",
                };
                info!(ckan_id, "-- {}: {} ({} resources)", action, title, resource_count);
            }
            HarvestEvent::RecordRejected {
                ckan_id,
                outcome,
                error,
            } => {
                warn!(ckan_id = ckan_id.unwrap_or("<none>"), ?outcome, "Record not stored: {}", error);
            }
            HarvestEvent::PageProcessed {
                offset,
                records,
                running_total,
                stats,
            } => {
                info!(
                    offset,
                    records,
                    "Total harvested: {} ({} created, {} updated, {} unchanged, {} skipped, {} failed)",
                    running_total,
                    stats.created,
                    stats.updated,
                    stats.unchanged,
                    stats.skipped,
                    stats.failed
                );
            }
            HarvestEvent::Finished { report } => match &report.termination {
                Termination::Exhausted => {
                    info!(
                        pages = report.pages_fetched,
                        "Harvest complete: {} record(s)",
                        report.records_seen
                    );
                }
                Termination::EarlyStop(error) => {
                    warn!(
                        pages = report.pages_fetched,
                        "Harvest stopped early after {} record(s): {}",
                        report.records_seen,
                        error
                    );
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_reporter_does_nothing() {
        let reporter = SilentReporter;
        reporter.report(HarvestEvent::Started { page_size: 100 });
    }

    #[test]
    fn test_tracing_reporter_handles_all_events() {
        let reporter = TracingReporter;
        let stats = SyncStats::new();

        reporter.report(HarvestEvent::Started { page_size: 10 });
        reporter.report(HarvestEvent::PageFetched {
            offset: 0,
            records: 10,
            total: Some(25),
        });
        reporter.report(HarvestEvent::RecordStored {
            ckan_id: "abc",
            title: "Air",
            outcome: SyncOutcome::Created,
            resource_count: 2,
        });
        reporter.report(HarvestEvent::RecordRejected {
            ckan_id: None,
            outcome: SyncOutcome::Skipped,
            error: "record has no 'id'",
        });
        reporter.report(HarvestEvent::PageProcessed {
            offset: 0,
            records: 10,
            running_total: 10,
            stats: &stats,
        });

        let report = HarvestReport {
            stats: stats.clone(),
            pages_fetched: 2,
            records_seen: 10,
            termination: Termination::EarlyStop("HTTP 500".to_string()),
        };
        reporter.report(HarvestEvent::Finished { report: &report });
    }
}
