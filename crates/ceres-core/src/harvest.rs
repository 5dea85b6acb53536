//! Harvest orchestrator.
//!
//! A run walks the catalog page by page, starting at offset 0:
//!
//! ```text
//! Start -> Fetching(0) -> Processing -> Fetching(page_size) -> ... -> Done
//! ```
//!
//! - An empty page ends the run ([`Termination::Exhausted`]). The catalog's
//!   own `count` is never used to decide when to stop.
//! - A failed fetch ends the run ([`Termination::EarlyStop`]). Pages already
//!   processed stay committed; nothing is rolled back.
//! - A record that fails normalization or storage is counted and skipped; the
//!   run carries on with the next record.
//!
//! Pages are fetched one at a time and records are upserted in the order the
//! catalog delivered them. Retrying failed fetches is the client's business
//! (see `ceres_client::RetryingClient`), not the orchestrator's.

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::HarvestConfig;
use crate::normalize::normalize;
use crate::progress::{HarvestEvent, ProgressReporter, SilentReporter};
use crate::sync::{SyncOutcome, SyncStats};
use crate::traits::{CatalogClient, DatasetStore, NoLease, PageResult, RunLease};
use crate::upsert::UpsertEngine;
use crate::AppError;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "error", rename_all = "snake_case")]
pub enum Termination {
    /// An empty page was returned, or the configured page limit was reached.
    Exhausted,
    /// A page fetch failed; the message of the error that stopped the run.
    EarlyStop(String),
}

/// State of a single run.
#[derive(Debug)]
enum HarvestState {
    Start,
    Fetching { offset: u64 },
    Processing { page: PageResult },
    Done(Termination),
}

/// Outcome of a harvest run.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub stats: SyncStats,
    /// Pages successfully returned by the catalog, including the final empty one.
    pub pages_fetched: usize,
    /// Records read from the catalog, whatever happened to them.
    pub records_seen: usize,
    pub termination: Termination,
}

impl HarvestReport {
    fn new() -> Self {
        Self {
            stats: SyncStats::new(),
            pages_fetched: 0,
            records_seen: 0,
            termination: Termination::Exhausted,
        }
    }

    /// True when the run reached the end of the catalog.
    pub fn is_complete(&self) -> bool {
        self.termination == Termination::Exhausted
    }
}

/// Service driving harvest runs.
///
/// # Type Parameters
///
/// * `C` - Catalog client (e.g. `CkanClient`, possibly wrapped in `RetryingClient`)
/// * `S` - Dataset store (e.g. `DatasetRepository`)
/// * `L` - Run lease; [`NoLease`] unless [`with_lease`](Self::with_lease) is used
///
/// # Example
///
/// ```
/// use ceres_core::harvest::HarvestService;
/// use ceres_core::memory::MemoryStore;
/// use ceres_core::traits::{CatalogClient, PageResult};
/// use ceres_core::{AppError, HarvestConfig};
///
/// struct EmptyCatalog;
///
/// impl CatalogClient for EmptyCatalog {
///     async fn fetch_page(&self, offset: u64, _rows: u32) -> Result<PageResult, AppError> {
///         Ok(PageResult { offset, ..Default::default() })
///     }
/// }
///
/// # tokio_test_block_on(async {
/// let service = HarvestService::new(EmptyCatalog, MemoryStore::new(), HarvestConfig::default());
/// let report = service.run().await.unwrap();
/// assert!(report.is_complete());
/// assert_eq!(report.records_seen, 0);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub struct HarvestService<C, S, L = NoLease>
where
    C: CatalogClient,
    S: DatasetStore,
    L: RunLease,
{
    client: C,
    engine: UpsertEngine<S>,
    lease: L,
    config: HarvestConfig,
}

impl<C, S> HarvestService<C, S, NoLease>
where
    C: CatalogClient,
    S: DatasetStore,
{
    pub fn new(client: C, store: S, config: HarvestConfig) -> Self {
        let engine = UpsertEngine::new(store, config.upsert());
        Self {
            client,
            engine,
            lease: NoLease,
            config,
        }
    }
}

impl<C, S, L> HarvestService<C, S, L>
where
    C: CatalogClient,
    S: DatasetStore,
    L: RunLease,
{
    /// Guards every run with `lease`, acquired before the first fetch and
    /// released once the run is done.
    pub fn with_lease<L2: RunLease>(self, lease: L2) -> HarvestService<C, S, L2> {
        HarvestService {
            client: self.client,
            engine: self.engine,
            lease,
            config: self.config,
        }
    }

    pub fn store(&self) -> &S {
        self.engine.store()
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Runs a complete harvest.
    ///
    /// Fetch failures do not surface as `Err`: they end the run early and are
    /// recorded in [`HarvestReport::termination`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` for an unusable configuration and
    /// `AppError::HarvestInProgress` if the run lease is held elsewhere.
    pub async fn run(&self) -> Result<HarvestReport, AppError> {
        self.run_with_progress(&SilentReporter).await
    }

    /// Same as [`run`](Self::run), emitting progress events to `reporter`.
    pub async fn run_with_progress<R: ProgressReporter>(
        &self,
        reporter: &R,
    ) -> Result<HarvestReport, AppError> {
        self.config.validate()?;

        let holder = format!("harvest-{}", Uuid::new_v4());
        if !self.lease.acquire(&holder, self.config.lease_ttl()).await? {
            return Err(AppError::HarvestInProgress(
                "run lease is held elsewhere".to_string(),
            ));
        }

        let report = self.sweep(reporter).await;

        if let Err(e) = self.lease.release(&holder).await {
            warn!(holder = %holder, error = %e, "Failed to release run lease");
        }

        reporter.report(HarvestEvent::Finished { report: &report });
        Ok(report)
    }

    /// Runs a harvest only if storage holds no dataset yet.
    ///
    /// Meant for a host process's startup sequence. Returns `None` when
    /// storage already has data. Calling it repeatedly is harmless.
    pub async fn bootstrap<R: ProgressReporter>(
        &self,
        reporter: &R,
    ) -> Result<Option<HarvestReport>, AppError> {
        let existing = self.store().count_datasets().await?;
        if existing > 0 {
            info!(existing, "Storage already populated, skipping bootstrap harvest");
            return Ok(None);
        }
        info!("Storage is empty, running bootstrap harvest");
        self.run_with_progress(reporter).await.map(Some)
    }

    async fn sweep<R: ProgressReporter>(&self, reporter: &R) -> HarvestReport {
        let page_size = self.config.page_size;
        let mut report = HarvestReport::new();
        let mut processed_pages: u32 = 0;
        let mut state = HarvestState::Start;

        let termination = loop {
            state = match state {
                HarvestState::Start => {
                    reporter.report(HarvestEvent::Started { page_size });
                    HarvestState::Fetching { offset: 0 }
                }
                HarvestState::Fetching { offset } => {
                    match self.client.fetch_page(offset, page_size).await {
                        Ok(page) => {
                            report.pages_fetched += 1;
                            reporter.report(HarvestEvent::PageFetched {
                                offset,
                                records: page.records.len(),
                                total: page.total,
                            });
                            if page.is_empty() {
                                HarvestState::Done(Termination::Exhausted)
                            } else {
                                HarvestState::Processing { page }
                            }
                        }
                        Err(e) => {
                            if e.is_fetch_failure() {
                                warn!(offset, error = %e, "Page fetch failed, stopping harvest");
                            } else {
                                error!(offset, error = %e, "Unexpected error fetching page, stopping harvest");
                            }
                            HarvestState::Done(Termination::EarlyStop(e.to_string()))
                        }
                    }
                }
                HarvestState::Processing { page } => {
                    self.process_page(&page, &mut report, reporter).await;
                    processed_pages += 1;
                    reporter.report(HarvestEvent::PageProcessed {
                        offset: page.offset,
                        records: page.records.len(),
                        running_total: report.records_seen,
                        stats: &report.stats,
                    });

                    match self.config.max_pages {
                        Some(max) if processed_pages >= max => {
                            info!(max_pages = max, "Page limit reached");
                            HarvestState::Done(Termination::Exhausted)
                        }
                        _ => HarvestState::Fetching {
                            offset: page.offset + u64::from(page_size),
                        },
                    }
                }
                HarvestState::Done(termination) => break termination,
            };
        };

        report.termination = termination;
        report
    }

    async fn process_page<R: ProgressReporter>(
        &self,
        page: &PageResult,
        report: &mut HarvestReport,
        reporter: &R,
    ) {
        for raw in &page.records {
            report.records_seen += 1;

            let record = match normalize(raw) {
                Ok(record) => record,
                Err(e) => {
                    report.stats.record(SyncOutcome::Skipped);
                    reporter.report(HarvestEvent::RecordRejected {
                        ckan_id: raw.get("id").and_then(Value::as_str),
                        outcome: SyncOutcome::Skipped,
                        error: &e.to_string(),
                    });
                    continue;
                }
            };

            match self.engine.upsert_record(&record).await {
                Ok(upsert) => {
                    report.stats.record_upsert(&upsert);
                    reporter.report(HarvestEvent::RecordStored {
                        ckan_id: &upsert.dataset.ckan_id,
                        title: &upsert.dataset.title,
                        outcome: upsert.outcome,
                        resource_count: upsert.resource_count,
                    });
                }
                Err(e) => {
                    report.stats.record(SyncOutcome::Failed);
                    reporter.report(HarvestEvent::RecordRejected {
                        ckan_id: Some(record.dataset.ckan_id.as_str()),
                        outcome: SyncOutcome::Failed,
                        error: &e.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Catalog that replays a fixed sequence of responses, then empty pages.
    struct ScriptedCatalog {
        responses: Mutex<VecDeque<Result<Vec<Value>, AppError>>>,
        calls: Mutex<Vec<(u64, u32)>>,
    }

    impl ScriptedCatalog {
        fn new(responses: Vec<Result<Vec<Value>, AppError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(u64, u32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CatalogClient for ScriptedCatalog {
        async fn fetch_page(&self, offset: u64, page_size: u32) -> Result<PageResult, AppError> {
            self.calls.lock().unwrap().push((offset, page_size));
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(Ok(records)) => Ok(PageResult {
                    records,
                    total: None,
                    offset,
                }),
                Some(Err(e)) => Err(e),
                None => Ok(PageResult {
                    offset,
                    ..Default::default()
                }),
            }
        }
    }

    impl CatalogClient for std::sync::Arc<ScriptedCatalog> {
        async fn fetch_page(&self, offset: u64, page_size: u32) -> Result<PageResult, AppError> {
            self.as_ref().fetch_page(offset, page_size).await
        }
    }

    #[derive(Default)]
    struct RunningTotals(Mutex<Vec<usize>>);

    impl ProgressReporter for RunningTotals {
        fn report(&self, event: HarvestEvent<'_>) {
            if let HarvestEvent::PageProcessed { running_total, .. } = event {
                self.0.lock().unwrap().push(running_total);
            }
        }
    }

    fn records(prefix: &str, n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| {
                json!({
                    "id": format!("{prefix}-{i}"),
                    "name": format!("{prefix}-{i}"),
                    "title": format!("Dataset {i}"),
                    "organization": {"id": "org", "title": "Org"},
                    "resources": [{"url": format!("https://example.org/{prefix}/{i}.csv")}]
                })
            })
            .collect()
    }

    fn config(page_size: u32) -> HarvestConfig {
        HarvestConfig {
            page_size,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_full_page_then_empty_page() {
        let catalog = std::sync::Arc::new(ScriptedCatalog::new(vec![
            Ok(records("p1", 100)),
            Ok(vec![]),
        ]));
        let store = MemoryStore::new();
        let service = HarvestService::new(catalog.clone(), store.clone(), config(100));

        let report = service.run().await.unwrap();

        assert_eq!(catalog.calls(), vec![(0, 100), (100, 100)]);
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.records_seen, 100);
        assert_eq!(report.stats.created, 100);
        assert_eq!(report.termination, Termination::Exhausted);
        assert!(report.is_complete());
        assert_eq!(store.count_datasets().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_transport_failure_stops_early_and_keeps_committed_pages() {
        let catalog = std::sync::Arc::new(ScriptedCatalog::new(vec![
            Ok(records("p1", 50)),
            Err(AppError::NetworkError("connection reset".to_string())),
            Ok(records("never", 10)),
        ]));
        let store = MemoryStore::new();
        let service = HarvestService::new(catalog.clone(), store.clone(), config(50));

        let report = service.run().await.unwrap();

        assert_eq!(catalog.calls().len(), 2);
        assert_eq!(report.records_seen, 50);
        assert!(matches!(report.termination, Termination::EarlyStop(ref msg) if msg.contains("connection reset")));
        assert!(!report.is_complete());
        assert_eq!(store.count_datasets().await.unwrap(), 50);
        assert!(store.get_dataset("p1-49").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalid_record_is_skipped_and_run_continues() {
        let mut page = records("p1", 2);
        page.insert(1, json!({"title": "no id"}));
        let catalog = ScriptedCatalog::new(vec![Ok(page)]);
        let store = MemoryStore::new();
        let service = HarvestService::new(catalog, store.clone(), config(10));

        let report = service.run().await.unwrap();

        assert_eq!(report.records_seen, 3);
        assert_eq!(report.stats.skipped, 1);
        assert_eq!(report.stats.created, 2);
        assert_eq!(store.count_datasets().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_storage_failure_is_isolated() {
        let catalog = ScriptedCatalog::new(vec![Ok(records("p1", 3))]);
        let store = MemoryStore::new();
        store.fail_on("p1-1");
        let service = HarvestService::new(catalog, store.clone(), config(10));

        let report = service.run().await.unwrap();

        assert_eq!(report.stats.failed, 1);
        assert_eq!(report.stats.created, 2);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_second_run_reports_no_creations() {
        let store = MemoryStore::new();

        let first = HarvestService::new(
            ScriptedCatalog::new(vec![Ok(records("p1", 5))]),
            store.clone(),
            config(10),
        );
        first.run().await.unwrap();
        let snapshot = store.list_datasets().await.unwrap();

        let second = HarvestService::new(
            ScriptedCatalog::new(vec![Ok(records("p1", 5))]),
            store.clone(),
            config(10),
        );
        let report = second.run().await.unwrap();

        assert_eq!(report.stats.created, 0);
        assert_eq!(report.stats.unchanged, 5);
        assert_eq!(report.stats.resources_created, 0);
        assert_eq!(store.list_datasets().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_duplicate_ids_across_pages_do_not_duplicate_rows() {
        let catalog = ScriptedCatalog::new(vec![Ok(records("p", 3)), Ok(records("p", 3))]);
        let store = MemoryStore::new();
        let service = HarvestService::new(catalog, store.clone(), config(3));

        let report = service.run().await.unwrap();

        assert_eq!(report.records_seen, 6);
        assert_eq!(report.stats.created, 3);
        assert_eq!(report.stats.unchanged, 3);
        assert_eq!(store.count_datasets().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_running_total_reported_after_each_page() {
        let catalog = ScriptedCatalog::new(vec![
            Ok(records("a", 2)),
            Ok(records("b", 2)),
            Ok(records("c", 1)),
        ]);
        let service = HarvestService::new(catalog, MemoryStore::new(), config(2));
        let reporter = RunningTotals::default();

        service.run_with_progress(&reporter).await.unwrap();

        assert_eq!(*reporter.0.lock().unwrap(), vec![2, 4, 5]);
    }

    #[tokio::test]
    async fn test_max_pages_limit() {
        let catalog = std::sync::Arc::new(ScriptedCatalog::new(vec![
            Ok(records("a", 2)),
            Ok(records("b", 2)),
            Ok(records("c", 2)),
        ]));
        let service = HarvestService::new(
            catalog.clone(),
            MemoryStore::new(),
            HarvestConfig {
                page_size: 2,
                max_pages: Some(2),
                ..Default::default()
            },
        );

        let report = service.run().await.unwrap();

        assert_eq!(catalog.calls().len(), 2);
        assert_eq!(report.records_seen, 4);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_zero_page_size_is_rejected_before_fetching() {
        let catalog = std::sync::Arc::new(ScriptedCatalog::new(vec![]));
        let service = HarvestService::new(catalog.clone(), MemoryStore::new(), config(0));

        let result = service.run().await;

        assert!(matches!(result, Err(AppError::ConfigError(_))));
        assert!(catalog.calls().is_empty());
    }

    #[tokio::test]
    async fn test_zero_max_pages_is_rejected_before_fetching() {
        let catalog = std::sync::Arc::new(ScriptedCatalog::new(vec![Ok(records("a", 2))]));
        let service = HarvestService::new(
            catalog.clone(),
            MemoryStore::new(),
            HarvestConfig {
                page_size: 2,
                max_pages: Some(0),
                ..Default::default()
            },
        );

        let result = service.run().await;

        assert!(matches!(result, Err(AppError::ConfigError(_))));
        assert!(catalog.calls().is_empty());
    }

    #[tokio::test]
    async fn test_lease_blocks_concurrent_run() {
        let store = MemoryStore::new();
        assert!(store
            .acquire("someone-else", Duration::from_secs(60))
            .await
            .unwrap());

        let service = HarvestService::new(
            ScriptedCatalog::new(vec![Ok(records("a", 1))]),
            store.clone(),
            config(10),
        )
        .with_lease(store.clone());

        let result = service.run().await;
        assert!(matches!(result, Err(AppError::HarvestInProgress(_))));
        assert_eq!(store.count_datasets().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lease_released_after_run() {
        let store = MemoryStore::new();
        let service = HarvestService::new(
            ScriptedCatalog::new(vec![Ok(records("a", 1))]),
            store.clone(),
            config(10),
        )
        .with_lease(store.clone());

        service.run().await.unwrap();

        assert!(store.acquire("next", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_bootstrap_only_runs_on_empty_storage() {
        let store = MemoryStore::new();
        let service = HarvestService::new(
            ScriptedCatalog::new(vec![Ok(records("a", 3)), Ok(vec![]), Ok(records("b", 3))]),
            store.clone(),
            config(10),
        );

        let first = service.bootstrap(&SilentReporter).await.unwrap();
        assert_eq!(first.map(|r| r.records_seen), Some(3));

        let second = service.bootstrap(&SilentReporter).await.unwrap();
        assert!(second.is_none());
        assert_eq!(store.count_datasets().await.unwrap(), 3);
    }

    #[test]
    fn test_termination_serialization() {
        let json = serde_json::to_value(Termination::EarlyStop("HTTP 500".to_string())).unwrap();
        assert_eq!(json["kind"], "early_stop");
        assert_eq!(json["error"], "HTTP 500");
        let json = serde_json::to_value(Termination::Exhausted).unwrap();
        assert_eq!(json["kind"], "exhausted");
    }
}
