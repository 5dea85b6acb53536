//! Trait definitions for external dependencies.
//!
//! The harvesting pipeline only talks to the remote catalog and to storage
//! through these traits, so the HTTP client and the PostgreSQL repository can
//! be swapped for in-process implementations in tests.

use std::future::Future;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::Value;

use crate::models::{Dataset, DatasetQuery, NewDataset, NewResource, Resource};
use crate::stats::{CorpusTotals, GroupField, VisibilitySplit};
use crate::AppError;

/// One page of `package_search` results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResult {
    /// Raw record mappings, in the order the catalog delivered them.
    pub records: Vec<Value>,
    /// Total number of matches reported by the catalog, if any.
    pub total: Option<u64>,
    /// Offset this page was requested at.
    pub offset: u64,
}

impl PageResult {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether the catalog's own count says more records follow this page.
    ///
    /// Informational only: the orchestrator stops on an empty page, not on
    /// this value.
    pub fn has_more(&self) -> bool {
        match self.total {
            Some(total) => self.offset + (self.records.len() as u64) < total,
            None => !self.records.is_empty(),
        }
    }
}

/// Client for a paginated catalog search API.
pub trait CatalogClient: Send + Sync {
    /// Fetches `page_size` records starting at `offset`.
    ///
    /// Performs exactly one outbound request and never retries.
    fn fetch_page(
        &self,
        offset: u64,
        page_size: u32,
    ) -> impl Future<Output = Result<PageResult, AppError>> + Send;
}

/// Store for harvested datasets and their resources.
///
/// The upsert engine is the only writer.
pub trait DatasetStore: Send + Sync + Clone {
    /// Looks up a dataset by its external key.
    fn get_dataset(
        &self,
        ckan_id: &str,
    ) -> impl Future<Output = Result<Option<Dataset>, AppError>> + Send;

    /// Inserts the dataset, or overwrites every attribute of the row with the
    /// same `ckan_id`.
    fn save_dataset(
        &self,
        dataset: &NewDataset,
    ) -> impl Future<Output = Result<Dataset, AppError>> + Send;

    /// Looks up a resource by its `(dataset, url)` identity.
    fn get_resource(
        &self,
        dataset_id: &str,
        url: &str,
    ) -> impl Future<Output = Result<Option<Resource>, AppError>> + Send;

    /// Inserts the resource, or overwrites the row with the same
    /// `(dataset, url)` identity.
    fn save_resource(
        &self,
        dataset_id: &str,
        resource: &NewResource,
    ) -> impl Future<Output = Result<Resource, AppError>> + Send;

    /// Deletes resources of `dataset_id` whose url is not in `keep_urls`.
    /// Returns the number of deleted rows.
    fn prune_resources(
        &self,
        dataset_id: &str,
        keep_urls: &[String],
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// All resources owned by `dataset_id`, in no particular order.
    fn list_resources(
        &self,
        dataset_id: &str,
    ) -> impl Future<Output = Result<Vec<Resource>, AppError>> + Send;

    /// Current snapshot of every stored dataset.
    fn list_datasets(&self) -> impl Future<Output = Result<Vec<Dataset>, AppError>> + Send;

    /// Filtered, ordered listing for read collaborators.
    fn search_datasets(
        &self,
        query: &DatasetQuery,
    ) -> impl Future<Output = Result<Vec<Dataset>, AppError>> + Send;

    fn count_datasets(&self) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Deletes a dataset and, by cascade, its resources.
    fn delete_dataset(&self, ckan_id: &str)
        -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// Counting queries behind the statistics dashboard.
///
/// Stores return raw counts and leave ranking, labels and bucketing to
/// [`crate::stats`]. Months and day ages are taken in UTC.
pub trait StatsStore: Send + Sync {
    /// Dataset count per value of `field`, in any order. `None` is the group
    /// of datasets where the field is null.
    fn group_counts(
        &self,
        field: GroupField,
    ) -> impl Future<Output = Result<Vec<(Option<String>, usize)>, AppError>> + Send;

    /// Creations per month, keyed by the first day of the month. Datasets
    /// without a creation date are left out.
    fn monthly_counts(
        &self,
    ) -> impl Future<Output = Result<Vec<(NaiveDate, usize)>, AppError>> + Send;

    /// Dataset count per number of days between the last modification and
    /// `today`. Datasets without a modification date are left out.
    fn age_counts(
        &self,
        today: NaiveDate,
    ) -> impl Future<Output = Result<Vec<(i64, usize)>, AppError>> + Send;

    fn visibility(&self) -> impl Future<Output = Result<VisibilitySplit, AppError>> + Send;

    fn totals(
        &self,
        today: NaiveDate,
    ) -> impl Future<Output = Result<CorpusTotals, AppError>> + Send;
}

/// Mutual exclusion between harvest runs.
///
/// A lease is held by a named holder until it is released or its TTL runs
/// out, whichever happens first.
pub trait RunLease: Send + Sync {
    /// Tries to take the lease. Returns `false` if another live holder has it.
    fn acquire(
        &self,
        holder: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Releases the lease if `holder` still owns it.
    fn release(&self, holder: &str) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Lease that is always granted. Used when runs are not coordinated.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLease;

impl RunLease for NoLease {
    async fn acquire(&self, _holder: &str, _ttl: Duration) -> Result<bool, AppError> {
        Ok(true)
    }

    async fn release(&self, _holder: &str) -> Result<(), AppError> {
        Ok(())
    }
}
