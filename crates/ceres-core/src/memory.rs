//! In-process [`DatasetStore`], [`StatsStore`] and [`RunLease`].
//!
//! Backs unit tests of the pipeline and any host that does not need
//! persistence. Semantics mirror the PostgreSQL repository: `ckan_id` is the
//! primary key, `(dataset_id, url)` is unique, deleting a dataset cascades.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{Dataset, DatasetQuery, NewDataset, NewResource, Resource};
use crate::stats::{self, CorpusTotals, GroupField, VisibilitySplit};
use crate::traits::{DatasetStore, RunLease, StatsStore};
use crate::AppError;

#[derive(Debug, Default)]
struct State {
    datasets: BTreeMap<String, Dataset>,
    resources: Vec<Resource>,
    next_resource_id: i64,
    writes: usize,
    failing_ids: HashSet<String>,
    lease: Option<(String, DateTime<Utc>)>,
}

/// Shared, cloneable in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::Generic("memory store lock poisoned".to_string()))
    }

    fn snapshot(&self) -> Result<Vec<Dataset>, AppError> {
        Ok(self.state()?.datasets.values().cloned().collect())
    }

    /// Number of dataset/resource writes performed so far.
    pub fn write_count(&self) -> usize {
        self.state.lock().map(|s| s.writes).unwrap_or(0)
    }

    /// Makes every later save of `ckan_id` fail with a database error.
    pub fn fail_on(&self, ckan_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_ids.insert(ckan_id.to_string());
        }
    }
}

impl DatasetStore for MemoryStore {
    async fn get_dataset(&self, ckan_id: &str) -> Result<Option<Dataset>, AppError> {
        Ok(self.state()?.datasets.get(ckan_id).cloned())
    }

    async fn save_dataset(&self, dataset: &NewDataset) -> Result<Dataset, AppError> {
        let mut state = self.state()?;
        if state.failing_ids.contains(&dataset.ckan_id) {
            return Err(AppError::DatabaseError(sqlx::Error::RowNotFound));
        }
        let row = dataset.clone().into_dataset();
        state.datasets.insert(row.ckan_id.clone(), row.clone());
        state.writes += 1;
        Ok(row)
    }

    async fn get_resource(&self, dataset_id: &str, url: &str) -> Result<Option<Resource>, AppError> {
        Ok(self
            .state()?
            .resources
            .iter()
            .find(|r| r.dataset_id == dataset_id && r.url == url)
            .cloned())
    }

    async fn save_resource(
        &self,
        dataset_id: &str,
        resource: &NewResource,
    ) -> Result<Resource, AppError> {
        let mut state = self.state()?;
        if !state.datasets.contains_key(dataset_id) {
            return Err(AppError::DatasetNotFound(dataset_id.to_string()));
        }
        state.writes += 1;

        if let Some(existing) = state
            .resources
            .iter_mut()
            .find(|r| r.dataset_id == dataset_id && r.url == resource.url)
        {
            existing.name = resource.name.clone();
            existing.description = resource.description.clone();
            existing.format = resource.format.clone();
            existing.resource_type = resource.resource_type.clone();
            return Ok(existing.clone());
        }

        state.next_resource_id += 1;
        let row = Resource {
            id: state.next_resource_id,
            dataset_id: dataset_id.to_string(),
            name: resource.name.clone(),
            description: resource.description.clone(),
            format: resource.format.clone(),
            url: resource.url.clone(),
            resource_type: resource.resource_type.clone(),
        };
        state.resources.push(row.clone());
        Ok(row)
    }

    async fn prune_resources(&self, dataset_id: &str, keep_urls: &[String]) -> Result<u64, AppError> {
        let mut state = self.state()?;
        let before = state.resources.len();
        state
            .resources
            .retain(|r| r.dataset_id != dataset_id || keep_urls.contains(&r.url));
        let removed = (before - state.resources.len()) as u64;
        if removed > 0 {
            state.writes += 1;
        }
        Ok(removed)
    }

    async fn list_resources(&self, dataset_id: &str) -> Result<Vec<Resource>, AppError> {
        Ok(self
            .state()?
            .resources
            .iter()
            .filter(|r| r.dataset_id == dataset_id)
            .cloned()
            .collect())
    }

    async fn list_datasets(&self) -> Result<Vec<Dataset>, AppError> {
        self.snapshot()
    }

    async fn search_datasets(&self, query: &DatasetQuery) -> Result<Vec<Dataset>, AppError> {
        let mut matches: Vec<Dataset> = self
            .state()?
            .datasets
            .values()
            .filter(|d| query.matches(d))
            .cloned()
            .collect();
        query.sort(&mut matches);
        if let Some(limit) = query.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn count_datasets(&self) -> Result<u64, AppError> {
        Ok(self.state()?.datasets.len() as u64)
    }

    async fn delete_dataset(&self, ckan_id: &str) -> Result<bool, AppError> {
        let mut state = self.state()?;
        let removed = state.datasets.remove(ckan_id).is_some();
        if removed {
            state.resources.retain(|r| r.dataset_id != ckan_id);
            state.writes += 1;
        }
        Ok(removed)
    }
}

/// Aggregates are computed over a snapshot taken under the lock.
impl StatsStore for MemoryStore {
    async fn group_counts(
        &self,
        field: GroupField,
    ) -> Result<Vec<(Option<String>, usize)>, AppError> {
        Ok(stats::group_tally(&self.snapshot()?, field))
    }

    async fn monthly_counts(&self) -> Result<Vec<(NaiveDate, usize)>, AppError> {
        Ok(stats::month_tally(&self.snapshot()?))
    }

    async fn age_counts(&self, today: NaiveDate) -> Result<Vec<(i64, usize)>, AppError> {
        Ok(stats::age_tally(&self.snapshot()?, today))
    }

    async fn visibility(&self) -> Result<VisibilitySplit, AppError> {
        Ok(stats::visibility(&self.snapshot()?))
    }

    async fn totals(&self, today: NaiveDate) -> Result<CorpusTotals, AppError> {
        Ok(stats::totals(&self.snapshot()?, today))
    }
}

impl RunLease for MemoryStore {
    async fn acquire(&self, holder: &str, ttl: Duration) -> Result<bool, AppError> {
        let mut state = self.state()?;
        let now = Utc::now();
        let free = match &state.lease {
            None => true,
            Some((current, expires_at)) => current == holder || *expires_at <= now,
        };
        if !free {
            return Ok(false);
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AppError::Generic(format!("invalid lease TTL: {e}")))?;
        state.lease = Some((holder.to_string(), now + ttl));
        Ok(true)
    }

    async fn release(&self, holder: &str) -> Result<(), AppError> {
        let mut state = self.state()?;
        if state.lease.as_ref().is_some_and(|(h, _)| h == holder) {
            state.lease = None;
        }
        Ok(())
    }
}
