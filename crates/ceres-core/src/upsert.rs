//! Keyed reconciliation of normalized records against storage.
//!
//! Datasets are keyed by `ckan_id`, resources by `(dataset, url)`. How an
//! incoming record combines with the stored one is decided in exactly one
//! place, [`MergeStrategy`]. A record identical to what is already stored
//! produces no write.

use serde::Deserialize;
use tracing::debug;

use crate::models::{Dataset, NewDataset, NewResource, Resource};
use crate::normalize::NormalizedRecord;
use crate::sync::SyncOutcome;
use crate::traits::DatasetStore;
use crate::AppError;

/// How an incoming payload combines with an existing row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// The payload replaces the row wholesale. Optional fields absent from the
    /// payload are cleared.
    #[default]
    Replace,
    /// Absent optional fields, empty strings for `name`/`title` and empty
    /// tag/group lists keep the stored value.
    Merge,
}

impl MergeStrategy {
    pub fn merge_dataset(&self, existing: &NewDataset, incoming: &NewDataset) -> NewDataset {
        match self {
            MergeStrategy::Replace => incoming.clone(),
            MergeStrategy::Merge => NewDataset {
                ckan_id: incoming.ckan_id.clone(),
                name: keep_non_empty(&existing.name, &incoming.name),
                title: keep_non_empty(&existing.title, &incoming.title),
                notes: keep_some(&existing.notes, &incoming.notes),
                author: keep_some(&existing.author, &incoming.author),
                author_email: keep_some(&existing.author_email, &incoming.author_email),
                organization_id: keep_some(&existing.organization_id, &incoming.organization_id),
                organization_title: keep_some(
                    &existing.organization_title,
                    &incoming.organization_title,
                ),
                license_id: keep_some(&existing.license_id, &incoming.license_id),
                license_title: keep_some(&existing.license_title, &incoming.license_title),
                license_url: keep_some(&existing.license_url, &incoming.license_url),
                metadata_created: incoming.metadata_created.or(existing.metadata_created),
                metadata_modified: incoming.metadata_modified.or(existing.metadata_modified),
                state: keep_some(&existing.state, &incoming.state),
                private: incoming.private,
                tags: keep_non_empty_list(&existing.tags, &incoming.tags),
                groups: keep_non_empty_list(&existing.groups, &incoming.groups),
            },
        }
    }

    pub fn merge_resource(&self, existing: &NewResource, incoming: &NewResource) -> NewResource {
        match self {
            MergeStrategy::Replace => incoming.clone(),
            MergeStrategy::Merge => NewResource {
                name: keep_some(&existing.name, &incoming.name),
                description: keep_some(&existing.description, &incoming.description),
                format: keep_some(&existing.format, &incoming.format),
                url: incoming.url.clone(),
                resource_type: keep_some(&existing.resource_type, &incoming.resource_type),
            },
        }
    }
}

fn keep_some(existing: &Option<String>, incoming: &Option<String>) -> Option<String> {
    incoming.clone().or_else(|| existing.clone())
}

fn keep_non_empty(existing: &str, incoming: &str) -> String {
    if incoming.is_empty() {
        existing.to_string()
    } else {
        incoming.to_string()
    }
}

fn keep_non_empty_list(existing: &[String], incoming: &[String]) -> Vec<String> {
    if incoming.is_empty() {
        existing.to_vec()
    } else {
        incoming.to_vec()
    }
}

/// Upsert behaviour switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpsertConfig {
    pub merge_strategy: MergeStrategy,
    /// Delete stored resources whose url is absent from the new payload.
    pub prune_missing_resources: bool,
}

/// What happened to one record and its resources.
#[derive(Debug, Clone)]
pub struct UpsertReport {
    pub dataset: Dataset,
    pub outcome: SyncOutcome,
    pub resources_created: usize,
    pub resources_updated: usize,
    pub resources_unchanged: usize,
    pub resources_pruned: u64,
    pub resources_skipped: usize,
    /// Resources present in the payload and stored.
    pub resource_count: usize,
}

impl UpsertReport {
    pub fn created(&self) -> bool {
        self.outcome == SyncOutcome::Created
    }
}

/// Writes normalized records into a [`DatasetStore`].
#[derive(Clone)]
pub struct UpsertEngine<S: DatasetStore> {
    store: S,
    config: UpsertConfig,
}

impl<S: DatasetStore> UpsertEngine<S> {
    pub fn new(store: S, config: UpsertConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> UpsertConfig {
        self.config
    }

    /// Creates or updates the dataset keyed by `incoming.ckan_id`.
    ///
    /// Returns the stored row and whether it was newly created.
    pub async fn upsert_dataset(&self, incoming: &NewDataset) -> Result<(Dataset, bool), AppError> {
        let (dataset, outcome) = self.reconcile_dataset(incoming).await?;
        Ok((dataset, outcome == SyncOutcome::Created))
    }

    /// Creates or updates the resource keyed by `(dataset, incoming.url)`.
    pub async fn upsert_resource(
        &self,
        dataset: &Dataset,
        incoming: &NewResource,
    ) -> Result<(Resource, bool), AppError> {
        let (resource, outcome) = self.reconcile_resource(dataset, incoming).await?;
        Ok((resource, outcome == SyncOutcome::Created))
    }

    /// Upserts a dataset, then each of its resources in payload order.
    pub async fn upsert_record(&self, record: &NormalizedRecord) -> Result<UpsertReport, AppError> {
        let (dataset, outcome) = self.reconcile_dataset(&record.dataset).await?;

        let mut report = UpsertReport {
            dataset,
            outcome,
            resources_created: 0,
            resources_updated: 0,
            resources_unchanged: 0,
            resources_pruned: 0,
            resources_skipped: record.skipped_resources,
            resource_count: 0,
        };

        for resource in &record.resources {
            let (_, res_outcome) = self.reconcile_resource(&report.dataset, resource).await?;
            match res_outcome {
                SyncOutcome::Created => report.resources_created += 1,
                SyncOutcome::Updated => report.resources_updated += 1,
                _ => report.resources_unchanged += 1,
            }
            report.resource_count += 1;
        }

        if self.config.prune_missing_resources {
            let keep: Vec<String> = record.resources.iter().map(|r| r.url.clone()).collect();
            report.resources_pruned = self
                .store
                .prune_resources(&report.dataset.ckan_id, &keep)
                .await?;
        }

        Ok(report)
    }

    async fn reconcile_dataset(
        &self,
        incoming: &NewDataset,
    ) -> Result<(Dataset, SyncOutcome), AppError> {
        match self.store.get_dataset(&incoming.ckan_id).await? {
            None => {
                let saved = self.store.save_dataset(incoming).await?;
                Ok((saved, SyncOutcome::Created))
            }
            Some(row) => {
                let current = row.to_new();
                let merged = self.config.merge_strategy.merge_dataset(&current, incoming);
                if merged == current {
                    debug!(ckan_id = %incoming.ckan_id, "Dataset unchanged");
                    return Ok((row, SyncOutcome::Unchanged));
                }
                let saved = self.store.save_dataset(&merged).await?;
                Ok((saved, SyncOutcome::Updated))
            }
        }
    }

    async fn reconcile_resource(
        &self,
        dataset: &Dataset,
        incoming: &NewResource,
    ) -> Result<(Resource, SyncOutcome), AppError> {
        match self
            .store
            .get_resource(&dataset.ckan_id, &incoming.url)
            .await?
        {
            None => {
                let saved = self.store.save_resource(&dataset.ckan_id, incoming).await?;
                Ok((saved, SyncOutcome::Created))
            }
            Some(row) => {
                let current = row.to_new();
                let merged = self.config.merge_strategy.merge_resource(&current, incoming);
                if merged == current {
                    return Ok((row, SyncOutcome::Unchanged));
                }
                let saved = self.store.save_resource(&dataset.ckan_id, &merged).await?;
                Ok((saved, SyncOutcome::Updated))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::normalize::normalize;
    use serde_json::{json, Value};

    fn raw(id: &str) -> Value {
        json!({
            "id": id,
            "name": format!("ds-{id}"),
            "title": format!("Dataset {id}"),
            "author_email": "owner@example.org",
            "organization": {"id": "org", "title": "Org"},
            "state": "active",
            "tags": [{"display_name": "t1"}],
            "resources": [
                {"url": format!("https://example.org/{id}/a.csv"), "format": "CSV"},
                {"url": format!("https://example.org/{id}/b.json"), "format": "JSON"}
            ]
        })
    }

    fn engine(store: &MemoryStore, config: UpsertConfig) -> UpsertEngine<MemoryStore> {
        UpsertEngine::new(store.clone(), config)
    }

    #[tokio::test]
    async fn test_first_upsert_creates() {
        let store = MemoryStore::new();
        let engine = engine(&store, UpsertConfig::default());
        let record = normalize(&raw("a")).unwrap();

        let report = engine.upsert_record(&record).await.unwrap();
        assert!(report.created());
        assert_eq!(report.resources_created, 2);
        assert_eq!(report.resource_count, 2);
        assert_eq!(store.count_datasets().await.unwrap(), 1);
        assert_eq!(store.list_resources("a").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_repeat_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let engine = engine(&store, UpsertConfig::default());
        let record = normalize(&raw("a")).unwrap();

        engine.upsert_record(&record).await.unwrap();
        let before = store.list_datasets().await.unwrap();
        let writes_before = store.write_count();

        let report = engine.upsert_record(&record).await.unwrap();
        assert!(!report.created());
        assert_eq!(report.outcome, SyncOutcome::Unchanged);
        assert_eq!(report.resources_unchanged, 2);
        assert_eq!(store.list_datasets().await.unwrap(), before);
        assert_eq!(store.write_count(), writes_before);

        let (_, created) = engine.upsert_dataset(&record.dataset).await.unwrap();
        assert!(!created);
    }

    #[tokio::test]
    async fn test_replace_clears_absent_fields() {
        let store = MemoryStore::new();
        let engine = engine(&store, UpsertConfig::default());
        engine
            .upsert_record(&normalize(&raw("a")).unwrap())
            .await
            .unwrap();

        let mut second = raw("a");
        second.as_object_mut().unwrap().remove("author_email");
        let report = engine
            .upsert_record(&normalize(&second).unwrap())
            .await
            .unwrap();

        assert_eq!(report.outcome, SyncOutcome::Updated);
        let stored = store.get_dataset("a").await.unwrap().unwrap();
        assert!(stored.author_email.is_none());
        assert_eq!(store.count_datasets().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_merge_keeps_absent_fields() {
        let store = MemoryStore::new();
        let engine = engine(
            &store,
            UpsertConfig {
                merge_strategy: MergeStrategy::Merge,
                prune_missing_resources: false,
            },
        );
        engine
            .upsert_record(&normalize(&raw("a")).unwrap())
            .await
            .unwrap();

        let mut second = raw("a");
        second.as_object_mut().unwrap().remove("author_email");
        second["title"] = json!("Renamed");
        engine
            .upsert_record(&normalize(&second).unwrap())
            .await
            .unwrap();

        let stored = store.get_dataset("a").await.unwrap().unwrap();
        assert_eq!(stored.author_email.as_deref(), Some("owner@example.org"));
        assert_eq!(stored.title, "Renamed");
    }

    #[tokio::test]
    async fn test_resource_updated_in_place() {
        let store = MemoryStore::new();
        let engine = engine(&store, UpsertConfig::default());
        engine
            .upsert_record(&normalize(&raw("a")).unwrap())
            .await
            .unwrap();
        let ids_before: Vec<i64> = store
            .list_resources("a")
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();

        let mut second = raw("a");
        second["resources"][0]["format"] = json!("XLSX");
        let report = engine
            .upsert_record(&normalize(&second).unwrap())
            .await
            .unwrap();
        assert_eq!(report.resources_updated, 1);
        assert_eq!(report.resources_unchanged, 1);

        let resources = store.list_resources("a").await.unwrap();
        let mut ids_after: Vec<i64> = resources.iter().map(|r| r.id).collect();
        let mut ids_before = ids_before;
        ids_before.sort();
        ids_after.sort();
        assert_eq!(ids_before, ids_after);
        assert!(resources.iter().any(|r| r.format.as_deref() == Some("XLSX")));
    }

    #[tokio::test]
    async fn test_stale_resources_kept_by_default() {
        let store = MemoryStore::new();
        let engine = engine(&store, UpsertConfig::default());
        engine
            .upsert_record(&normalize(&raw("a")).unwrap())
            .await
            .unwrap();

        let mut second = raw("a");
        second["resources"] = json!([{"url": "https://example.org/a/new.csv"}]);
        let report = engine
            .upsert_record(&normalize(&second).unwrap())
            .await
            .unwrap();

        assert_eq!(report.resources_pruned, 0);
        assert_eq!(store.list_resources("a").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_prune_missing_resources() {
        let store = MemoryStore::new();
        let engine = engine(
            &store,
            UpsertConfig {
                merge_strategy: MergeStrategy::Replace,
                prune_missing_resources: true,
            },
        );
        engine
            .upsert_record(&normalize(&raw("a")).unwrap())
            .await
            .unwrap();

        let mut second = raw("a");
        second["resources"] = json!([{"url": "https://example.org/a/a.csv", "format": "CSV"}]);
        let report = engine
            .upsert_record(&normalize(&second).unwrap())
            .await
            .unwrap();

        assert_eq!(report.resources_pruned, 1);
        let remaining = store.list_resources("a").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].url, "https://example.org/a/a.csv");
    }

    #[tokio::test]
    async fn test_same_url_in_different_datasets_are_distinct() {
        let store = MemoryStore::new();
        let engine = engine(&store, UpsertConfig::default());

        let shared = json!([{"url": "https://example.org/shared.csv"}]);
        let mut a = raw("a");
        a["resources"] = shared.clone();
        let mut b = raw("b");
        b["resources"] = shared;

        engine.upsert_record(&normalize(&a).unwrap()).await.unwrap();
        let report = engine.upsert_record(&normalize(&b).unwrap()).await.unwrap();

        assert_eq!(report.resources_created, 1);
        assert_eq!(store.list_resources("a").await.unwrap().len(), 1);
        assert_eq!(store.list_resources("b").await.unwrap().len(), 1);
    }

    #[test]
    fn test_merge_strategy_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            strategy: MergeStrategy,
        }
        let w: Wrapper = toml::from_str("strategy = \"replace\"").unwrap();
        assert_eq!(w.strategy, MergeStrategy::Replace);
        let w: Wrapper = toml::from_str("strategy = \"merge\"").unwrap();
        assert_eq!(w.strategy, MergeStrategy::Merge);
    }
}
