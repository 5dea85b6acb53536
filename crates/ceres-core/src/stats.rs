//! Aggregations over the harvested corpus, for dashboards.
//!
//! Stores answer the counting queries of [`StatsStore`]; this module ranks,
//! labels and buckets their answers. The snapshot functions ([`group_by`],
//! [`monthly_creations`], [`age_histogram`], [`summary`]...) compute the same
//! figures from a slice of datasets and back the in-memory store.
//!
//! Calendar arithmetic (months, ages in days) is done in UTC. Nothing is
//! cached: [`StatsService`] queries the store on every call.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;

use crate::config::StatsConfig;
use crate::models::Dataset;
use crate::traits::StatsStore;
use crate::AppError;

/// Lower bounds, in days, of the age buckets. The last bucket is unbounded.
pub const AGE_BUCKET_BOUNDS: [i64; 6] = [0, 30, 60, 90, 180, 365];

/// Labels matching [`AGE_BUCKET_BOUNDS`].
pub const AGE_BUCKET_LABELS: [&str; 6] = ["0-30", "31-60", "61-90", "91-180", "181-365", "365+"];

/// Dataset attribute to group on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupField {
    Organization,
    State,
    License,
}

impl GroupField {
    /// Label used for datasets where the field is null.
    pub fn sentinel(&self) -> &'static str {
        match self {
            GroupField::Organization => "Unknown organization",
            GroupField::State => "Unspecified state",
            GroupField::License => "Unspecified license",
        }
    }

    fn value<'a>(&self, dataset: &'a Dataset) -> Option<&'a str> {
        match self {
            GroupField::Organization => dataset.organization_title.as_deref(),
            GroupField::State => dataset.state.as_deref(),
            GroupField::License => dataset.license_title.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupCount {
    pub key: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthCount {
    /// First day of the month.
    pub month: NaiveDate,
    /// `YYYY-MM`
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgeBucket {
    pub label: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VisibilitySplit {
    pub public: usize,
    pub private: usize,
}

/// Header counters of the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CorpusTotals {
    pub total_datasets: usize,
    /// Distinct organization titles, the null title counting as one.
    pub total_organizations: usize,
    /// Datasets modified during the calendar month of `today`.
    pub recent_updates: usize,
}

/// Every dashboard figure.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub total_datasets: usize,
    pub total_organizations: usize,
    /// Datasets modified during the current calendar month.
    pub recent_updates: usize,
    pub top_organizations: Vec<GroupCount>,
    pub by_state: Vec<GroupCount>,
    pub by_license: Vec<GroupCount>,
    pub monthly_creations: Vec<MonthCount>,
    pub age_histogram: Vec<AgeBucket>,
    pub visibility: VisibilitySplit,
}

/// Orders per-value counts of `field` for display.
///
/// Sorted by descending count. Ties are ordered by key, with the null
/// sentinel after every real key.
pub fn rank_groups(counts: Vec<(Option<String>, usize)>, field: GroupField) -> Vec<GroupCount> {
    let mut entries = counts;
    entries.sort_by(|(ka, ca), (kb, cb)| {
        cb.cmp(ca).then_with(|| match (ka, kb) {
            (Some(a), Some(b)) => a.cmp(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
    });

    entries
        .into_iter()
        .map(|(key, count)| GroupCount {
            key: key.unwrap_or_else(|| field.sentinel().to_string()),
            count,
        })
        .collect()
}

/// Unordered dataset count per value of `field`; `None` is the null group.
pub fn group_tally(datasets: &[Dataset], field: GroupField) -> Vec<(Option<String>, usize)> {
    let mut counts: HashMap<Option<&str>, usize> = HashMap::new();
    for dataset in datasets {
        *counts.entry(field.value(dataset)).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(key, count)| (key.map(str::to_string), count))
        .collect()
}

/// Counts datasets per value of `field`, ranked by [`rank_groups`].
pub fn group_by(datasets: &[Dataset], field: GroupField) -> Vec<GroupCount> {
    rank_groups(group_tally(datasets, field), field)
}

/// [`group_by`] truncated to the first `n` groups.
pub fn top_n(datasets: &[Dataset], field: GroupField, n: usize) -> Vec<GroupCount> {
    let mut groups = group_by(datasets, field);
    groups.truncate(n);
    groups
}

/// First day of the UTC month containing `instant`.
pub fn month_start(instant: DateTime<Utc>) -> Option<NaiveDate> {
    instant.date_naive().with_day(1)
}

/// Creations per month start, oldest first. Undated datasets are left out.
pub fn month_tally(datasets: &[Dataset]) -> Vec<(NaiveDate, usize)> {
    let mut months: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for month in datasets
        .iter()
        .filter_map(|d| d.metadata_created)
        .filter_map(month_start)
    {
        *months.entry(month).or_insert(0) += 1;
    }
    months.into_iter().collect()
}

/// Labels per-month counts, oldest month first. Repeated months are merged.
pub fn month_series(counts: impl IntoIterator<Item = (NaiveDate, usize)>) -> Vec<MonthCount> {
    let mut months: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for (month, count) in counts {
        *months.entry(month).or_insert(0) += count;
    }

    months
        .into_iter()
        .map(|(month, count)| MonthCount {
            label: month.format("%Y-%m").to_string(),
            month,
            count,
        })
        .collect()
}

/// Number of datasets created per calendar month, oldest month first.
/// Datasets without a creation date are left out.
pub fn monthly_creations(datasets: &[Dataset]) -> Vec<MonthCount> {
    month_series(month_tally(datasets))
}

/// Index into [`AGE_BUCKET_BOUNDS`] for an age in days.
///
/// Buckets are lower-inclusive: 30 days falls in `31-60`. Negative ages
/// (modification date in the future) fall in the first bucket.
pub fn age_bucket_index(days: i64) -> usize {
    AGE_BUCKET_BOUNDS
        .iter()
        .rposition(|&lower| days >= lower)
        .unwrap_or(0)
}

/// Dataset count per age in days since last modification, relative to
/// `today`. Undated datasets are left out.
pub fn age_tally(datasets: &[Dataset], today: NaiveDate) -> Vec<(i64, usize)> {
    let mut ages: BTreeMap<i64, usize> = BTreeMap::new();
    for modified in datasets.iter().filter_map(|d| d.metadata_modified) {
        *ages.entry((today - modified.date_naive()).num_days()).or_insert(0) += 1;
    }
    ages.into_iter().collect()
}

/// Folds per-age counts into the fixed buckets. Always returns one entry per
/// bucket, empty ones included.
pub fn bucket_ages(counts: impl IntoIterator<Item = (i64, usize)>) -> Vec<AgeBucket> {
    let mut buckets = [0usize; AGE_BUCKET_BOUNDS.len()];
    for (days, count) in counts {
        buckets[age_bucket_index(days)] += count;
    }

    AGE_BUCKET_LABELS
        .iter()
        .zip(buckets)
        .map(|(&label, count)| AgeBucket { label, count })
        .collect()
}

/// Histogram of days since last modification, relative to `today`.
/// Datasets without a modification date are left out.
pub fn age_histogram(datasets: &[Dataset], today: NaiveDate) -> Vec<AgeBucket> {
    bucket_ages(age_tally(datasets, today))
}

pub fn visibility(datasets: &[Dataset]) -> VisibilitySplit {
    datasets
        .iter()
        .fold(VisibilitySplit::default(), |mut split, d| {
            if d.private {
                split.private += 1;
            } else {
                split.public += 1;
            }
            split
        })
}

pub fn totals(datasets: &[Dataset], today: NaiveDate) -> CorpusTotals {
    let total_organizations = datasets
        .iter()
        .map(|d| d.organization_title.as_deref())
        .collect::<HashSet<_>>()
        .len();

    let recent_updates = datasets
        .iter()
        .filter_map(|d| d.metadata_modified)
        .filter(|m| m.year() == today.year() && m.month() == today.month())
        .count();

    CorpusTotals {
        total_datasets: datasets.len(),
        total_organizations,
        recent_updates,
    }
}

/// Builds the full dashboard report for `today` from a snapshot.
pub fn summary(datasets: &[Dataset], today: NaiveDate, config: &StatsConfig) -> StatsReport {
    let totals = totals(datasets, today);
    StatsReport {
        total_datasets: totals.total_datasets,
        total_organizations: totals.total_organizations,
        recent_updates: totals.recent_updates,
        top_organizations: top_n(datasets, GroupField::Organization, config.top_organizations),
        by_state: group_by(datasets, GroupField::State),
        by_license: group_by(datasets, GroupField::License),
        monthly_creations: monthly_creations(datasets),
        age_histogram: age_histogram(datasets, today),
        visibility: visibility(datasets),
    }
}

/// Runs the aggregations against the current contents of a store.
///
/// Each figure is its own store query, so a report taken while a harvest
/// writes may mix counts from slightly different moments.
#[derive(Clone)]
pub struct StatsService<S: StatsStore> {
    store: S,
    config: StatsConfig,
}

impl<S: StatsStore> StatsService<S> {
    pub fn new(store: S, config: StatsConfig) -> Self {
        Self { store, config }
    }

    pub async fn group_by(&self, field: GroupField) -> Result<Vec<GroupCount>, AppError> {
        let counts = self.store.group_counts(field).await?;
        Ok(rank_groups(counts, field))
    }

    pub async fn top_n(&self, field: GroupField, n: usize) -> Result<Vec<GroupCount>, AppError> {
        let mut groups = self.group_by(field).await?;
        groups.truncate(n);
        Ok(groups)
    }

    pub async fn monthly_creations(&self) -> Result<Vec<MonthCount>, AppError> {
        let counts = self.store.monthly_counts().await?;
        Ok(month_series(counts))
    }

    pub async fn age_histogram(&self, today: NaiveDate) -> Result<Vec<AgeBucket>, AppError> {
        let counts = self.store.age_counts(today).await?;
        Ok(bucket_ages(counts))
    }

    pub async fn visibility(&self) -> Result<VisibilitySplit, AppError> {
        self.store.visibility().await
    }

    /// Full report as of the current UTC date.
    pub async fn report(&self) -> Result<StatsReport, AppError> {
        self.report_at(Utc::now().date_naive()).await
    }

    pub async fn report_at(&self, today: NaiveDate) -> Result<StatsReport, AppError> {
        let totals = self.store.totals(today).await?;
        tracing::debug!(datasets = totals.total_datasets, "Computing statistics");

        Ok(StatsReport {
            total_datasets: totals.total_datasets,
            total_organizations: totals.total_organizations,
            recent_updates: totals.recent_updates,
            top_organizations: self
                .top_n(GroupField::Organization, self.config.top_organizations)
                .await?,
            by_state: self.group_by(GroupField::State).await?,
            by_license: self.group_by(GroupField::License).await?,
            monthly_creations: self.monthly_creations().await?,
            age_histogram: self.age_histogram(today).await?,
            visibility: self.visibility().await?,
        })
    }
}
