//! Domain models for harvested catalog records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

use crate::AppError;

/// A row of the `datasets` table.
///
/// `ckan_id` is the upstream catalog's UUID and the table's primary key. It is
/// never generated locally.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Dataset {
    pub ckan_id: String,
    pub name: String,
    pub title: String,
    pub notes: Option<String>,
    pub author: Option<String>,
    pub author_email: Option<String>,
    pub organization_id: Option<String>,
    pub organization_title: Option<String>,
    pub license_id: Option<String>,
    pub license_title: Option<String>,
    pub license_url: Option<String>,
    pub metadata_created: Option<DateTime<Utc>>,
    pub metadata_modified: Option<DateTime<Utc>>,
    pub state: Option<String>,
    pub private: bool,
    #[sqlx(json)]
    pub tags: Vec<String>,
    #[sqlx(json)]
    pub groups: Vec<String>,
}

impl Dataset {
    /// Returns the mutable attributes of this row in normalized form.
    pub fn to_new(&self) -> NewDataset {
        NewDataset {
            ckan_id: self.ckan_id.clone(),
            name: self.name.clone(),
            title: self.title.clone(),
            notes: self.notes.clone(),
            author: self.author.clone(),
            author_email: self.author_email.clone(),
            organization_id: self.organization_id.clone(),
            organization_title: self.organization_title.clone(),
            license_id: self.license_id.clone(),
            license_title: self.license_title.clone(),
            license_url: self.license_url.clone(),
            metadata_created: self.metadata_created,
            metadata_modified: self.metadata_modified,
            state: self.state.clone(),
            private: self.private,
            tags: self.tags.clone(),
            groups: self.groups.clone(),
        }
    }
}

/// Normalized dataset, ready to be upserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDataset {
    pub ckan_id: String,
    pub name: String,
    pub title: String,
    pub notes: Option<String>,
    pub author: Option<String>,
    pub author_email: Option<String>,
    pub organization_id: Option<String>,
    pub organization_title: Option<String>,
    pub license_id: Option<String>,
    pub license_title: Option<String>,
    pub license_url: Option<String>,
    pub metadata_created: Option<DateTime<Utc>>,
    pub metadata_modified: Option<DateTime<Utc>>,
    pub state: Option<String>,
    pub private: bool,
    pub tags: Vec<String>,
    pub groups: Vec<String>,
}

impl NewDataset {
    /// Builds the row this record would produce once stored.
    pub fn into_dataset(self) -> Dataset {
        Dataset {
            ckan_id: self.ckan_id,
            name: self.name,
            title: self.title,
            notes: self.notes,
            author: self.author,
            author_email: self.author_email,
            organization_id: self.organization_id,
            organization_title: self.organization_title,
            license_id: self.license_id,
            license_title: self.license_title,
            license_url: self.license_url,
            metadata_created: self.metadata_created,
            metadata_modified: self.metadata_modified,
            state: self.state,
            private: self.private,
            tags: self.tags,
            groups: self.groups,
        }
    }
}

/// A row of the `resources` table. Owned by exactly one dataset.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Resource {
    pub id: i64,
    pub dataset_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub format: Option<String>,
    pub url: String,
    pub resource_type: Option<String>,
}

impl Resource {
    pub fn to_new(&self) -> NewResource {
        NewResource {
            name: self.name.clone(),
            description: self.description.clone(),
            format: self.format.clone(),
            url: self.url.clone(),
            resource_type: self.resource_type.clone(),
        }
    }
}

/// Normalized resource. Its identity within a dataset is `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResource {
    pub name: Option<String>,
    pub description: Option<String>,
    pub format: Option<String>,
    pub url: String,
    pub resource_type: Option<String>,
}

/// A dataset together with its resources, as exposed to read collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetDetail {
    #[serde(flatten)]
    pub dataset: Dataset,
    pub resource_count: usize,
    pub resources: Vec<Resource>,
}

impl DatasetDetail {
    pub fn new(dataset: Dataset, resources: Vec<Resource>) -> Self {
        Self {
            dataset,
            resource_count: resources.len(),
            resources,
        }
    }
}

/// Sort order for dataset listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DatasetOrder {
    /// Most recently modified first; datasets without a date come last.
    #[default]
    ModifiedDesc,
    ModifiedAsc,
    TitleAsc,
    TitleDesc,
}

impl FromStr for DatasetOrder {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "-modified" | "-metadata_modified" => Ok(Self::ModifiedDesc),
            "modified" | "metadata_modified" => Ok(Self::ModifiedAsc),
            "title" => Ok(Self::TitleAsc),
            "-title" => Ok(Self::TitleDesc),
            other => Err(AppError::Generic(format!(
                "Unknown ordering '{}'. Use modified, -modified, title or -title",
                other
            ))),
        }
    }
}

impl fmt::Display for DatasetOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ModifiedDesc => "-modified",
            Self::ModifiedAsc => "modified",
            Self::TitleAsc => "title",
            Self::TitleDesc => "-title",
        };
        f.write_str(s)
    }
}

/// Filter for listing harvested datasets.
///
/// `search` matches, case-insensitively, the title, notes, organization title
/// or any tag.
#[derive(Debug, Clone, Default)]
pub struct DatasetQuery {
    pub search: Option<String>,
    pub order: DatasetOrder,
    pub limit: Option<usize>,
}

impl DatasetQuery {
    /// Returns the trimmed search term, or `None` when it is blank.
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// In-process evaluation of the search filter.
    pub fn matches(&self, dataset: &Dataset) -> bool {
        let Some(term) = self.search_term() else {
            return true;
        };
        let needle = term.to_lowercase();
        let contains = |value: &str| value.to_lowercase().contains(&needle);

        contains(&dataset.title)
            || dataset.notes.as_deref().is_some_and(contains)
            || dataset.organization_title.as_deref().is_some_and(contains)
            || dataset.tags.iter().any(|t| contains(t.as_str()))
    }

    /// In-process evaluation of the ordering, consistent with the SQL one.
    pub fn sort(&self, datasets: &mut [Dataset]) {
        match self.order {
            DatasetOrder::ModifiedDesc => datasets.sort_by(|a, b| {
                match (a.metadata_modified, b.metadata_modified) {
                    (Some(x), Some(y)) => y.cmp(&x),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                }
            }),
            DatasetOrder::ModifiedAsc => datasets.sort_by(|a, b| {
                match (a.metadata_modified, b.metadata_modified) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                }
            }),
            DatasetOrder::TitleAsc => datasets.sort_by(|a, b| a.title.cmp(&b.title)),
            DatasetOrder::TitleDesc => datasets.sort_by(|a, b| b.title.cmp(&a.title)),
        }
    }
}
