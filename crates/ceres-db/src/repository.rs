//! Dataset repository for PostgreSQL.
//!
//! # Testing
//!
//! Dashboard statistics are aggregated in SQL (`GROUP BY` and `FILTER`), so
//! no query loads the whole table.
//!
//! Unit tests cover the SQL building helpers only. The queries themselves are
//! exercised against a live database, and the same [`DatasetStore`] contract
//! is tested in-process through `ceres_core::memory::MemoryStore`.

use std::time::Duration;

use ceres_core::error::AppError;
use ceres_core::models::{Dataset, DatasetOrder, DatasetQuery, NewDataset, NewResource, Resource};
use ceres_core::stats::{CorpusTotals, GroupField, VisibilitySplit};
use ceres_core::traits::{DatasetStore, RunLease, StatsStore};
use sqlx::types::chrono::NaiveDate;
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};

/// Column list for dataset SELECT queries. Must remain a const literal to
/// ensure SQL safety since format!() bypasses sqlx compile-time validation.
const DATASET_COLUMNS: &str = "ckan_id, name, title, notes, author, author_email, organization_id, organization_title, license_id, license_title, license_url, metadata_created, metadata_modified, state, private, tags, groups";

const RESOURCE_COLUMNS: &str = "id, dataset_id, name, description, format, url, resource_type";

/// Name of the row in `harvest_leases` that guards harvest runs.
const HARVEST_LEASE: &str = "harvest";

/// PostgreSQL error code for foreign key violations.
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Repository for harvested datasets and resources in PostgreSQL.
///
/// # Examples
///
/// ```no_run
/// use sqlx::postgres::PgPoolOptions;
/// use ceres_db::DatasetRepository;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PgPoolOptions::new()
///     .max_connections(5)
///     .connect("postgresql://localhost/ceres")
///     .await?;
///
/// let repo = DatasetRepository::new(pool);
/// repo.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DatasetRepository {
    pool: Pool<Postgres>,
}

impl DatasetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.into()))?;
        tracing::debug!("Database migrations applied");
        Ok(())
    }
}

impl DatasetStore for DatasetRepository {
    async fn get_dataset(&self, ckan_id: &str) -> Result<Option<Dataset>, AppError> {
        let query = format!("SELECT {} FROM datasets WHERE ckan_id = $1", DATASET_COLUMNS);
        let result = sqlx::query_as::<_, Dataset>(&query)
            .bind(ckan_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        Ok(result)
    }

    async fn save_dataset(&self, dataset: &NewDataset) -> Result<Dataset, AppError> {
        let query = format!(
            r#"
            INSERT INTO datasets (
                ckan_id, name, title, notes, author, author_email,
                organization_id, organization_title,
                license_id, license_title, license_url,
                metadata_created, metadata_modified,
                state, private, tags, groups
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (ckan_id)
            DO UPDATE SET
                name = EXCLUDED.name,
                title = EXCLUDED.title,
                notes = EXCLUDED.notes,
                author = EXCLUDED.author,
                author_email = EXCLUDED.author_email,
                organization_id = EXCLUDED.organization_id,
                organization_title = EXCLUDED.organization_title,
                license_id = EXCLUDED.license_id,
                license_title = EXCLUDED.license_title,
                license_url = EXCLUDED.license_url,
                metadata_created = EXCLUDED.metadata_created,
                metadata_modified = EXCLUDED.metadata_modified,
                state = EXCLUDED.state,
                private = EXCLUDED.private,
                tags = EXCLUDED.tags,
                groups = EXCLUDED.groups
            RETURNING {}
            "#,
            DATASET_COLUMNS
        );

        let row = sqlx::query_as::<_, Dataset>(&query)
            .bind(&dataset.ckan_id)
            .bind(&dataset.name)
            .bind(&dataset.title)
            .bind(&dataset.notes)
            .bind(&dataset.author)
            .bind(&dataset.author_email)
            .bind(&dataset.organization_id)
            .bind(&dataset.organization_title)
            .bind(&dataset.license_id)
            .bind(&dataset.license_title)
            .bind(&dataset.license_url)
            .bind(dataset.metadata_created)
            .bind(dataset.metadata_modified)
            .bind(&dataset.state)
            .bind(dataset.private)
            .bind(Json(&dataset.tags))
            .bind(Json(&dataset.groups))
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        Ok(row)
    }

    async fn get_resource(&self, dataset_id: &str, url: &str) -> Result<Option<Resource>, AppError> {
        let query = format!(
            "SELECT {} FROM resources WHERE dataset_id = $1 AND url = $2",
            RESOURCE_COLUMNS
        );
        let result = sqlx::query_as::<_, Resource>(&query)
            .bind(dataset_id)
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        Ok(result)
    }

    async fn save_resource(
        &self,
        dataset_id: &str,
        resource: &NewResource,
    ) -> Result<Resource, AppError> {
        let query = format!(
            r#"
            INSERT INTO resources (dataset_id, name, description, format, url, resource_type)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (dataset_id, url)
            DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                format = EXCLUDED.format,
                resource_type = EXCLUDED.resource_type
            RETURNING {}
            "#,
            RESOURCE_COLUMNS
        );

        sqlx::query_as::<_, Resource>(&query)
            .bind(dataset_id)
            .bind(&resource.name)
            .bind(&resource.description)
            .bind(&resource.format)
            .bind(&resource.url)
            .bind(&resource.resource_type)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| resource_write_error(e, dataset_id))
    }

    async fn prune_resources(&self, dataset_id: &str, keep_urls: &[String]) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM resources
            WHERE dataset_id = $1 AND NOT (url = ANY($2))
            "#,
        )
        .bind(dataset_id)
        .bind(keep_urls)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(result.rows_affected())
    }

    async fn list_resources(&self, dataset_id: &str) -> Result<Vec<Resource>, AppError> {
        let query = format!(
            "SELECT {} FROM resources WHERE dataset_id = $1 ORDER BY id",
            RESOURCE_COLUMNS
        );
        let rows = sqlx::query_as::<_, Resource>(&query)
            .bind(dataset_id)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        Ok(rows)
    }

    async fn list_datasets(&self) -> Result<Vec<Dataset>, AppError> {
        let query = format!("SELECT {} FROM datasets", DATASET_COLUMNS);
        let rows = sqlx::query_as::<_, Dataset>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        Ok(rows)
    }

    async fn search_datasets(&self, query: &DatasetQuery) -> Result<Vec<Dataset>, AppError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM datasets
            WHERE $1::text IS NULL
               OR title ILIKE $1
               OR notes ILIKE $1
               OR organization_title ILIKE $1
               OR EXISTS (
                   SELECT 1 FROM jsonb_array_elements_text(tags) AS tag
                   WHERE tag ILIKE $1
               )
            ORDER BY {}
            LIMIT $2
            "#,
            DATASET_COLUMNS,
            order_clause(query.order)
        );

        let pattern = query.search_term().map(like_pattern);
        let limit = query.limit.map(|l| l as i64);

        let rows = sqlx::query_as::<_, Dataset>(&sql)
            .bind(pattern)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        Ok(rows)
    }

    async fn count_datasets(&self) -> Result<u64, AppError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM datasets")
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        Ok(count.max(0) as u64)
    }

    async fn delete_dataset(&self, ckan_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM datasets WHERE ckan_id = $1")
            .bind(ckan_id)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        Ok(result.rows_affected() > 0)
    }
}

/// Months and ages are computed on the UTC calendar, like the in-memory store.
impl StatsStore for DatasetRepository {
    async fn group_counts(
        &self,
        field: GroupField,
    ) -> Result<Vec<(Option<String>, usize)>, AppError> {
        let column = group_column(field);
        let query = format!(
            "SELECT {column}, COUNT(*) FROM datasets GROUP BY {column}",
            column = column
        );
        let rows: Vec<(Option<String>, i64)> = sqlx::query_as(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        Ok(rows
            .into_iter()
            .map(|(key, count)| (key, to_count(count)))
            .collect())
    }

    async fn monthly_counts(&self) -> Result<Vec<(NaiveDate, usize)>, AppError> {
        let rows: Vec<(NaiveDate, i64)> = sqlx::query_as(
            r#"
            SELECT date_trunc('month', metadata_created AT TIME ZONE 'UTC')::date AS month,
                   COUNT(*)
            FROM datasets
            WHERE metadata_created IS NOT NULL
            GROUP BY month
            ORDER BY month
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(rows
            .into_iter()
            .map(|(month, count)| (month, to_count(count)))
            .collect())
    }

    async fn age_counts(&self, today: NaiveDate) -> Result<Vec<(i64, usize)>, AppError> {
        let rows: Vec<(i32, i64)> = sqlx::query_as(
            r#"
            SELECT $1::date - (metadata_modified AT TIME ZONE 'UTC')::date AS days,
                   COUNT(*)
            FROM datasets
            WHERE metadata_modified IS NOT NULL
            GROUP BY days
            "#,
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(rows
            .into_iter()
            .map(|(days, count)| (i64::from(days), to_count(count)))
            .collect())
    }

    async fn visibility(&self) -> Result<VisibilitySplit, AppError> {
        let (public, private): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FILTER (WHERE NOT private),
                   COUNT(*) FILTER (WHERE private)
            FROM datasets
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(VisibilitySplit {
            public: to_count(public),
            private: to_count(private),
        })
    }

    async fn totals(&self, today: NaiveDate) -> Result<CorpusTotals, AppError> {
        // COUNT(DISTINCT) skips nulls; the null organization counts as one.
        let (total, organizations, recent): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(DISTINCT organization_title)
                       + CASE WHEN bool_or(organization_title IS NULL) THEN 1 ELSE 0 END,
                   COUNT(*) FILTER (
                       WHERE date_trunc('month', metadata_modified AT TIME ZONE 'UTC')
                           = date_trunc('month', $1::date::timestamp)
                   )
            FROM datasets
            "#,
        )
        .bind(today)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(CorpusTotals {
            total_datasets: to_count(total),
            total_organizations: to_count(organizations),
            recent_updates: to_count(recent),
        })
    }
}

impl RunLease for DatasetRepository {
    async fn acquire(&self, holder: &str, ttl: Duration) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO harvest_leases (name, holder, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (name)
            DO UPDATE SET
                holder = EXCLUDED.holder,
                expires_at = EXCLUDED.expires_at
            WHERE harvest_leases.expires_at <= NOW()
               OR harvest_leases.holder = EXCLUDED.holder
            "#,
        )
        .bind(HARVEST_LEASE)
        .bind(holder)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, holder: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM harvest_leases WHERE name = $1 AND holder = $2")
            .bind(HARVEST_LEASE)
            .bind(holder)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        Ok(())
    }
}

/// Column behind a stats grouping. Only these literals reach the query text.
fn group_column(field: GroupField) -> &'static str {
    match field {
        GroupField::Organization => "organization_title",
        GroupField::State => "state",
        GroupField::License => "license_title",
    }
}

fn to_count(n: i64) -> usize {
    usize::try_from(n).unwrap_or(0)
}

fn order_clause(order: DatasetOrder) -> &'static str {
    match order {
        DatasetOrder::ModifiedDesc => "metadata_modified DESC NULLS LAST, ckan_id",
        DatasetOrder::ModifiedAsc => "metadata_modified ASC NULLS LAST, ckan_id",
        DatasetOrder::TitleAsc => "title ASC, ckan_id",
        DatasetOrder::TitleDesc => "title DESC, ckan_id",
    }
}

/// Wraps a search term for ILIKE, escaping its wildcards.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// A resource insert can only violate the foreign key when its dataset is gone.
fn resource_write_error(e: sqlx::Error, dataset_id: &str) -> AppError {
    let is_fk_violation = e
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == FOREIGN_KEY_VIOLATION);

    if is_fk_violation {
        AppError::DatasetNotFound(dataset_id.to_string())
    } else {
        AppError::DatabaseError(e)
    }
}
