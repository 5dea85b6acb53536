//! Ceres Core - Domain types, harvesting pipeline and corpus statistics.
//!
//! - [`normalize`] turns raw catalog records into typed rows
//! - [`upsert`] reconciles rows with storage
//! - [`harvest`] drives the paginated sweep
//! - [`stats`] aggregates the stored corpus
//!
//! I/O lives behind the traits in [`traits`]; the HTTP client and the
//! PostgreSQL repository are in their own crates.

pub mod config;
pub mod error;
pub mod harvest;
pub mod memory;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod stats;
pub mod sync;
pub mod traits;
pub mod upsert;

pub use config::{
    default_config_path, load_config, CatalogConfig, CeresConfig, DbConfig, HarvestConfig,
    HttpConfig, StatsConfig, DEFAULT_CATALOG_URL,
};
pub use error::AppError;
pub use harvest::{HarvestReport, HarvestService, Termination};
pub use memory::MemoryStore;
pub use models::{
    Dataset, DatasetDetail, DatasetOrder, DatasetQuery, NewDataset, NewResource, Resource,
};
pub use normalize::{normalize, NormalizedRecord};
pub use progress::{HarvestEvent, ProgressReporter, SilentReporter, TracingReporter};
pub use stats::{CorpusTotals, GroupField, StatsReport, StatsService};
pub use sync::{SyncOutcome, SyncStats};
pub use traits::{CatalogClient, DatasetStore, NoLease, PageResult, RunLease, StatsStore};
pub use upsert::{MergeStrategy, UpsertConfig, UpsertEngine, UpsertReport};
