//! Ceres Client - HTTP access to CKAN catalogs
//!
//! - [`ckan`] - single-request `package_search` client
//! - [`retry`] - exponential-backoff decorator for any catalog client
//!
//! Both implement [`ceres_core::traits::CatalogClient`], so the harvest
//! orchestrator can use either without knowing which one it has.

pub mod ckan;
pub mod retry;

pub use ckan::CkanClient;
pub use retry::{BackoffPolicy, RetryingClient};
