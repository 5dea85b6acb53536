//! Ceres DB - PostgreSQL persistence for harvested datasets.
//!
//! [`DatasetRepository`] implements both `DatasetStore` and `RunLease` from
//! `ceres_core::traits`. The schema ships as embedded migrations
//! (see [`DatasetRepository::migrate`]).

pub mod repository;

pub use repository::DatasetRepository;
