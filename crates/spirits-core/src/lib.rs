//! Core library for spirits, an offline-capable character catalog.
//!
//! - `api`: resource fetcher with typed decoding and HTTP error mapping
//! - `store`: persistent (`redb`) and ephemeral data strategies
//! - `selector`: feature detection and strategy fallback
//! - `sync`: hash-based import of the catalog CSV
//! - `models`: the `Spirit` record and menu ordering
//! - `config`: config file and environment overrides

pub mod api;
pub mod config;
pub mod csv;
pub mod models;
pub mod selector;
pub mod store;
pub mod sync;

pub use api::{FetchError, HttpFetcher, ResourceFetcher};
pub use config::Config;
pub use models::{catalog_schema, Spirit, SpiritOrder};
pub use selector::{select_strategy, StorageMode};
pub use store::{DataStrategy, StoreError, StrategyKind};
pub use sync::{DataSource, SyncError, SyncFlow, SyncOutcome, SyncReport};
