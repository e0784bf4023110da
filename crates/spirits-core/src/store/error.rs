use std::sync::Arc;

use thiserror::Error;

use crate::api::FetchError;

/// Errors raised by the storage strategies.
///
/// The enum is `Clone` because a single in-flight blob fetch hands its
/// outcome to every caller waiting on it; non-clonable sources are kept
/// behind an `Arc`.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(Arc<redb::Error>),

    #[error("Stored schema version {stored} is newer than requested version {requested}")]
    VersionDowngrade { stored: u64, requested: u64 },

    #[error("Unknown index: {0}")]
    UnknownIndex(String),

    #[error("Record collection has no key generator, an explicit index is required")]
    MissingKey,

    #[error("Index {0} is out of range")]
    InvalidIndex(u64),

    #[error("Unique index {index} already holds key {key}")]
    Constraint { index: String, key: String },

    #[error("Serialization error: {0}")]
    Serialization(Arc<serde_json::Error>),

    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: Arc<FetchError>,
    },

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Storage task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn fetch(url: &str, source: FetchError) -> Self {
        StoreError::Fetch {
            url: url.to_string(),
            source: Arc::new(source),
        }
    }
}

impl From<redb::Error> for StoreError {
    fn from(e: redb::Error) -> Self {
        StoreError::Database(Arc::new(e))
    }
}

impl From<redb::DatabaseError> for StoreError {
    fn from(e: redb::DatabaseError) -> Self {
        redb::Error::from(e).into()
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        redb::Error::from(e).into()
    }
}

impl From<redb::TableError> for StoreError {
    fn from(e: redb::TableError) -> Self {
        redb::Error::from(e).into()
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(e: redb::StorageError) -> Self {
        redb::Error::from(e).into()
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(e: redb::CommitError) -> Self {
        redb::Error::from(e).into()
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(Arc::new(e))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(Arc::new(e))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Task(e.to_string())
    }
}
