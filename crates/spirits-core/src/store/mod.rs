//! Storage strategies for catalog records and image blobs.
//!
//! Both strategies implement [`DataStrategy`]:
//! - [`PersistentStrategy`] keeps records and blobs in an on-disk `redb`
//!   database and remembers the content hash of the last import.
//! - [`EphemeralStrategy`] keeps everything in memory for the current
//!   process and is the fallback when the persistent one cannot open.
//!
//! Blob fetches are coalesced per URL: callers asking for a URL that is
//! already being downloaded wait on the same task instead of starting a
//! second request.

pub mod ephemeral;
pub mod error;
pub mod hash_slot;
pub mod persistent;
pub mod schema;

#[cfg(test)]
pub(crate) mod testing;

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

pub use ephemeral::EphemeralStrategy;
pub use error::{StoreError, StoreResult};
pub use hash_slot::{HashSlot, StoredHash};
pub use persistent::PersistentStrategy;
pub use schema::{
    CollectionOptions, DatabaseSchema, IndexDefinition, IndexOptions, KeyPath, RecordCollection,
};

/// Strategy-assigned key of a stored record.
pub type Index = u64;

/// Anything that can be stored as a record.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Record for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Persistent,
    Ephemeral,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Persistent => "persistent",
            StrategyKind::Ephemeral => "ephemeral",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary payload stored under its source URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub url: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Equality filter for [`DataStrategy::search_data`].
///
/// The persistent strategy treats `field` as the name of a declared index;
/// the ephemeral one reads it as a dotted path into each record.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Uniform storage contract consumed by the sync flow and the display layer.
///
/// Every operation implicitly waits for [`ready`](DataStrategy::ready).
/// Missing records and blobs are `Ok(None)`, never errors.
#[async_trait]
pub trait DataStrategy<T: Record>: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Content-hash slot, present only when the backend outlives the process.
    fn hash_slot(&self) -> Option<&HashSlot> {
        None
    }

    async fn ready(&self) -> StoreResult<()>;

    /// Store `record` at `index`, or at the next key when `index` is `None`.
    async fn put_data(&self, record: &T, index: Option<Index>) -> StoreResult<Index>;

    async fn get_data(&self, index: Index) -> StoreResult<Option<T>>;

    /// All records when `filter` is `None`, otherwise the matching ones.
    async fn search_data(&self, filter: Option<&Filter>) -> StoreResult<Vec<T>>;

    async fn clear_data(&self) -> StoreResult<()>;

    /// Download `url` and store it. Joins a download already in flight.
    async fn put_blob(&self, url: &str) -> StoreResult<String>;

    /// Stored blob for `url`, waiting for an in-flight download first.
    async fn get_blob(&self, url: &str) -> StoreResult<Option<Blob>>;

    async fn get_all_blobs(&self) -> StoreResult<Vec<Blob>>;

    async fn clear_blobs(&self) -> StoreResult<()>;
}

/// Handle to a blob download every interested caller can await.
pub(crate) type SharedFetch = Shared<BoxFuture<'static, StoreResult<String>>>;

/// Run a blob download as its own task so it finishes even when callers
/// stop waiting, and expose it as a shared handle.
pub(crate) fn spawn_fetch<F>(task: F) -> SharedFetch
where
    F: Future<Output = StoreResult<String>> + Send + 'static,
{
    let handle = tokio::spawn(task);
    async move { handle.await.unwrap_or_else(|e| Err(e.into())) }
        .boxed()
        .shared()
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
