use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::schema::resolve_path;
use super::{
    lock, spawn_fetch, Blob, DataStrategy, Filter, Index, Record, SharedFetch, StoreError,
    StoreResult, StrategyKind,
};
use crate::api::ResourceFetcher;

enum BlobEntry {
    Ready(Blob),
    Pending { generation: u64, fetch: SharedFetch },
}

struct BlobState {
    entries: Mutex<HashMap<String, BlobEntry>>,
    fetcher: Arc<dyn ResourceFetcher>,
    generation: AtomicU64,
}

impl BlobState {
    async fn download(&self, url: &str, generation: u64) -> StoreResult<String> {
        let result = self.fetcher.fetch_binary(url).await;
        let mut entries = lock(&self.entries);
        let ours = matches!(
            entries.get(url),
            Some(BlobEntry::Pending { generation: g, .. }) if *g == generation
        );

        match result {
            Ok(binary) => {
                // A clear_blobs while in flight wins over this download
                if ours {
                    entries.insert(
                        url.to_string(),
                        BlobEntry::Ready(Blob {
                            url: url.to_string(),
                            content_type: binary.content_type,
                            bytes: binary.bytes,
                        }),
                    );
                }
                Ok(url.to_string())
            }
            Err(e) => {
                if ours {
                    entries.remove(url);
                }
                Err(StoreError::fetch(url, e))
            }
        }
    }
}

/// In-memory strategy for the current process only.
///
/// Records live in an ordered map keyed by index, so explicit indexes may
/// leave arbitrary gaps. Nothing survives a restart, so this strategy always
/// needs the network to populate itself.
pub struct EphemeralStrategy<T> {
    records: Mutex<BTreeMap<Index, T>>,
    blobs: Arc<BlobState>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> EphemeralStrategy<T> {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            blobs: Arc::new(BlobState {
                entries: Mutex::new(HashMap::new()),
                fetcher,
                generation: AtomicU64::new(0),
            }),
            _record: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Record> DataStrategy<T> for EphemeralStrategy<T> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Ephemeral
    }

    async fn ready(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn put_data(&self, record: &T, index: Option<Index>) -> StoreResult<Index> {
        let mut records = lock(&self.records);
        let index = match index {
            Some(index) => index,
            None => match records.keys().next_back() {
                Some(&last) => last.checked_add(1).ok_or(StoreError::InvalidIndex(last))?,
                None => 0,
            },
        };
        records.insert(index, record.clone());
        Ok(index)
    }

    async fn get_data(&self, index: Index) -> StoreResult<Option<T>> {
        Ok(lock(&self.records).get(&index).cloned())
    }

    async fn search_data(&self, filter: Option<&Filter>) -> StoreResult<Vec<T>> {
        let records = lock(&self.records);
        let stored = records.values();

        match filter {
            None => Ok(stored.cloned().collect()),
            Some(filter) => {
                let mut found = Vec::new();
                for record in stored {
                    let value = serde_json::to_value(record)?;
                    if resolve_path(&value, &filter.field) == Some(&filter.value) {
                        found.push(record.clone());
                    }
                }
                Ok(found)
            }
        }
    }

    async fn clear_data(&self) -> StoreResult<()> {
        lock(&self.records).clear();
        Ok(())
    }

    async fn put_blob(&self, url: &str) -> StoreResult<String> {
        let fetch = {
            let mut entries = lock(&self.blobs.entries);
            match entries.get(url) {
                Some(BlobEntry::Pending { fetch, .. }) => {
                    debug!(url = url, "Joining in-flight blob fetch");
                    fetch.clone()
                }
                _ => {
                    let generation = self.blobs.generation.fetch_add(1, Ordering::Relaxed);
                    let state = Arc::clone(&self.blobs);
                    let owned = url.to_string();
                    let fetch =
                        spawn_fetch(async move { state.download(&owned, generation).await });
                    entries.insert(
                        url.to_string(),
                        BlobEntry::Pending {
                            generation,
                            fetch: fetch.clone(),
                        },
                    );
                    fetch
                }
            }
        };
        fetch.await
    }

    async fn get_blob(&self, url: &str) -> StoreResult<Option<Blob>> {
        let pending = match lock(&self.blobs.entries).get(url) {
            None => return Ok(None),
            Some(BlobEntry::Ready(blob)) => return Ok(Some(blob.clone())),
            Some(BlobEntry::Pending { fetch, .. }) => fetch.clone(),
        };

        if let Err(e) = pending.await {
            warn!(url = url, error = %e, "Blob fetch failed");
            return Ok(None);
        }

        match lock(&self.blobs.entries).get(url) {
            Some(BlobEntry::Ready(blob)) => Ok(Some(blob.clone())),
            _ => Ok(None),
        }
    }

    async fn get_all_blobs(&self) -> StoreResult<Vec<Blob>> {
        Ok(lock(&self.blobs.entries)
            .values()
            .filter_map(|entry| match entry {
                BlobEntry::Ready(blob) => Some(blob.clone()),
                BlobEntry::Pending { .. } => None,
            })
            .collect())
    }

    async fn clear_blobs(&self) -> StoreResult<()> {
        lock(&self.blobs.entries).clear();
        Ok(())
    }
}
