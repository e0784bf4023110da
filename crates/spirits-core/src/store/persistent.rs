//! Persistent strategy backed by an embedded `redb` database.
//!
//! ## Layout
//!
//! One database file `<dir>/<schema name>.redb` with these tables:
//!
//! | Table | Key | Value |
//! |-------|-----|-------|
//! | `records` | record index (`u64`) | record as JSON |
//! | `record_index` (multimap) | index name + NUL + JSON key | record indexes |
//! | `blobs` | source URL | raw bytes |
//! | `blob_types` | source URL | content type |
//! | `meta` | `"version"` / `"next_key"` | `u64` |
//!
//! The content hash of the last import lives outside the database in a
//! [`HashSlot`] file.
//!
//! ## Opening
//!
//! The database is opened once, lazily, by the first call to `ready()` or
//! any other operation; every caller shares that outcome. A stored version
//! older than the schema (or none at all) rebuilds the record tables and
//! clears the hash; a newer stored version is refused.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::schema::encode_index_key;
use super::{
    lock, spawn_fetch, Blob, DataStrategy, DatabaseSchema, Filter, HashSlot, Index, Record,
    SharedFetch, StoreError, StoreResult, StrategyKind,
};
use crate::api::{FetchedBinary, ResourceFetcher};

const RECORDS: TableDefinition<u64, &[u8]> = TableDefinition::new("records");
const RECORD_INDEX: MultimapTableDefinition<&str, u64> = MultimapTableDefinition::new("record_index");
const BLOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs");
const BLOB_TYPES: TableDefinition<&str, &str> = TableDefinition::new("blob_types");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const META_VERSION: &str = "version";
const META_NEXT_KEY: &str = "next_key";

/// First key handed out by the key generator.
const FIRST_KEY: u64 = 1;

type ReadyFuture = Shared<BoxFuture<'static, StoreResult<Arc<Database>>>>;

enum BlobMarker {
    /// Stored in the database, nothing to wait for.
    Fetched,
    Pending { generation: u64, fetch: SharedFetch },
}

type BlobMarkers = Arc<Mutex<HashMap<String, BlobMarker>>>;

struct State {
    schema: DatabaseSchema,
    hash_slot: HashSlot,
    fetcher: Arc<dyn ResourceFetcher>,
    ready: ReadyFuture,
    markers: BlobMarkers,
    generation: AtomicU64,
    /// Record writes take turns in call order so generated keys follow it.
    writes: tokio::sync::Mutex<()>,
}

impl State {
    async fn database(&self) -> StoreResult<Arc<Database>> {
        self.ready.clone().await
    }

    /// Run a database operation on the blocking pool once the database is open.
    async fn run<R, F>(&self, op: F) -> StoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&Database) -> StoreResult<R> + Send + 'static,
    {
        let db = self.database().await?;
        tokio::task::spawn_blocking(move || op(&db)).await?
    }

    async fn download(&self, url: &str, generation: u64) -> StoreResult<String> {
        let result = self.fetch_and_store(url).await;

        let mut markers = lock(&self.markers);
        let ours = matches!(
            markers.get(url),
            Some(BlobMarker::Pending { generation: g, .. }) if *g == generation
        );
        if ours {
            match &result {
                Ok(_) => {
                    markers.insert(url.to_string(), BlobMarker::Fetched);
                }
                Err(_) => {
                    markers.remove(url);
                }
            }
        }
        result
    }

    async fn fetch_and_store(&self, url: &str) -> StoreResult<String> {
        // Never hit the network for a database that cannot open
        self.database().await?;
        let binary = self
            .fetcher
            .fetch_binary(url)
            .await
            .map_err(|e| StoreError::fetch(url, e))?;

        let owned = url.to_string();
        self.run(move |db| write_blob(db, &owned, binary)).await?;
        debug!(url = url, "Stored blob");
        Ok(url.to_string())
    }

    async fn read_blob(&self, url: &str) -> StoreResult<Option<Blob>> {
        let owned = url.to_string();
        self.run(move |db| read_blob(db, &owned)).await
    }
}

/// Strategy that keeps records and blobs on disk across sessions.
pub struct PersistentStrategy<T> {
    state: Arc<State>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> PersistentStrategy<T> {
    /// Prepare a strategy storing its files in `dir`.
    ///
    /// Nothing touches the disk until the strategy is first awaited.
    pub fn new(schema: DatabaseSchema, dir: &Path, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        let path = dir.join(format!("{}.redb", schema.name));
        let hash_slot = HashSlot::for_database(dir, &schema.name);
        let markers: BlobMarkers = Arc::new(Mutex::new(HashMap::new()));

        let ready = open(path, schema.clone(), hash_slot.clone(), markers.clone())
            .boxed()
            .shared();

        Self {
            state: Arc::new(State {
                schema,
                hash_slot,
                fetcher,
                ready,
                markers,
                generation: AtomicU64::new(0),
                writes: tokio::sync::Mutex::new(()),
            }),
            _record: PhantomData,
        }
    }
}

async fn open(
    path: PathBuf,
    schema: DatabaseSchema,
    hash_slot: HashSlot,
    markers: BlobMarkers,
) -> StoreResult<Arc<Database>> {
    let (db, urls) =
        tokio::task::spawn_blocking(move || open_database(&path, &schema, &hash_slot)).await??;

    // Blobs already on disk never wait on a fetch
    let mut markers = lock(&markers);
    for url in urls {
        markers.entry(url).or_insert(BlobMarker::Fetched);
    }
    Ok(Arc::new(db))
}

fn open_database(
    path: &Path,
    schema: &DatabaseSchema,
    hash_slot: &HashSlot,
) -> StoreResult<(Database, Vec<String>)> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::create(path)?;

    let txn = db.begin_write()?;
    {
        let stored = {
            let meta = txn.open_table(META)?;
            let version = meta.get(META_VERSION)?.map(|v| v.value());
            version
        };

        match stored {
            Some(stored) if stored > schema.version => {
                return Err(StoreError::VersionDowngrade {
                    stored,
                    requested: schema.version,
                });
            }
            Some(stored) if stored == schema.version => {}
            stored => {
                info!(
                    database = %schema.name,
                    from = ?stored,
                    to = schema.version,
                    "Upgrading database schema"
                );
                hash_slot.clear()?;
                txn.delete_table(RECORDS)?;
                txn.delete_multimap_table(RECORD_INDEX)?;
                txn.open_table(RECORDS)?;
                txn.open_multimap_table(RECORD_INDEX)?;

                let mut meta = txn.open_table(META)?;
                meta.insert(META_VERSION, schema.version)?;
                meta.remove(META_NEXT_KEY)?;
            }
        }

        txn.open_table(BLOBS)?;
        txn.open_table(BLOB_TYPES)?;
    }
    txn.commit()?;

    let urls = {
        let read = db.begin_read()?;
        let blobs = read.open_table(BLOBS)?;
        let urls = blobs
            .iter()?
            .map(|entry| entry.map(|(url, _)| url.value().to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        urls
    };
    debug!(database = %schema.name, blobs = urls.len(), "Opened database");

    Ok((db, urls))
}

fn decode_value(bytes: &[u8]) -> StoreResult<Value> {
    Ok(serde_json::from_slice(bytes)?)
}

fn write_record(
    db: &Database,
    schema: &DatabaseSchema,
    index: Option<Index>,
    record: &Value,
) -> StoreResult<Index> {
    let bytes = serde_json::to_vec(record)?;
    let auto_increment = schema.records.options.auto_increment;

    let txn = db.begin_write()?;
    let key = {
        let mut meta = txn.open_table(META)?;
        let next = meta.get(META_NEXT_KEY)?.map(|v| v.value()).unwrap_or(FIRST_KEY);
        let key = match index {
            Some(key) => key,
            None if auto_increment => next,
            None => return Err(StoreError::MissingKey),
        };
        if auto_increment && key >= next {
            meta.insert(META_NEXT_KEY, key.saturating_add(1))?;
        }
        key
    };

    {
        let mut records = txn.open_table(RECORDS)?;
        let mut entries = txn.open_multimap_table(RECORD_INDEX)?;

        let previous = match records.get(key)? {
            Some(old) => Some(decode_value(old.value())?),
            None => None,
        };
        if let Some(previous) = previous {
            for definition in &schema.records.indexes {
                if let Some(entry) = definition.entry_key(&previous) {
                    entries.remove(entry.as_str(), key)?;
                }
            }
        }

        for definition in &schema.records.indexes {
            let Some(entry) = definition.entry_key(record) else {
                continue;
            };
            if definition.options.unique {
                let holders = entries
                    .get(entry.as_str())?
                    .map(|id| id.map(|id| id.value()))
                    .collect::<Result<Vec<_>, _>>()?;
                if holders.iter().any(|&holder| holder != key) {
                    return Err(StoreError::Constraint {
                        index: definition.name.clone(),
                        key: definition
                            .key_path
                            .evaluate(record)
                            .map(|k| k.to_string())
                            .unwrap_or_default(),
                    });
                }
            }
            entries.insert(entry.as_str(), key)?;
        }

        records.insert(key, bytes.as_slice())?;
    }
    txn.commit()?;

    Ok(key)
}

fn read_record(db: &Database, index: Index) -> StoreResult<Option<Vec<u8>>> {
    let txn = db.begin_read()?;
    let records = txn.open_table(RECORDS)?;
    let record = records.get(index)?.map(|bytes| bytes.value().to_vec());
    Ok(record)
}

fn scan_records(db: &Database, entry: Option<String>) -> StoreResult<Vec<Vec<u8>>> {
    let txn = db.begin_read()?;
    let records = txn.open_table(RECORDS)?;

    match entry {
        None => records
            .iter()?
            .map(|row| row.map(|(_, bytes)| bytes.value().to_vec()).map_err(Into::into))
            .collect(),
        Some(entry) => {
            let entries = txn.open_multimap_table(RECORD_INDEX)?;
            let ids = entries
                .get(entry.as_str())?
                .map(|id| id.map(|id| id.value()))
                .collect::<Result<Vec<_>, _>>()?;

            let mut found = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(bytes) = records.get(id)? {
                    found.push(bytes.value().to_vec());
                }
            }
            Ok(found)
        }
    }
}

/// Drop every record and index entry; the key generator keeps counting.
fn clear_records(db: &Database) -> StoreResult<()> {
    let txn = db.begin_write()?;
    txn.delete_table(RECORDS)?;
    txn.delete_multimap_table(RECORD_INDEX)?;
    txn.open_table(RECORDS)?;
    txn.open_multimap_table(RECORD_INDEX)?;
    txn.commit()?;
    Ok(())
}

fn write_blob(db: &Database, url: &str, binary: FetchedBinary) -> StoreResult<()> {
    let txn = db.begin_write()?;
    {
        let mut blobs = txn.open_table(BLOBS)?;
        blobs.insert(url, binary.bytes.as_slice())?;

        let mut types = txn.open_table(BLOB_TYPES)?;
        match binary.content_type.as_deref() {
            Some(content_type) => {
                types.insert(url, content_type)?;
            }
            None => {
                types.remove(url)?;
            }
        }
    }
    txn.commit()?;
    Ok(())
}

fn read_blob(db: &Database, url: &str) -> StoreResult<Option<Blob>> {
    let txn = db.begin_read()?;
    let blobs = txn.open_table(BLOBS)?;
    let types = txn.open_table(BLOB_TYPES)?;

    let Some(bytes) = blobs.get(url)?.map(|bytes| bytes.value().to_vec()) else {
        return Ok(None);
    };
    let content_type = types.get(url)?.map(|t| t.value().to_string());

    Ok(Some(Blob {
        url: url.to_string(),
        content_type,
        bytes,
    }))
}

fn read_all_blobs(db: &Database) -> StoreResult<Vec<Blob>> {
    let txn = db.begin_read()?;
    let blobs = txn.open_table(BLOBS)?;
    let types = txn.open_table(BLOB_TYPES)?;

    let mut all = Vec::new();
    for row in blobs.iter()? {
        let (url, bytes) = row?;
        let url = url.value().to_string();
        let content_type = types.get(url.as_str())?.map(|t| t.value().to_string());
        all.push(Blob {
            content_type,
            bytes: bytes.value().to_vec(),
            url,
        });
    }
    Ok(all)
}

fn clear_blob_tables(db: &Database) -> StoreResult<()> {
    let txn = db.begin_write()?;
    txn.delete_table(BLOBS)?;
    txn.delete_table(BLOB_TYPES)?;
    txn.open_table(BLOBS)?;
    txn.open_table(BLOB_TYPES)?;
    txn.commit()?;
    Ok(())
}

#[async_trait]
impl<T: Record> DataStrategy<T> for PersistentStrategy<T> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Persistent
    }

    fn hash_slot(&self) -> Option<&HashSlot> {
        Some(&self.state.hash_slot)
    }

    async fn ready(&self) -> StoreResult<()> {
        self.state.database().await.map(|_| ())
    }

    async fn put_data(&self, record: &T, index: Option<Index>) -> StoreResult<Index> {
        let value = serde_json::to_value(record)?;
        let schema = self.state.schema.clone();
        let _turn = self.state.writes.lock().await;
        self.state
            .run(move |db| write_record(db, &schema, index, &value))
            .await
    }

    async fn get_data(&self, index: Index) -> StoreResult<Option<T>> {
        let bytes = self.state.run(move |db| read_record(db, index)).await?;
        match bytes {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn search_data(&self, filter: Option<&Filter>) -> StoreResult<Vec<T>> {
        let entry = match filter {
            None => None,
            Some(filter) => {
                if self.state.schema.index(&filter.field).is_none() {
                    return Err(StoreError::UnknownIndex(filter.field.clone()));
                }
                Some(encode_index_key(&filter.field, &filter.value))
            }
        };

        let rows = self.state.run(move |db| scan_records(db, entry)).await?;
        rows.iter()
            .map(|bytes| serde_json::from_slice(bytes).map_err(Into::into))
            .collect()
    }

    async fn clear_data(&self) -> StoreResult<()> {
        self.state.hash_slot.clear()?;
        self.state.run(clear_records).await
    }

    async fn put_blob(&self, url: &str) -> StoreResult<String> {
        let fetch = {
            let mut markers = lock(&self.state.markers);
            match markers.get(url) {
                Some(BlobMarker::Pending { fetch, .. }) => {
                    debug!(url = url, "Joining in-flight blob fetch");
                    fetch.clone()
                }
                _ => {
                    let generation = self.state.generation.fetch_add(1, Ordering::Relaxed);
                    let state = Arc::clone(&self.state);
                    let owned = url.to_string();
                    let fetch =
                        spawn_fetch(async move { state.download(&owned, generation).await });
                    markers.insert(
                        url.to_string(),
                        BlobMarker::Pending {
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
        // Take the pending handle before reading so a fetch finishing in
        // between is still observed by the second read
        let pending = match lock(&self.state.markers).get(url) {
            Some(BlobMarker::Pending { fetch, .. }) => Some(fetch.clone()),
            _ => None,
        };

        if let Some(blob) = self.state.read_blob(url).await? {
            return Ok(Some(blob));
        }

        match pending {
            Some(fetch) => match fetch.await {
                Ok(_) => self.state.read_blob(url).await,
                Err(e) => {
                    warn!(url = url, error = %e, "Blob fetch failed");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn get_all_blobs(&self) -> StoreResult<Vec<Blob>> {
        self.state.run(read_all_blobs).await
    }

    async fn clear_blobs(&self) -> StoreResult<()> {
        lock(&self.state.markers).clear();
        self.state.run(clear_blob_tables).await
    }
}
