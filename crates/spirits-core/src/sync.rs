//! Startup synchronization of the catalog with its data source.
//!
//! The flow decodes the source, hashes the decoded rows, and only rebuilds
//! the stored records when the hash differs from the one kept by the
//! persistent strategy. The ephemeral strategy keeps no hash and is
//! repopulated on every run.

use std::collections::HashSet;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::future::join_all;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::api::ResourceFetcher;
use crate::csv::{self, RawRecord};
use crate::store::{Blob, DataStrategy, Record, StoreError, StoreResult, StrategyKind};

/// A record type that can be built from a decoded catalog row.
pub trait CatalogRecord: Record {
    type Error: std::error::Error + Send + Sync + 'static;

    fn from_raw(raw: &RawRecord) -> Result<Self, Self::Error>;

    /// Image URLs to prefetch into the blob store on import.
    fn image_urls(&self) -> Vec<String>;
}

/// Where the catalog CSV comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    /// CSV text shipped with the application.
    Inline(String),
    /// URL of the CSV file.
    Remote(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Could not find any data source")]
    NoDataSource,

    #[error("The ephemeral data strategy cannot be used offline")]
    OfflineIncompatible,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a synchronization run did to the stored records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// First import into an empty persistent database.
    Created { hash: String },
    /// The source changed since the last import.
    Updated { hash: String, previous: String },
    /// The ephemeral strategy was filled.
    Populated,
    /// The source hashes the same as the stored records.
    Unchanged { hash: String },
    /// Offline with a persistent strategy; stored data is used as-is.
    Offline,
    /// The source could not be fetched or decoded; stored data is untouched.
    SourceUnavailable { reason: String },
    /// The stored records could not be replaced; they are kept as they were.
    Skipped { reason: String },
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    /// Records written by this run.
    pub imported: usize,
    /// Records whose write failed.
    pub failed: usize,
    /// Cached blobs for the already-rendered images, in request order.
    pub rendered: Vec<Option<Blob>>,
}

impl SyncReport {
    fn new(outcome: SyncOutcome) -> Self {
        Self {
            outcome,
            imported: 0,
            failed: 0,
            rendered: Vec::new(),
        }
    }
}

/// SHA-1 of the rows as JSON with sorted keys, base64 encoded.
pub fn content_hash(rows: &[RawRecord]) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(rows)?;
    Ok(STANDARD.encode(Sha1::digest(&bytes)))
}

pub struct SyncFlow<T: CatalogRecord> {
    store: Arc<dyn DataStrategy<T>>,
    fetcher: Arc<dyn ResourceFetcher>,
    source: Option<DataSource>,
    online: bool,
    rendered: Vec<String>,
}

impl<T: CatalogRecord> SyncFlow<T> {
    pub fn new(store: Arc<dyn DataStrategy<T>>, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self {
            store,
            fetcher,
            source: None,
            online: true,
            rendered: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: Option<DataSource>) -> Self {
        self.source = source;
        self
    }

    pub fn online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    /// Image URLs already shown to the user that should be cached.
    pub fn with_rendered_images(mut self, urls: Vec<String>) -> Self {
        self.rendered = urls;
        self
    }

    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        if !self.online {
            if self.store.kind() == StrategyKind::Ephemeral {
                return Err(SyncError::OfflineIncompatible);
            }
            info!("Skipped database update because offline");
            return Ok(SyncReport::new(SyncOutcome::Offline));
        }

        let source = self.source.as_ref().ok_or(SyncError::NoDataSource)?;
        self.store.ready().await?;

        let rows = match self.load(source).await {
            Ok(rows) => rows,
            Err(reason) => {
                info!(reason = %reason, "Skipped database update because the data source is unavailable");
                return Ok(SyncReport::new(SyncOutcome::SourceUnavailable { reason }));
            }
        };
        let records = match rows.iter().map(T::from_raw).collect::<Result<Vec<_>, _>>() {
            Ok(records) => records,
            Err(e) => {
                let reason = format!("Invalid record: {}", e);
                info!(reason = %reason, "Skipped database update because the data source is unavailable");
                return Ok(SyncReport::new(SyncOutcome::SourceUnavailable { reason }));
            }
        };

        let (rendered, report) = futures::join!(self.cache_rendered(), self.update(&rows, &records));
        let mut report = report?;
        report.rendered = rendered;
        Ok(report)
    }

    async fn load(&self, source: &DataSource) -> Result<Vec<RawRecord>, String> {
        let text = match source {
            DataSource::Inline(text) => {
                info!(bytes = text.len(), "Using inline data source");
                text.clone()
            }
            DataSource::Remote(url) => self
                .fetcher
                .fetch_text(url)
                .await
                .map_err(|e| e.to_string())?,
        };
        Ok(csv::parse(&text))
    }

    /// Clear the stored records before an import, or the report of a skipped update.
    async fn clear(&self) -> Option<SyncReport> {
        let e = self.store.clear_data().await.err()?;
        error!(error = %e, "Skipped database update because stored records could not be cleared");
        Some(SyncReport::new(SyncOutcome::Skipped {
            reason: e.to_string(),
        }))
    }

    async fn update(&self, rows: &[RawRecord], records: &[T]) -> Result<SyncReport, SyncError> {
        let Some(slot) = self.store.hash_slot() else {
            if let Some(skipped) = self.clear().await {
                return Ok(skipped);
            }
            let (imported, failed) = self.import(records).await;
            info!(imported = imported, "Populated database");
            return Ok(SyncReport {
                imported,
                failed,
                ..SyncReport::new(SyncOutcome::Populated)
            });
        };

        let hash = content_hash(rows).map_err(StoreError::from)?;
        let previous = slot.get();
        if previous.as_deref() == Some(hash.as_str()) {
            info!(hash = %hash, "Skipped database update because hash equal");
            return Ok(SyncReport::new(SyncOutcome::Unchanged { hash }));
        }

        if let Some(skipped) = self.clear().await {
            return Ok(skipped);
        }
        let (imported, failed) = self.import(records).await;
        slot.set(&hash)?;

        let outcome = match previous {
            Some(previous) => {
                info!(hash = %hash, previous = %previous, "Updated database because hash changed");
                SyncOutcome::Updated { hash, previous }
            }
            None => {
                info!(hash = %hash, "Created database");
                SyncOutcome::Created { hash }
            }
        };
        Ok(SyncReport {
            imported,
            failed,
            ..SyncReport::new(outcome)
        })
    }

    /// Write every record and prefetch every image it references.
    ///
    /// Returns the number of written and failed records.
    async fn import(&self, records: &[T]) -> (usize, usize) {
        let mut seen = HashSet::new();
        let urls: Vec<String> = records
            .iter()
            .flat_map(|record| record.image_urls())
            .filter(|url| seen.insert(url.clone()))
            .collect();

        let writes = join_all(records.iter().map(|record| self.store.put_data(record, None)));
        let prefetches = join_all(urls.iter().map(|url| async move {
            if let Err(e) = self.store.put_blob(url).await {
                warn!(url = %url, error = %e, "Failed to prefetch image");
            }
        }));
        let (results, _) = futures::join!(writes, prefetches);

        let mut failed = 0;
        for result in results {
            if let Err(e) = result {
                error!(error = %e, "Failed to import record");
                failed += 1;
            }
        }
        (records.len() - failed, failed)
    }

    async fn cache_rendered(&self) -> Vec<Option<Blob>> {
        join_all(self.rendered.iter().map(|url| async move {
            match self.cached_blob(url).await {
                Ok(blob) => blob,
                Err(e) => {
                    warn!(url = %url, error = %e, "Failed to cache rendered image");
                    None
                }
            }
        }))
        .await
    }

    async fn cached_blob(&self, url: &str) -> StoreResult<Option<Blob>> {
        if let Some(blob) = self.store.get_blob(url).await? {
            return Ok(Some(blob));
        }
        let stored = self.store.put_blob(url).await?;
        self.store.get_blob(&stored).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{catalog_schema, Spirit};
    use crate::store::testing::MockFetcher;
    use crate::store::{
        DatabaseSchema, EphemeralStrategy, Filter, IndexDefinition, PersistentStrategy,
    };
    use std::path::Path;

    const DATA_URL: &str = "https://example.org/spirits.csv";

    const CATALOG: &str = "\
series,firstname,lastname,form,icon_id,theme
,Tohka,Yatogami,Spirit,10101,9b5de5
,Kotori,Itsuka,Spirit,10201,ff0000
Neptunia,Neptune,,CPU,,a98bd6
Neptunia,Noire,,CPU,,202020
";

    fn persistent(dir: &Path, fetcher: &Arc<MockFetcher>) -> Arc<dyn DataStrategy<Spirit>> {
        Arc::new(PersistentStrategy::new(catalog_schema(), dir, fetcher.clone()))
    }

    fn ephemeral(fetcher: &Arc<MockFetcher>) -> Arc<dyn DataStrategy<Spirit>> {
        Arc::new(EphemeralStrategy::new(fetcher.clone()))
    }

    fn flow(store: &Arc<dyn DataStrategy<Spirit>>, fetcher: &Arc<MockFetcher>) -> SyncFlow<Spirit> {
        SyncFlow::new(store.clone(), fetcher.clone())
            .with_source(Some(DataSource::Remote(DATA_URL.to_string())))
    }

    /// Ephemeral store whose `clear_data` always fails.
    struct UnclearableStore(EphemeralStrategy<Spirit>);

    #[async_trait::async_trait]
    impl DataStrategy<Spirit> for UnclearableStore {
        fn kind(&self) -> StrategyKind {
            self.0.kind()
        }

        async fn ready(&self) -> StoreResult<()> {
            self.0.ready().await
        }

        async fn put_data(&self, record: &Spirit, index: Option<u64>) -> StoreResult<u64> {
            self.0.put_data(record, index).await
        }

        async fn get_data(&self, index: u64) -> StoreResult<Option<Spirit>> {
            self.0.get_data(index).await
        }

        async fn search_data(&self, filter: Option<&Filter>) -> StoreResult<Vec<Spirit>> {
            self.0.search_data(filter).await
        }

        async fn clear_data(&self) -> StoreResult<()> {
            Err(StoreError::Task("clear refused".to_string()))
        }

        async fn put_blob(&self, url: &str) -> StoreResult<String> {
            self.0.put_blob(url).await
        }

        async fn get_blob(&self, url: &str) -> StoreResult<Option<Blob>> {
            self.0.get_blob(url).await
        }

        async fn get_all_blobs(&self) -> StoreResult<Vec<Blob>> {
            self.0.get_all_blobs().await
        }

        async fn clear_blobs(&self) -> StoreResult<()> {
            self.0.clear_blobs().await
        }
    }

    fn firstnames(spirits: &[Spirit]) -> Vec<&str> {
        spirits.iter().map(|s| s.firstname.as_str()).collect()
    }

    #[test]
    fn test_content_hash_is_stable_and_key_order_independent() {
        let a = csv::parse("firstname,series\nTohka,Date A Live\n");
        let b = csv::parse("series,firstname\nDate A Live,Tohka\n");
        let c = csv::parse("firstname,series\nKotori,Date A Live\n");

        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
        assert_ne!(content_hash(&a).unwrap(), content_hash(&c).unwrap());
        // base64 of a 20-byte digest
        assert_eq!(content_hash(&a).unwrap().len(), 28);
    }

    #[tokio::test]
    async fn test_first_import_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::new().into_arc();
        fetcher.set_text(DATA_URL, CATALOG);
        let store = persistent(dir.path(), &fetcher);

        let report = flow(&store, &fetcher).run().await.unwrap();

        assert!(matches!(report.outcome, SyncOutcome::Created { .. }));
        assert_eq!((report.imported, report.failed), (4, 0));
        assert_eq!(
            firstnames(&store.search_data(None).await.unwrap()),
            ["Tohka", "Kotori", "Neptune", "Noire"]
        );
        assert!(store.hash_slot().unwrap().get().is_some());

        // Both icons and full body images were prefetched
        assert_eq!(store.get_all_blobs().await.unwrap().len(), 4);
        let neptunia = store
            .search_data(Some(&Filter::new("series", "Neptunia")))
            .await
            .unwrap();
        assert_eq!(firstnames(&neptunia), ["Neptune", "Noire"]);
    }

    #[tokio::test]
    async fn test_same_dataset_twice_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::new().into_arc();
        fetcher.set_text(DATA_URL, CATALOG);
        let store = persistent(dir.path(), &fetcher);

        flow(&store, &fetcher).run().await.unwrap();
        let blob_fetches = fetcher.total_calls();

        let report = flow(&store, &fetcher).run().await.unwrap();
        assert!(matches!(report.outcome, SyncOutcome::Unchanged { .. }));
        assert_eq!(report.imported, 0);
        assert_eq!(store.search_data(None).await.unwrap().len(), 4);
        // Only the source was fetched again
        assert_eq!(fetcher.total_calls(), blob_fetches + 1);
    }

    #[tokio::test]
    async fn test_changed_dataset_replaces_records() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::new().into_arc();
        fetcher.set_text(DATA_URL, CATALOG);
        let store = persistent(dir.path(), &fetcher);
        flow(&store, &fetcher).run().await.unwrap();
        let first_hash = store.hash_slot().unwrap().get().unwrap();

        fetcher.set_text(
            DATA_URL,
            "firstname,form,theme\nKurumi,Spirit,ff0000\nYoshino,Spirit,00ffff\n",
        );
        let report = flow(&store, &fetcher).run().await.unwrap();

        match report.outcome {
            SyncOutcome::Updated { previous, hash } => {
                assert_eq!(previous, first_hash);
                assert_eq!(store.hash_slot().unwrap().get(), Some(hash));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(
            firstnames(&store.search_data(None).await.unwrap()),
            ["Kurumi", "Yoshino"]
        );
        assert!(store
            .search_data(Some(&Filter::new("firstname", "Tohka")))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_ephemeral_always_reimports() {
        let fetcher = MockFetcher::new().into_arc();
        fetcher.set_text(DATA_URL, CATALOG);
        let store = ephemeral(&fetcher);

        for _ in 0..2 {
            let report = flow(&store, &fetcher).run().await.unwrap();
            assert_eq!(report.outcome, SyncOutcome::Populated);
            assert_eq!(report.imported, 4);
        }
        assert_eq!(store.search_data(None).await.unwrap().len(), 4);
        assert!(store.hash_slot().is_none());
    }

    #[tokio::test]
    async fn test_missing_source_is_fatal() {
        let fetcher = MockFetcher::new().into_arc();
        let store = ephemeral(&fetcher);

        let err = SyncFlow::new(store, fetcher.clone()).run().await.unwrap_err();
        assert!(matches!(err, SyncError::NoDataSource));
    }

    #[tokio::test]
    async fn test_offline_with_ephemeral_is_fatal() {
        let fetcher = MockFetcher::new().into_arc();
        let store = ephemeral(&fetcher);

        let err = flow(&store, &fetcher).online(false).run().await.unwrap_err();
        assert!(matches!(err, SyncError::OfflineIncompatible));
    }

    #[tokio::test]
    async fn test_offline_with_persistent_keeps_stored_data() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::new().into_arc();
        fetcher.set_text(DATA_URL, CATALOG);
        let store = persistent(dir.path(), &fetcher);
        flow(&store, &fetcher).run().await.unwrap();
        let calls = fetcher.total_calls();

        let report = flow(&store, &fetcher).online(false).run().await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::Offline);
        assert_eq!(store.search_data(None).await.unwrap().len(), 4);
        assert_eq!(fetcher.total_calls(), calls);
    }

    #[tokio::test]
    async fn test_unreachable_source_leaves_data_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::new().into_arc();
        fetcher.set_text(DATA_URL, CATALOG);
        let store = persistent(dir.path(), &fetcher);
        flow(&store, &fetcher).run().await.unwrap();

        fetcher.fail(DATA_URL);
        let report = flow(&store, &fetcher).run().await.unwrap();
        assert!(matches!(
            report.outcome,
            SyncOutcome::SourceUnavailable { .. }
        ));
        assert_eq!(store.search_data(None).await.unwrap().len(), 4);
        assert!(store.hash_slot().unwrap().get().is_some());
    }

    #[tokio::test]
    async fn test_clear_failure_keeps_stored_records() {
        let fetcher = MockFetcher::new().into_arc();
        fetcher.set_text(DATA_URL, CATALOG);
        let store: Arc<dyn DataStrategy<Spirit>> =
            Arc::new(UnclearableStore(EphemeralStrategy::new(fetcher.clone())));
        let kept = Spirit::from_raw(&csv::parse(CATALOG)[2]).unwrap();
        store.put_data(&kept, None).await.unwrap();

        let report = flow(&store, &fetcher).run().await.unwrap();
        assert!(matches!(report.outcome, SyncOutcome::Skipped { .. }));
        assert_eq!(report.imported, 0);
        assert_eq!(firstnames(&store.search_data(None).await.unwrap()), ["Neptune"]);
    }

    #[tokio::test]
    async fn test_invalid_row_skips_update() {
        let fetcher = MockFetcher::new().into_arc();
        let store = ephemeral(&fetcher);
        let source = DataSource::Inline("firstname,theme\nTohka,not-a-colour\n".to_string());

        let report = SyncFlow::new(store.clone(), fetcher.clone())
            .with_source(Some(source))
            .run()
            .await
            .unwrap();
        assert!(matches!(
            report.outcome,
            SyncOutcome::SourceUnavailable { .. }
        ));
        assert!(store.search_data(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inline_source_and_rendered_images() {
        let fetcher = MockFetcher::new().into_arc();
        let store = ephemeral(&fetcher);
        let logo = "https://example.org/logo.png";
        fetcher.fail("https://example.org/broken.png");

        let report = SyncFlow::new(store.clone(), fetcher.clone())
            .with_source(Some(DataSource::Inline(CATALOG.to_string())))
            .with_rendered_images(vec![
                logo.to_string(),
                "https://example.org/broken.png".to_string(),
            ])
            .run()
            .await
            .unwrap();

        assert_eq!(report.rendered.len(), 2);
        assert_eq!(
            report.rendered[0].as_ref().map(|b| b.url.as_str()),
            Some(logo)
        );
        assert_eq!(report.rendered[1], None);
        assert_eq!(fetcher.calls(DATA_URL), 0);
        assert!(store.get_blob(logo).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_record_failures_do_not_abort_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::new().into_arc();
        fetcher.set_text(
            DATA_URL,
            "firstname,form,theme\nTohka,Spirit,9b5de5\nTohka,Inverse Spirit,202020\nKotori,Spirit,ff0000\n",
        );
        let schema = DatabaseSchema::new("Unique_Spirits", 1)
            .with_index(IndexDefinition::new("firstname", "firstname").unique());
        let store: Arc<dyn DataStrategy<Spirit>> =
            Arc::new(PersistentStrategy::new(schema, dir.path(), fetcher.clone()));

        let report = flow(&store, &fetcher).run().await.unwrap();

        assert_eq!((report.imported, report.failed), (2, 1));
        assert_eq!(
            firstnames(&store.search_data(None).await.unwrap()),
            ["Tohka", "Kotori"]
        );
        assert!(store.hash_slot().unwrap().get().is_some());
    }

    #[tokio::test]
    async fn test_image_prefetch_failures_are_logged_only() {
        let fetcher = MockFetcher::new().into_arc();
        fetcher.set_text(DATA_URL, CATALOG);
        let store = ephemeral(&fetcher);
        let tohka = Spirit::from_raw(&csv::parse(CATALOG)[0]).unwrap();
        for url in tohka.all_images() {
            fetcher.fail(&url);
        }

        let report = flow(&store, &fetcher).run().await.unwrap();
        assert_eq!(report.imported, 4);
        assert_eq!(store.get_all_blobs().await.unwrap().len(), 2);
        assert_eq!(report.failed, 0);
    }
}
