//! Choice between the persistent and ephemeral data strategies.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::api::ResourceFetcher;
use crate::store::{
    DataStrategy, DatabaseSchema, EphemeralStrategy, HashSlot, PersistentStrategy, Record,
};

/// Which strategy the user asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Persistent when the platform supports it.
    #[default]
    Auto,
    Persistent,
    Ephemeral,
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Auto => "auto",
            StorageMode::Persistent => "persistent",
            StorageMode::Ephemeral => "ephemeral",
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(StorageMode::Auto),
            "persistent" => Ok(StorageMode::Persistent),
            "ephemeral" => Ok(StorageMode::Ephemeral),
            other => Err(format!(
                "unknown storage mode '{}', expected auto, persistent or ephemeral",
                other
            )),
        }
    }
}

/// Platform capabilities the persistent strategy depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    /// The cache directory exists or can be created.
    pub durable_storage: bool,
    /// A small file can be written and removed in the cache directory.
    pub hash_slot: bool,
}

impl Features {
    pub fn detect(cache_dir: &Path) -> Self {
        let durable_storage = std::fs::create_dir_all(cache_dir).is_ok();
        let features = Self {
            durable_storage,
            hash_slot: durable_storage && HashSlot::probe(cache_dir),
        };
        debug!(dir = %cache_dir.display(), ?features, "Detected storage features");
        features
    }

    pub fn supports_persistent(&self) -> bool {
        self.durable_storage && self.hash_slot
    }
}

/// Pick and initialize a strategy.
///
/// Never fails: a persistent strategy that cannot become ready is replaced
/// by an ephemeral one after logging why.
pub async fn select_strategy<T: Record>(
    schema: DatabaseSchema,
    cache_dir: &Path,
    mode: StorageMode,
    fetcher: Arc<dyn ResourceFetcher>,
) -> Arc<dyn DataStrategy<T>> {
    let persistent = match mode {
        StorageMode::Ephemeral => false,
        StorageMode::Persistent => true,
        StorageMode::Auto => Features::detect(cache_dir).supports_persistent(),
    };

    if !persistent {
        info!("Using ephemeral data strategy");
        return Arc::new(EphemeralStrategy::new(fetcher));
    }

    info!(dir = %cache_dir.display(), "Using persistent data strategy");
    let strategy = PersistentStrategy::<T>::new(schema, cache_dir, Arc::clone(&fetcher));
    match strategy.ready().await {
        Ok(()) => Arc::new(strategy),
        Err(e) => {
            error!(error = %e, "Persistent data strategy failed to initialize");
            info!("Switching to ephemeral data strategy because of the previous error");
            Arc::new(EphemeralStrategy::new(fetcher))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::MockFetcher;
    use crate::store::StrategyKind;
    use serde_json::Value;

    fn schema(version: u64) -> DatabaseSchema {
        DatabaseSchema::new("Selector_Spirits", version)
    }

    async fn select(dir: &Path, version: u64, mode: StorageMode) -> Arc<dyn DataStrategy<Value>> {
        select_strategy(schema(version), dir, mode, MockFetcher::new().into_arc()).await
    }

    #[test]
    fn test_storage_mode_parse() {
        assert_eq!("auto".parse::<StorageMode>().unwrap(), StorageMode::Auto);
        assert_eq!(" Ephemeral ".parse::<StorageMode>().unwrap(), StorageMode::Ephemeral);
        assert!("memory".parse::<StorageMode>().is_err());
        assert_eq!(
            serde_json::to_string(&StorageMode::Persistent).unwrap(),
            "\"persistent\""
        );
    }

    #[test]
    fn test_features_detect() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Features::detect(&dir.path().join("cache")).supports_persistent());

        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        let features = Features::detect(&file);
        assert!(!features.durable_storage);
        assert!(!features.supports_persistent());
    }

    #[tokio::test]
    async fn test_auto_prefers_persistent() {
        let dir = tempfile::tempdir().unwrap();
        let store = select(dir.path(), 1, StorageMode::Auto).await;
        assert_eq!(store.kind(), StrategyKind::Persistent);
        assert!(store.hash_slot().is_some());
    }

    #[tokio::test]
    async fn test_ephemeral_when_requested_or_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let store = select(dir.path(), 1, StorageMode::Ephemeral).await;
        assert_eq!(store.kind(), StrategyKind::Ephemeral);

        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        let store = select(&file, 1, StorageMode::Auto).await;
        assert_eq!(store.kind(), StrategyKind::Ephemeral);
    }

    #[tokio::test]
    async fn test_persistent_open_failure_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();

        let store = select(&file, 1, StorageMode::Persistent).await;
        assert_eq!(store.kind(), StrategyKind::Ephemeral);
        store.ready().await.unwrap();
    }

    #[tokio::test]
    async fn test_schema_downgrade_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = select(dir.path(), 2, StorageMode::Auto).await;
            assert_eq!(store.kind(), StrategyKind::Persistent);
        }

        let store = select(dir.path(), 1, StorageMode::Auto).await;
        assert_eq!(store.kind(), StrategyKind::Ephemeral);
    }
}
