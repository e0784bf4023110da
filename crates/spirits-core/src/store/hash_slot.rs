//! Small persisted slot holding the content hash of the last import.
//!
//! The slot lives in its own JSON file next to the database so it can be
//! read, written and removed without opening a database transaction.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::StoreResult;

/// File name used to check that the slot directory is writable.
const PROBE_FILE: &str = "__test__";

/// Content hash of an import and when it was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredHash {
    pub hash: String,
    pub imported_at: DateTime<Utc>,
}

impl StoredHash {
    /// Age in the largest whole unit, e.g. `3h ago`.
    pub fn age_display(&self) -> String {
        let age = Utc::now() - self.imported_at;
        if age.num_days() > 0 {
            format!("{}d ago", age.num_days())
        } else if age.num_hours() > 0 {
            format!("{}h ago", age.num_hours())
        } else if age.num_minutes() > 0 {
            format!("{}m ago", age.num_minutes())
        } else {
            "just now".to_string()
        }
    }
}

#[derive(Debug, Clone)]
pub struct HashSlot {
    path: PathBuf,
}

impl HashSlot {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Slot for the database called `name` inside `dir`.
    pub fn for_database(dir: &Path, name: &str) -> Self {
        Self::new(dir.join(format!("{}.hash.json", name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> StoreResult<Option<StoredHash>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Current hash; an unreadable slot counts as empty.
    pub fn get(&self) -> Option<String> {
        match self.load() {
            Ok(stored) => stored.map(|s| s.hash),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Failed to read content hash");
                None
            }
        }
    }

    pub fn set(&self, hash: &str) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stored = StoredHash {
            hash: hash.to_string(),
            imported_at: Utc::now(),
        };
        let contents = serde_json::to_string_pretty(&stored)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }

    pub fn clear(&self) -> StoreResult<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Whether a slot can be written and removed inside `dir`.
    pub fn probe(dir: &Path) -> bool {
        let probe = dir.join(PROBE_FILE);
        let ok = std::fs::create_dir_all(dir)
            .and_then(|_| std::fs::write(&probe, PROBE_FILE))
            .and_then(|_| std::fs::remove_file(&probe));
        if let Err(e) = &ok {
            debug!(dir = %dir.display(), error = %e, "Hash slot probe failed");
        }
        ok.is_ok()
    }
}
