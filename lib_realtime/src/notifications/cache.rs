//! # Notification Cache
//!
//! Persistence behind the notification store. The store calls `save` after
//! every mutation and `load` once at startup.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use super::store::NotificationRecord;

/// File name used under the data directory.
pub const CACHE_FILE_NAME: &str = "notifications.json";

/// Errors raised by a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem failure.
    #[error("notification cache I/O error at {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The cached file is not a valid record list.
    #[error("notification cache is corrupt: {0}")]
    Json(#[from] serde_json::Error),

    /// No platform data directory could be determined.
    #[error("no data directory available for the notification cache")]
    NoDataDir,
}

/// Storage for the notification list.
pub trait NotificationCache: Send + Sync {
    /// Returns the persisted list, newest first. A cache that was never
    /// written yields an empty list.
    fn load(&self) -> Result<Vec<NotificationRecord>, CacheError>;

    /// Replaces the persisted list.
    fn save(&self, records: &[NotificationRecord]) -> Result<(), CacheError>;
}

/// JSON file cache, written atomically through a sibling temp file.
#[derive(Debug, Clone)]
pub struct JsonFileCache {
    path: PathBuf,
}

impl JsonFileCache {
    /// Cache at an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache at `<data_dir>/<app_name>/notifications.json`.
    pub fn in_data_dir(app_name: &str) -> Result<Self, CacheError> {
        let base = dirs::data_dir().ok_or(CacheError::NoDataDir)?;
        Ok(Self::new(base.join(app_name).join(CACHE_FILE_NAME)))
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> CacheError {
        CacheError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl NotificationCache for JsonFileCache {
    fn load(&self) -> Result<Vec<NotificationRecord>, CacheError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn save(&self, records: &[NotificationRecord]) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let json = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }
}

/// In-memory cache for tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryCache {
    records: Mutex<Vec<NotificationRecord>>,
}

impl MemoryCache {
    /// Cache pre-filled with `records`.
    pub fn with_records(records: Vec<NotificationRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    /// Copy of the last saved list.
    pub fn snapshot(&self) -> Vec<NotificationRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl NotificationCache for MemoryCache {
    fn load(&self) -> Result<Vec<NotificationRecord>, CacheError> {
        Ok(self.snapshot())
    }

    fn save(&self, records: &[NotificationRecord]) -> Result<(), CacheError> {
        *self.records.lock().unwrap_or_else(PoisonError::into_inner) = records.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NotificationLevel;

    fn record(title: &str) -> NotificationRecord {
        NotificationRecord {
            id: format!("id-{title}"),
            title: title.to_string(),
            message: "m".to_string(),
            level: NotificationLevel::Warning,
            action_url: None,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            read: false,
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path().join("nested").join(CACHE_FILE_NAME));
        assert!(cache.load().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_preserves_order_and_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path().join("app").join(CACHE_FILE_NAME));
        cache.save(&[record("b"), record("a")]).unwrap();

        let loaded = cache.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].title, "b");
        assert_eq!(loaded[1].level, NotificationLevel::Warning);
        assert!(!cache.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CACHE_FILE_NAME);
        fs::write(&path, "{not a list").unwrap();
        assert!(matches!(JsonFileCache::new(path).load(), Err(CacheError::Json(_))));
    }
}
