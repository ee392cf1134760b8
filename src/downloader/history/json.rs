//! JSON-file implementation of [`HistoryStore`].
//!
//! The whole file is read and rewritten on every mutation; a mutex keeps
//! read-modify-write cycles from interleaving within this process. A file
//! that does not parse reads as empty and is moved to `<name>.corrupt`
//! before the next rewrite.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::warn;

use super::{DownloadStats, HistoryStore};
use crate::downloader::errors::StorageError;
use crate::downloader::models::{DownloadRecord, NewDownloadRecord};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Default, Serialize, Deserialize)]
struct JsonDb {
    #[serde(default)]
    downloads: Vec<JsonRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonRecord {
    id: i64,
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    platform: String,
    #[serde(default)]
    quality: String,
    #[serde(default)]
    file_path: String,
    #[serde(default)]
    file_size: u64,
    success: bool,
    /// Unix milliseconds
    timestamp: i64,
}

impl From<&JsonRecord> for DownloadRecord {
    fn from(r: &JsonRecord) -> Self {
        let timestamp = OffsetDateTime::from_unix_timestamp_nanos(i128::from(r.timestamp) * 1_000_000)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        DownloadRecord {
            id: r.id,
            url: r.url.clone(),
            platform: r.platform.clone(),
            title: r.title.clone(),
            quality: r.quality.clone(),
            file_size_bytes: r.file_size,
            success: r.success,
            timestamp,
            path: r.file_path.clone(),
        }
    }
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

pub struct JsonHistoryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where an unparseable history file is moved
    pub fn corrupt_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".corrupt");
        self.path.with_file_name(name)
    }

    /// `None` when the file exists but does not parse
    async fn read(&self) -> Result<Option<JsonDb>, StorageError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Some(JsonDb::default())),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&text) {
            Ok(db) => Ok(Some(db)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "History file unreadable, treating as empty");
                Ok(None)
            }
        }
    }

    async fn load(&self) -> Result<JsonDb, StorageError> {
        Ok(self.read().await?.unwrap_or_default())
    }

    /// Load before a rewrite, moving an unreadable file aside first
    async fn load_for_update(&self) -> Result<JsonDb, StorageError> {
        if let Some(db) = self.read().await? {
            return Ok(db);
        }
        let backup = self.corrupt_path();
        tokio::fs::rename(&self.path, &backup).await?;
        warn!(
            path = %self.path.display(),
            backup = %backup.display(),
            "Moved unreadable history file aside"
        );
        Ok(JsonDb::default())
    }

    async fn save(&self, db: &JsonDb) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_string_pretty(db)?).await?;
        Ok(())
    }

    /// Rewrite the file keeping only rows that pass `keep`
    async fn retain(&self, keep: impl Fn(&JsonRecord) -> bool) -> Result<u64, StorageError> {
        let _guard = self.lock.lock().await;
        let mut db = self.load_for_update().await?;
        let before = db.downloads.len();
        db.downloads.retain(|r| keep(r));
        let removed = (before - db.downloads.len()) as u64;
        if removed > 0 {
            self.save(&db).await?;
        }
        Ok(removed)
    }
}

#[async_trait]
impl HistoryStore for JsonHistoryStore {
    async fn record(&self, entry: NewDownloadRecord) -> Result<i64, StorageError> {
        let _guard = self.lock.lock().await;
        let mut db = self.load_for_update().await?;

        let id = db.downloads.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        db.downloads.push(JsonRecord {
            id,
            url: entry.url,
            title: entry.title,
            platform: entry.platform,
            quality: entry.quality,
            file_path: entry.path,
            file_size: entry.file_size_bytes,
            success: entry.success,
            timestamp: now_millis(),
        });

        self.save(&db).await?;
        Ok(id)
    }

    async fn recent(
        &self,
        limit: usize,
        platform: Option<&str>,
    ) -> Result<Vec<DownloadRecord>, StorageError> {
        let db = self.load().await?;
        let wanted = platform.map(str::to_lowercase);

        let mut rows: Vec<&JsonRecord> = db
            .downloads
            .iter()
            .filter(|r| wanted.as_ref().map_or(true, |p| r.platform.to_lowercase() == *p))
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));

        Ok(rows.into_iter().take(limit).map(DownloadRecord::from).collect())
    }

    async fn total_count(&self) -> Result<u64, StorageError> {
        Ok(self.load().await?.downloads.len() as u64)
    }

    async fn statistics(&self) -> Result<DownloadStats, StorageError> {
        let db = self.load().await?;
        let records: Vec<DownloadRecord> = db.downloads.iter().map(DownloadRecord::from).collect();
        Ok(DownloadStats::from_records(&records))
    }

    async fn clear(&self) -> Result<u64, StorageError> {
        self.retain(|_| false).await
    }

    async fn delete(&self, id: i64) -> Result<bool, StorageError> {
        Ok(self.retain(|r| r.id != id).await? > 0)
    }

    async fn clear_older_than(&self, days: u32) -> Result<u64, StorageError> {
        let cutoff = now_millis() - i64::from(days) * MILLIS_PER_DAY;
        self.retain(|r| r.timestamp >= cutoff).await
    }
}
