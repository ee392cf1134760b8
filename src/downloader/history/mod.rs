//! Download history and aggregate statistics.
//!
//! Two interchangeable backends implement [`HistoryStore`]:
//! - [`SqliteHistoryStore`]: `downloads` table in `~/.yt-dlp-history.db`
//! - [`JsonHistoryStore`]: `{"downloads": [...]}` in `~/.yt-dlp-downloads.json`
//!
//! Records are append-only; they disappear only through `clear`, `delete`
//! or `clear_older_than` (`bingo --prune-history`).

mod json;
mod sqlite;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::warn;

use super::errors::StorageError;
use super::models::{DownloadRecord, NewDownloadRecord};

pub use json::JsonHistoryStore;
pub use sqlite::SqliteHistoryStore;

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append an entry, returning its id
    async fn record(&self, entry: NewDownloadRecord) -> Result<i64, StorageError>;

    /// Newest first. `platform` matches case-insensitively.
    async fn recent(
        &self,
        limit: usize,
        platform: Option<&str>,
    ) -> Result<Vec<DownloadRecord>, StorageError>;

    async fn total_count(&self) -> Result<u64, StorageError>;

    async fn statistics(&self) -> Result<DownloadStats, StorageError>;

    /// Remove everything, returning the number of removed rows
    async fn clear(&self) -> Result<u64, StorageError>;

    /// `false` when no record had this id
    async fn delete(&self, id: i64) -> Result<bool, StorageError>;

    async fn clear_older_than(&self, days: u32) -> Result<u64, StorageError>;
}

/// Record without letting a storage failure reach the caller.
pub async fn record_best_effort(store: &dyn HistoryStore, entry: NewDownloadRecord) {
    let url = entry.url.clone();
    if let Err(e) = store.record(entry).await {
        warn!(url = %url, error = %e, "Could not save to history");
    }
}

/// Aggregates over the whole history
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DownloadStats {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    /// Sum of sizes of successful downloads
    pub total_bytes: u64,
    /// Platform counts, largest first
    #[serde(serialize_with = "serialize_ordered_counts")]
    pub by_platform: Vec<(String, u64)>,
}

impl DownloadStats {
    /// Percentage with one decimal, 0 when empty
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let rate = self.success as f64 / self.total as f64 * 100.0;
        (rate * 10.0).round() / 10.0
    }

    /// "80.0%", or "0%" for an empty history
    pub fn success_rate_label(&self) -> String {
        if self.total == 0 {
            return "0%".to_string();
        }
        format!("{:.1}%", self.success as f64 / self.total as f64 * 100.0)
    }

    fn from_records<'a>(records: impl IntoIterator<Item = &'a DownloadRecord>) -> Self {
        let mut stats = Self::default();
        for r in records {
            stats.total += 1;
            if r.success {
                stats.success += 1;
                stats.total_bytes += r.file_size_bytes;
            } else {
                stats.failed += 1;
            }
            add_platform_count(&mut stats.by_platform, &r.platform, 1);
        }
        sort_platform_counts(&mut stats.by_platform);
        stats
    }
}

/// Records saved without a platform are counted as "Unknown"
fn add_platform_count(counts: &mut Vec<(String, u64)>, platform: &str, n: u64) {
    let platform = match platform.trim() {
        "" => "Unknown",
        p => p,
    };
    match counts.iter_mut().find(|(p, _)| p == platform) {
        Some((_, count)) => *count += n,
        None => counts.push((platform.to_string(), n)),
    }
}

fn sort_platform_counts(counts: &mut [(String, u64)]) {
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
}

/// Ordered JSON object instead of an array of pairs
pub fn serialize_ordered_counts<S>(counts: &[(String, u64)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(counts.len()))?;
    for (platform, count) in counts {
        map.serialize_entry(platform, count)?;
    }
    map.end()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryBackend {
    #[default]
    Sqlite,
    Json,
}

impl HistoryBackend {
    pub fn default_path(&self) -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        match self {
            Self::Sqlite => home.join(".yt-dlp-history.db"),
            Self::Json => home.join(".yt-dlp-downloads.json"),
        }
    }
}

impl FromStr for HistoryBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" | "db" => Ok(Self::Sqlite),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown history backend '{}'", other)),
        }
    }
}

/// Open the configured backend at `path`
pub async fn open_store(
    backend: HistoryBackend,
    path: &Path,
) -> Result<Arc<dyn HistoryStore>, StorageError> {
    Ok(match backend {
        HistoryBackend::Sqlite => Arc::new(SqliteHistoryStore::open(path).await?),
        HistoryBackend::Json => Arc::new(JsonHistoryStore::new(path)),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn entry(url: &str, platform: &str, success: bool, size: u64) -> NewDownloadRecord {
        NewDownloadRecord {
            url: url.to_string(),
            platform: platform.to_string(),
            title: format!("title of {}", url),
            quality: "1080".to_string(),
            file_size_bytes: size,
            success,
            path: "/tmp/out".to_string(),
        }
    }

    /// 4 of 5 successful, 3 on YouTube
    pub async fn seed(store: &dyn HistoryStore) {
        store.record(entry("https://youtu.be/1", "YouTube", true, 100)).await.unwrap();
        store.record(entry("https://youtu.be/2", "YouTube", true, 200)).await.unwrap();
        store.record(entry("https://youtu.be/3", "YouTube", false, 999)).await.unwrap();
        store.record(entry("https://bilibili.com/4", "Bilibili", true, 300)).await.unwrap();
        store.record(entry("https://vimeo.com/5", "Vimeo", true, 400)).await.unwrap();
    }

    /// Blank and "Unknown" platforms share one bucket on every backend
    pub async fn check_blank_platform_is_unknown(store: &dyn HistoryStore) {
        store.record(entry("https://a.example/1", "", true, 1)).await.unwrap();
        store.record(entry("https://a.example/2", "Unknown", false, 0)).await.unwrap();
        store.record(entry("https://youtu.be/3", "YouTube", true, 1)).await.unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(
            stats.by_platform,
            vec![("Unknown".to_string(), 2), ("YouTube".to_string(), 1)]
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate_formatting() {
        let stats = DownloadStats {
            total: 5,
            success: 4,
            failed: 1,
            ..Default::default()
        };
        assert_eq!(stats.success_rate_label(), "80.0%");
        assert_eq!(stats.success_rate(), 80.0);
        assert_eq!(DownloadStats::default().success_rate_label(), "0%");
    }

    #[test]
    fn test_by_platform_serializes_as_ordered_object() {
        let stats = DownloadStats {
            by_platform: vec![("YouTube".to_string(), 3), ("Bilibili".to_string(), 1)],
            ..Default::default()
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains(r#""by_platform":{"YouTube":3,"Bilibili":1}"#));
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("SQLite".parse::<HistoryBackend>(), Ok(HistoryBackend::Sqlite));
        assert_eq!("json".parse::<HistoryBackend>(), Ok(HistoryBackend::Json));
        assert!("redis".parse::<HistoryBackend>().is_err());
    }
}
