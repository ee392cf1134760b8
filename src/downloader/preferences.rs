// User preferences persisted across runs
//
// Stored as pretty JSON at ~/.yt-dlp-preferences.json. A missing or corrupt
// file yields defaults; save failures are logged and ignored by callers.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;

use super::errors::StorageError;

/// Default size above which a selected format needs confirmation (2 GiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

const FORMAT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatHistoryEntry {
    pub format_id: String,
    pub quality: Option<u32>,
    pub filesize: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreference {
    /// Remembered video height, seeded by the first smart selection
    #[serde(rename = "preferred_quality")]
    pub preferred_height: Option<u32>,
    pub preferred_codecs: Vec<String>,
    #[serde(rename = "max_file_size")]
    pub max_file_size_bytes: u64,
    pub download_count: u64,
    pub format_history: Vec<FormatHistoryEntry>,
}

impl Default for UserPreference {
    fn default() -> Self {
        Self {
            preferred_height: None,
            preferred_codecs: vec!["h264".to_string(), "avc1".to_string()],
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE,
            download_count: 0,
            format_history: Vec::new(),
        }
    }
}

impl UserPreference {
    /// Count a finished download and keep the last 20 chosen formats.
    pub fn record_download(&mut self, format_id: &str, quality: Option<u32>, filesize: u64) {
        self.download_count += 1;
        self.format_history.push(FormatHistoryEntry {
            format_id: format_id.to_string(),
            quality,
            filesize,
            timestamp: OffsetDateTime::now_utc(),
        });
        if self.format_history.len() > FORMAT_HISTORY_LIMIT {
            let excess = self.format_history.len() - FORMAT_HISTORY_LIMIT;
            self.format_history.drain(..excess);
        }
    }
}

/// JSON file backing [`UserPreference`]
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
    max_file_size_bytes: u64,
}

impl PreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE,
        }
    }

    /// Size limit given to preferences created by this store
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size_bytes = bytes;
        self
    }

    fn fresh(&self) -> UserPreference {
        UserPreference {
            max_file_size_bytes: self.max_file_size_bytes,
            ..UserPreference::default()
        }
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".yt-dlp-preferences.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> UserPreference {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(_) => return self.fresh(),
        };

        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Ignoring unreadable preferences file");
            self.fresh()
        })
    }

    pub fn save(&self, prefs: &UserPreference) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(prefs)?)?;
        Ok(())
    }

    /// Save, logging instead of failing.
    pub fn save_best_effort(&self, prefs: &UserPreference) {
        if let Err(e) = self.save(prefs) {
            warn!(path = %self.path.display(), error = %e, "Could not save preferences");
        }
    }
}
