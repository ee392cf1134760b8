// Named option bundles stored as ~/.yt-dlp-presets/<name>.json

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::errors::StorageError;
use super::models::DownloadOptions;

/// Options a preset can set. Unset fields leave the command line untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitles: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_thumbnail: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies_browser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smart_format: Option<bool>,
}

impl Preset {
    pub fn apply_to(&self, options: &mut DownloadOptions) {
        if let Some(v) = self.audio_only {
            options.audio_only = v;
        }
        if let Some(q) = self.quality {
            options.quality = Some(q);
        }
        if let Some(v) = self.subtitles {
            options.subtitles = v;
        }
        if let Some(v) = self.write_thumbnail {
            options.write_thumbnail = v;
        }
        if let Some(b) = &self.cookies_browser {
            options.cookies_browser = Some(b.clone());
        }
        if let Some(v) = self.smart_format {
            options.smart_format = v;
        }
    }

    /// "quality=1080, subtitles=true", skipping unset and false values
    pub fn settings_summary(&self) -> String {
        let mut parts = Vec::new();
        let flag = |parts: &mut Vec<String>, name: &str, v: Option<bool>| {
            if v == Some(true) {
                parts.push(format!("{}=true", name));
            }
        };

        flag(&mut parts, "audio_only", self.audio_only);
        if let Some(q) = self.quality {
            parts.push(format!("quality={}", q));
        }
        flag(&mut parts, "subtitles", self.subtitles);
        flag(&mut parts, "write_thumbnail", self.write_thumbnail);
        if let Some(b) = &self.cookies_browser {
            parts.push(format!("cookies_browser={}", b));
        }
        flag(&mut parts, "smart_format", self.smart_format);

        parts.join(", ")
    }

    /// Keep only values that were actually switched on.
    pub fn from_options(description: String, options: &DownloadOptions) -> Self {
        let on = |v: bool| v.then_some(true);
        Self {
            description,
            audio_only: on(options.audio_only),
            quality: options.quality,
            subtitles: on(options.subtitles),
            write_thumbnail: on(options.write_thumbnail),
            cookies_browser: options.cookies_browser.clone(),
            smart_format: on(options.smart_format),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedPreset {
    pub name: String,
    pub preset: Preset,
}

/// Directory of preset files
#[derive(Debug, Clone)]
pub struct PresetStore {
    dir: PathBuf,
}

impl PresetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".yt-dlp-presets")
    }

    fn file_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\']);
        if !valid {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }

    pub fn save(&self, name: &str, preset: &Preset) -> Result<(), StorageError> {
        let path = self.file_for(name)?;
        fs::create_dir_all(&self.dir)?;
        fs::write(&path, serde_json::to_string_pretty(preset)?)?;
        debug!(name, path = %path.display(), "Saved preset");
        Ok(())
    }

    /// `None` when the file is missing or unreadable.
    pub fn load(&self, name: &str) -> Result<Option<Preset>, StorageError> {
        let path = self.file_for(name)?;
        let Ok(text) = fs::read_to_string(&path) else {
            return Ok(None);
        };
        match serde_json::from_str(&text) {
            Ok(preset) => Ok(Some(preset)),
            Err(e) => {
                warn!(name, error = %e, "Ignoring unreadable preset");
                Ok(None)
            }
        }
    }

    /// All readable presets, sorted by name
    pub fn list(&self) -> Result<Vec<NamedPreset>, StorageError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut presets = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(Some(preset)) = self.load(name) {
                presets.push(NamedPreset {
                    name: name.to_string(),
                    preset,
                });
            }
        }

        presets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(presets)
    }

    pub fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.file_for(name)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the built-in presets that do not exist yet.
    pub fn create_default_presets(&self) -> Result<(), StorageError> {
        for (name, preset) in default_presets() {
            if self.load(name)?.is_none() {
                self.save(name, &preset)?;
            }
        }
        Ok(())
    }
}

fn default_presets() -> Vec<(&'static str, Preset)> {
    vec![
        (
            "high-quality",
            Preset {
                description: "High quality video (1080p, with subtitles)".to_string(),
                quality: Some(1080),
                subtitles: Some(true),
                write_thumbnail: Some(true),
                ..Default::default()
            },
        ),
        (
            "fast",
            Preset {
                description: "Fast download (720p, no subtitles)".to_string(),
                quality: Some(720),
                subtitles: Some(false),
                write_thumbnail: Some(false),
                ..Default::default()
            },
        ),
        (
            "audio-only",
            Preset {
                description: "Audio only (high quality MP3)".to_string(),
                audio_only: Some(true),
                subtitles: Some(false),
                write_thumbnail: Some(false),
                ..Default::default()
            },
        ),
        (
            "best",
            Preset {
                description: "Best quality (no limit)".to_string(),
                subtitles: Some(true),
                write_thumbnail: Some(true),
                ..Default::default()
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_presets_created_once() {
        let dir = tempdir().unwrap();
        let store = PresetStore::new(dir.path());

        store.create_default_presets().unwrap();
        let names: Vec<String> = store.list().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["audio-only", "best", "fast", "high-quality"]);

        // A user edit survives a second call
        let custom = Preset {
            description: "mine".to_string(),
            quality: Some(480),
            ..Default::default()
        };
        store.save("fast", &custom).unwrap();
        store.create_default_presets().unwrap();
        assert_eq!(store.load("fast").unwrap(), Some(custom));
    }

    #[test]
    fn test_saved_preset_drops_unset_values() {
        let dir = tempdir().unwrap();
        let store = PresetStore::new(dir.path());

        let opts = DownloadOptions {
            audio_only: true,
            ..Default::default()
        };
        store
            .save("podcast", &Preset::from_options("Preset: podcast".to_string(), &opts))
            .unwrap();

        let raw = fs::read_to_string(dir.path().join("podcast.json")).unwrap();
        assert!(raw.contains("audio_only"));
        assert!(!raw.contains("subtitles"));
        assert!(!raw.contains("quality"));
    }

    #[test]
    fn test_apply_and_summary() {
        let preset = Preset {
            quality: Some(1080),
            subtitles: Some(true),
            write_thumbnail: Some(false),
            ..Default::default()
        };
        let mut opts = DownloadOptions::default();
        preset.apply_to(&mut opts);
        assert_eq!(opts.quality, Some(1080));
        assert!(opts.subtitles);
        assert_eq!(preset.settings_summary(), "quality=1080, subtitles=true");
    }

    #[test]
    fn test_delete_and_invalid_names() {
        let dir = tempdir().unwrap();
        let store = PresetStore::new(dir.path());
        store.save("tmp", &Preset::default()).unwrap();

        assert!(store.delete("tmp").unwrap());
        assert!(!store.delete("tmp").unwrap());
        assert!(store.load("tmp").unwrap().is_none());
        assert!(matches!(
            store.save("../escape", &Preset::default()),
            Err(StorageError::InvalidName(_))
        ));
    }
}
