//! Request and response bodies of the web API.

use std::path::{Path, PathBuf};

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::downloader::history::{serialize_ordered_counts, DownloadStats};
use crate::downloader::models::{DownloadOptions, DownloadRecord, FormatDescriptor, MediaInfo, Platform};
use crate::downloader::utils::format_bytes;

/// Envelope used by most endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatType {
    #[default]
    Video,
    Audio,
}

fn default_audio_format() -> Option<String> {
    Some("mp3".to_string())
}

fn default_sub_langs() -> Option<String> {
    Some("en,zh".to_string())
}

fn default_cookies_browser() -> Option<String> {
    Some("chrome".to_string())
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    /// "360" .. "2160", optionally with a trailing "p", or "best".
    /// Falls back to the server's default quality.
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub format_type: FormatType,
    #[serde(default = "default_audio_format")]
    pub audio_format: Option<String>,
    #[serde(default)]
    pub subtitles: bool,
    #[serde(default = "default_sub_langs")]
    pub sub_langs: Option<String>,
    #[serde(default = "default_cookies_browser")]
    pub cookies_browser: Option<String>,
    #[serde(default)]
    pub download_path: Option<String>,
}

/// "best" -> None, "720p" -> Some(720)
pub fn parse_quality(raw: &str) -> Result<Option<u32>, String> {
    let trimmed = raw.trim().trim_end_matches(['p', 'P']);
    if trimmed.eq_ignore_ascii_case("best") || trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<u32>()
        .map(Some)
        .map_err(|_| format!("Invalid quality '{}'", raw))
}

impl DownloadRequest {
    pub fn to_options(&self, default_dir: &Path, default_quality: u32) -> Result<DownloadOptions, String> {
        let quality = match &self.quality {
            Some(q) => parse_quality(q)?,
            None => Some(default_quality),
        };
        let audio_only = self.format_type == FormatType::Audio;

        let mut options = DownloadOptions {
            output_dir: self
                .download_path
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| default_dir.to_path_buf()),
            audio_only,
            quality: if audio_only { None } else { quality },
            subtitles: self.subtitles,
            cookies_browser: self
                .cookies_browser
                .clone()
                .filter(|b| !b.trim().is_empty()),
            ..Default::default()
        };
        if let Some(fmt) = self.audio_format.clone().filter(|f| !f.is_empty()) {
            options.audio_format = fmt;
        }
        if let Some(langs) = self.sub_langs.clone().filter(|l| !l.is_empty()) {
            options.sub_langs = langs;
        }
        Ok(options)
    }
}

#[derive(Debug, Deserialize)]
pub struct BrowserQuery {
    pub browser: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FormatsQuery {
    pub url: String,
    pub cookies_browser: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FormatInfo {
    pub format_id: String,
    pub ext: String,
    pub quality: String,
    pub filesize: Option<u64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub fps: Option<u32>,
    pub height: Option<u32>,
    pub width: Option<u32>,
}

impl From<&FormatDescriptor> for FormatInfo {
    fn from(f: &FormatDescriptor) -> Self {
        Self {
            format_id: f.id.clone(),
            ext: f.ext.clone(),
            quality: format!("{}p", f.height.unwrap_or(0)),
            filesize: f.file_size_bytes,
            vcodec: Some(f.codec.clone()),
            acodec: Some(f.audio_codec.clone()),
            fps: f.frame_rate.map(|fps| fps.round() as u32),
            height: f.height,
            width: f.width,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FormatListResponse {
    pub url: String,
    pub platform: String,
    pub title: String,
    pub formats: Vec<FormatInfo>,
    pub thumbnail: Option<String>,
}

impl FormatListResponse {
    /// Video formats only
    pub fn from_info(url: &str, info: &MediaInfo) -> Self {
        Self {
            url: url.to_string(),
            platform: Platform::detect(url).to_string(),
            title: info.title.clone(),
            formats: info
                .formats
                .iter()
                .filter(|f| f.has_video())
                .map(FormatInfo::from)
                .collect(),
            thumbnail: info.thumbnail.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub platform: Option<String>,
}

pub const DEFAULT_HISTORY_LIMIT: i64 = 20;
pub const MAX_HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub total: u64,
    pub records: Vec<DownloadRecord>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_downloads: u64,
    pub successful_downloads: u64,
    pub failed_downloads: u64,
    pub success_rate: f64,
    pub total_bytes: u64,
    pub total_size_human: String,
    #[serde(serialize_with = "serialize_ordered_counts")]
    pub by_platform: Vec<(String, u64)>,
}

impl From<DownloadStats> for StatsResponse {
    fn from(stats: DownloadStats) -> Self {
        Self {
            total_downloads: stats.total,
            successful_downloads: stats.success,
            failed_downloads: stats.failed,
            success_rate: stats.success_rate(),
            total_bytes: stats.total_bytes,
            total_size_human: format_bytes(stats.total_bytes),
            by_platform: stats.by_platform,
        }
    }
}

/// Platform counts as a JSON object that keeps the store's order
#[derive(Debug, Serialize)]
pub struct PlatformCounts(#[serde(serialize_with = "serialize_ordered_counts")] pub Vec<(String, u64)>);

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: &str) -> DownloadRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_request_defaults() {
        let req = request(r#"{"url": "https://youtu.be/x"}"#);
        assert_eq!(req.format_type, FormatType::Video);
        assert_eq!(req.cookies_browser.as_deref(), Some("chrome"));

        let opts = req.to_options(Path::new("/tmp/dl"), 1080).unwrap();
        assert_eq!(opts.quality, Some(1080));
        assert_eq!(opts.sub_langs, "en,zh");
        assert_eq!(opts.output_dir, PathBuf::from("/tmp/dl"));
    }

    #[test]
    fn test_audio_request() {
        let req = request(
            r#"{"url": "u", "format_type": "audio", "audio_format": "flac", "download_path": "/music"}"#,
        );
        let opts = req.to_options(Path::new("/tmp/dl"), 1080).unwrap();
        assert!(opts.audio_only);
        assert_eq!(opts.quality, None);
        assert_eq!(opts.audio_format, "flac");
        assert_eq!(opts.output_dir, PathBuf::from("/music"));
    }

    #[test]
    fn test_quality_parsing() {
        assert_eq!(parse_quality("720p"), Ok(Some(720)));
        assert_eq!(parse_quality("best"), Ok(None));
        assert!(parse_quality("ultra").is_err());
    }

    #[test]
    fn test_stats_response() {
        let stats = DownloadStats {
            total: 5,
            success: 4,
            failed: 1,
            total_bytes: 1536,
            by_platform: vec![("YouTube".to_string(), 5)],
        };
        let json = serde_json::to_value(StatsResponse::from(stats)).unwrap();
        assert_eq!(json["success_rate"], 80.0);
        assert_eq!(json["total_size_human"], "1.5 KB");
        assert_eq!(json["by_platform"]["YouTube"], 5);
    }
}
