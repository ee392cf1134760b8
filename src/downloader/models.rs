// Common data models for downloader

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

/// Video platforms recognised from the URL host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    YouTube,
    Bilibili,
    #[serde(rename = "Twitter/X")]
    Twitter,
    TikTok,
    Vimeo,
    Twitch,
    Unknown,
}

impl Platform {
    const PATTERNS: [(Platform, &'static [&'static str]); 6] = [
        (Platform::YouTube, &["youtube.com", "youtu.be"]),
        (Platform::Bilibili, &["bilibili.com"]),
        (Platform::Twitter, &["twitter.com", "x.com"]),
        (Platform::TikTok, &["tiktok.com", "douyin.com"]),
        (Platform::Vimeo, &["vimeo.com"]),
        (Platform::Twitch, &["twitch.tv"]),
    ];

    /// Platform whose domain is the URL's host or a parent of it.
    ///
    /// URLs without a scheme are read as `https://`.
    pub fn detect(url: &str) -> Self {
        let Some(host) = url_host(url) else {
            return Platform::Unknown;
        };
        Self::PATTERNS
            .iter()
            .find(|(_, domains)| domains.iter().any(|d| host_matches(&host, d)))
            .map(|(platform, _)| *platform)
            .unwrap_or(Platform::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YouTube => "YouTube",
            Self::Bilibili => "Bilibili",
            Self::Twitter => "Twitter/X",
            Self::TikTok => "TikTok",
            Self::Vimeo => "Vimeo",
            Self::Twitch => "Twitch",
            Self::Unknown => "Unknown",
        }
    }
}

fn url_host(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let parsed = Url::parse(raw)
        .ok()
        .filter(|u| u.host_str().is_some())
        .or_else(|| Url::parse(&format!("https://{}", raw)).ok())?;
    parsed.host_str().map(|h| h.trim_end_matches('.').to_lowercase())
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DynamicRange {
    Sdr,
    Hdr,
}

/// One downloadable stream as reported by the extractor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub id: String,
    pub ext: String,
    pub height: Option<u32>,
    pub width: Option<u32>,
    /// Video codec, `"none"` for audio-only streams
    pub codec: String,
    /// Audio codec, `"none"` for video-only streams
    pub audio_codec: String,
    pub frame_rate: Option<f64>,
    /// Total bitrate in kbps
    pub bitrate: Option<f64>,
    /// Audio bitrate in kbps
    pub audio_bitrate: Option<f64>,
    /// Audio sample rate in Hz
    pub sample_rate: Option<u32>,
    /// Exact size, falling back to the extractor's estimate
    pub file_size_bytes: Option<u64>,
    pub dynamic_range: Option<DynamicRange>,
    pub format_note: Option<String>,
}

impl FormatDescriptor {
    pub fn has_video(&self) -> bool {
        !self.codec.is_empty() && self.codec != "none"
    }

    pub fn has_audio(&self) -> bool {
        !self.audio_codec.is_empty() && self.audio_codec != "none"
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio() && !self.has_video()
    }

    pub fn is_hdr(&self) -> bool {
        self.dynamic_range == Some(DynamicRange::Hdr)
    }

    /// e.g. "1080p"
    pub fn quality_label(&self) -> String {
        format!("{}p", self.height.unwrap_or(0))
    }
}

/// Metadata of a single video
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub id: String,
    pub title: String,
    pub uploader: String,
    pub duration_seconds: u64,
    pub thumbnail: Option<String>,
    pub webpage_url: String,
    /// Size of the default merged format when the extractor reports one
    pub filesize: Option<u64>,
    pub formats: Vec<FormatDescriptor>,
}

/// Flat playlist probe result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistInfo {
    pub id: String,
    pub title: String,
    pub uploader: String,
    pub count: usize,
}

/// Everything needed to build one yt-dlp invocation
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub output_dir: PathBuf,
    pub audio_only: bool,
    pub audio_format: String,
    pub audio_quality: String,
    /// Max video height
    pub quality: Option<u32>,
    pub format_id: Option<String>,
    pub subtitles: bool,
    pub sub_langs: String,
    pub write_thumbnail: bool,
    pub cookies_browser: Option<String>,
    /// Netscape cookie file, takes precedence over `cookies_browser`
    pub cookies_file: Option<PathBuf>,
    pub smart_format: bool,
    pub playlist_items: Option<String>,
    pub proxy: Option<String>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            output_dir: default_download_dir(),
            audio_only: false,
            audio_format: "mp3".to_string(),
            audio_quality: "192".to_string(),
            quality: None,
            format_id: None,
            subtitles: false,
            sub_langs: "all".to_string(),
            write_thumbnail: false,
            cookies_browser: None,
            cookies_file: None,
            smart_format: false,
            playlist_items: None,
            proxy: None,
        }
    }
}

/// ~/Downloads/yt-dlp
pub fn default_download_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Downloads")
        .join("yt-dlp")
}

/// Parsed line of yt-dlp output
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A file transfer started
    Destination(String),
    Downloading {
        percent: f64,
        total_bytes: Option<u64>,
        speed: Option<String>,
        eta: Option<String>,
    },
    /// Post-processing (merging, audio extraction)
    Processing(String),
    AlreadyDownloaded(String),
}

/// Lifecycle of a web download task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Downloading,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Progress snapshot exposed by the web API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub task_id: String,
    pub status: TaskStatus,
    /// 0 to 100
    pub progress: f64,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub filename: Option<String>,
    pub error: Option<String>,
}

impl DownloadProgress {
    pub fn pending(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            progress: 0.0,
            downloaded_bytes: 0,
            total_bytes: None,
            speed: None,
            eta: None,
            filename: None,
            error: None,
        }
    }

    /// Fold a parsed yt-dlp event into this snapshot
    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Destination(name) => {
                self.status = TaskStatus::Downloading;
                self.filename = Some(name.clone());
            }
            ProgressEvent::Downloading {
                percent,
                total_bytes,
                speed,
                eta,
            } => {
                self.status = TaskStatus::Downloading;
                self.progress = percent.clamp(0.0, 100.0);
                self.total_bytes = *total_bytes;
                if let Some(total) = total_bytes {
                    self.downloaded_bytes = (*total as f64 * self.progress / 100.0) as u64;
                }
                self.speed = speed.clone();
                self.eta = eta.clone();
            }
            ProgressEvent::Processing(_) => {
                self.status = TaskStatus::Processing;
            }
            ProgressEvent::AlreadyDownloaded(name) => {
                self.progress = 100.0;
                self.filename = Some(name.clone());
            }
        }
    }
}

/// Result of a finished fetch
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Last file yt-dlp reported writing
    pub filename: Option<String>,
}

/// Row of the download history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: i64,
    pub url: String,
    pub platform: String,
    pub title: String,
    pub quality: String,
    #[serde(rename = "filesize")]
    pub file_size_bytes: u64,
    pub success: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(rename = "download_path")]
    pub path: String,
}

/// History entry before the store assigns id and timestamp
#[derive(Debug, Clone, Default)]
pub struct NewDownloadRecord {
    pub url: String,
    pub platform: String,
    pub title: String,
    pub quality: String,
    pub file_size_bytes: u64,
    pub success: bool,
    pub path: String,
}
