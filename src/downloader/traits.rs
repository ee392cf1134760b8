// Extractor trait between the downloader core and the media tool

use std::path::Path;

use tokio_util::sync::CancellationToken;

use super::errors::DownloadError;
use super::models::{DownloadOptions, FetchOutcome, MediaInfo, PlaylistInfo, ProgressEvent};

/// One fully resolved fetch
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub options: DownloadOptions,
    /// yt-dlp `-f` expression
    pub format: String,
    /// Download every (selected) playlist entry into a playlist folder
    pub playlist: bool,
}

/// Receives parsed progress while a fetch runs
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_event(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Discards progress
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_event(&self, _event: &ProgressEvent) {}
}

/// Media tool driven by the downloader. Calls block the current thread.
pub trait MediaExtractor: Send + Sync {
    /// Name of the extractor (for logging)
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool;

    /// Metadata and formats of a single video
    fn extract_info(&self, url: &str, options: &DownloadOptions) -> Result<MediaInfo, DownloadError>;

    /// `None` when the URL resolves to a single video
    fn playlist_info(
        &self,
        url: &str,
        options: &DownloadOptions,
    ) -> Result<Option<PlaylistInfo>, DownloadError>;

    /// Run the transfer. Must return [`DownloadError::Cancelled`] soon after
    /// `cancel` fires.
    fn download(
        &self,
        request: &FetchRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, DownloadError>;

    /// Export a browser's cookie jar to a Netscape cookie file
    fn export_cookies(&self, browser: &str, dest: &Path) -> Result<(), DownloadError>;
}
