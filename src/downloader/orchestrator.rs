// Orchestrator: format selection, retry, extractor, history and preferences
//
// The extractor and the retry loop block, so `download` moves the whole
// fetch onto the blocking pool and only awaits history writes.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::errors::DownloadError;
use super::format_selector::{Selection, SmartFormatSelector};
use super::history::{record_best_effort, HistoryStore};
use super::models::{
    DownloadOptions, FetchOutcome, MediaInfo, NewDownloadRecord, Platform, PlaylistInfo,
};
use super::preferences::PreferenceStore;
use super::retry::RetryPolicy;
use super::traits::{FetchRequest, MediaExtractor, ProgressSink};
use super::utils::is_playlist_url;

/// What a finished download produced
#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    pub url: String,
    pub title: String,
    pub platform: Platform,
    pub format: String,
    pub filename: Option<String>,
    pub file_size_bytes: u64,
    pub playlist: Option<PlaylistInfo>,
}

/// Resolved fetch plus what was learned while resolving it
struct Prepared {
    request: FetchRequest,
    info: Option<MediaInfo>,
    playlist: Option<PlaylistInfo>,
    selected_height: Option<u32>,
}

#[derive(Clone)]
pub struct Downloader {
    extractor: Arc<dyn MediaExtractor>,
    history: Arc<dyn HistoryStore>,
    preferences: PreferenceStore,
    retry: RetryPolicy,
    default_cookies_browser: Option<String>,
    // Serializes read-modify-write of the preferences file
    prefs_lock: Arc<Mutex<()>>,
}

impl Downloader {
    pub fn new(
        extractor: Arc<dyn MediaExtractor>,
        history: Arc<dyn HistoryStore>,
        preferences: PreferenceStore,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            extractor,
            history,
            preferences,
            retry,
            default_cookies_browser: Some("chrome".to_string()),
            prefs_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Browser used for YouTube URLs when the caller gives no cookies
    pub fn with_default_cookies_browser(mut self, browser: Option<String>) -> Self {
        self.default_cookies_browser = browser.filter(|b| !b.is_empty());
        self
    }

    pub fn extractor(&self) -> &Arc<dyn MediaExtractor> {
        &self.extractor
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    /// Apply per-platform defaults to the caller's options
    pub fn effective_options(&self, url: &str, options: &DownloadOptions) -> DownloadOptions {
        let mut options = options.clone();
        let has_cookies = options.cookies_browser.is_some() || options.cookies_file.is_some();
        if !has_cookies && Platform::detect(url) == Platform::YouTube {
            options.cookies_browser = self.default_cookies_browser.clone();
        }
        options
    }

    /// Run smart selection against the URL's formats. Blocking.
    ///
    /// `NotFound` when the extractor cannot list formats. The probed media
    /// info comes back alongside so callers need not fetch it twice.
    pub fn select_for_url(&self, url: &str, options: &DownloadOptions) -> (Selection, Option<MediaInfo>) {
        match self.extractor.extract_info(url, options) {
            Ok(info) => (self.select_from(&info, options.audio_only), Some(info)),
            Err(e) => {
                warn!(url = %url, error = %e, "Could not list formats");
                (Selection::NotFound, None)
            }
        }
    }

    fn select_from(&self, info: &MediaInfo, audio_only: bool) -> Selection {
        let _guard = self.prefs_lock.lock();
        let mut prefs = self.preferences.load();
        let before = prefs.preferred_height;
        let selection = SmartFormatSelector::select_best_format(&info.formats, &mut prefs, audio_only);
        if prefs.preferred_height != before {
            self.preferences.save_best_effort(&prefs);
        }
        selection
    }

    fn prepare(&self, url: &str, options: &DownloadOptions) -> Result<Prepared, DownloadError> {
        let options = self.effective_options(url, options);

        let playlist = if is_playlist_url(url) {
            match self.extractor.playlist_info(url, &options) {
                Ok(p) => p,
                Err(e) => {
                    warn!(url = %url, error = %e, "Could not check playlist status");
                    None
                }
            }
        } else {
            None
        };

        let mut info = None;
        let mut selected_height = options.quality;
        let smart = options.smart_format
            && playlist.is_none()
            && options.format_id.is_none()
            && options.quality.is_none();
        let format = if smart {
            let (selection, media) = self.select_for_url(url, &options);
            info = media;
            match selection {
                Selection::Selected(id) => {
                    selected_height = info
                        .as_ref()
                        .and_then(|m| m.formats.iter().find(|f| f.id == id))
                        .and_then(|f| f.height)
                        .or(selected_height);
                    id
                }
                Selection::NeedsConfirmation {
                    format_id,
                    size_bytes,
                    limit_bytes,
                } => {
                    return Err(DownloadError::SizeConfirmationRequired {
                        format_id,
                        size_bytes,
                        limit_bytes,
                    })
                }
                Selection::NotFound => {
                    debug!(url = %url, "Smart selection unavailable, using default format");
                    SmartFormatSelector::format_spec(&options)
                }
            }
        } else {
            SmartFormatSelector::format_spec(&options)
        };

        Ok(Prepared {
            request: FetchRequest {
                url: url.to_string(),
                options,
                format,
                playlist: playlist.is_some(),
            },
            info,
            playlist,
            selected_height,
        })
    }

    /// Fetch with retry. Blocking.
    pub fn run_blocking(
        &self,
        request: &FetchRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, DownloadError> {
        self.retry
            .execute_cancellable(cancel, || self.extractor.download(request, progress, cancel))
    }

    fn fetch_blocking(
        &self,
        url: &str,
        options: &DownloadOptions,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport, DownloadError> {
        let prepared = self.prepare(url, options)?;
        let request = &prepared.request;

        let info = match (&prepared.info, &prepared.playlist) {
            (Some(info), _) => Some(info.clone()),
            (None, Some(_)) => None,
            (None, None) => self.extractor.extract_info(url, &request.options).ok(),
        };

        info!(
            url = %url,
            extractor = self.extractor.name(),
            format = %request.format,
            playlist = request.playlist,
            "Downloading"
        );
        let outcome = self.run_blocking(request, progress, cancel)?;

        let title = match (&prepared.playlist, &info) {
            (Some(p), _) => p.title.clone(),
            (None, Some(i)) => i.title.clone(),
            (None, None) => String::new(),
        };
        let file_size_bytes = info
            .as_ref()
            .and_then(|i| {
                i.formats
                    .iter()
                    .find(|f| f.id == request.format)
                    .and_then(|f| f.file_size_bytes)
                    .or(i.filesize)
            })
            .unwrap_or(0);

        {
            let _guard = self.prefs_lock.lock();
            let mut prefs = self.preferences.load();
            prefs.record_download(&request.format, prepared.selected_height, file_size_bytes);
            self.preferences.save_best_effort(&prefs);
        }

        Ok(DownloadReport {
            url: url.to_string(),
            title,
            platform: Platform::detect(url),
            format: request.format.clone(),
            filename: outcome.filename,
            file_size_bytes,
            playlist: prepared.playlist,
        })
    }

    /// Download `url` and record the outcome in history.
    ///
    /// A format awaiting size confirmation and a cancelled download are not
    /// fetch failures and leave history untouched.
    pub async fn download(
        &self,
        url: &str,
        options: DownloadOptions,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<DownloadReport, DownloadError> {
        let this = self.clone();
        let owned_url = url.to_string();
        let owned_options = options.clone();
        let result = tokio::task::spawn_blocking(move || {
            this.fetch_blocking(&owned_url, &owned_options, progress.as_ref(), &cancel)
        })
        .await
        .map_err(|e| DownloadError::Unknown(format!("Download task failed: {}", e)))?;

        if matches!(
            result,
            Err(DownloadError::SizeConfirmationRequired { .. } | DownloadError::Cancelled)
        ) {
            return result;
        }

        let quality = quality_label(&options);
        let entry = match &result {
            Ok(report) => NewDownloadRecord {
                url: url.to_string(),
                platform: report.platform.to_string(),
                title: report.title.clone(),
                quality,
                file_size_bytes: report.file_size_bytes,
                success: true,
                path: options.output_dir.to_string_lossy().to_string(),
            },
            Err(_) => NewDownloadRecord {
                url: url.to_string(),
                platform: Platform::detect(url).to_string(),
                quality,
                success: false,
                path: options.output_dir.to_string_lossy().to_string(),
                ..Default::default()
            },
        };
        record_best_effort(self.history.as_ref(), entry).await;

        result
    }
}

fn quality_label(options: &DownloadOptions) -> String {
    if options.audio_only {
        return "audio".to_string();
    }
    match (&options.format_id, options.quality) {
        (Some(id), _) => id.clone(),
        (None, Some(q)) => format!("{}p", q),
        (None, None) => "best".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::history::JsonHistoryStore;
    use crate::downloader::models::{FormatDescriptor, ProgressEvent};
    use crate::downloader::retry::Sleeper;
    use crate::downloader::traits::NoProgress;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct NoSleep;

    impl Sleeper for NoSleep {
        fn sleep(&self, _duration: Duration, _cancel: Option<&CancellationToken>) {}
    }

    #[derive(Default)]
    struct ScriptedExtractor {
        formats: Vec<FormatDescriptor>,
        results: Mutex<VecDeque<Result<FetchOutcome, DownloadError>>>,
        requests: Mutex<Vec<FetchRequest>>,
        info_fails: bool,
    }

    impl ScriptedExtractor {
        fn with_results(results: Vec<Result<FetchOutcome, DownloadError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                ..Default::default()
            }
        }
    }

    impl MediaExtractor for ScriptedExtractor {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn is_available(&self) -> bool {
            true
        }

        fn extract_info(&self, url: &str, _: &DownloadOptions) -> Result<MediaInfo, DownloadError> {
            if self.info_fails {
                return Err(DownloadError::Network("connection reset".to_string()));
            }
            Ok(MediaInfo {
                id: "vid".to_string(),
                title: format!("Title for {}", url),
                formats: self.formats.clone(),
                ..Default::default()
            })
        }

        fn playlist_info(&self, _: &str, _: &DownloadOptions) -> Result<Option<PlaylistInfo>, DownloadError> {
            Ok(Some(PlaylistInfo {
                id: "PL".to_string(),
                title: "Mix".to_string(),
                uploader: "me".to_string(),
                count: 3,
            }))
        }

        fn download(
            &self,
            request: &FetchRequest,
            progress: &dyn ProgressSink,
            _: &CancellationToken,
        ) -> Result<FetchOutcome, DownloadError> {
            self.requests.lock().push(request.clone());
            progress.on_event(&ProgressEvent::Destination("/tmp/out.mp4".to_string()));
            self.results
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(FetchOutcome::default()))
        }

        fn export_cookies(&self, _: &str, _: &Path) -> Result<(), DownloadError> {
            Ok(())
        }
    }

    fn video(id: &str, height: u32, size: u64) -> FormatDescriptor {
        FormatDescriptor {
            id: id.to_string(),
            ext: "mp4".to_string(),
            height: Some(height),
            codec: "avc1".to_string(),
            audio_codec: "none".to_string(),
            file_size_bytes: Some(size),
            ..Default::default()
        }
    }

    fn downloader(extractor: Arc<ScriptedExtractor>) -> (Downloader, TempDir) {
        let dir = tempdir().unwrap();
        let history = Arc::new(JsonHistoryStore::new(dir.path().join("history.json")));
        let prefs = PreferenceStore::new(dir.path().join("prefs.json"));
        let retry = RetryPolicy::new(3, Duration::from_secs(5), 2.0).with_sleeper(Arc::new(NoSleep));
        (Downloader::new(extractor, history, prefs, retry), dir)
    }

    fn options(dir: &TempDir) -> DownloadOptions {
        DownloadOptions {
            output_dir: dir.path().join("out"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_and_recorded() {
        let extractor = Arc::new(ScriptedExtractor::with_results(vec![
            Err(DownloadError::from("HTTP Error 503: Service Unavailable".to_string())),
            Ok(FetchOutcome {
                filename: Some("/tmp/out.mp4".to_string()),
            }),
        ]));
        let (dl, dir) = downloader(extractor.clone());

        let report = dl
            .download(
                "https://vimeo.com/1",
                options(&dir),
                Arc::new(NoProgress),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.filename.as_deref(), Some("/tmp/out.mp4"));
        assert_eq!(report.title, "Title for https://vimeo.com/1");
        assert_eq!(extractor.requests.lock().len(), 2);

        let stats = dl.history().statistics().await.unwrap();
        assert_eq!((stats.total, stats.success), (1, 1));
        assert_eq!(dl.preferences().load().download_count, 1);
    }

    #[tokio::test]
    async fn test_fatal_failure_is_recorded_once() {
        let extractor = Arc::new(ScriptedExtractor::with_results(vec![Err(
            DownloadError::from("ERROR: Unsupported URL: https://example.com".to_string()),
        )]));
        let (dl, dir) = downloader(extractor.clone());

        let err = dl
            .download(
                "https://example.com/v",
                options(&dir),
                Arc::new(NoProgress),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::InvalidUrl(_)));
        assert_eq!(extractor.requests.lock().len(), 1);
        let records = dl.history().recent(10, None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
        assert_eq!(records[0].platform, "Unknown");
    }

    #[tokio::test]
    async fn test_smart_selection_over_limit_needs_confirmation() {
        let extractor = Arc::new(ScriptedExtractor {
            formats: vec![video("huge", 2160, 3 * 1024 * 1024 * 1024)],
            ..Default::default()
        });
        let (dl, dir) = downloader(extractor.clone());

        let mut opts = options(&dir);
        opts.smart_format = true;
        let err = dl
            .download("https://vimeo.com/2", opts, Arc::new(NoProgress), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::SizeConfirmationRequired { .. }));
        assert!(extractor.requests.lock().is_empty());
        assert_eq!(dl.history().statistics().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_confirmed_format_skips_size_check() {
        let extractor = Arc::new(ScriptedExtractor {
            formats: vec![video("huge", 2160, 3 * 1024 * 1024 * 1024)],
            ..Default::default()
        });
        let (dl, dir) = downloader(extractor.clone());

        let mut opts = options(&dir);
        opts.smart_format = true;
        opts.format_id = Some("huge".to_string());
        let report = dl
            .download("https://vimeo.com/2", opts, Arc::new(NoProgress), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.format, "huge");
        let stats = dl.history().statistics().await.unwrap();
        assert_eq!((stats.total, stats.success), (1, 1));
    }

    #[tokio::test]
    async fn test_smart_selection_seeds_preferred_height() {
        let extractor = Arc::new(ScriptedExtractor {
            formats: vec![video("22", 720, 600 * 1024 * 1024), video("137", 1080, 700 * 1024 * 1024)],
            ..Default::default()
        });
        let (dl, dir) = downloader(extractor.clone());

        let mut opts = options(&dir);
        opts.smart_format = true;
        let report = dl
            .download("https://vimeo.com/3", opts, Arc::new(NoProgress), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.format, "137");
        assert_eq!(report.file_size_bytes, 700 * 1024 * 1024);
        let prefs = dl.preferences().load();
        assert_eq!(prefs.preferred_height, Some(1080));
        assert_eq!(prefs.format_history[0].quality, Some(1080));
    }

    #[tokio::test]
    async fn test_youtube_gets_default_cookies_and_playlist_template() {
        let extractor = Arc::new(ScriptedExtractor::default());
        let (dl, dir) = downloader(extractor.clone());

        dl.download(
            "https://www.youtube.com/playlist?list=PL1",
            options(&dir),
            Arc::new(NoProgress),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let requests = extractor.requests.lock();
        assert!(requests[0].playlist);
        assert_eq!(requests[0].options.cookies_browser.as_deref(), Some("chrome"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let extractor = Arc::new(ScriptedExtractor::default());
        let (dl, dir) = downloader(extractor.clone());
        let token = CancellationToken::new();
        token.cancel();

        let err = dl
            .download("https://vimeo.com/4", options(&dir), Arc::new(NoProgress), token)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Cancelled));
        assert!(extractor.requests.lock().is_empty());
        assert_eq!(dl.history().statistics().await.unwrap().total, 0);
    }

    #[test]
    fn test_select_for_url() {
        let extractor = Arc::new(ScriptedExtractor {
            formats: vec![video("22", 720, 10)],
            ..Default::default()
        });
        let (dl, _dir) = downloader(extractor);
        let (selection, info) = dl.select_for_url("https://vimeo.com/5", &DownloadOptions::default());
        assert_eq!(selection, Selection::Selected("22".to_string()));
        assert_eq!(info.unwrap().formats.len(), 1);
    }

    #[tokio::test]
    async fn test_unlistable_formats_fall_back_to_default_spec() {
        let extractor = Arc::new(ScriptedExtractor {
            info_fails: true,
            ..Default::default()
        });
        let (dl, dir) = downloader(extractor.clone());

        let (selection, info) = dl.select_for_url("https://vimeo.com/6", &DownloadOptions::default());
        assert_eq!(selection, Selection::NotFound);
        assert!(info.is_none());

        let mut opts = options(&dir);
        opts.smart_format = true;
        let report = dl
            .download("https://vimeo.com/6", opts.clone(), Arc::new(NoProgress), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.format, SmartFormatSelector::format_spec(&opts));
    }
}
