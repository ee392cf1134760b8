// yt-dlp process driver
//
// Spawns the `yt-dlp` binary for metadata (`--dump-json`), flat playlist
// probes and downloads. Download progress is read line by line from stdout
// (`--newline`) while stderr is collected on a separate thread.

use std::ffi::OsStr;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command as StdCommand, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::downloader::models::{
    DownloadOptions, DynamicRange, FetchOutcome, FormatDescriptor, MediaInfo, PlaylistInfo,
    ProgressEvent,
};
use crate::downloader::traits::{FetchRequest, MediaExtractor, ProgressSink};
use crate::downloader::utils::spawn_error;
use crate::downloader::DownloadError;

/// Output template for single videos
pub const SINGLE_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Output template for playlist entries
pub const PLAYLIST_TEMPLATE: &str = "%(playlist_title)s/%(playlist_index)s - %(title)s.%(ext)s";

const DEFAULT_SOCKET_TIMEOUT: u32 = 30;

const CANCEL_POLL: Duration = Duration::from_millis(200);

lazy_static::lazy_static! {
    // [download]  12.5% of ~ 310.04MiB at  374.36KiB/s ETA 11:59 (frag 56/454)
    static ref PROGRESS_RE: Regex = Regex::new(
        r"\[download\]\s+(\d+(?:\.\d+)?)%\s+of\s+~?\s*(\d+(?:\.\d+)?\s*[KMGT]?i?B)(?:\s+at\s+(\S+/s|Unknown speed))?(?:\s+ETA\s+(\S+))?"
    ).unwrap();
    static ref DEST_RE: Regex = Regex::new(r"\[download\]\s+Destination:\s+(.+)").unwrap();
    static ref MERGE_RE: Regex = Regex::new(r#"\[Merger\]\s+Merging formats into\s+"?([^"]+)"?"#).unwrap();
    static ref POSTPROCESS_RE: Regex = Regex::new(r"^\[(ExtractAudio|FFmpeg\w*|EmbedSubtitle|ThumbnailsConvertor|Metadata)\]\s+(.*)").unwrap();
    static ref ALREADY_RE: Regex = Regex::new(r"\[download\]\s+(.+) has already been downloaded").unwrap();
    static ref SIZE_RE: Regex = Regex::new(r"^(\d+(?:\.\d+)?)\s*([KMGT]?)(i?)B$").unwrap();
}

/// Parse one line of yt-dlp stdout
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    if let Some(caps) = PROGRESS_RE.captures(line) {
        let percent: f64 = caps.get(1)?.as_str().parse().ok()?;
        let total_bytes = caps.get(2).and_then(|m| parse_size(m.as_str()));
        let speed = caps
            .get(3)
            .map(|m| m.as_str().to_string())
            .filter(|s| s != "Unknown speed");
        let eta = caps
            .get(4)
            .map(|m| m.as_str().to_string())
            .filter(|s| s != "Unknown");
        return Some(ProgressEvent::Downloading {
            percent,
            total_bytes,
            speed,
            eta,
        });
    }

    if let Some(caps) = DEST_RE.captures(line) {
        return Some(ProgressEvent::Destination(caps.get(1)?.as_str().trim().to_string()));
    }

    if let Some(caps) = MERGE_RE.captures(line) {
        return Some(ProgressEvent::Processing(caps.get(1)?.as_str().trim().to_string()));
    }

    if let Some(caps) = ALREADY_RE.captures(line) {
        return Some(ProgressEvent::AlreadyDownloaded(caps.get(1)?.as_str().trim().to_string()));
    }

    if let Some(caps) = POSTPROCESS_RE.captures(line) {
        return Some(ProgressEvent::Processing(caps.get(2)?.as_str().trim().to_string()));
    }

    None
}

/// "343.72MiB" -> bytes
pub fn parse_size(text: &str) -> Option<u64> {
    let caps = SIZE_RE.captures(text.trim())?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let binary = !caps.get(3)?.as_str().is_empty();
    let base: f64 = if binary { 1024.0 } else { 1000.0 };
    let exp = match caps.get(2)?.as_str() {
        "" => 0,
        "K" => 1,
        "M" => 2,
        "G" => 3,
        "T" => 4,
        _ => return None,
    };
    Some((value * base.powi(exp)).round() as u64)
}

/// Install locations checked after `PATH`
const FALLBACK_DIRS: &[&str] = &["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin"];

/// First regular file called `name` in `search_path`, then in [`FALLBACK_DIRS`]
fn locate_program(name: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    search_path
        .map(|p| std::env::split_paths(p).collect::<Vec<_>>())
        .unwrap_or_default()
        .into_iter()
        .chain(FALLBACK_DIRS.iter().map(PathBuf::from))
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

fn default_program() -> String {
    locate_program("yt-dlp", std::env::var_os("PATH").as_deref())
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "yt-dlp".to_string())
}

/// [`MediaExtractor`] backed by the `yt-dlp` binary
pub struct YtDlpExtractor {
    program: String,
    socket_timeout: u32,
}

impl YtDlpExtractor {
    /// Use `program` if given, otherwise search the usual install locations.
    pub fn new(program: Option<String>) -> Self {
        Self {
            program: program.unwrap_or_else(default_program),
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn network_args(&self, options: &DownloadOptions, args: &mut Vec<String>) {
        args.push("--socket-timeout".to_string());
        args.push(self.socket_timeout.to_string());

        if let Some(file) = &options.cookies_file {
            args.push("--cookies".to_string());
            args.push(file.to_string_lossy().to_string());
        } else if let Some(browser) = &options.cookies_browser {
            args.push("--cookies-from-browser".to_string());
            args.push(browser.clone());
        }

        if let Some(proxy) = &options.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }
    }

    /// Arguments for a download, URL last
    pub fn build_fetch_args(&self, request: &FetchRequest) -> Vec<String> {
        let opts = &request.options;
        let template = if request.playlist {
            PLAYLIST_TEMPLATE
        } else {
            SINGLE_TEMPLATE
        };

        let mut args = vec![
            "--newline".to_string(),
            "--no-colors".to_string(),
            "-o".to_string(),
            opts.output_dir.join(template).to_string_lossy().to_string(),
            "-f".to_string(),
            request.format.clone(),
        ];

        if request.playlist {
            args.push("--yes-playlist".to_string());
            if let Some(items) = &opts.playlist_items {
                args.push("--playlist-items".to_string());
                args.push(items.clone());
            }
        } else {
            args.push("--no-playlist".to_string());
        }

        if opts.audio_only {
            args.extend([
                "-x".to_string(),
                "--audio-format".to_string(),
                opts.audio_format.clone(),
                "--audio-quality".to_string(),
                opts.audio_quality.clone(),
            ]);
        }

        if opts.subtitles {
            args.extend([
                "--write-subs".to_string(),
                "--write-auto-subs".to_string(),
                "--sub-langs".to_string(),
                opts.sub_langs.clone(),
                "--embed-subs".to_string(),
            ]);
        }

        if opts.write_thumbnail {
            args.extend([
                "--write-thumbnail".to_string(),
                "--convert-thumbnails".to_string(),
                "png".to_string(),
            ]);
        }

        self.network_args(opts, &mut args);
        args.push(request.url.clone());
        args
    }

    fn run_json(&self, args: Vec<String>) -> Result<serde_json::Value, DownloadError> {
        debug!(program = %self.program, args = %args.join(" "), "Running yt-dlp");
        let output = StdCommand::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_error(&self.program, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(DownloadError::from(stderr));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| DownloadError::ParseError(format!("Invalid JSON: {}", e)))
    }
}

/// Map the `--dump-json` document of one video
pub fn parse_media_info(json: &serde_json::Value) -> Result<MediaInfo, DownloadError> {
    let formats_array = json["formats"]
        .as_array()
        .ok_or_else(|| DownloadError::ParseError("No formats array in JSON".to_string()))?;

    let formats = formats_array.iter().map(parse_format).collect();

    Ok(MediaInfo {
        id: json["id"].as_str().unwrap_or("unknown").to_string(),
        title: json["title"].as_str().unwrap_or("Unknown").to_string(),
        uploader: json["uploader"].as_str().unwrap_or("Unknown").to_string(),
        duration_seconds: json["duration"].as_f64().unwrap_or(0.0) as u64,
        thumbnail: json["thumbnail"].as_str().map(|s| s.to_string()),
        webpage_url: json["webpage_url"].as_str().unwrap_or("").to_string(),
        filesize: json["filesize"].as_u64().or_else(|| json["filesize_approx"].as_u64()),
        formats,
    })
}

fn parse_format(f: &serde_json::Value) -> FormatDescriptor {
    let dynamic_range = f["dynamic_range"].as_str().map(|r| {
        if r.eq_ignore_ascii_case("SDR") {
            DynamicRange::Sdr
        } else {
            DynamicRange::Hdr
        }
    });

    FormatDescriptor {
        id: f["format_id"].as_str().unwrap_or("").to_string(),
        ext: f["ext"].as_str().unwrap_or("").to_string(),
        height: f["height"].as_u64().map(|h| h as u32),
        width: f["width"].as_u64().map(|w| w as u32),
        codec: f["vcodec"].as_str().unwrap_or("none").to_string(),
        audio_codec: f["acodec"].as_str().unwrap_or("none").to_string(),
        frame_rate: f["fps"].as_f64(),
        bitrate: f["tbr"].as_f64(),
        audio_bitrate: f["abr"].as_f64(),
        sample_rate: f["asr"].as_u64().map(|a| a as u32),
        file_size_bytes: f["filesize"].as_u64().or_else(|| f["filesize_approx"].as_u64()),
        dynamic_range,
        format_note: f["format_note"].as_str().map(|s| s.to_string()),
    }
}

/// Map a `--flat-playlist --dump-single-json` document
pub fn parse_playlist(json: &serde_json::Value) -> Option<PlaylistInfo> {
    let entries = json["entries"].as_array()?;
    Some(PlaylistInfo {
        id: json["id"].as_str().unwrap_or("").to_string(),
        title: json["title"].as_str().unwrap_or("Unknown Playlist").to_string(),
        uploader: json["uploader"].as_str().unwrap_or("Unknown").to_string(),
        count: entries.iter().filter(|e| !e.is_null()).count(),
    })
}

/// Kills the child once `cancel` fires, until dropped
struct CancelWatch {
    done: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl CancelWatch {
    fn spawn(child: Arc<Mutex<Child>>, cancel: CancellationToken) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let handle = std::thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                if cancel.is_cancelled() {
                    if let Err(e) = child.lock().kill() {
                        debug!(error = %e, "yt-dlp already exited");
                    }
                    return;
                }
                std::thread::sleep(CANCEL_POLL);
            }
        });
        Self {
            done,
            handle: Some(handle),
        }
    }
}

impl Drop for CancelWatch {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl MediaExtractor for YtDlpExtractor {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn is_available(&self) -> bool {
        match StdCommand::new(&self.program).arg("--version").output() {
            Ok(out) => out.status.success(),
            Err(_) => false,
        }
    }

    fn extract_info(&self, url: &str, options: &DownloadOptions) -> Result<MediaInfo, DownloadError> {
        let mut args = vec![
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
        ];
        self.network_args(options, &mut args);
        args.push(url.to_string());

        parse_media_info(&self.run_json(args)?)
    }

    fn playlist_info(
        &self,
        url: &str,
        options: &DownloadOptions,
    ) -> Result<Option<PlaylistInfo>, DownloadError> {
        let mut args = vec![
            "--flat-playlist".to_string(),
            "--dump-single-json".to_string(),
            "--ignore-errors".to_string(),
            "--no-warnings".to_string(),
        ];
        self.network_args(options, &mut args);
        args.push(url.to_string());

        Ok(parse_playlist(&self.run_json(args)?))
    }

    fn download(
        &self,
        request: &FetchRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, DownloadError> {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        std::fs::create_dir_all(&request.options.output_dir)?;
        let args = self.build_fetch_args(request);
        info!(url = %request.url, format = %request.format, "Starting yt-dlp");
        debug!(args = %args.join(" "), "yt-dlp arguments");

        let mut child = StdCommand::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(&self.program, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::ExecutionError("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::ExecutionError("Failed to capture stderr".to_string()))?;

        // Spawn thread to collect stderr
        let stderr_handle = std::thread::spawn(move || {
            BufReader::new(stderr)
                .lines()
                .map_while(Result::ok)
                .collect::<Vec<_>>()
                .join("\n")
        });

        let child = Arc::new(Mutex::new(child));
        let watch = CancelWatch::spawn(child.clone(), cancel.clone());

        let mut filename = None;
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if let Some(event) = parse_progress_line(&line) {
                match &event {
                    ProgressEvent::Destination(name) | ProgressEvent::AlreadyDownloaded(name) => {
                        filename = Some(name.clone());
                    }
                    ProgressEvent::Processing(target) if line.starts_with("[Merger]") => {
                        filename = Some(target.clone());
                    }
                    _ => {}
                }
                progress.on_event(&event);
            }
        }

        let status = child
            .lock()
            .wait()
            .map_err(|e| DownloadError::ExecutionError(format!("Process error: {}", e)))?;
        drop(watch);
        let stderr_output = stderr_handle.join().unwrap_or_default();

        if cancel.is_cancelled() {
            info!(url = %request.url, "Download cancelled");
            return Err(DownloadError::Cancelled);
        }

        if status.success() {
            info!(url = %request.url, file = ?filename, "Download finished");
            return Ok(FetchOutcome { filename });
        }

        let reason = stderr_output
            .lines()
            .rev()
            .find(|l| l.starts_with("ERROR"))
            .unwrap_or(stderr_output.trim())
            .to_string();
        warn!(url = %request.url, code = ?status.code(), error = %reason, "yt-dlp failed");
        Err(DownloadError::from(reason))
    }

    fn export_cookies(&self, browser: &str, dest: &Path) -> Result<(), DownloadError> {
        let dest_arg = dest.to_string_lossy().to_string();
        let args = [
            "--cookies-from-browser",
            browser,
            "--cookies",
            dest_arg.as_str(),
            "--skip-download",
            "--no-warnings",
            "--quiet",
            "https://www.youtube.com/robots.txt",
        ];

        let output = StdCommand::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_error(&self.program, e))?;

        // yt-dlp writes the jar on exit even when the probe URL fails
        let written = std::fs::metadata(dest).map(|m| m.len() > 0).unwrap_or(false);
        if written {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(DownloadError::ExecutionError(format!(
            "Could not export cookies from {}: {}",
            browser, stderr
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_progress_line() {
        let line = "[download]  12.5% of ~ 310.04MiB at  374.36KiB/s ETA 11:59 (frag 56/454)";
        match parse_progress_line(line) {
            Some(ProgressEvent::Downloading {
                percent,
                total_bytes,
                speed,
                eta,
            }) => {
                assert_eq!(percent, 12.5);
                assert_eq!(total_bytes, Some((310.04 * 1024.0 * 1024.0_f64).round() as u64));
                assert_eq!(speed.as_deref(), Some("374.36KiB/s"));
                assert_eq!(eta.as_deref(), Some("11:59"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_other_lines() {
        assert_eq!(
            parse_progress_line("[download] Destination: /tmp/a.mp4"),
            Some(ProgressEvent::Destination("/tmp/a.mp4".to_string()))
        );
        assert_eq!(
            parse_progress_line(r#"[Merger] Merging formats into "/tmp/a.mkv""#),
            Some(ProgressEvent::Processing("/tmp/a.mkv".to_string()))
        );
        assert_eq!(
            parse_progress_line("[download] /tmp/a.mp4 has already been downloaded"),
            Some(ProgressEvent::AlreadyDownloaded("/tmp/a.mp4".to_string()))
        );
        assert!(matches!(
            parse_progress_line("[ExtractAudio] Destination: /tmp/a.mp3"),
            Some(ProgressEvent::Processing(_))
        ));
        assert_eq!(parse_progress_line("[youtube] abc: Downloading webpage"), None);
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1.00KiB"), Some(1024));
        assert_eq!(parse_size("2MB"), Some(2_000_000));
        assert_eq!(parse_size("512B"), Some(512));
        assert_eq!(parse_size("fast"), None);
    }

    #[test]
    fn test_parse_media_info() {
        let json = serde_json::json!({
            "id": "abc",
            "title": "Clip",
            "duration": 61.5,
            "formats": [
                {"format_id": "137", "ext": "mp4", "height": 1080, "vcodec": "avc1.640028",
                 "acodec": "none", "fps": 30, "filesize_approx": 1000, "dynamic_range": "SDR"},
                {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2",
                 "abr": 129.5, "asr": 44100}
            ]
        });

        let info = parse_media_info(&json).unwrap();
        assert_eq!(info.title, "Clip");
        assert_eq!(info.duration_seconds, 61);
        assert_eq!(info.formats[0].file_size_bytes, Some(1000));
        assert_eq!(info.formats[0].dynamic_range, Some(DynamicRange::Sdr));
        assert!(info.formats[1].is_audio_only());
        assert_eq!(info.formats[1].sample_rate, Some(44100));

        assert!(parse_media_info(&serde_json::json!({"id": "x"})).is_err());
    }

    #[test]
    fn test_parse_playlist() {
        let json = serde_json::json!({"id": "PL1", "title": "Mix", "entries": [{}, null, {}]});
        let info = parse_playlist(&json).unwrap();
        assert_eq!(info.count, 2);
        assert!(parse_playlist(&serde_json::json!({"id": "single"})).is_none());
    }

    #[test]
    fn test_fetch_args() {
        let extractor = YtDlpExtractor::new(Some("yt-dlp".to_string()));
        let request = FetchRequest {
            url: "https://www.youtube.com/playlist?list=PL1".to_string(),
            options: DownloadOptions {
                output_dir: PathBuf::from("/tmp/out"),
                audio_only: true,
                playlist_items: Some("1-3".to_string()),
                cookies_browser: Some("firefox".to_string()),
                ..Default::default()
            },
            format: "bestaudio/best".to_string(),
            playlist: true,
        };

        let args = extractor.build_fetch_args(&request);
        let joined = args.join(" ");
        assert!(joined.contains("/tmp/out/%(playlist_title)s/%(playlist_index)s - %(title)s.%(ext)s"));
        assert!(joined.contains("--playlist-items 1-3"));
        assert!(joined.contains("-x --audio-format mp3 --audio-quality 192"));
        assert!(joined.contains("--cookies-from-browser firefox"));
        assert_eq!(args.last().map(String::as_str), Some(request.url.as_str()));
    }

    #[test]
    fn test_locate_program_searches_path_first() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("bingo-test-tool");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();

        let search = std::env::join_paths([dir.path()]).unwrap();
        assert_eq!(locate_program("bingo-test-tool", Some(search.as_os_str())), Some(tool));
        assert_eq!(locate_program("bingo-test-tool", None), None);
        assert_eq!(locate_program("bingo-test-missing", Some(search.as_os_str())), None);
    }

    #[test]
    fn test_missing_binary_is_tool_not_found() {
        let extractor = YtDlpExtractor::new(Some("/nonexistent/yt-dlp".to_string()));
        assert!(!extractor.is_available());
        let err = extractor
            .extract_info("https://youtu.be/x", &DownloadOptions::default())
            .unwrap_err();
        assert!(matches!(err, DownloadError::ToolNotFound(_)));
    }
}
