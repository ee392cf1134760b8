//! Command-line front end of the `bingo` binary.
//!
//! Flags map onto [`DownloadOptions`]; the informational modes (history,
//! stats, presets, format listing) print and exit without downloading.
//! On a terminal a single download asks before fetching a whole playlist
//! or a format over the size limit; elsewhere those cases fail with a hint.

use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use time::macros::format_description;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::downloader::history::{open_store, HistoryStore};
use crate::downloader::models::{DownloadOptions, ProgressEvent};
use crate::downloader::preferences::PreferenceStore;
use crate::downloader::presets::{Preset, PresetStore};
use crate::downloader::traits::ProgressSink;
use crate::downloader::utils::{
    command_available, format_bytes, format_duration, is_playlist_url, parse_playlist_items,
    read_batch_file,
};
use crate::downloader::{DownloadError, Downloader};
use crate::ytdlp::YtDlpExtractor;

const HISTORY_ROWS: usize = 20;
const LISTED_FORMATS: usize = 20;
const DEFAULT_PLAYLIST_RANGE: &str = "1-5";

#[derive(Parser, Debug)]
#[command(name = "bingo")]
#[command(version, about = "Download videos from YouTube, Bilibili, Twitter/X and more")]
#[command(after_help = "Examples:\n  \
    bingo \"https://www.youtube.com/watch?v=xxx\"\n  \
    bingo --audio \"VIDEO_URL\"\n  \
    bingo --quality 720 --subs \"VIDEO_URL\"\n  \
    bingo --cookies chrome \"VIDEO_URL\"\n  \
    bingo --list \"VIDEO_URL\"")]
pub struct Cli {
    /// Video URL to download
    pub url: Option<String>,

    /// Download path (default: ~/Downloads/yt-dlp)
    #[arg(short = 'p', long = "path")]
    pub path: Option<PathBuf>,

    /// Extract audio only (MP3)
    #[arg(short = 'a', long = "audio")]
    pub audio: bool,

    /// Download subtitles
    #[arg(short = 's', long = "subs")]
    pub subs: bool,

    /// Max video height (720, 1080, etc.)
    #[arg(short = 'q', long = "quality", value_name = "NUM")]
    pub quality: Option<u32>,

    /// Specific format ID
    #[arg(short = 'f', long = "format", value_name = "ID")]
    pub format_id: Option<String>,

    /// List available formats
    #[arg(short = 'l', long = "list")]
    pub list: bool,

    /// Use cookies from browser (chrome, firefox, safari, etc.)
    #[arg(short = 'c', long = "cookies", value_name = "BROWSER")]
    pub cookies: Option<String>,

    /// Pick the format by score instead of yt-dlp's default
    #[arg(long)]
    pub smart: bool,

    /// Batch download from file (one URL per line)
    #[arg(short = 'b', long = "batch", value_name = "FILE")]
    pub batch: Option<PathBuf>,

    /// Download specific playlist items (e.g. "1-5,8,10-15")
    #[arg(long = "playlist-items", value_name = "RANGE", value_parser = parse_playlist_items)]
    pub playlist_items: Option<String>,

    /// Download video thumbnail
    #[arg(long = "thumbnail", visible_alias = "thumb")]
    pub thumbnail: bool,

    /// Show download history
    #[arg(long)]
    pub history: bool,

    /// Show download statistics
    #[arg(long)]
    pub stats: bool,

    /// Use a configuration preset
    #[arg(long, value_name = "NAME")]
    pub preset: Option<String>,

    /// List available presets
    #[arg(long = "list-presets")]
    pub list_presets: bool,

    /// Save current options as a preset
    #[arg(long = "save-preset", value_name = "NAME")]
    pub save_preset: Option<String>,

    /// Delete a saved preset
    #[arg(long = "delete-preset", value_name = "NAME")]
    pub delete_preset: Option<String>,

    /// Remove history records older than DAYS
    #[arg(long = "prune-history", value_name = "DAYS")]
    pub prune_history: Option<u32>,

    /// Route yt-dlp traffic through a proxy
    #[arg(long, value_name = "URL")]
    pub proxy: Option<String>,
}

impl Cli {
    /// Options described by the flags alone, before any preset
    pub fn options(&self, default_dir: &Path) -> DownloadOptions {
        DownloadOptions {
            output_dir: self.path.clone().unwrap_or_else(|| default_dir.to_path_buf()),
            audio_only: self.audio,
            quality: self.quality,
            format_id: self.format_id.clone(),
            subtitles: self.subs,
            write_thumbnail: self.thumbnail,
            cookies_browser: self.cookies.clone(),
            smart_format: self.smart,
            playlist_items: self.playlist_items.clone(),
            proxy: self.proxy.clone(),
            ..Default::default()
        }
    }
}

/// Prints yt-dlp progress on one terminal line
struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn on_event(&self, event: &ProgressEvent) {
        let mut err = std::io::stderr();
        let _ = match event {
            ProgressEvent::Destination(name) => writeln!(err, "  -> {}", name),
            ProgressEvent::Downloading {
                percent,
                speed,
                eta,
                ..
            } => write!(
                err,
                "\r  {:>5.1}%  {:>12}  ETA {:<8}",
                percent,
                speed.as_deref().unwrap_or("-"),
                eta.as_deref().unwrap_or("-")
            ),
            ProgressEvent::Processing(step) => writeln!(err, "\n  {}", step),
            ProgressEvent::AlreadyDownloaded(name) => {
                writeln!(err, "  Already downloaded: {}", name)
            }
        };
    }
}

/// Run the command line, returning the process exit code.
pub async fn run(cli: Cli, config: Config) -> anyhow::Result<ExitCode> {
    if cli.history || cli.stats || cli.prune_history.is_some() {
        let store = open_store(config.history_backend, &config.history_path())
            .await
            .context("Failed to open download history")?;
        if let Some(days) = cli.prune_history {
            let removed = store.clear_older_than(days).await?;
            println!("✓ Removed {} records older than {} days", removed, days);
        }
        if cli.stats {
            print_stats(store.as_ref()).await?;
        }
        if cli.history {
            print_history(store.as_ref()).await?;
        }
        return Ok(ExitCode::SUCCESS);
    }

    let presets = PresetStore::new(PresetStore::default_dir());
    if let Some(name) = &cli.delete_preset {
        if presets.delete(name)? {
            println!("✓ Preset '{}' deleted", name);
            return Ok(ExitCode::SUCCESS);
        }
        eprintln!("✗ Preset '{}' not found", name);
        return Ok(ExitCode::FAILURE);
    }

    if cli.list_presets || cli.preset.is_some() {
        if let Err(e) = presets.create_default_presets() {
            warn!(error = %e, "Could not create default presets");
        }
    }

    if cli.list_presets {
        print_presets(&presets)?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut options = cli.options(&config.download_dir);

    if let Some(name) = &cli.save_preset {
        let preset = Preset::from_options(format!("Preset: {}", name), &options);
        presets.save(name, &preset)?;
        println!("✓ Preset '{}' saved!", name);
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(name) = &cli.preset {
        match presets.load(name)? {
            Some(preset) => {
                preset.apply_to(&mut options);
                println!("✓ Using preset: {}", name);
            }
            None => {
                eprintln!("✗ Preset '{}' not found", name);
                eprintln!("  Use --list-presets to see available presets");
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    if cli.batch.is_none() && cli.url.is_none() {
        Cli::command().print_help()?;
        return Ok(ExitCode::FAILURE);
    }

    if options.audio_only && !cli.list && !command_available("ffmpeg", "-version").await {
        eprintln!("✗ Missing dependencies: ffmpeg");
        eprintln!("\nInstall with:");
        eprintln!("  brew install ffmpeg  # macOS");
        eprintln!("  sudo apt install ffmpeg  # Linux");
        return Ok(ExitCode::FAILURE);
    }

    let downloader = build_downloader(&config).await?;
    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    if let Some(batch) = &cli.batch {
        return run_batch(&downloader, batch, &options, &cancel).await;
    }
    let interactive = std::io::stdin().is_terminal();

    let Some(url) = cli.url.as_deref() else {
        return Ok(ExitCode::FAILURE);
    };

    if cli.list {
        return list_formats(&downloader, url, &options).await;
    }

    match download_one(&downloader, url, &options, &cancel, interactive).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            report_error(&e);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn build_downloader(config: &Config) -> anyhow::Result<Downloader> {
    let history = open_store(config.history_backend, &config.history_path())
        .await
        .context("Failed to open download history")?;
    let extractor = Arc::new(YtDlpExtractor::new(config.ytdlp_path.clone()));
    Ok(Downloader::new(
        extractor,
        history,
        PreferenceStore::new(PreferenceStore::default_path())
            .with_max_file_size(config.max_file_size_warning),
        config.retry_policy(),
    )
    .with_default_cookies_browser(config.default_cookies_browser.clone()))
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted");
            cancel.cancel();
        }
    });
}

fn report_error(err: &DownloadError) {
    eprintln!("\n✗ Download failed: {}", err);
    if let Some(hint) = err.hint() {
        eprintln!("  {}", hint);
    }
}

/// `[y/N]` answer; only an explicit yes confirms
fn parse_confirmation(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaylistChoice {
    All,
    Range,
    Cancel,
}

/// Menu answer; anything unrecognised downloads everything
fn parse_playlist_choice(answer: &str) -> PlaylistChoice {
    match answer.trim() {
        "2" => PlaylistChoice::Range,
        "3" => PlaylistChoice::Cancel,
        _ => PlaylistChoice::All,
    }
}

/// Typed playlist range; blank takes the default
fn parse_range_answer(answer: &str) -> Result<String, String> {
    let answer = answer.trim();
    parse_playlist_items(if answer.is_empty() {
        DEFAULT_PLAYLIST_RANGE
    } else {
        answer
    })
}

fn read_answer(question: &str) -> std::io::Result<String> {
    print!("{}", question);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(answer)
}

/// Ask on stdin without holding up Ctrl-C.
///
/// The read runs on a detached thread so an unanswered prompt never keeps
/// the runtime from shutting down.
async fn ask(question: &str, cancel: &CancellationToken) -> Result<String, DownloadError> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let question = question.to_string();
    std::thread::spawn(move || {
        let _ = tx.send(read_answer(&question));
    });
    tokio::select! {
        answer = rx => match answer {
            Ok(read) => Ok(read?),
            Err(_) => Err(DownloadError::Unknown("Prompt closed".to_string())),
        },
        _ = cancel.cancelled() => Err(DownloadError::Cancelled),
    }
}

/// Show the playlist and let the user pick all, a range or nothing.
///
/// `Ok(false)` when the user cancels.
async fn choose_playlist_items(
    downloader: &Downloader,
    url: &str,
    options: &mut DownloadOptions,
    cancel: &CancellationToken,
) -> Result<bool, DownloadError> {
    let probe_options = downloader.effective_options(url, options);
    let extractor = Arc::clone(downloader.extractor());
    let target = url.to_string();
    let probed = tokio::task::spawn_blocking(move || extractor.playlist_info(&target, &probe_options))
        .await
        .map_err(|e| DownloadError::Unknown(format!("Playlist check failed: {}", e)))?;

    let playlist = match probed {
        Ok(Some(p)) => p,
        Ok(None) => return Ok(true),
        Err(e) => {
            warn!(url = %url, error = %e, "Could not check playlist status");
            return Ok(true);
        }
    };

    println!("\n  Playlist Detected");
    println!("  Title:    {}", playlist.title);
    println!("  Videos:   {}", playlist.count);
    println!("  Uploader: {}", playlist.uploader);
    println!("\n  Download options:");
    println!("  1. All videos");
    println!("  2. Specify range (e.g., 1-5, 8-10)");
    println!("  3. Cancel");

    match parse_playlist_choice(&ask("Choose option [1/2/3]: ", cancel).await?) {
        PlaylistChoice::All => Ok(true),
        PlaylistChoice::Cancel => Ok(false),
        PlaylistChoice::Range => loop {
            let answer = ask(&format!("Enter range [{}]: ", DEFAULT_PLAYLIST_RANGE), cancel).await?;
            match parse_range_answer(&answer) {
                Ok(range) => {
                    options.playlist_items = Some(range);
                    break Ok(true);
                }
                Err(e) => eprintln!("  ✗ {}", e),
            }
        },
    }
}

async fn download_one(
    downloader: &Downloader,
    url: &str,
    options: &DownloadOptions,
    cancel: &CancellationToken,
    interactive: bool,
) -> Result<(), DownloadError> {
    let mut options = options.clone();
    if interactive
        && options.playlist_items.is_none()
        && is_playlist_url(url)
        && !choose_playlist_items(downloader, url, &mut options, cancel).await?
    {
        println!("  Download cancelled");
        return Ok(());
    }

    println!("Downloading: {}", url);
    let attempt = downloader
        .download(url, options.clone(), Arc::new(ConsoleProgress), cancel.clone())
        .await;
    let report = match attempt {
        Err(DownloadError::SizeConfirmationRequired {
            format_id,
            size_bytes,
            limit_bytes,
        }) if interactive => {
            println!("\n⚠ Warning: Selected file is {}", format_bytes(size_bytes));
            println!("   All available formats exceed {}", format_bytes(limit_bytes));
            if !parse_confirmation(&ask("Continue with large download? [y/N] ", cancel).await?) {
                println!("  Download cancelled");
                return Ok(());
            }
            options.format_id = Some(format_id);
            downloader
                .download(url, options.clone(), Arc::new(ConsoleProgress), cancel.clone())
                .await?
        }
        other => other?,
    };

    println!("\n✓ Download complete");
    if let Some(playlist) = &report.playlist {
        println!("  Playlist: {} ({} videos)", playlist.title, playlist.count);
    } else if !report.title.is_empty() {
        println!("  Title:    {}", report.title);
    }
    println!("  Platform: {}", report.platform);
    println!("  Format:   {}", report.format);
    if report.file_size_bytes > 0 {
        println!("  Size:     {}", format_bytes(report.file_size_bytes));
    }
    match &report.filename {
        Some(file) => println!("  Saved to: {}", file),
        None => println!("  Saved to: {}", options.output_dir.display()),
    }
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct BatchSummary {
    success: usize,
    failed: usize,
    skipped: usize,
}

async fn run_batch(
    downloader: &Downloader,
    batch: &Path,
    options: &DownloadOptions,
    cancel: &CancellationToken,
) -> anyhow::Result<ExitCode> {
    if !batch.exists() {
        eprintln!("✗ Batch file not found: {}", batch.display());
        return Ok(ExitCode::FAILURE);
    }
    let urls = read_batch_file(batch)
        .with_context(|| format!("Failed to read batch file {}", batch.display()))?;

    println!("\n  Batch Download Mode");
    println!("  File:       {}", batch.display());
    println!("  Audio Only: {}", options.audio_only);
    println!("  Subtitles:  {}", options.subtitles);
    println!("  Smart Mode: {}", options.smart_format);
    println!("\n  Found {} URLs to process\n", urls.len());

    let mut summary = BatchSummary::default();
    for (i, url) in urls.iter().enumerate() {
        if cancel.is_cancelled() {
            summary.skipped += 1;
            continue;
        }
        let shown: String = url.chars().take(70).collect();
        println!("  [{}/{}] Processing: {}", i + 1, urls.len(), shown);
        match download_one(downloader, url, options, cancel, false).await {
            Ok(()) => summary.success += 1,
            Err(e) => {
                report_error(&e);
                summary.failed += 1;
            }
        }
        println!();
    }

    println!("  {}", "─".repeat(50));
    println!("  Batch Download Summary");
    println!("  ✓ Success: {}", summary.success);
    println!("  ✗ Failed:  {}", summary.failed);
    println!("  ⊘ Skipped: {}", summary.skipped);
    println!("  Total:     {}", urls.len());
    println!("  {}", "─".repeat(50));

    Ok(if summary.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn list_formats(
    downloader: &Downloader,
    url: &str,
    options: &DownloadOptions,
) -> anyhow::Result<ExitCode> {
    let options = downloader.effective_options(url, options);
    let extractor = Arc::clone(downloader.extractor());
    let target = url.to_string();
    let result = tokio::task::spawn_blocking(move || extractor.extract_info(&target, &options))
        .await
        .context("Format listing task failed")?;

    let info = match result {
        Ok(info) => info,
        Err(e) => {
            eprintln!("✗ Error listing formats: {}", e);
            if let Some(hint) = e.hint() {
                eprintln!("  {}", hint);
            }
            return Ok(ExitCode::FAILURE);
        }
    };

    println!("\n  Available formats for: {}", info.title);
    if info.duration_seconds > 0 {
        println!("  Duration: {}", format_duration(info.duration_seconds));
    }
    println!(
        "  {:<15} {:<6} {:<20} {:<6} {:>10}",
        "ID", "Ext", "Quality", "FPS", "Size"
    );
    println!("  {}", "-".repeat(62));
    for f in info.formats.iter().take(LISTED_FORMATS) {
        let quality = f.format_note.clone().unwrap_or_else(|| {
            if f.has_video() {
                f.quality_label()
            } else {
                "audio only".to_string()
            }
        });
        let fps = f
            .frame_rate
            .map(|fps| format!("{}", fps.round() as u32))
            .unwrap_or_else(|| "N/A".to_string());
        let size = f
            .file_size_bytes
            .map(format_bytes)
            .unwrap_or_else(|| "N/A".to_string());
        println!(
            "  {:<15} {:<6} {:<20} {:<6} {:>10}",
            f.id, f.ext, quality, fps, size
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn print_stats(store: &dyn HistoryStore) -> anyhow::Result<()> {
    let stats = store.statistics().await?;
    println!("\n  Download Statistics\n");
    println!("  Total Downloads: {}", stats.total);
    println!("  ✓ Success:       {}", stats.success);
    println!("  ✗ Failed:        {}", stats.failed);
    println!("  Success Rate:    {}", stats.success_rate_label());
    println!("  Total Size:      {}\n", format_bytes(stats.total_bytes));

    if !stats.by_platform.is_empty() {
        println!("  By Platform:");
        for (platform, count) in &stats.by_platform {
            println!("    {}: {}", platform, count);
        }
    }
    Ok(())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut short: String = text.chars().take(width.saturating_sub(3)).collect();
    short.push_str("..");
    short
}

async fn print_history(store: &dyn HistoryStore) -> anyhow::Result<()> {
    let records = store.recent(HISTORY_ROWS, None).await?;
    let stamp = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

    println!("\n  Recent Downloads (Last {})\n", HISTORY_ROWS);
    println!(
        "  {:<20} {:<12} {:<40} {:<8} Result",
        "Time", "Platform", "Title", "Quality"
    );
    println!("  {}", "-".repeat(90));
    for record in records {
        let time = record
            .timestamp
            .format(&stamp)
            .unwrap_or_else(|_| "N/A".to_string());
        let title = if record.title.is_empty() {
            "N/A".to_string()
        } else {
            truncate(&record.title, 40)
        };
        println!(
            "  {:<20} {:<12} {:<40} {:<8} {}",
            time,
            record.platform,
            title,
            record.quality,
            if record.success { "✓" } else { "✗" }
        );
    }
    Ok(())
}

fn print_presets(presets: &PresetStore) -> anyhow::Result<()> {
    println!("\n  Configuration Presets\n");
    for named in presets.list()? {
        println!("  [{}]", named.name);
        println!("    {}", named.preset.description);
        println!("    Settings: {}", named.preset.settings_summary());
        println!();
    }
    Ok(())
}
