// Helper functions shared by the CLI, the web layer and the orchestrator

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command as TokioCommand;
use tracing::debug;

use super::errors::DownloadError;

const TOOL_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

const PLAYLIST_INDICATORS: &[&str] = &[
    "list=",
    "playlist",
    "/playlist/",
    "fid=", // Bilibili favourites
    "/fav/",
    "series/",
    "collection/",
];

/// Whether the URL looks like a playlist, channel collection or favourites list
pub fn is_playlist_url(url: &str) -> bool {
    PLAYLIST_INDICATORS.iter().any(|i| url.contains(i))
}

/// Validate a playlist range such as `1-5,8,10-15`.
///
/// Returns the normalized form (whitespace removed) accepted by
/// `--playlist-items`.
pub fn parse_playlist_items(spec: &str) -> Result<String, String> {
    let compact: String = spec.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err("Playlist range is empty".to_string());
    }

    for part in compact.split(',') {
        let bounds: Vec<&str> = part.split('-').collect();
        let parsed: Result<Vec<u32>, _> = bounds.iter().map(|b| b.parse::<u32>()).collect();
        match (bounds.len(), parsed) {
            (1, Ok(nums)) if nums[0] > 0 => {}
            (2, Ok(nums)) if nums[0] > 0 && nums[0] <= nums[1] => {}
            _ => return Err(format!("Invalid playlist range '{}'", part)),
        }
    }

    Ok(compact)
}

/// URLs of a batch file, one per line. Blank lines and `#` comments are skipped.
pub fn read_batch_file(path: &Path) -> std::io::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_batch(&text))
}

fn parse_batch(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// 1536 -> "1.5 KB"
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// 3725 -> "1:02:05", 65 -> "1:05"
pub fn format_duration(seconds: u64) -> String {
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// Map a failed spawn of `program` to a download error
pub(crate) fn spawn_error(program: &str, e: std::io::Error) -> DownloadError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DownloadError::ToolNotFound(program.to_string())
    } else {
        DownloadError::ExecutionError(format!("Failed to start {}: {}", program, e))
    }
}

/// Run `program` to completion, killing it once `limit` elapses.
pub async fn run_output_with_timeout(
    program: &str,
    args: &[&str],
    limit: Duration,
) -> Result<Output, DownloadError> {
    let run = TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(limit, run).await {
        Ok(output) => output.map_err(|e| spawn_error(program, e)),
        Err(_) => Err(DownloadError::ExecutionError(format!(
            "{} did not finish within {}s",
            program,
            limit.as_secs_f32()
        ))),
    }
}

/// Whether `program` starts and exits successfully with `version_arg`
pub async fn command_available(program: &str, version_arg: &str) -> bool {
    match run_output_with_timeout(program, &[version_arg], TOOL_PROBE_TIMEOUT).await {
        Ok(output) => output.status.success(),
        Err(e) => {
            debug!(program, error = %e, "Tool probe failed");
            false
        }
    }
}
