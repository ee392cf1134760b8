// Error types for the downloader core

use thiserror::Error;

use super::retry::{is_retryable_error, Cancelled, Retryable};

#[derive(Debug, Error)]
pub enum DownloadError {
    /// Socket or read timeout while talking to the remote site
    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    /// Remote site answered with 429 or similar throttling
    #[error("Rate limited by remote site: {0}")]
    RateLimited(String),

    /// Connection failures, 5xx responses, interrupted transfers
    #[error("Network error: {0}")]
    Network(String),

    /// yt-dlp or ffmpeg not found in system
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// URL rejected before or by the extractor
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to parse yt-dlp JSON output
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Command execution failed
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Cancelled by the caller before completion
    #[error("Cancelled by user")]
    Cancelled,

    /// Best format is larger than the configured limit and no smaller one exists
    #[error("Format {format_id} is {size_bytes} bytes, over the {limit_bytes} byte limit")]
    SizeConfirmationRequired {
        format_id: String,
        size_bytes: u64,
        limit_bytes: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unknown error with details
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Failures of the local stores (history, preferences, presets)
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl DownloadError {
    /// Whether retrying the same request might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkTimeout(_) | Self::RateLimited(_) | Self::Network(_) => true,
            Self::ToolNotFound(_)
            | Self::InvalidUrl(_)
            | Self::Cancelled
            | Self::SizeConfirmationRequired { .. } => false,
            other => is_retryable_error(&other.to_string()),
        }
    }

    /// Short advice for the user, if the failure is a known pattern.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ToolNotFound(_) => Some("Install yt-dlp (and ffmpeg for audio): pip install -U yt-dlp"),
            Self::RateLimited(_) => Some("The site is throttling requests. Wait a few minutes or use --proxy"),
            Self::NetworkTimeout(_) | Self::Network(_) => {
                Some("Check your connection, then retry. A proxy may help with unstable routes")
            }
            Self::SizeConfirmationRequired { .. } => {
                Some("Pass -f with the format id to accept the size, or -q to cap the resolution")
            }
            Self::Cancelled | Self::Io(_) => None,
            other => diagnose(&other.to_string()),
        }
    }
}

/// Map well-known yt-dlp stderr patterns to advice.
fn diagnose(message: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();

    if lower.contains("sign in to confirm your age") || lower.contains("age-restricted") {
        return Some("Age-restricted video: use -c <browser> with a logged-in browser");
    }
    if lower.contains("private video") || lower.contains("members only") {
        return Some("Restricted video: use cookies from an account that has access (-c <browser>)");
    }
    if lower.contains("not available in your country") || lower.contains("geo") {
        return Some("Geo-blocked: try a proxy in an allowed region (--proxy)");
    }
    if lower.contains("sign in to confirm you") || lower.contains("bot") {
        return Some("Bot check triggered: use -c chrome with a logged-in browser");
    }
    if lower.contains("403") || lower.contains("forbidden") {
        return Some("Access denied: update yt-dlp and refresh cookies");
    }
    if lower.contains("unsupported url") {
        return Some("This site is not supported by yt-dlp");
    }
    if lower.contains("drm") {
        return Some("DRM-protected content cannot be downloaded");
    }

    None
}

impl Retryable for DownloadError {
    fn is_retryable(&self) -> bool {
        DownloadError::is_retryable(self)
    }
}

impl From<Cancelled> for DownloadError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

// Classify raw yt-dlp stderr
impl From<String> for DownloadError {
    fn from(s: String) -> Self {
        let lower = s.to_lowercase();

        if lower.contains("429") || lower.contains("too many requests") {
            return Self::RateLimited(s);
        }

        if lower.contains("timed out") || lower.contains("timeout") {
            return Self::NetworkTimeout(s);
        }

        if lower.contains("http error 502")
            || lower.contains("http error 503")
            || lower.contains("connection reset")
            || lower.contains("connection refused")
            || lower.contains("connectionerror")
        {
            return Self::Network(s);
        }

        if lower.contains("command not found") || lower.contains("no such file or directory") {
            return Self::ToolNotFound(s);
        }

        if lower.contains("unsupported url") || lower.contains("invalid url") || lower.contains("is not a valid url") {
            return Self::InvalidUrl(s);
        }

        if lower.contains("json") {
            return Self::ParseError(s);
        }

        Self::ExecutionError(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_429_is_rate_limited() {
        let err = DownloadError::from("ERROR: HTTP Error 429: Too Many Requests".to_string());
        assert!(matches!(err, DownloadError::RateLimited(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = DownloadError::from("Read timed out after 20s".to_string());
        assert!(matches!(err, DownloadError::NetworkTimeout(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unsupported_url_is_fatal() {
        let err = DownloadError::from("ERROR: Unsupported URL: https://example.com".to_string());
        assert!(matches!(err, DownloadError::InvalidUrl(_)));
        assert!(!err.is_retryable());
        assert!(err.hint().is_some());
    }

    #[test]
    fn test_execution_error_uses_taxonomy() {
        let err = DownloadError::from("ERROR: unable to download video data".to_string());
        assert!(matches!(err, DownloadError::ExecutionError(_)));
        assert!(err.is_retryable());

        let fatal = DownloadError::from("ERROR: Private video".to_string());
        assert!(!fatal.is_retryable());
        assert!(fatal.hint().is_some());
    }

    #[test]
    fn test_cancelled_is_not_retryable() {
        assert!(!DownloadError::Cancelled.is_retryable());
        assert!(matches!(DownloadError::from(Cancelled), DownloadError::Cancelled));
    }
}
