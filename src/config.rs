//! Environment configuration for the CLI and the web server.
//!
//! Values come from the process environment (a `.env` file is loaded first
//! by the binaries). Unset variables fall back to defaults; malformed numbers
//! and booleans are rejected with [`ConfigError`].

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::downloader::cookies::{CookieSettings, DEFAULT_EXPIRATION_HOURS};
use crate::downloader::history::HistoryBackend;
use crate::downloader::models::default_download_dir;
use crate::downloader::preferences::DEFAULT_MAX_FILE_SIZE;
use crate::downloader::retry::{
    RetryPolicy, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_ATTEMPTS,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}' ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub default_quality: u32,
    pub default_cookies_browser: Option<String>,
    pub max_file_size_warning: u64,

    pub max_retry_attempts: u32,
    pub initial_retry_delay: Duration,
    pub retry_backoff_multiplier: f64,

    pub rate_limit_enabled: bool,
    pub rate_limit_requests: usize,
    pub rate_limit_window: Duration,

    pub api_key_enabled: bool,
    pub api_key_name: String,
    pub api_keys: HashSet<String>,

    pub cookie_encryption_key: Option<String>,
    pub cookie_expiration_hours: u64,
    /// Resolved once at startup
    pub encryption_enabled: bool,

    pub history_backend: HistoryBackend,
    /// Overrides the backend's default file
    pub history_path: Option<PathBuf>,
    pub ytdlp_path: Option<String>,
    pub download_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec![
                "http://localhost:8000".to_string(),
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:8000".to_string(),
            ],
            default_quality: 1080,
            default_cookies_browser: Some("chrome".to_string()),
            max_file_size_warning: DEFAULT_MAX_FILE_SIZE,
            max_retry_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_retry_delay: DEFAULT_INITIAL_DELAY,
            retry_backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            rate_limit_enabled: true,
            rate_limit_requests: 60,
            rate_limit_window: Duration::from_secs(60),
            api_key_enabled: false,
            api_key_name: "X-API-Key".to_string(),
            api_keys: HashSet::new(),
            cookie_encryption_key: None,
            cookie_expiration_hours: DEFAULT_EXPIRATION_HOURS,
            encryption_enabled: true,
            history_backend: HistoryBackend::Sqlite,
            history_path: None,
            ytdlp_path: None,
            download_dir: default_download_dir(),
        }
    }
}

fn parse<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: raw.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

impl Config {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(v) = get("HOST") {
            cfg.host = v;
        }
        if let Some(v) = get("PORT") {
            cfg.port = parse("PORT", &v)?;
        }
        if let Some(v) = get("CORS_ORIGINS") {
            cfg.cors_origins = split_list(&v).collect();
        }
        if let Some(v) = get("DEFAULT_QUALITY") {
            cfg.default_quality = parse("DEFAULT_QUALITY", v.trim_end_matches('p'))?;
        }
        if let Some(v) = lookup("DEFAULT_COOKIES_BROWSER") {
            // Explicitly empty disables the default
            cfg.default_cookies_browser = Some(v.trim().to_lowercase()).filter(|b| !b.is_empty());
        }
        if let Some(v) = get("MAX_FILE_SIZE_WARNING") {
            cfg.max_file_size_warning = parse("MAX_FILE_SIZE_WARNING", &v)?;
        }

        if let Some(v) = get("MAX_RETRY_ATTEMPTS") {
            cfg.max_retry_attempts = parse("MAX_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("INITIAL_RETRY_DELAY") {
            let secs: f64 = parse("INITIAL_RETRY_DELAY", &v)?;
            cfg.initial_retry_delay =
                Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::Invalid {
                    name: "INITIAL_RETRY_DELAY",
                    value: v.clone(),
                    reason: e.to_string(),
                })?;
        }
        if let Some(v) = get("RETRY_BACKOFF_MULTIPLIER") {
            cfg.retry_backoff_multiplier = parse("RETRY_BACKOFF_MULTIPLIER", &v)?;
        }

        if let Some(v) = get("RATE_LIMIT_ENABLED") {
            cfg.rate_limit_enabled = parse_bool("RATE_LIMIT_ENABLED", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_REQUESTS") {
            cfg.rate_limit_requests = parse("RATE_LIMIT_REQUESTS", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_WINDOW") {
            cfg.rate_limit_window = Duration::from_secs(parse("RATE_LIMIT_WINDOW", &v)?);
        }

        if let Some(v) = get("API_KEY_ENABLED") {
            cfg.api_key_enabled = parse_bool("API_KEY_ENABLED", &v)?;
        }
        if let Some(v) = get("API_KEY_NAME") {
            cfg.api_key_name = v.trim().to_string();
        }
        if let Some(v) = get("API_KEYS") {
            cfg.api_keys = split_list(&v).collect();
        }

        cfg.cookie_encryption_key = get("COOKIE_ENCRYPTION_KEY");
        if let Some(v) = get("COOKIE_EXPIRATION_HOURS") {
            cfg.cookie_expiration_hours = parse("COOKIE_EXPIRATION_HOURS", &v)?;
        }
        if let Some(v) = get("COOKIE_ENCRYPTION_ENABLED") {
            cfg.encryption_enabled = parse_bool("COOKIE_ENCRYPTION_ENABLED", &v)?;
        }

        if let Some(v) = get("HISTORY_BACKEND") {
            cfg.history_backend = v.parse().map_err(|reason| ConfigError::Invalid {
                name: "HISTORY_BACKEND",
                value: v.clone(),
                reason,
            })?;
        }
        cfg.history_path = get("HISTORY_PATH").map(PathBuf::from);
        cfg.ytdlp_path = get("YTDLP_PATH");
        if let Some(v) = get("DOWNLOAD_DIR") {
            cfg.download_dir = PathBuf::from(v);
        }

        Ok(cfg)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retry_attempts,
            self.initial_retry_delay,
            self.retry_backoff_multiplier,
        )
    }

    pub fn cookie_settings(&self) -> CookieSettings {
        CookieSettings::new(
            self.cookie_encryption_key.clone(),
            self.cookie_expiration_hours,
            self.encryption_enabled,
        )
    }

    pub fn history_path(&self) -> PathBuf {
        self.history_path
            .clone()
            .unwrap_or_else(|| self.history_backend.default_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:8000");
        assert_eq!(cfg.rate_limit_requests, 60);
        assert_eq!(cfg.rate_limit_window, Duration::from_secs(60));
        assert_eq!(cfg.api_key_name, "X-API-Key");
        assert!(!cfg.api_key_enabled);
        assert!(cfg.encryption_enabled);
        assert_eq!(cfg.cookie_expiration_hours, 24);
        assert_eq!(cfg.history_backend, HistoryBackend::Sqlite);
        assert_eq!(cfg.retry_policy().max_attempts(), 3);
        assert_eq!(cfg.default_cookies_browser.as_deref(), Some("chrome"));
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("PORT", "9000"),
            ("API_KEY_ENABLED", "true"),
            ("API_KEYS", "a, b,,c"),
            ("RATE_LIMIT_REQUESTS", "3"),
            ("HISTORY_BACKEND", "json"),
            ("INITIAL_RETRY_DELAY", "0.5"),
            ("DEFAULT_COOKIES_BROWSER", ""),
            ("COOKIE_ENCRYPTION_ENABLED", "false"),
            ("DEFAULT_QUALITY", "720p"),
            ("MAX_FILE_SIZE_WARNING", "1048576"),
        ])
        .unwrap();

        assert_eq!(cfg.port, 9000);
        assert!(cfg.api_key_enabled);
        assert_eq!(cfg.api_keys.len(), 3);
        assert!(cfg.api_keys.contains("b"));
        assert_eq!(cfg.rate_limit_requests, 3);
        assert_eq!(cfg.history_backend, HistoryBackend::Json);
        assert_eq!(cfg.initial_retry_delay, Duration::from_millis(500));
        assert_eq!(cfg.default_cookies_browser, None);
        assert!(!cfg.encryption_enabled);
        assert_eq!(cfg.default_quality, 720);
        assert_eq!(cfg.max_file_size_warning, 1_048_576);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config(&[("PORT", "eighty")]),
            Err(ConfigError::Invalid { name: "PORT", .. })
        ));
        assert!(config(&[("RATE_LIMIT_ENABLED", "maybe")]).is_err());
        assert!(config(&[("HISTORY_BACKEND", "redis")]).is_err());
        assert!(config(&[("INITIAL_RETRY_DELAY", "-1")]).is_err());
    }
}
