//! Shared application state.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use super::rate_limit::RateLimiter;
use super::tasks::TaskRegistry;
use crate::config::Config;
use crate::downloader::cookies::{CookieError, CookieVault};
use crate::downloader::history::open_store;
use crate::downloader::preferences::PreferenceStore;
use crate::downloader::{Downloader, StorageError};
use crate::ytdlp::YtDlpExtractor;

/// Everything the handlers and middleware share
pub struct WebContext {
    pub config: Config,
    pub downloader: Downloader,
    pub vault: CookieVault,
    pub limiter: RateLimiter,
    pub tasks: Arc<TaskRegistry>,
}

pub type AppState = Arc<WebContext>;

impl WebContext {
    pub fn new(config: Config, downloader: Downloader, vault: CookieVault) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_requests, config.rate_limit_window);
        Self {
            config,
            downloader,
            vault,
            limiter,
            tasks: Arc::new(TaskRegistry::new()),
        }
    }
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Failed to open download history: {0}")]
    History(#[from] StorageError),

    #[error("Failed to set up cookie storage: {0}")]
    Cookies(#[from] CookieError),
}

/// Wire the production services from `config`
pub async fn build_state(config: Config) -> Result<AppState, SetupError> {
    let history_path = config.history_path();
    let history = open_store(config.history_backend, &history_path).await?;
    info!(backend = ?config.history_backend, path = %history_path.display(), "History store ready");

    let extractor = Arc::new(YtDlpExtractor::new(config.ytdlp_path.clone()));
    let downloader = Downloader::new(
        extractor,
        history,
        PreferenceStore::new(PreferenceStore::default_path())
            .with_max_file_size(config.max_file_size_warning),
        config.retry_policy(),
    )
    .with_default_cookies_browser(config.default_cookies_browser.clone());

    let vault = CookieVault::open(config.cookie_settings())?;
    Ok(Arc::new(WebContext::new(config, downloader, vault)))
}
