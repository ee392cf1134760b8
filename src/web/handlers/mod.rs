//! HTTP request handlers, one submodule per API area.

pub mod download;
pub mod formats;
pub mod health;
pub mod history;
pub mod security;
pub mod stats;

use tracing::warn;

use crate::downloader::cookies::CookieFile;
use crate::downloader::models::DownloadOptions;
use crate::web::state::AppState;

/// Point `options` at a decrypted copy of the browser's cached cookies.
///
/// The returned guard deletes the copy, so keep it alive until yt-dlp exits.
/// Without a fresh cache the options are left alone and yt-dlp reads the
/// browser directly.
pub(crate) fn attach_cached_cookies(
    state: &AppState,
    options: &mut DownloadOptions,
) -> Option<CookieFile> {
    let browser = options.cookies_browser.clone()?;
    if !state.vault.are_cookies_cached(&browser) {
        return None;
    }
    match state.vault.materialize(&browser) {
        Ok(file) => {
            options.cookies_file = Some(file.path().to_path_buf());
            Some(file)
        }
        Err(e) => {
            warn!(browser = %browser, error = %e, "Cached cookies unusable");
            None
        }
    }
}
