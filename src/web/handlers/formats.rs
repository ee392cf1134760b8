use axum::extract::{Query, State};
use axum::Json;

use super::attach_cached_cookies;
use crate::downloader::models::DownloadOptions;
use crate::web::dto::{FormatListResponse, FormatsQuery};
use crate::web::error::HttpError;
use crate::web::state::AppState;

/// Video formats yt-dlp reports for a URL
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<FormatsQuery>,
) -> Result<Json<FormatListResponse>, HttpError> {
    let url = query.url.trim().to_string();
    if url.is_empty() {
        return Err(HttpError::BadRequest("URL is required".to_string()));
    }

    let requested = DownloadOptions {
        cookies_browser: query.cookies_browser.filter(|b| !b.trim().is_empty()),
        ..Default::default()
    };
    let mut options = state.downloader.effective_options(&url, &requested);

    let worker = state.clone();
    let target = url.clone();
    let info = tokio::task::spawn_blocking(move || {
        let _cookies = attach_cached_cookies(&worker, &mut options);
        worker.downloader.extractor().extract_info(&target, &options)
    })
    .await
    .map_err(|e| HttpError::Internal(format!("Format listing task failed: {}", e)))??;

    Ok(Json(FormatListResponse::from_info(&url, &info)))
}
