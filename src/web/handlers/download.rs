//! Download task handlers: start, progress, cancel and cookie authorization.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::attach_cached_cookies;
use crate::downloader::models::{DownloadOptions, DownloadProgress, TaskStatus};
use crate::downloader::traits::ProgressSink;
use crate::downloader::DownloadError;
use crate::web::dto::{ApiResponse, BrowserQuery, DownloadRequest};
use crate::web::error::HttpError;
use crate::web::state::AppState;

/// Queue a download and return its task id immediately.
pub async fn start(
    State(state): State<AppState>,
    Json(req): Json<DownloadRequest>,
) -> Result<ApiResponse, HttpError> {
    let url = req.url.trim().to_string();
    if url.is_empty() {
        return Err(HttpError::BadRequest("URL is required".to_string()));
    }
    let options = req
        .to_options(&state.config.download_dir, state.config.default_quality)
        .map_err(HttpError::Validation)?;

    let (task_id, cancel) = state.tasks.create();
    info!(task_id = %task_id, url = %url, "Download task created");
    tokio::spawn(run_task(state.clone(), task_id.clone(), url, options, cancel));

    Ok(ApiResponse::with_data(
        "Download started",
        json!({ "task_id": task_id }),
    ))
}

async fn run_task(
    state: AppState,
    task_id: String,
    url: String,
    mut options: DownloadOptions,
    cancel: CancellationToken,
) {
    state.tasks.set_status(&task_id, TaskStatus::Downloading);

    // Reading and decrypting the cookie cache is file I/O
    let worker = state.clone();
    let prepared = tokio::task::spawn_blocking(move || {
        let cookies = attach_cached_cookies(&worker, &mut options);
        (options, cookies)
    })
    .await;
    let (options, _cookies) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "Cookie preparation failed");
            state.tasks.fail(&task_id, format!("Cookie preparation failed: {}", e));
            return;
        }
    };

    let sink: Arc<dyn ProgressSink> = Arc::new(state.tasks.sink(&task_id));
    match state.downloader.download(&url, options, sink, cancel).await {
        Ok(report) => {
            info!(task_id = %task_id, title = %report.title, "Download task completed");
            state.tasks.complete(&task_id, report.filename);
        }
        Err(DownloadError::Cancelled) => {
            info!(task_id = %task_id, "Download task cancelled");
        }
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "Download task failed");
            state.tasks.fail(&task_id, e.to_string());
        }
    }
}

pub async fn progress(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<DownloadProgress>, HttpError> {
    state
        .tasks
        .get(&task_id)
        .map(Json)
        .ok_or_else(|| HttpError::NotFound("Task not found".to_string()))
}

/// Stop a running download; the yt-dlp process is killed.
pub async fn cancel(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<ApiResponse, HttpError> {
    if state.tasks.cancel(&task_id) {
        info!(task_id = %task_id, "Cancel requested");
        Ok(ApiResponse::ok("Download cancelled"))
    } else {
        Err(HttpError::NotFound("Task not found".to_string()))
    }
}

pub async fn tasks(State(state): State<AppState>) -> Json<BTreeMap<String, DownloadProgress>> {
    Json(state.tasks.snapshot())
}

/// Export the browser's cookies through yt-dlp and cache them encrypted.
pub async fn authorize_cookies(
    State(state): State<AppState>,
    Query(query): Query<BrowserQuery>,
) -> Result<ApiResponse, HttpError> {
    let browser = query
        .browser
        .map(|b| b.trim().to_lowercase())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| "chrome".to_string());

    let worker = state.clone();
    let name = browser.clone();
    tokio::task::spawn_blocking(move || {
        worker
            .vault
            .ensure_cookies(&name, worker.downloader.extractor().as_ref())
    })
    .await
    .map_err(|e| HttpError::Internal(format!("Cookie export task failed: {}", e)))??;

    Ok(ApiResponse::with_data(
        format!("Cookies from {} authorized", browser),
        json!({
            "browser": browser,
            "expires_in_hours": state.config.cookie_expiration_hours,
        }),
    ))
}

/// Whether each supported browser has a fresh cookie cache
pub async fn cookies_status(State(state): State<AppState>) -> Json<BTreeMap<String, bool>> {
    Json(state.vault.status())
}
