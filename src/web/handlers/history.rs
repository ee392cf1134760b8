use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::json;

use crate::web::dto::{
    ApiResponse, HistoryQuery, HistoryResponse, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT,
};
use crate::web::error::HttpError;
use crate::web::state::AppState;

/// Most recent downloads, optionally for one platform
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, HttpError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
        return Err(HttpError::Validation(format!(
            "limit must be between 1 and {}",
            MAX_HISTORY_LIMIT
        )));
    }
    let platform = query.platform.as_deref().filter(|p| !p.trim().is_empty());

    let history = state.downloader.history();
    let records = history.recent(limit as usize, platform).await?;
    let total = history.total_count().await?;
    Ok(Json(HistoryResponse { total, records }))
}

pub async fn clear(State(state): State<AppState>) -> Result<ApiResponse, HttpError> {
    let removed = state.downloader.history().clear().await?;
    Ok(ApiResponse::with_data("History cleared", json!({ "removed": removed })))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<ApiResponse, HttpError> {
    if state.downloader.history().delete(id).await? {
        Ok(ApiResponse::ok(format!("Record {} deleted", id)))
    } else {
        Err(HttpError::NotFound(format!("Record {} not found", id)))
    }
}
