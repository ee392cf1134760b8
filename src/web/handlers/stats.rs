use axum::extract::State;
use axum::Json;

use crate::web::dto::{PlatformCounts, StatsResponse};
use crate::web::error::HttpError;
use crate::web::state::AppState;

pub async fn summary(State(state): State<AppState>) -> Result<Json<StatsResponse>, HttpError> {
    let stats = state.downloader.history().statistics().await?;
    Ok(Json(StatsResponse::from(stats)))
}

/// Download counts per platform, most used first
pub async fn by_platform(State(state): State<AppState>) -> Result<Json<PlatformCounts>, HttpError> {
    let stats = state.downloader.history().statistics().await?;
    Ok(Json(PlatformCounts(stats.by_platform)))
}
