use axum::extract::State;
use serde_json::json;

use crate::web::dto::ApiResponse;
use crate::web::state::AppState;

pub async fn health(State(state): State<AppState>) -> ApiResponse {
    ApiResponse::with_data(
        "Bingo Downloader Web is running",
        json!({
            "download_dir": state.config.download_dir.to_string_lossy(),
            "version": env!("CARGO_PKG_VERSION"),
        }),
    )
}
