use axum::extract::State;
use axum::Json;

use crate::downloader::cookies::EncryptionStatus;
use crate::web::state::AppState;

/// Cookie encryption settings in effect
pub async fn encryption_status(State(state): State<AppState>) -> Json<EncryptionStatus> {
    Json(state.vault.encryption_status())
}
