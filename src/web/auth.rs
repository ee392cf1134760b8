//! Optional API key gate.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::dto::ApiResponse;
use super::rate_limit::is_public_path;
use super::state::AppState;

/// Reject requests without a configured key when the gate is enabled
pub async fn api_key_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let config = &state.config;
    if !config.api_key_enabled || is_public_path(request.uri().path()) {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get(config.api_key_name.as_str())
        .and_then(|v| v.to_str().ok());

    match provided {
        None => (
            StatusCode::UNAUTHORIZED,
            ApiResponse::failure(format!(
                "API key is missing. Please provide {} header.",
                config.api_key_name
            )),
        )
            .into_response(),
        Some(key) if !config.api_keys.contains(key) => {
            (StatusCode::FORBIDDEN, ApiResponse::failure("Invalid API key.")).into_response()
        }
        Some(_) => next.run(request).await,
    }
}
