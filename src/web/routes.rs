//! Route table and middleware stack.

use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::api_key_middleware;
use super::handlers;
use super::rate_limit::rate_limit_middleware;
use super::state::AppState;

/// `*` in the origin list allows any origin
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    layer.allow_origin(allowed)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Downloads
        .route("/download/start", post(handlers::download::start))
        .route(
            "/download/progress/{task_id}",
            get(handlers::download::progress),
        )
        .route("/download/cancel/{task_id}", post(handlers::download::cancel))
        .route("/download/tasks", get(handlers::download::tasks))
        .route(
            "/download/authorize-cookies",
            post(handlers::download::authorize_cookies),
        )
        .route(
            "/download/cookies-status",
            get(handlers::download::cookies_status),
        )
        // Formats
        .route("/formats/list", get(handlers::formats::list))
        // History and stats
        .route("/history", get(handlers::history::list))
        .route("/history/clear", delete(handlers::history::clear))
        .route("/history/{id}", delete(handlers::history::delete))
        .route("/stats", get(handlers::stats::summary))
        .route("/stats/by-platform", get(handlers::stats::by_platform))
        // Security
        .route(
            "/security/encryption-status",
            get(handlers::security::encryption_status),
        )
}

/// Build the application router.
///
/// The rate limiter runs before the API key check, so rejected keys still
/// count against the client's window.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/api", api_routes())
        .layer(middleware::from_fn_with_state(state.clone(), api_key_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
