//! HTTP backend: axum routes over the downloader core.

pub mod auth;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;
pub mod tasks;

pub use routes::create_router;
pub use state::{build_state, AppState, WebContext};
