//! Sliding-window rate limiting per client.
//!
//! Each client keeps the instants of its admitted requests inside the
//! window. A request is denied once the window holds `limit` instants; the
//! caller is told how many seconds remain until the oldest one expires.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, warn};

use super::state::AppState;
use super::tasks::FINISHED_TASK_TTL;

/// Paths never rate limited: `/` exactly, the rest as prefixes
pub const PUBLIC_PREFIXES: &[&str] = &["/health", "/static"];

pub fn is_public_path(path: &str) -> bool {
    path == "/" || PUBLIC_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// Time source, replaceable in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Seconds until a slot frees up, 0 when allowed
    pub retry_after_secs: u64,
}

pub struct RateLimiter {
    limit: usize,
    window: Duration,
    clock: Arc<dyn Clock>,
    clients: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self::with_clock(limit, window, Arc::new(SystemClock))
    }

    pub fn with_clock(limit: usize, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit,
            window,
            clock,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn prune(stamps: &mut Vec<Instant>, now: Instant, window: Duration) {
        stamps.retain(|ts| now.saturating_duration_since(*ts) < window);
    }

    /// Admit (and count) a request from `client_id`, or report when to retry.
    pub fn is_allowed(&self, client_id: &str) -> RateDecision {
        let now = self.clock.now();
        let mut clients = self.clients.lock();
        let stamps = clients.entry(client_id.to_string()).or_default();
        Self::prune(stamps, now, self.window);

        if stamps.len() >= self.limit {
            let oldest = stamps.iter().min().copied().unwrap_or(now);
            let remaining = (oldest + self.window).saturating_duration_since(now);
            return RateDecision {
                allowed: false,
                retry_after_secs: remaining.as_secs() + 1,
            };
        }

        stamps.push(now);
        RateDecision {
            allowed: true,
            retry_after_secs: 0,
        }
    }

    /// Drop expired instants and clients left with none. Returns clients removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut clients = self.clients.lock();
        let before = clients.len();
        clients.retain(|_, stamps| {
            Self::prune(stamps, now, self.window);
            !stamps.is_empty()
        });
        before - clients.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().len()
    }
}

/// Every `period` until the runtime shuts down, run [`RateLimiter::cleanup`]
/// and evict download tasks finished longer than [`FINISHED_TASK_TTL`] ago.
pub fn spawn_cleanup(state: AppState, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = state.limiter.cleanup();
            if removed > 0 {
                debug!(removed, clients = state.limiter.tracked_clients(), "Rate limiter cleanup");
            }
            let evicted = state.tasks.evict_finished(FINISHED_TASK_TTL);
            if evicted > 0 {
                debug!(evicted, tasks = state.tasks.len(), "Evicted finished download tasks");
            }
        }
    })
}

/// First `X-Forwarded-For` entry, else the peer address, else "unknown"
pub fn client_id(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match (forwarded, peer) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

fn limit_headers(limiter: &RateLimiter) -> [(HeaderName, HeaderValue); 2] {
    [
        (
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderValue::from(limiter.limit() as u64),
        ),
        (
            HeaderName::from_static("x-ratelimit-window"),
            HeaderValue::from(limiter.window().as_secs()),
        ),
    ]
}

/// Middleware enforcing [`RateLimiter`] on non-public paths
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.rate_limit_enabled || is_public_path(request.uri().path()) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let client = client_id(request.headers(), peer);
    let decision = state.limiter.is_allowed(&client);

    if !decision.allowed {
        let retry_after = decision.retry_after_secs;
        warn!(client = %client, retry_after, "Rate limit exceeded");
        let body = Json(json!({
            "success": false,
            "message": format!(
                "Rate limit exceeded. Please wait {} seconds before making another request.",
                retry_after
            ),
            "retry_after": retry_after,
        }));
        let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
        let headers = response.headers_mut();
        headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after));
        headers.extend(limit_headers(&state.limiter));
        return response;
    }

    let mut response = next.run(request).await;
    response.headers_mut().extend(limit_headers(&state.limiter));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Clock advanced by hand
    struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Mutex::new(Instant::now()),
            }
        }

        fn advance(&self, by: Duration) {
            *self.now.lock() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock()
        }
    }

    #[test]
    fn test_sliding_window() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(3, Duration::from_secs(60), clock.clone());

        for _ in 0..3 {
            assert!(limiter.is_allowed("1.2.3.4").allowed);
        }
        let denied = limiter.is_allowed("1.2.3.4");
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_secs, 61);

        clock.advance(Duration::from_secs(30));
        assert_eq!(limiter.is_allowed("1.2.3.4").retry_after_secs, 31);

        // Other clients are independent
        assert!(limiter.is_allowed("5.6.7.8").allowed);

        clock.advance(Duration::from_secs(30));
        assert!(limiter.is_allowed("1.2.3.4").allowed);
    }

    #[test]
    fn test_denied_requests_are_not_counted() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(1, Duration::from_secs(10), clock.clone());
        assert!(limiter.is_allowed("a").allowed);
        for _ in 0..5 {
            assert!(!limiter.is_allowed("a").allowed);
        }
        clock.advance(Duration::from_secs(10));
        assert!(limiter.is_allowed("a").allowed);
    }

    #[test]
    fn test_cleanup_drops_idle_clients() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(5, Duration::from_secs(60), clock.clone());
        limiter.is_allowed("a");
        clock.advance(Duration::from_secs(45));
        limiter.is_allowed("b");
        assert_eq!(limiter.cleanup(), 0);

        clock.advance(Duration::from_secs(20));
        assert_eq!(limiter.cleanup(), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_public_paths() {
        assert!(is_public_path("/"));
        assert!(is_public_path("/health"));
        assert!(is_public_path("/static/app.js"));
        assert!(!is_public_path("/api/stats"));
    }

    #[test]
    fn test_client_id() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "10.0.0.1:5555".parse().unwrap();
        assert_eq!(client_id(&headers, Some(peer)), "10.0.0.1");
        assert_eq!(client_id(&headers, None), "unknown");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        assert_eq!(client_id(&headers, Some(peer)), "203.0.113.9");
    }
}
