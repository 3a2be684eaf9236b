//! Health endpoints for Peer Call.
//!
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (is the signaling registration open?)
//! - `GET /connected` - 200 while the call is connected, 503 otherwise
//!
//! The binary updates [`HealthState`] from the supervisor's events and
//! status channel. The `/metrics` endpoint is served separately via
//! `metrics-exporter-prometheus`.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health state for a running call session.
#[derive(Debug)]
pub struct HealthState {
    /// Always true after startup.
    live: AtomicBool,
    /// True while signaling is open.
    ready: AtomicBool,
    /// True while the call is connected.
    connected: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false, connected=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            connected: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Create the health router.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .route("/connected", get(connected_handler))
        .with_state(health_state)
}

fn status_for(flag: bool) -> StatusCode {
    if flag {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    status_for(state.is_live())
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    status_for(state.is_ready())
}

async fn connected_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    status_for(state.is_connected())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("Failed to build request");

        app.oneshot(request)
            .await
            .expect("Failed to execute request")
            .status()
    }

    #[test]
    fn test_health_state_default() {
        let state = HealthState::new();
        assert!(state.is_live(), "Should be live by default");
        assert!(!state.is_ready(), "Should not be ready by default");
        assert!(!state.is_connected(), "Should not be connected by default");
    }

    #[test]
    fn test_health_state_toggles() {
        let state = HealthState::new();

        state.set_ready(true);
        state.set_connected(true);
        assert!(state.is_ready());
        assert!(state.is_connected());

        state.set_ready(false);
        state.set_connected(false);
        assert!(!state.is_ready());
        assert!(!state.is_connected());
    }

    #[tokio::test]
    async fn test_health_router_liveness_endpoint() {
        let app = health_router(Arc::new(HealthState::new()));
        assert_eq!(get_status(app, "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_router_readiness_follows_signaling() {
        let state = Arc::new(HealthState::new());

        let app = health_router(Arc::clone(&state));
        assert_eq!(
            get_status(app, "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.set_ready(true);
        let app = health_router(Arc::clone(&state));
        assert_eq!(get_status(app, "/ready").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_router_connected_endpoint() {
        let state = Arc::new(HealthState::new());

        let app = health_router(Arc::clone(&state));
        assert_eq!(
            get_status(app, "/connected").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.set_connected(true);
        let app = health_router(Arc::clone(&state));
        assert_eq!(get_status(app, "/connected").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_router_unknown_path_returns_404() {
        let app = health_router(Arc::new(HealthState::new()));
        assert_eq!(get_status(app, "/nope").await, StatusCode::NOT_FOUND);
    }
}
