use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use super::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// `"ready"` or `"not_ready"`.
    pub status: &'static str,
    pub sweeper_running: bool,
}

/// Liveness probe, 200 while the process runs.
pub async fn healthz(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version,
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Readiness probe, 200 while the sweeper runs against an open map and
/// 503 otherwise.
pub async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let running = state.is_ready();
    let (code, status) = if running {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };
    (
        code,
        Json(ReadyResponse {
            status,
            sweeper_running: running,
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use infrastructure::metrics::AgentMetrics;

    use super::*;

    fn test_state(ready: bool) -> Arc<AppState> {
        Arc::new(AppState::new(
            Arc::new(AgentMetrics::new()),
            Arc::new(AtomicBool::new(ready)),
        ))
    }

    #[tokio::test]
    async fn healthz_always_returns_ok() {
        let Json(resp) = healthz(State(test_state(false))).await;
        assert_eq!(resp.status, "ok");
        assert_eq!(resp.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn readyz_returns_ready_when_running() {
        let resp = readyz(State(test_state(true))).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_follows_the_flag() {
        let state = test_state(true);
        state.ready.store(false, Ordering::Relaxed);
        let resp = readyz(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
