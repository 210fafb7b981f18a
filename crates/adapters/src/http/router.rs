use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use super::health_handler::{healthz, readyz};
use super::metrics_handler::metrics;
use super::state::AppState;

/// Observability routes: `/healthz`, `/readyz` probes and `/metrics`.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use infrastructure::metrics::AgentMetrics;
    use tower::ServiceExt;

    use super::*;

    fn router(ready: bool) -> Router {
        build_router(Arc::new(AppState::new(
            Arc::new(AgentMetrics::new()),
            Arc::new(AtomicBool::new(ready)),
        )))
    }

    async fn status_of(router: Router, uri: &str) -> StatusCode {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        router.oneshot(req).await.unwrap().status()
    }

    #[tokio::test]
    async fn routes_are_mounted() {
        assert_eq!(status_of(router(true), "/healthz").await, StatusCode::OK);
        assert_eq!(status_of(router(true), "/readyz").await, StatusCode::OK);
        assert_eq!(status_of(router(true), "/metrics").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn not_ready_until_flagged() {
        assert_eq!(
            status_of(router(false), "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_of(router(false), "/healthz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        assert_eq!(
            status_of(router(true), "/api/v1/firewall/rules").await,
            StatusCode::NOT_FOUND
        );
    }
}
