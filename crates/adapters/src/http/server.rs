use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;

use super::router::build_router;
use super::state::AppState;

/// Run the observability server on the given address and port.
///
/// Shuts down gracefully when `shutdown` resolves, draining in-flight
/// scrapes before returning.
pub async fn run_http_server(
    state: Arc<AppState>,
    bind_address: IpAddr,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((bind_address, port)).await?;
    tracing::info!(%bind_address, port, "metrics server listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("metrics server stopped");
    Ok(())
}
