use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use infrastructure::metrics::AgentMetrics;

/// Shared state for the observability server.
///
/// Passed to Axum handlers via `State(Arc<AppState>)`.
pub struct AppState {
    pub metrics: Arc<AgentMetrics>,
    /// Set once the map is open and the sweeper runs; cleared when it stops.
    pub ready: Arc<AtomicBool>,
    pub start_time: Instant,
    pub version: &'static str,
}

impl AppState {
    pub fn new(metrics: Arc<AgentMetrics>, ready: Arc<AtomicBool>) -> Self {
        Self {
            metrics,
            ready,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}
