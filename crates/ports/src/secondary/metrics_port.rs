// Focused sub-traits for recording Prometheus metrics.
//
// All methods take `&self` because the underlying implementation uses
// atomic operations (interior mutability via `prometheus-client`).
//
// Default implementations are no-ops, allowing test mocks to implement
// only the methods relevant to the component under test.

// ── Conntrack sweep metrics ────────────────────────────────────────

pub trait ConntrackMetrics: Send + Sync {
    /// Record one completed sweep.
    fn record_conntrack_sweep(&self, _examined: u64, _deleted: u64, _duration_seconds: f64) {}

    /// Record one entry removed for the given expiry reason label.
    fn record_conntrack_expiry(&self, _reason: &str) {}

    /// Record a sweep that aborted (`iteration`, `fatal`) or a failed
    /// delete (`delete`).
    fn record_conntrack_sweep_error(&self, _kind: &str) {}

    /// Set the number of entries left in the table after the last sweep.
    fn set_conntrack_entries(&self, _count: u64) {}
}

// ── Composite super-trait ──────────────────────────────────────────

/// Unified metrics port. Components accept `Arc<dyn MetricsPort>`.
pub trait MetricsPort: ConntrackMetrics {}

/// Blanket implementation: any type implementing all sub-traits automatically
/// implements `MetricsPort`.
impl<T> MetricsPort for T where T: ConntrackMetrics {}
