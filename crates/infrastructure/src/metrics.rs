use ports::secondary::metrics_port::ConntrackMetrics;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets_range};
use prometheus_client::registry::Registry;

// ── Label types ─────────────────────────────────────────────────────

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReasonLabels {
    pub reason: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KindLabels {
    pub kind: String,
}

// ── Agent metrics registry ──────────────────────────────────────────

/// Prometheus metrics registry for the agent.
///
/// All metric families use atomics, so recording only requires `&self`.
/// Wrap in `Arc` to share between the sweeper and the HTTP server.
pub struct AgentMetrics {
    registry: Registry,
    pub sweeps_total: Counter,
    pub entries_examined_total: Counter,
    pub entries_deleted_total: Counter,
    pub sweep_duration: Histogram,
    pub expired_total: Family<ReasonLabels, Counter>,
    pub sweep_errors_total: Family<KindLabels, Counter>,
    pub entries: Gauge,
}

impl AgentMetrics {
    /// Create a new registry with every metric under the `ctsweeper` prefix.
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("ctsweeper");

        let sweeps_total = Counter::default();
        registry.register(
            "conntrack_sweeps",
            "Completed conntrack table sweeps",
            sweeps_total.clone(),
        );

        let entries_examined_total = Counter::default();
        registry.register(
            "conntrack_entries_examined",
            "Conntrack entries visited by sweeps",
            entries_examined_total.clone(),
        );

        let entries_deleted_total = Counter::default();
        registry.register(
            "conntrack_entries_deleted",
            "Conntrack entries removed by sweeps",
            entries_deleted_total.clone(),
        );

        // 1ms to 30s: an idle table to a saturated one.
        let sweep_duration = Histogram::new(exponential_buckets_range(0.001, 30.0, 12));
        registry.register(
            "conntrack_sweep_duration_seconds",
            "Wall time of one conntrack sweep in seconds",
            sweep_duration.clone(),
        );

        let expired_total = Family::<ReasonLabels, Counter>::default();
        registry.register(
            "conntrack_expired",
            "Conntrack entries judged expired, by reason",
            expired_total.clone(),
        );

        let sweep_errors_total = Family::<KindLabels, Counter>::default();
        registry.register(
            "conntrack_sweep_errors",
            "Sweep aborts and failed deletes, by kind",
            sweep_errors_total.clone(),
        );

        let entries = Gauge::default();
        registry.register(
            "conntrack_entries",
            "Conntrack entries left after the last complete sweep",
            entries.clone(),
        );

        Self {
            registry,
            sweeps_total,
            entries_examined_total,
            entries_deleted_total,
            sweep_duration,
            expired_total,
            sweep_errors_total,
            entries,
        }
    }

    /// Encode all registered metrics to `OpenMetrics` text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ConntrackMetrics for AgentMetrics {
    fn record_conntrack_sweep(&self, examined: u64, deleted: u64, duration_seconds: f64) {
        self.sweeps_total.inc();
        self.entries_examined_total.inc_by(examined);
        self.entries_deleted_total.inc_by(deleted);
        self.sweep_duration.observe(duration_seconds);
    }

    fn record_conntrack_expiry(&self, reason: &str) {
        self.expired_total
            .get_or_create(&ReasonLabels {
                reason: reason.to_string(),
            })
            .inc();
    }

    fn record_conntrack_sweep_error(&self, kind: &str) {
        self.sweep_errors_total
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    fn set_conntrack_entries(&self, count: u64) {
        self.entries.set(count.try_into().unwrap_or(i64::MAX));
    }
}

// MetricsPort comes from the blanket impl over ConntrackMetrics.

#[cfg(test)]
mod tests {
    use super::*;
    use ports::secondary::metrics_port::MetricsPort;

    #[test]
    fn new_creates_valid_registry() {
        let encoded = AgentMetrics::new().encode().unwrap();
        assert!(encoded.contains("# EOF"));
        assert!(encoded.contains("ctsweeper_conntrack_sweeps_total"));
        assert!(encoded.contains("ctsweeper_conntrack_entries "));
    }

    #[test]
    fn sweep_updates_counters_and_histogram() {
        let metrics = AgentMetrics::new();
        metrics.record_conntrack_sweep(100, 7, 0.02);
        metrics.record_conntrack_sweep(93, 0, 0.01);

        assert_eq!(metrics.sweeps_total.get(), 2);
        assert_eq!(metrics.entries_examined_total.get(), 193);
        assert_eq!(metrics.entries_deleted_total.get(), 7);

        let encoded = metrics.encode().unwrap();
        assert!(encoded.contains("ctsweeper_conntrack_entries_examined_total 193"));
        assert!(encoded.contains("ctsweeper_conntrack_sweep_duration_seconds_count 2"));
    }

    #[test]
    fn expiry_reasons_are_labelled() {
        let metrics = AgentMetrics::new();
        metrics.record_conntrack_expiry("udp_idle");
        metrics.record_conntrack_expiry("udp_idle");
        metrics.record_conntrack_expiry("stale_nat_backend");

        let encoded = metrics.encode().unwrap();
        assert!(encoded.contains("ctsweeper_conntrack_expired_total{reason=\"udp_idle\"} 2"));
        assert!(encoded.contains("reason=\"stale_nat_backend\""));
    }

    #[test]
    fn sweep_errors_are_labelled() {
        let metrics = AgentMetrics::new();
        metrics.record_conntrack_sweep_error("iteration");
        metrics.record_conntrack_sweep_error("delete");

        let encoded = metrics.encode().unwrap();
        assert!(encoded.contains("ctsweeper_conntrack_sweep_errors_total"));
        assert!(encoded.contains("kind=\"iteration\""));
        assert!(encoded.contains("kind=\"delete\""));
    }

    #[test]
    fn entries_gauge_saturates() {
        let metrics = AgentMetrics::new();
        metrics.set_conntrack_entries(42);
        assert_eq!(metrics.entries.get(), 42);
        metrics.set_conntrack_entries(u64::MAX);
        assert_eq!(metrics.entries.get(), i64::MAX);
    }

    #[test]
    fn metrics_port_trait_impl() {
        let metrics = AgentMetrics::new();
        let port: &dyn MetricsPort = &metrics;
        port.record_conntrack_sweep(1, 1, 0.001);
        port.record_conntrack_expiry("forced");
        port.record_conntrack_sweep_error("fatal");
        port.set_conntrack_entries(0);
        assert_eq!(metrics.sweeps_total.get(), 1);
    }
}
