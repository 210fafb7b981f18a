use std::time::Duration;

// ── Paths ──────────────────────────────────────────────────────────

pub const DEFAULT_CONFIG_PATH: &str = "/etc/ctsweeper/config.yaml";

/// Where the dataplane pins the IPv4 conntrack table.
pub const DEFAULT_CT_MAP_PIN: &str = "/sys/fs/bpf/tc/globals/ct_table_v4";

// ── Network defaults ───────────────────────────────────────────────

pub const DEFAULT_METRICS_PORT: u16 = 9091;
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

// ── Sweep schedule ─────────────────────────────────────────────────

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_SWEEP_JITTER_MS: u64 = 1_000;

/// Sweeps closer together than this would spin on a busy table.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Longest accepted interval; no entry outlives a day without a sweep.
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 3600);

// ── Timeouts ───────────────────────────────────────────────────────

pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_are_absolute() {
        assert!(DEFAULT_CONFIG_PATH.starts_with('/'));
        assert!(DEFAULT_CT_MAP_PIN.starts_with("/sys/fs/bpf/"));
    }

    #[test]
    fn default_interval_respects_floor() {
        assert!(Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS) >= MIN_SWEEP_INTERVAL);
        assert!(Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS) <= MAX_SWEEP_INTERVAL);
        assert!(Duration::from_millis(DEFAULT_SWEEP_JITTER_MS) < Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS));
    }

    #[test]
    fn shutdown_timeout_is_reasonable() {
        assert!(GRACEFUL_SHUTDOWN_TIMEOUT.as_secs() >= 1);
        assert!(GRACEFUL_SHUTDOWN_TIMEOUT.as_secs() <= 30);
    }
}
