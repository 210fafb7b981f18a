//! Conntrack sweeper configuration structs and conversion logic.

use std::net::SocketAddrV4;
use std::time::Duration;

use domain::common::entity::Protocol;
use domain::conntrack::timeouts::Timeouts;
use serde::{Deserialize, Serialize};

use super::common::{
    ConfigError, MAX_BACKENDS_PER_SERVICE, MAX_NAT_SERVICES, check_limit, default_true,
    parse_endpoint, parse_protocol,
};
use crate::constants::{
    DEFAULT_CT_MAP_PIN, DEFAULT_SWEEP_INTERVAL_SECS, DEFAULT_SWEEP_JITTER_MS, MAX_SWEEP_INTERVAL,
    MIN_SWEEP_INTERVAL,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConntrackConfig {
    /// bpffs path of the pinned conntrack table.
    #[serde(default = "default_map_path")]
    pub map_path: String,

    #[serde(default)]
    pub sweep: SweepConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub stale_nat: StaleNatConfig,
}

fn default_map_path() -> String {
    DEFAULT_CT_MAP_PIN.to_string()
}

impl Default for ConntrackConfig {
    fn default() -> Self {
        Self {
            map_path: default_map_path(),
            sweep: SweepConfig::default(),
            timeouts: TimeoutsConfig::default(),
            stale_nat: StaleNatConfig::default(),
        }
    }
}

impl ConntrackConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.map_path.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: "conntrack.map_path".to_string(),
                message: "map path must not be empty".to_string(),
            });
        }
        self.sweep.validate()?;
        self.timeouts.validate()?;
        self.stale_nat.validate()
    }
}

// ── Sweep schedule ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Upper bound of the random delay added to every interval.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}
fn default_jitter_ms() -> u64 {
    DEFAULT_SWEEP_JITTER_MS
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval() < MIN_SWEEP_INTERVAL {
            return Err(ConfigError::Validation {
                field: "conntrack.sweep.interval_secs".to_string(),
                message: "interval must be > 0".to_string(),
            });
        }
        if self.interval() > MAX_SWEEP_INTERVAL {
            return Err(ConfigError::Validation {
                field: "conntrack.sweep.interval_secs".to_string(),
                message: format!(
                    "interval {}s exceeds the {}s maximum",
                    self.interval_secs,
                    MAX_SWEEP_INTERVAL.as_secs()
                ),
            });
        }
        if self.jitter() >= self.interval() {
            return Err(ConfigError::Validation {
                field: "conntrack.sweep.jitter_ms".to_string(),
                message: format!(
                    "jitter {}ms must be shorter than the {}s interval",
                    self.jitter_ms, self.interval_secs
                ),
            });
        }
        Ok(())
    }
}

// ── Timeouts ───────────────────────────────────────────────────────

/// Every aging rule in whole seconds. Omitted fields keep the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutsConfig {
    #[serde(default = "d_creation_grace")]
    pub creation_grace_secs: u64,
    #[serde(default = "d_tcp_handshake")]
    pub tcp_handshake_secs: u64,
    #[serde(default = "d_tcp_established")]
    pub tcp_established_secs: u64,
    #[serde(default = "d_tcp_half_closed")]
    pub tcp_half_closed_secs: u64,
    #[serde(default = "d_tcp_fins_seen")]
    pub tcp_fins_seen_secs: u64,
    #[serde(default = "d_tcp_reset_seen")]
    pub tcp_reset_seen_secs: u64,
    #[serde(default = "d_udp_idle")]
    pub udp_idle_secs: u64,
    #[serde(default = "d_icmp_idle")]
    pub icmp_idle_secs: u64,
    #[serde(default = "d_generic_idle")]
    pub generic_idle_secs: u64,
}

fn d_creation_grace() -> u64 {
    Timeouts::default().creation_grace.as_secs()
}
fn d_tcp_handshake() -> u64 {
    Timeouts::default().tcp_handshake.as_secs()
}
fn d_tcp_established() -> u64 {
    Timeouts::default().tcp_established.as_secs()
}
fn d_tcp_half_closed() -> u64 {
    Timeouts::default().tcp_half_closed.as_secs()
}
fn d_tcp_fins_seen() -> u64 {
    Timeouts::default().tcp_fins_seen.as_secs()
}
fn d_tcp_reset_seen() -> u64 {
    Timeouts::default().tcp_reset_seen.as_secs()
}
fn d_udp_idle() -> u64 {
    Timeouts::default().udp_idle.as_secs()
}
fn d_icmp_idle() -> u64 {
    Timeouts::default().icmp_idle.as_secs()
}
fn d_generic_idle() -> u64 {
    Timeouts::default().generic_idle.as_secs()
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            creation_grace_secs: d_creation_grace(),
            tcp_handshake_secs: d_tcp_handshake(),
            tcp_established_secs: d_tcp_established(),
            tcp_half_closed_secs: d_tcp_half_closed(),
            tcp_fins_seen_secs: d_tcp_fins_seen(),
            tcp_reset_seen_secs: d_tcp_reset_seen(),
            udp_idle_secs: d_udp_idle(),
            icmp_idle_secs: d_icmp_idle(),
            generic_idle_secs: d_generic_idle(),
        }
    }
}

impl TimeoutsConfig {
    pub fn to_domain(&self) -> Timeouts {
        Timeouts {
            creation_grace: Duration::from_secs(self.creation_grace_secs),
            tcp_handshake: Duration::from_secs(self.tcp_handshake_secs),
            tcp_established: Duration::from_secs(self.tcp_established_secs),
            tcp_half_closed: Duration::from_secs(self.tcp_half_closed_secs),
            tcp_fins_seen: Duration::from_secs(self.tcp_fins_seen_secs),
            tcp_reset_seen: Duration::from_secs(self.tcp_reset_seen_secs),
            udp_idle: Duration::from_secs(self.udp_idle_secs),
            icmp_idle: Duration::from_secs(self.icmp_idle_secs),
            generic_idle: Duration::from_secs(self.generic_idle_secs),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.to_domain().validate().map_err(|e| ConfigError::Validation {
            field: "conntrack.timeouts".to_string(),
            message: e.to_string(),
        })
    }
}

// ── Stale NAT ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaleNatConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub services: Vec<NatServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NatServiceConfig {
    /// `"a.b.c.d:port"` the clients connect to.
    pub frontend: String,

    #[serde(default = "default_service_protocol")]
    pub protocol: String,

    /// Backends currently selected for the frontend. May be empty, in
    /// which case every NAT entry towards the frontend is stale.
    #[serde(default)]
    pub backends: Vec<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_service_protocol() -> String {
    "tcp".to_string()
}

/// A frontend and the backends it may still be translated to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatService {
    pub protocol: Protocol,
    pub frontend: SocketAddrV4,
    pub backends: Vec<SocketAddrV4>,
}

impl StaleNatConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_limit("conntrack.stale_nat.services", self.services.len(), MAX_NAT_SERVICES)?;
        for (idx, service) in self.services.iter().enumerate() {
            service.to_domain(idx)?;
        }
        Ok(())
    }

    /// Enabled services, parsed.
    pub fn services(&self) -> Result<Vec<NatService>, ConfigError> {
        self.services
            .iter()
            .enumerate()
            .filter(|(_, s)| s.enabled)
            .map(|(idx, s)| s.to_domain(idx))
            .collect()
    }
}

impl NatServiceConfig {
    fn to_domain(&self, idx: usize) -> Result<NatService, ConfigError> {
        let prefix = format!("conntrack.stale_nat.services[{idx}]");

        let protocol = parse_protocol(&self.protocol).map_err(|()| ConfigError::Validation {
            field: format!("{prefix}.protocol"),
            message: format!("unknown protocol '{}': expected tcp, udp, icmp or 0-255", self.protocol),
        })?;
        let frontend = parse_endpoint(&format!("{prefix}.frontend"), &self.frontend)?;

        check_limit(
            &format!("{prefix}.backends"),
            self.backends.len(),
            MAX_BACKENDS_PER_SERVICE,
        )?;
        let backends = self
            .backends
            .iter()
            .enumerate()
            .map(|(i, b)| parse_endpoint(&format!("{prefix}.backends[{i}]"), b))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NatService {
            protocol,
            frontend,
            backends,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn service(frontend: &str, protocol: &str, backends: &[&str]) -> NatServiceConfig {
        NatServiceConfig {
            frontend: frontend.to_string(),
            protocol: protocol.to_string(),
            backends: backends.iter().map(ToString::to_string).collect(),
            enabled: true,
        }
    }

    #[test]
    fn defaults_match_domain_timeouts() {
        assert_eq!(TimeoutsConfig::default().to_domain(), Timeouts::default());
        let cfg = ConntrackConfig::default();
        assert_eq!(cfg.map_path, DEFAULT_CT_MAP_PIN);
        assert_eq!(cfg.sweep.interval(), Duration::from_secs(10));
        assert_eq!(cfg.sweep.jitter(), Duration::from_secs(1));
        assert!(!cfg.stale_nat.enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut cfg = ConntrackConfig::default();
        cfg.timeouts.udp_idle_secs = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("conntrack.timeouts"));
        assert!(err.to_string().contains("udp_idle"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut cfg = ConntrackConfig::default();
        cfg.sweep.interval_secs = 0;
        cfg.sweep.jitter_ms = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("interval_secs"));
    }

    #[test]
    fn oversized_interval_is_rejected() {
        let mut cfg = ConntrackConfig::default();
        cfg.sweep.interval_secs = u64::MAX;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("interval_secs"));
        assert!(err.to_string().contains("maximum"));

        cfg.sweep.interval_secs = 24 * 3600;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn jitter_must_fit_in_interval() {
        let mut cfg = ConntrackConfig::default();
        cfg.sweep.jitter_ms = 10_000;
        assert!(cfg.validate().is_err());
        cfg.sweep.jitter_ms = 0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_map_path_is_rejected() {
        let mut cfg = ConntrackConfig::default();
        cfg.map_path = "  ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn services_are_parsed() {
        let cfg = StaleNatConfig {
            enabled: true,
            services: vec![service("10.96.0.10:53", "udp", &["10.1.2.3:53", "10.1.2.4:53"])],
        };
        let services = cfg.services().unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].protocol, Protocol::Udp);
        assert_eq!(
            services[0].frontend,
            SocketAddrV4::new(Ipv4Addr::new(10, 96, 0, 10), 53)
        );
        assert_eq!(services[0].backends.len(), 2);
    }

    #[test]
    fn disabled_services_are_skipped() {
        let mut off = service("10.96.0.1:443", "tcp", &[]);
        off.enabled = false;
        let cfg = StaleNatConfig {
            enabled: true,
            services: vec![off, service("10.96.0.2:443", "tcp", &[])],
        };
        let services = cfg.services().unwrap();
        assert_eq!(services.len(), 1);
        assert!(services[0].backends.is_empty());
    }

    #[test]
    fn bad_service_fields_name_the_entry() {
        let cfg = StaleNatConfig {
            enabled: true,
            services: vec![
                service("10.96.0.1:443", "tcp", &[]),
                service("10.96.0.2:443", "sctp", &[]),
            ],
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("services[1].protocol"));

        let cfg = StaleNatConfig {
            enabled: true,
            services: vec![service("10.96.0.1:443", "tcp", &["10.0.0.1:80", "nope"])],
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("services[0].backends[1]"));
    }
}
