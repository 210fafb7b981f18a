//! Agent configuration: structs, parsing, and validation.
//!
//! The config module is split across sub-modules:
//! - `common`: shared helpers and `ConfigError`
//! - `conntrack`: map location, sweep schedule, timeouts and stale-NAT table

mod common;
mod conntrack;

pub use common::{ConfigError, parse_endpoint};
pub use conntrack::{
    ConntrackConfig, NatService, NatServiceConfig, StaleNatConfig, SweepConfig, TimeoutsConfig,
};

use std::net::IpAddr;
use std::path::Path;

use domain::conntrack::timeouts::Timeouts;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_BIND_ADDRESS, DEFAULT_METRICS_PORT};
use common::warn_if_world_readable;

// ── Top-level config ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentInfo,

    #[serde(default)]
    pub conntrack: ConntrackConfig,
}

impl AgentConfig {
    /// Load config from a YAML file.
    ///
    /// On Unix, logs a warning if the config file is world-readable.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        warn_if_world_readable(path, "config file");
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the config after deserialization.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.metrics_port == 0 {
            return Err(ConfigError::Validation {
                field: "agent.metrics_port".to_string(),
                message: "port must be > 0".to_string(),
            });
        }
        self.agent.bind_ip()?;
        self.conntrack.validate()
    }

    /// Aging rules for the liveness scanner.
    pub fn timeouts(&self) -> Timeouts {
        self.conntrack.timeouts.to_domain()
    }

    /// Stale-NAT services, empty when the scanner is disabled.
    pub fn stale_nat_services(&self) -> Result<Vec<NatService>, ConfigError> {
        if !self.conntrack.stale_nat.enabled {
            return Ok(Vec::new());
        }
        self.conntrack.stale_nat.services()
    }
}

// ── Agent info ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentInfo {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// IP address the metrics and health server binds to.
    /// Defaults to `127.0.0.1` (localhost only).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: default_metrics_port(),
            bind_address: default_bind_address(),
        }
    }
}

impl AgentInfo {
    pub fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        self.bind_address
            .parse()
            .map_err(|e| ConfigError::Validation {
                field: "agent.bind_address".to_string(),
                message: format!("invalid IP address '{}': {e}", self.bind_address),
            })
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}
fn default_log_format() -> LogFormat {
    LogFormat::Json
}
fn default_metrics_port() -> u16 {
    DEFAULT_METRICS_PORT
}
fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

// ── Log level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Error => tracing::Level::ERROR,
            Self::Warn => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
            Self::Trace => tracing::Level::TRACE,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(format!(
                "invalid log level '{s}': expected error|warn|info|debug|trace"
            )),
        }
    }
}

// ── Log format ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "pretty" => Ok(Self::Text),
            _ => Err(format!("invalid log format '{s}': expected json|text")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use domain::common::entity::Protocol;

    use super::*;
    use crate::constants::DEFAULT_CT_MAP_PIN;

    // ── Minimal config loading ────────────────────────────────────

    #[test]
    fn load_minimal_config() {
        let yaml = r#"
agent:
  log_level: info
"#;
        let config = AgentConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.agent.log_level, LogLevel::Info);
        assert_eq!(config.agent.metrics_port, DEFAULT_METRICS_PORT);
        assert_eq!(config.conntrack.map_path, DEFAULT_CT_MAP_PIN);
        assert_eq!(config.timeouts(), Timeouts::default());
        assert!(config.stale_nat_services().unwrap().is_empty());
    }

    #[test]
    fn empty_mapping_uses_defaults() {
        let config = AgentConfig::from_yaml("{}").unwrap();
        assert_eq!(config.agent.bind_address, "127.0.0.1");
        assert_eq!(config.conntrack.sweep.interval_secs, 10);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(AgentConfig::from_yaml("firewall: {}").is_err());
        let yaml = r#"
conntrack:
  timeouts:
    udp_idle: 30
"#;
        assert!(matches!(
            AgentConfig::from_yaml(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn metrics_port_zero_fails() {
        let yaml = r#"
agent:
  metrics_port: 0
"#;
        assert!(matches!(
            AgentConfig::from_yaml(yaml),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn bad_bind_address_fails() {
        let yaml = r#"
agent:
  bind_address: localhost
"#;
        let err = AgentConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("agent.bind_address"));
    }

    // ── Full conntrack config ─────────────────────────────────────

    #[test]
    fn load_full_conntrack_config() {
        let yaml = r#"
agent:
  log_level: debug
  log_format: text
  metrics_port: 9200
  bind_address: 0.0.0.0
conntrack:
  map_path: /sys/fs/bpf/ct_test
  sweep:
    interval_secs: 30
    jitter_ms: 500
  timeouts:
    tcp_established_secs: 7200
    udp_idle_secs: 90
  stale_nat:
    enabled: true
    services:
      - frontend: 10.96.0.10:53
        protocol: udp
        backends: [10.1.2.3:53, 10.1.2.4:53]
      - frontend: 10.96.0.1:443
        backends: []
"#;
        let config = AgentConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.agent.log_format, LogFormat::Text);
        assert_eq!(config.agent.bind_ip().unwrap().to_string(), "0.0.0.0");
        assert_eq!(config.conntrack.map_path, "/sys/fs/bpf/ct_test");
        assert_eq!(config.conntrack.sweep.interval(), Duration::from_secs(30));
        assert_eq!(config.conntrack.sweep.jitter(), Duration::from_millis(500));

        let timeouts = config.timeouts();
        assert_eq!(timeouts.tcp_established, Duration::from_secs(7200));
        assert_eq!(timeouts.udp_idle, Duration::from_secs(90));
        assert_eq!(timeouts.icmp_idle, Timeouts::default().icmp_idle);

        let services = config.stale_nat_services().unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].protocol, Protocol::Udp);
        assert_eq!(services[1].protocol, Protocol::Tcp);
        assert!(services[1].backends.is_empty());
    }

    #[test]
    fn disabled_stale_nat_yields_no_services() {
        let yaml = r#"
conntrack:
  stale_nat:
    enabled: false
    services:
      - frontend: 10.96.0.10:53
"#;
        let config = AgentConfig::from_yaml(yaml).unwrap();
        assert!(config.stale_nat_services().unwrap().is_empty());
    }

    #[test]
    fn invalid_service_is_rejected_even_when_disabled() {
        let yaml = r#"
conntrack:
  stale_nat:
    services:
      - frontend: 10.96.0.10
"#;
        let err = AgentConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("services[0].frontend"));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "conntrack:\n  sweep:\n    interval_secs: 5\n    jitter_ms: 0").unwrap();
        let config = AgentConfig::load(file.path()).unwrap();
        assert_eq!(config.conntrack.sweep.interval_secs, 5);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AgentConfig::load(&dir.path().join("missing.yaml")),
            Err(ConfigError::Io(_))
        ));
    }

    // ── LogLevel ──────────────────────────────────────────────────

    #[test]
    fn log_level_as_str() {
        assert_eq!(LogLevel::Info.as_str(), "info");
        assert_eq!(LogLevel::Error.as_str(), "error");
        assert_eq!(LogLevel::Debug.as_str(), "debug");
    }

    #[test]
    fn log_level_to_tracing() {
        assert_eq!(LogLevel::Info.to_tracing_level(), tracing::Level::INFO);
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
    }

    #[test]
    fn log_level_from_str() {
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("TRACE".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    // ── LogFormat ─────────────────────────────────────────────────

    #[test]
    fn log_format_from_str() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("invalid".parse::<LogFormat>().is_err());
    }

    #[test]
    fn log_format_default_is_json() {
        let config = AgentConfig::default();
        assert_eq!(config.agent.log_format, LogFormat::Json);
        assert_eq!(config.agent.log_format.to_string(), "json");
    }
}
