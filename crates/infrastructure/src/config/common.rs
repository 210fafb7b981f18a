//! Shared parsing helpers and error types used across config modules.

use std::net::SocketAddrV4;
use std::path::Path;

use tracing::warn;

use domain::common::entity::Protocol;

// ── Security limits ────────────────────────────────────────────────

/// Maximum stale-NAT services in the static backend table.
pub(super) const MAX_NAT_SERVICES: usize = 4096;
/// Maximum backends listed for a single frontend.
pub(super) const MAX_BACKENDS_PER_SERVICE: usize = 1024;

// ── Config errors ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(String),

    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },
}

impl From<serde_yaml_ng::Error> for ConfigError {
    fn from(e: serde_yaml_ng::Error) -> Self {
        Self::Yaml(e.to_string())
    }
}

impl ConfigError {
    pub(super) fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ── Shared serde defaults ──────────────────────────────────────────

pub(super) fn default_true() -> bool {
    true
}

// ── Parsing helpers ────────────────────────────────────────────────

/// Parse an `"a.b.c.d:port"` endpoint.
pub fn parse_endpoint(field: &str, s: &str) -> Result<SocketAddrV4, ConfigError> {
    s.trim()
        .parse::<SocketAddrV4>()
        .map_err(|e| ConfigError::validation(field, format!("invalid endpoint '{s}': {e}")))
}

/// Parse a protocol name (`tcp`, `udp`, `icmp`) or a raw IP protocol
/// number.
pub(super) fn parse_protocol(s: &str) -> Result<Protocol, ()> {
    match s.to_lowercase().as_str() {
        "tcp" => Ok(Protocol::Tcp),
        "udp" => Ok(Protocol::Udp),
        "icmp" => Ok(Protocol::Icmp),
        other => other.parse::<u8>().map(Protocol::from_u8).map_err(|_| ()),
    }
}

#[cfg(unix)]
pub(super) fn warn_if_world_readable(path: &Path, label: &str) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode();
        if mode & 0o004 != 0 {
            warn!(
                path = %path.display(),
                mode = format!("{mode:04o}"),
                "{label} is world-readable, consider chmod 640 or stricter",
            );
        }
    }
}

#[cfg(not(unix))]
pub(super) fn warn_if_world_readable(_path: &Path, _label: &str) {}

/// Enforce a maximum count on a config collection.
pub(super) fn check_limit(field: &str, count: usize, max: usize) -> Result<(), ConfigError> {
    if count > max {
        return Err(ConfigError::validation(
            field,
            format!("count {count} exceeds maximum {max}"),
        ));
    }
    Ok(())
}
