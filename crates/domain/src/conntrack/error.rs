use thiserror::Error;

use crate::common::error::DomainError;

#[derive(Debug, Error)]
pub enum ConntrackError {
    #[error("conntrack key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("conntrack value must be {expected} bytes, got {actual}")]
    InvalidValueLength { expected: usize, actual: usize },

    #[error("unknown conntrack entry type {0}")]
    UnknownEntryType(u8),

    #[error("conntrack key protocol {0} does not fit in 8 bits")]
    InvalidProtocol(u32),

    #[error("invalid timeout: {field} must be > 0")]
    InvalidTimeout { field: &'static str },

    #[error("conntrack map error: {0}")]
    Map(#[from] DomainError),
}

impl ConntrackError {
    /// Whether the error means the binary layout shared with the dataplane
    /// has drifted. Such errors are never recovered from. A key with an
    /// out-of-range protocol is a bad entry, not a bad layout.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidKeyLength { .. }
                | Self::InvalidValueLength { .. }
                | Self::UnknownEntryType(_)
        )
    }
}

impl From<ConntrackError> for DomainError {
    fn from(e: ConntrackError) -> Self {
        match e {
            ConntrackError::InvalidTimeout { .. } => DomainError::InvalidConfig(e.to_string()),
            ConntrackError::Map(inner) => inner,
            other => DomainError::EngineError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_errors_are_fatal() {
        assert!(
            ConntrackError::InvalidKeyLength {
                expected: 16,
                actual: 12
            }
            .is_fatal()
        );
        assert!(ConntrackError::UnknownEntryType(9).is_fatal());
    }

    #[test]
    fn map_errors_are_not_fatal() {
        let err = ConntrackError::from(DomainError::EngineError("EAGAIN".to_string()));
        assert!(!err.is_fatal());
        assert!(!ConntrackError::InvalidTimeout { field: "udp_idle" }.is_fatal());
        assert!(!ConntrackError::InvalidProtocol(300).is_fatal());
    }

    #[test]
    fn timeout_error_maps_to_invalid_config() {
        let err: DomainError = ConntrackError::InvalidTimeout { field: "icmp_idle" }.into();
        assert!(matches!(err, DomainError::InvalidConfig(_)));
    }
}
