use std::time::Duration;

use super::entity::{LegFlags, Legs, Value};
use super::error::ConntrackError;
use crate::common::entity::Protocol;

/// Why an entry was judged dead. Rendered as a stable label for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpiryReason {
    CreationGrace,
    TcpHandshake,
    TcpEstablished,
    TcpHalfClosed,
    TcpFinsSeen,
    TcpResetSeen,
    UdpIdle,
    IcmpIdle,
    GenericIdle,
    /// Drain mode: every entry is expired.
    Forced,
}

impl ExpiryReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreationGrace => "creation_grace",
            Self::TcpHandshake => "tcp_handshake",
            Self::TcpEstablished => "tcp_established",
            Self::TcpHalfClosed => "tcp_half_closed",
            Self::TcpFinsSeen => "tcp_fins_seen",
            Self::TcpResetSeen => "tcp_reset_seen",
            Self::UdpIdle => "udp_idle",
            Self::IcmpIdle => "icmp_idle",
            Self::GenericIdle => "generic_idle",
            Self::Forced => "forced",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::CreationGrace => "no leg passed policy within the creation grace period",
            Self::TcpHandshake => "TCP handshake did not complete in time",
            Self::TcpEstablished => "established TCP connection went idle",
            Self::TcpHalfClosed => "half-closed TCP connection went idle",
            Self::TcpFinsSeen => "TCP connection closed by both sides",
            Self::TcpResetSeen => "TCP connection was reset",
            Self::UdpIdle => "UDP flow went idle",
            Self::IcmpIdle => "ICMP flow went idle",
            Self::GenericIdle => "flow went idle",
            Self::Forced => "expiry forced",
        }
    }
}

impl std::fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-protocol aging rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// UDP with no whitelisted leg, measured from `created`.
    pub creation_grace: Duration,
    /// TCP handshake incomplete, measured from `created`.
    pub tcp_handshake: Duration,
    pub tcp_established: Duration,
    /// Exactly one side sent FIN.
    pub tcp_half_closed: Duration,
    pub tcp_fins_seen: Duration,
    pub tcp_reset_seen: Duration,
    pub udp_idle: Duration,
    pub icmp_idle: Duration,
    pub generic_idle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            creation_grace: Duration::from_secs(10),
            tcp_handshake: Duration::from_secs(20),
            tcp_established: Duration::from_secs(3600),
            tcp_half_closed: Duration::from_secs(3600),
            tcp_fins_seen: Duration::from_secs(30),
            tcp_reset_seen: Duration::from_secs(40),
            udp_idle: Duration::from_secs(60),
            icmp_idle: Duration::from_secs(5),
            generic_idle: Duration::from_secs(600),
        }
    }
}

/// `now - since > timeout`. A timestamp ahead of `now` never exceeds.
fn exceeded(now_ns: i64, since_ns: i64, timeout: Duration) -> bool {
    u128::try_from(now_ns.saturating_sub(since_ns))
        .is_ok_and(|elapsed| elapsed > timeout.as_nanos())
}

impl Timeouts {
    pub fn validate(&self) -> Result<(), ConntrackError> {
        let fields = [
            ("creation_grace", self.creation_grace),
            ("tcp_handshake", self.tcp_handshake),
            ("tcp_established", self.tcp_established),
            ("tcp_half_closed", self.tcp_half_closed),
            ("tcp_fins_seen", self.tcp_fins_seen),
            ("tcp_reset_seen", self.tcp_reset_seen),
            ("udp_idle", self.udp_idle),
            ("icmp_idle", self.icmp_idle),
            ("generic_idle", self.generic_idle),
        ];
        for (field, value) in fields {
            if value.is_zero() {
                return Err(ConntrackError::InvalidTimeout { field });
            }
        }
        Ok(())
    }

    /// Judge an entry at kernel time `now_ns`. `Some` means expired.
    ///
    /// The verdict depends only on which flags are present on how many legs,
    /// never on which slot holds which leg.
    pub fn is_expired(&self, now_ns: i64, proto: Protocol, value: &Value) -> Option<ExpiryReason> {
        // NatForward carries no legs and ages on its own header.
        let Some(legs) = value.legs() else {
            return self.idle_expired(now_ns, proto, value.last_seen);
        };
        match proto {
            Protocol::Tcp => self.tcp_expired(now_ns, value, legs),
            Protocol::Udp => self.udp_expired(now_ns, value, legs),
            Protocol::Icmp | Protocol::Other(_) => self.idle_expired(now_ns, proto, value.last_seen),
        }
    }

    fn tcp_expired(&self, now_ns: i64, value: &Value, legs: &Legs) -> Option<ExpiryReason> {
        let (established, fins) = if value.is_forward_dsr() {
            let fin = legs.any(LegFlags::FIN_SEEN);
            (legs.any(LegFlags::SYN_SEEN | LegFlags::ACK_SEEN), if fin { 2 } else { 0 })
        } else {
            (
                legs.both(LegFlags::SYN_SEEN | LegFlags::ACK_SEEN),
                legs.count(LegFlags::FIN_SEEN),
            )
        };

        let (since, timeout, reason) = if legs.any(LegFlags::RST_SEEN) {
            (value.last_seen, self.tcp_reset_seen, ExpiryReason::TcpResetSeen)
        } else if fins == 2 {
            (value.last_seen, self.tcp_fins_seen, ExpiryReason::TcpFinsSeen)
        } else if fins == 1 {
            (value.last_seen, self.tcp_half_closed, ExpiryReason::TcpHalfClosed)
        } else if established {
            (value.last_seen, self.tcp_established, ExpiryReason::TcpEstablished)
        } else {
            (value.created, self.tcp_handshake, ExpiryReason::TcpHandshake)
        };
        exceeded(now_ns, since, timeout).then_some(reason)
    }

    fn udp_expired(&self, now_ns: i64, value: &Value, legs: &Legs) -> Option<ExpiryReason> {
        if legs.any(LegFlags::WHITELISTED) {
            exceeded(now_ns, value.last_seen, self.udp_idle).then_some(ExpiryReason::UdpIdle)
        } else {
            exceeded(now_ns, value.created, self.creation_grace)
                .then_some(ExpiryReason::CreationGrace)
        }
    }

    /// Idle bucket for entries judged on `last_seen` alone.
    fn idle_expired(&self, now_ns: i64, proto: Protocol, last_seen: i64) -> Option<ExpiryReason> {
        let (timeout, reason) = match proto {
            Protocol::Tcp => (self.tcp_established, ExpiryReason::TcpEstablished),
            Protocol::Udp => (self.udp_idle, ExpiryReason::UdpIdle),
            Protocol::Icmp => (self.icmp_idle, ExpiryReason::IcmpIdle),
            Protocol::Other(_) => (self.generic_idle, ExpiryReason::GenericIdle),
        };
        exceeded(now_ns, last_seen, timeout).then_some(reason)
    }
}
