use std::net::{Ipv4Addr, SocketAddrV4};

use bitflags::bitflags;
use ebpf_common::conntrack::{
    CT_FLAG_BA, CT_FLAG_DSR_FWD, CT_FLAG_EXT_LOCAL, CT_FLAG_NAT_OUT, CT_FLAG_NP_FWD,
    CT_FLAG_SKIP_FIB, CT_FLAG_TRUST_DNS, CT_FLAG_VIA_NAT_IF, CT_LEG_ACK_SEEN, CT_LEG_FIN_SEEN,
    CT_LEG_OPENER, CT_LEG_RST_SEEN, CT_LEG_SYN_SEEN, CT_LEG_WHITELISTED, CT_TYPE_NAT_FWD,
    CT_TYPE_NAT_REV, CT_TYPE_NORMAL,
};

use crate::common::entity::Protocol;

// ── Key ─────────────────────────────────────────────────────────────

/// Conntrack table key (userspace view).
///
/// A and B carry no direction. `reversed()` describes the same logical flow
/// but is a different table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    pub protocol: Protocol,
    pub addr_a: Ipv4Addr,
    pub port_a: u16,
    pub addr_b: Ipv4Addr,
    pub port_b: u16,
}

impl Key {
    pub fn new(protocol: Protocol, a: SocketAddrV4, b: SocketAddrV4) -> Self {
        Self {
            protocol,
            addr_a: *a.ip(),
            port_a: a.port(),
            addr_b: *b.ip(),
            port_b: b.port(),
        }
    }

    pub fn endpoint_a(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.addr_a, self.port_a)
    }

    pub fn endpoint_b(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.addr_b, self.port_b)
    }

    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            protocol: self.protocol,
            addr_a: self.addr_b,
            port_a: self.port_b,
            addr_b: self.addr_a,
            port_b: self.port_a,
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} <-> {}",
            self.protocol,
            self.endpoint_a(),
            self.endpoint_b()
        )
    }
}

// ── Flags ───────────────────────────────────────────────────────────

bitflags! {
    /// Per-leg TCP and policy state. Bit positions are shared with the
    /// dataplane; unknown bits are carried through untouched.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct LegFlags: u32 {
        const SYN_SEEN = CT_LEG_SYN_SEEN;
        const ACK_SEEN = CT_LEG_ACK_SEEN;
        const FIN_SEEN = CT_LEG_FIN_SEEN;
        const RST_SEEN = CT_LEG_RST_SEEN;
        /// The first packet in this direction passed policy.
        const WHITELISTED = CT_LEG_WHITELISTED;
        /// This direction opened the flow.
        const OPENER = CT_LEG_OPENER;
    }
}

bitflags! {
    /// Whole-entry flags (value byte 17).
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct EntryFlags: u8 {
        const NAT_OUT = CT_FLAG_NAT_OUT;
        const DSR_FWD = CT_FLAG_DSR_FWD;
        const NP_FWD = CT_FLAG_NP_FWD;
        const SKIP_FIB = CT_FLAG_SKIP_FIB;
        const TRUST_DNS = CT_FLAG_TRUST_DNS;
        const EXT_LOCAL = CT_FLAG_EXT_LOCAL;
        const VIA_NAT_IF = CT_FLAG_VIA_NAT_IF;
        const BA = CT_FLAG_BA;
    }
}

// ── Legs ────────────────────────────────────────────────────────────

/// One traffic direction of a flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Leg {
    pub bytes: u64,
    pub packets: u32,
    pub seqno: u32,
    pub flags: LegFlags,
    pub ifindex: u32,
}

/// The two legs of a bidirectional entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Legs {
    pub a_to_b: Leg,
    pub b_to_a: Leg,
}

impl Legs {
    /// At least one leg has every bit in `flags`.
    pub fn any(&self, flags: LegFlags) -> bool {
        self.a_to_b.flags.contains(flags) || self.b_to_a.flags.contains(flags)
    }

    /// Both legs have every bit in `flags`.
    pub fn both(&self, flags: LegFlags) -> bool {
        self.a_to_b.flags.contains(flags) && self.b_to_a.flags.contains(flags)
    }

    /// Number of legs (0..=2) having every bit in `flags`.
    pub fn count(&self, flags: LegFlags) -> u8 {
        u8::from(self.a_to_b.flags.contains(flags)) + u8::from(self.b_to_a.flags.contains(flags))
    }

    #[must_use]
    pub fn swapped(&self) -> Self {
        Self {
            a_to_b: self.b_to_a,
            b_to_a: self.a_to_b,
        }
    }
}

// ── Value ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    Normal,
    NatForward,
    NatReverse,
}

impl EntryType {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            CT_TYPE_NORMAL => Some(Self::Normal),
            CT_TYPE_NAT_FWD => Some(Self::NatForward),
            CT_TYPE_NAT_REV => Some(Self::NatReverse),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Normal => CT_TYPE_NORMAL,
            Self::NatForward => CT_TYPE_NAT_FWD,
            Self::NatReverse => CT_TYPE_NAT_REV,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::NatForward => "nat_forward",
            Self::NatReverse => "nat_reverse",
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// NAT metadata kept on a `NatReverse` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NatReverseInfo {
    /// Destination before DNAT (the frontend).
    pub orig_dst: Ipv4Addr,
    pub orig_dport: u16,
    /// Source port before SNAT, when it was rewritten.
    pub orig_sport: Option<u16>,
    pub tunnel_ip: Ipv4Addr,
}

impl Default for NatReverseInfo {
    fn default() -> Self {
        Self {
            orig_dst: Ipv4Addr::UNSPECIFIED,
            orig_dport: 0,
            orig_sport: None,
            tunnel_ip: Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// Type-dependent body of a conntrack value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryData {
    Normal(Legs),
    /// Pointer to the `NatReverse` entry that holds the flow's state.
    NatForward {
        reverse_key: Key,
        nat_sport: u16,
    },
    NatReverse {
        legs: Legs,
        nat: NatReverseInfo,
    },
}

/// Conntrack table value (userspace view).
///
/// `created` and `last_seen` are kernel monotonic nanoseconds, not wall-clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value {
    pub created: i64,
    pub last_seen: i64,
    pub flags: EntryFlags,
    pub data: EntryData,
}

impl Value {
    pub fn entry_type(&self) -> EntryType {
        match self.data {
            EntryData::Normal(_) => EntryType::Normal,
            EntryData::NatForward { .. } => EntryType::NatForward,
            EntryData::NatReverse { .. } => EntryType::NatReverse,
        }
    }

    /// Legs of a `Normal` or `NatReverse` entry; `None` for `NatForward`.
    pub fn legs(&self) -> Option<&Legs> {
        match &self.data {
            EntryData::Normal(legs) | EntryData::NatReverse { legs, .. } => Some(legs),
            EntryData::NatForward { .. } => None,
        }
    }

    pub fn reverse_key(&self) -> Option<&Key> {
        match &self.data {
            EntryData::NatForward { reverse_key, .. } => Some(reverse_key),
            _ => None,
        }
    }

    pub fn is_forward_dsr(&self) -> bool {
        self.flags.contains(EntryFlags::DSR_FWD)
    }

    /// The same entry with its two legs exchanged. `NatForward` is unchanged.
    #[must_use]
    pub fn swap_legs(&self) -> Self {
        let data = match self.data {
            EntryData::Normal(legs) => EntryData::Normal(legs.swapped()),
            EntryData::NatReverse { legs, nat } => EntryData::NatReverse {
                legs: legs.swapped(),
                nat,
            },
            fwd @ EntryData::NatForward { .. } => fwd,
        };
        Self { data, ..*self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> Key {
        Key::new(
            Protocol::Tcp,
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 40000),
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 443),
        )
    }

    fn leg(flags: LegFlags) -> Leg {
        Leg {
            flags,
            ..Leg::default()
        }
    }

    #[test]
    fn key_reversed_swaps_endpoints() {
        let key = sample_key();
        let rev = key.reversed();
        assert_eq!(rev.endpoint_a(), key.endpoint_b());
        assert_eq!(rev.endpoint_b(), key.endpoint_a());
        assert_ne!(rev, key);
        assert_eq!(rev.reversed(), key);
    }

    #[test]
    fn key_display() {
        assert_eq!(
            sample_key().to_string(),
            "tcp 10.0.0.1:40000 <-> 10.0.0.2:443"
        );
    }

    #[test]
    fn entry_type_roundtrip() {
        for t in [
            EntryType::Normal,
            EntryType::NatForward,
            EntryType::NatReverse,
        ] {
            assert_eq!(EntryType::from_u8(t.to_u8()), Some(t));
        }
        assert_eq!(EntryType::from_u8(3), None);
    }

    #[test]
    fn legs_any_both_count() {
        let legs = Legs {
            a_to_b: leg(LegFlags::SYN_SEEN | LegFlags::ACK_SEEN | LegFlags::FIN_SEEN),
            b_to_a: leg(LegFlags::SYN_SEEN | LegFlags::ACK_SEEN),
        };
        assert!(legs.both(LegFlags::SYN_SEEN | LegFlags::ACK_SEEN));
        assert!(legs.any(LegFlags::FIN_SEEN));
        assert!(!legs.both(LegFlags::FIN_SEEN));
        assert_eq!(legs.count(LegFlags::FIN_SEEN), 1);
        assert_eq!(legs.count(LegFlags::RST_SEEN), 0);
    }

    #[test]
    fn swap_legs_exchanges_directions() {
        let value = Value {
            created: 1,
            last_seen: 2,
            flags: EntryFlags::empty(),
            data: EntryData::Normal(Legs {
                a_to_b: leg(LegFlags::OPENER),
                b_to_a: leg(LegFlags::WHITELISTED),
            }),
        };
        let swapped = value.swap_legs();
        let legs = swapped.legs().unwrap();
        assert_eq!(legs.a_to_b.flags, LegFlags::WHITELISTED);
        assert_eq!(legs.b_to_a.flags, LegFlags::OPENER);
        assert_eq!(swapped.swap_legs(), value);
    }

    #[test]
    fn nat_forward_has_no_legs() {
        let value = Value {
            created: 0,
            last_seen: 0,
            flags: EntryFlags::NAT_OUT,
            data: EntryData::NatForward {
                reverse_key: sample_key(),
                nat_sport: 0,
            },
        };
        assert!(value.legs().is_none());
        assert_eq!(value.reverse_key(), Some(&sample_key()));
        assert_eq!(value.swap_legs(), value);
        assert_eq!(value.entry_type(), EntryType::NatForward);
    }

    #[test]
    fn unknown_leg_bits_are_retained() {
        let flags = LegFlags::from_bits_retain(0x8000_0001);
        assert!(flags.contains(LegFlags::SYN_SEEN));
        assert_eq!(flags.bits(), 0x8000_0001);
    }
}
