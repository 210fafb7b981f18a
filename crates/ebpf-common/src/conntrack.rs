//! Connection tracking layouts shared between the kernel dataplane and
//! userspace.
//!
//! The dataplane owns the table; userspace only reads, classifies and deletes.
//! Every offset below is part of a versioned binary contract with the kernel
//! program and must never be renumbered. The `#[repr(C)]` structs exist to pin
//! those offsets: the `CT_*_OFFSET` constants are derived from them and the
//! sizes are checked at compile time.

use core::mem::{offset_of, size_of};

// ── Entry types ──────────────────────────────────────────────────────

pub const CT_TYPE_NORMAL: u8 = 0;
pub const CT_TYPE_NAT_FWD: u8 = 1;
pub const CT_TYPE_NAT_REV: u8 = 2;

// ── Entry flags (value byte 17) ──────────────────────────────────────

pub const CT_FLAG_NAT_OUT: u8 = 0x01;
pub const CT_FLAG_DSR_FWD: u8 = 0x02;
pub const CT_FLAG_NP_FWD: u8 = 0x04;
pub const CT_FLAG_SKIP_FIB: u8 = 0x08;
pub const CT_FLAG_TRUST_DNS: u8 = 0x10;
pub const CT_FLAG_EXT_LOCAL: u8 = 0x20;
pub const CT_FLAG_VIA_NAT_IF: u8 = 0x40;
pub const CT_FLAG_BA: u8 = 0x80;

// ── Leg flags ────────────────────────────────────────────────────────

pub const CT_LEG_SYN_SEEN: u32 = 1 << 0;
pub const CT_LEG_ACK_SEEN: u32 = 1 << 1;
pub const CT_LEG_FIN_SEEN: u32 = 1 << 2;
pub const CT_LEG_RST_SEEN: u32 = 1 << 3;
pub const CT_LEG_WHITELISTED: u32 = 1 << 4;
pub const CT_LEG_OPENER: u32 = 1 << 5;

// ── Conntrack key (16 bytes) ──────────────────────────────────────────

/// 5-tuple key. Addresses are network byte order, the protocol and ports are
/// little-endian host order. A/B carry no direction; the reversed tuple is a
/// distinct key.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtKey {
    pub protocol: u32,
    pub addr_a: [u8; 4],
    pub addr_b: [u8; 4],
    pub port_a: u16,
    pub port_b: u16,
}

// ── Per-direction leg (24 bytes) ──────────────────────────────────────

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtLeg {
    pub bytes: u64,
    pub packets: u32,
    pub seqno: u32,
    /// `CT_LEG_*` bits.
    pub flags: u32,
    pub ifindex: u32,
}

// ── Value header (24 bytes) ───────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtValueHeader {
    /// Kernel monotonic clock (`bpf_ktime_get_ns`) at creation.
    pub created: i64,
    /// Kernel monotonic clock at the most recent packet.
    pub last_seen: i64,
    /// `CT_TYPE_*`.
    pub entry_type: u8,
    /// `CT_FLAG_*`.
    pub flags: u8,
    pub _pad: [u8; 6],
}

// ── Value body for NORMAL and NAT_REV (88 bytes) ──────────────────────

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtValueLegs {
    pub header: CtValueHeader,
    pub a_to_b: CtLeg,
    pub b_to_a: CtLeg,
    /// NAT_REV only: pre-DNAT destination address.
    pub orig_dst: [u8; 4],
    /// NAT_REV only: pre-DNAT destination port.
    pub orig_dport: u16,
    /// NAT_REV only: pre-SNAT source port, 0 when unchanged.
    pub orig_sport: u16,
    /// NAT_REV only: tunnel peer for forwarded flows.
    pub tun_ip: [u8; 4],
    pub _pad: [u8; 4],
}

// ── Value body for NAT_FWD (88 bytes) ─────────────────────────────────

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtValueNatFwd {
    pub header: CtValueHeader,
    /// Key of the NAT_REV entry holding this flow's state.
    pub rev_key: CtKey,
    pub nat_sport: u16,
    pub _pad: [u8; 46],
}

// ── Sizes and offsets ────────────────────────────────────────────────

pub const CT_KEY_SIZE: usize = size_of::<CtKey>();
pub const CT_LEG_SIZE: usize = size_of::<CtLeg>();
pub const CT_VALUE_SIZE: usize = size_of::<CtValueLegs>();

pub const CT_KEY_PROTO_OFFSET: usize = offset_of!(CtKey, protocol);
pub const CT_KEY_ADDR_A_OFFSET: usize = offset_of!(CtKey, addr_a);
pub const CT_KEY_ADDR_B_OFFSET: usize = offset_of!(CtKey, addr_b);
pub const CT_KEY_PORT_A_OFFSET: usize = offset_of!(CtKey, port_a);
pub const CT_KEY_PORT_B_OFFSET: usize = offset_of!(CtKey, port_b);

pub const CT_LEG_BYTES_OFFSET: usize = offset_of!(CtLeg, bytes);
pub const CT_LEG_PACKETS_OFFSET: usize = offset_of!(CtLeg, packets);
pub const CT_LEG_SEQNO_OFFSET: usize = offset_of!(CtLeg, seqno);
pub const CT_LEG_FLAGS_OFFSET: usize = offset_of!(CtLeg, flags);
pub const CT_LEG_IFINDEX_OFFSET: usize = offset_of!(CtLeg, ifindex);

pub const CT_VALUE_CREATED_OFFSET: usize = offset_of!(CtValueHeader, created);
pub const CT_VALUE_LAST_SEEN_OFFSET: usize = offset_of!(CtValueHeader, last_seen);
pub const CT_VALUE_TYPE_OFFSET: usize = offset_of!(CtValueHeader, entry_type);
pub const CT_VALUE_FLAGS_OFFSET: usize = offset_of!(CtValueHeader, flags);

pub const CT_VALUE_LEG_AB_OFFSET: usize = offset_of!(CtValueLegs, a_to_b);
pub const CT_VALUE_LEG_BA_OFFSET: usize = offset_of!(CtValueLegs, b_to_a);
pub const CT_VALUE_ORIG_DST_OFFSET: usize = offset_of!(CtValueLegs, orig_dst);
pub const CT_VALUE_ORIG_DPORT_OFFSET: usize = offset_of!(CtValueLegs, orig_dport);
pub const CT_VALUE_ORIG_SPORT_OFFSET: usize = offset_of!(CtValueLegs, orig_sport);
pub const CT_VALUE_TUN_IP_OFFSET: usize = offset_of!(CtValueLegs, tun_ip);

pub const CT_VALUE_REV_KEY_OFFSET: usize = offset_of!(CtValueNatFwd, rev_key);
pub const CT_VALUE_NAT_SPORT_OFFSET: usize = offset_of!(CtValueNatFwd, nat_sport);

const _: () = assert!(CT_KEY_SIZE == 16);
const _: () = assert!(CT_LEG_SIZE == 24);
const _: () = assert!(size_of::<CtValueHeader>() == 24);
const _: () = assert!(CT_VALUE_SIZE == 88);
const _: () = assert!(size_of::<CtValueNatFwd>() == CT_VALUE_SIZE);
const _: () = assert!(CT_VALUE_LEG_AB_OFFSET == CT_VALUE_REV_KEY_OFFSET);

// ── Tests ────────────────────────────────────────────────────────────
