//! Byte-exact encoding of conntrack keys and values.
//!
//! Offsets come from the `#[repr(C)]` layouts in `ebpf_common::conntrack`.
//! Decoding validates the length and the type tag and nothing else; both
//! failures mean the layout shared with the dataplane has drifted.

use std::net::Ipv4Addr;

use ebpf_common::conntrack::{
    CT_KEY_ADDR_A_OFFSET, CT_KEY_ADDR_B_OFFSET, CT_KEY_PORT_A_OFFSET, CT_KEY_PORT_B_OFFSET,
    CT_KEY_PROTO_OFFSET, CT_KEY_SIZE, CT_LEG_BYTES_OFFSET, CT_LEG_FLAGS_OFFSET,
    CT_LEG_IFINDEX_OFFSET, CT_LEG_PACKETS_OFFSET, CT_LEG_SEQNO_OFFSET, CT_LEG_SIZE,
    CT_VALUE_CREATED_OFFSET, CT_VALUE_FLAGS_OFFSET, CT_VALUE_LAST_SEEN_OFFSET,
    CT_VALUE_LEG_AB_OFFSET, CT_VALUE_LEG_BA_OFFSET, CT_VALUE_NAT_SPORT_OFFSET,
    CT_VALUE_ORIG_DPORT_OFFSET, CT_VALUE_ORIG_DST_OFFSET, CT_VALUE_ORIG_SPORT_OFFSET,
    CT_VALUE_REV_KEY_OFFSET, CT_VALUE_SIZE, CT_VALUE_TUN_IP_OFFSET, CT_VALUE_TYPE_OFFSET,
};

use super::entity::{
    EntryData, EntryFlags, EntryType, Key, Leg, LegFlags, Legs, NatReverseInfo, Value,
};
use super::error::ConntrackError;
use crate::common::entity::Protocol;

pub type KeyBytes = [u8; CT_KEY_SIZE];
pub type ValueBytes = [u8; CT_VALUE_SIZE];

// ── Field accessors ─────────────────────────────────────────────────

fn array<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}

fn put(buf: &mut [u8], offset: usize, bytes: &[u8]) {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(array(buf, offset))
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(array(buf, offset))
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(array(buf, offset))
}

fn read_i64(buf: &[u8], offset: usize) -> i64 {
    i64::from_le_bytes(array(buf, offset))
}

/// Addresses are stored in network byte order, i.e. octet order.
fn read_addr(buf: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::from(array::<4>(buf, offset))
}

// ── Key ─────────────────────────────────────────────────────────────

pub fn decode_key(bytes: &[u8]) -> Result<Key, ConntrackError> {
    if bytes.len() != CT_KEY_SIZE {
        return Err(ConntrackError::InvalidKeyLength {
            expected: CT_KEY_SIZE,
            actual: bytes.len(),
        });
    }
    let raw_proto = read_u32(bytes, CT_KEY_PROTO_OFFSET);
    let proto = u8::try_from(raw_proto).map_err(|_| ConntrackError::InvalidProtocol(raw_proto))?;

    Ok(Key {
        protocol: Protocol::from_u8(proto),
        addr_a: read_addr(bytes, CT_KEY_ADDR_A_OFFSET),
        port_a: read_u16(bytes, CT_KEY_PORT_A_OFFSET),
        addr_b: read_addr(bytes, CT_KEY_ADDR_B_OFFSET),
        port_b: read_u16(bytes, CT_KEY_PORT_B_OFFSET),
    })
}

pub fn encode_key(key: &Key) -> KeyBytes {
    let mut buf = [0u8; CT_KEY_SIZE];
    put(
        &mut buf,
        CT_KEY_PROTO_OFFSET,
        &u32::from(key.protocol.to_u8()).to_le_bytes(),
    );
    put(&mut buf, CT_KEY_ADDR_A_OFFSET, &key.addr_a.octets());
    put(&mut buf, CT_KEY_ADDR_B_OFFSET, &key.addr_b.octets());
    put(&mut buf, CT_KEY_PORT_A_OFFSET, &key.port_a.to_le_bytes());
    put(&mut buf, CT_KEY_PORT_B_OFFSET, &key.port_b.to_le_bytes());
    buf
}

// ── Leg ─────────────────────────────────────────────────────────────

fn decode_leg(leg: &[u8]) -> Leg {
    Leg {
        bytes: read_u64(leg, CT_LEG_BYTES_OFFSET),
        packets: read_u32(leg, CT_LEG_PACKETS_OFFSET),
        seqno: read_u32(leg, CT_LEG_SEQNO_OFFSET),
        flags: LegFlags::from_bits_retain(read_u32(leg, CT_LEG_FLAGS_OFFSET)),
        ifindex: read_u32(leg, CT_LEG_IFINDEX_OFFSET),
    }
}

fn encode_leg(buf: &mut [u8], leg: &Leg) {
    put(buf, CT_LEG_BYTES_OFFSET, &leg.bytes.to_le_bytes());
    put(buf, CT_LEG_PACKETS_OFFSET, &leg.packets.to_le_bytes());
    put(buf, CT_LEG_SEQNO_OFFSET, &leg.seqno.to_le_bytes());
    put(buf, CT_LEG_FLAGS_OFFSET, &leg.flags.bits().to_le_bytes());
    put(buf, CT_LEG_IFINDEX_OFFSET, &leg.ifindex.to_le_bytes());
}

fn decode_legs(bytes: &[u8]) -> Legs {
    Legs {
        a_to_b: decode_leg(&bytes[CT_VALUE_LEG_AB_OFFSET..CT_VALUE_LEG_AB_OFFSET + CT_LEG_SIZE]),
        b_to_a: decode_leg(&bytes[CT_VALUE_LEG_BA_OFFSET..CT_VALUE_LEG_BA_OFFSET + CT_LEG_SIZE]),
    }
}

fn encode_legs(buf: &mut [u8], legs: &Legs) {
    encode_leg(
        &mut buf[CT_VALUE_LEG_AB_OFFSET..CT_VALUE_LEG_AB_OFFSET + CT_LEG_SIZE],
        &legs.a_to_b,
    );
    encode_leg(
        &mut buf[CT_VALUE_LEG_BA_OFFSET..CT_VALUE_LEG_BA_OFFSET + CT_LEG_SIZE],
        &legs.b_to_a,
    );
}

// ── Value ───────────────────────────────────────────────────────────

pub fn decode_value(bytes: &[u8]) -> Result<Value, ConntrackError> {
    if bytes.len() != CT_VALUE_SIZE {
        return Err(ConntrackError::InvalidValueLength {
            expected: CT_VALUE_SIZE,
            actual: bytes.len(),
        });
    }
    let type_tag = bytes[CT_VALUE_TYPE_OFFSET];
    let entry_type =
        EntryType::from_u8(type_tag).ok_or(ConntrackError::UnknownEntryType(type_tag))?;

    let data = match entry_type {
        EntryType::Normal => EntryData::Normal(decode_legs(bytes)),
        EntryType::NatForward => EntryData::NatForward {
            reverse_key: decode_key(
                &bytes[CT_VALUE_REV_KEY_OFFSET..CT_VALUE_REV_KEY_OFFSET + CT_KEY_SIZE],
            )?,
            nat_sport: read_u16(bytes, CT_VALUE_NAT_SPORT_OFFSET),
        },
        EntryType::NatReverse => {
            let orig_sport = read_u16(bytes, CT_VALUE_ORIG_SPORT_OFFSET);
            EntryData::NatReverse {
                legs: decode_legs(bytes),
                nat: NatReverseInfo {
                    orig_dst: read_addr(bytes, CT_VALUE_ORIG_DST_OFFSET),
                    orig_dport: read_u16(bytes, CT_VALUE_ORIG_DPORT_OFFSET),
                    orig_sport: (orig_sport != 0).then_some(orig_sport),
                    tunnel_ip: read_addr(bytes, CT_VALUE_TUN_IP_OFFSET),
                },
            }
        }
    };

    Ok(Value {
        created: read_i64(bytes, CT_VALUE_CREATED_OFFSET),
        last_seen: read_i64(bytes, CT_VALUE_LAST_SEEN_OFFSET),
        flags: EntryFlags::from_bits_retain(bytes[CT_VALUE_FLAGS_OFFSET]),
        data,
    })
}

pub fn encode_value(value: &Value) -> ValueBytes {
    let mut buf = [0u8; CT_VALUE_SIZE];
    put(
        &mut buf,
        CT_VALUE_CREATED_OFFSET,
        &value.created.to_le_bytes(),
    );
    put(
        &mut buf,
        CT_VALUE_LAST_SEEN_OFFSET,
        &value.last_seen.to_le_bytes(),
    );
    buf[CT_VALUE_TYPE_OFFSET] = value.entry_type().to_u8();
    buf[CT_VALUE_FLAGS_OFFSET] = value.flags.bits();

    match &value.data {
        EntryData::Normal(legs) => encode_legs(&mut buf, legs),
        EntryData::NatForward {
            reverse_key,
            nat_sport,
        } => {
            put(&mut buf, CT_VALUE_REV_KEY_OFFSET, &encode_key(reverse_key));
            put(&mut buf, CT_VALUE_NAT_SPORT_OFFSET, &nat_sport.to_le_bytes());
        }
        EntryData::NatReverse { legs, nat } => {
            encode_legs(&mut buf, legs);
            put(&mut buf, CT_VALUE_ORIG_DST_OFFSET, &nat.orig_dst.octets());
            put(
                &mut buf,
                CT_VALUE_ORIG_DPORT_OFFSET,
                &nat.orig_dport.to_le_bytes(),
            );
            put(
                &mut buf,
                CT_VALUE_ORIG_SPORT_OFFSET,
                &nat.orig_sport.unwrap_or(0).to_le_bytes(),
            );
            put(&mut buf, CT_VALUE_TUN_IP_OFFSET, &nat.tunnel_ip.octets());
        }
    }
    buf
}
