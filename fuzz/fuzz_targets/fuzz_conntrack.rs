#![no_main]

use libfuzzer_sys::fuzz_target;

use domain::common::entity::Protocol;
use domain::conntrack::codec::{decode_key, decode_value, encode_key, encode_value};
use domain::conntrack::timeouts::Timeouts;

// Fuzz the conntrack entry codec and the timeout policy.
//
// Layout:
//   [0..16]   = key bytes
//   [16..104] = value bytes
//   [104..]   = kernel time (i64 LE, zero-padded)
//
// Decoding must never panic, and a value that decodes must judge the same
// with its legs swapped.
fuzz_target!(|data: &[u8]| {
    if data.len() < 104 {
        let _ = decode_key(data);
        let _ = decode_value(data);
        return;
    }

    let (key_bytes, rest) = data.split_at(16);
    let (value_bytes, tail) = rest.split_at(88);

    if let Ok(key) = decode_key(key_bytes) {
        assert_eq!(decode_key(&encode_key(&key)).ok(), Some(key));
    }

    let Ok(value) = decode_value(value_bytes) else {
        return;
    };
    assert_eq!(decode_value(&encode_value(&value)).ok(), Some(value));

    let mut now = [0u8; 8];
    let n = tail.len().min(8);
    now[..n].copy_from_slice(&tail[..n]);
    let now = i64::from_le_bytes(now);

    let timeouts = Timeouts::default();
    for proto in [Protocol::Tcp, Protocol::Udp, Protocol::Icmp, Protocol::Other(47)] {
        let verdict = timeouts.is_expired(now, proto, &value);
        assert_eq!(verdict, timeouts.is_expired(now, proto, &value.swap_legs()));
    }
});
