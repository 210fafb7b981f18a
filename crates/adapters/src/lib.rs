#![deny(unsafe_code)]

pub mod ebpf;
pub mod http;
pub mod nat;
