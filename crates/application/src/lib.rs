#![forbid(unsafe_code)]

pub mod conntrack_scanner;
pub mod conntrack_sweeper;
pub mod liveness_scanner;
pub mod stale_nat_scanner;
