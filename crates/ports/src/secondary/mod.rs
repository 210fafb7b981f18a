pub mod clock_port;
pub mod conntrack_map_port;
pub mod metrics_port;
pub mod nat_backend_port;
