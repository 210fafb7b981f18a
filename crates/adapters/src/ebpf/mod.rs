pub mod conntrack_map_manager;
pub mod kernel_clock;

pub use conntrack_map_manager::ConntrackMapManager;
pub use kernel_clock::MonotonicClock;
