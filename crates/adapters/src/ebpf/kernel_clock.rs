use nix::time::{ClockId, clock_gettime};
use ports::secondary::clock_port::KernelClock;

/// `CLOCK_MONOTONIC`, the clock behind `bpf_ktime_get_ns`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl KernelClock for MonotonicClock {
    fn now_ns(&self) -> i64 {
        match clock_gettime(ClockId::CLOCK_MONOTONIC) {
            Ok(ts) => i64::from(ts.tv_sec())
                .saturating_mul(1_000_000_000)
                .saturating_add(i64::from(ts.tv_nsec())),
            Err(e) => {
                // A zero reading makes every entry look fresh.
                tracing::warn!(error = %e, "clock_gettime(CLOCK_MONOTONIC) failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_advances() {
        let clock = MonotonicClock;
        let a = clock.now_ns();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = clock.now_ns();
        assert!(a > 0);
        assert!(b > a);
    }
}
