/// Secondary port for the clock the dataplane stamps entries with.
///
/// Conntrack timestamps are kernel monotonic nanoseconds (what
/// `bpf_ktime_get_ns` returns), not wall-clock time.
pub trait KernelClock: Send + Sync {
    fn now_ns(&self) -> i64;
}
