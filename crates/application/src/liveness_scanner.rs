use std::sync::Arc;
use std::time::{Duration, Instant};

use domain::conntrack::entity::{Key, Value};
use domain::conntrack::error::ConntrackError;
use domain::conntrack::timeouts::{ExpiryReason, Timeouts};
use ports::secondary::clock_port::KernelClock;
use ports::secondary::metrics_port::MetricsPort;

use crate::conntrack_scanner::{EntryLookup, EntryScanner, ScanVerdict, SyncedEntryScanner};

/// How long a kernel clock reading is reused within one sweep.
const NOW_REFRESH: Duration = Duration::from_secs(1);

/// Deletes entries whose flow is no longer live under [`Timeouts`].
pub struct LivenessScanner {
    timeouts: Timeouts,
    clock: Arc<dyn KernelClock>,
    metrics: Arc<dyn MetricsPort>,
    time_shift_ns: i64,
    force: bool,
    cached_now: Option<(Instant, i64)>,
}

impl LivenessScanner {
    pub fn new(
        timeouts: Timeouts,
        clock: Arc<dyn KernelClock>,
        metrics: Arc<dyn MetricsPort>,
    ) -> Self {
        Self {
            timeouts,
            clock,
            metrics,
            time_shift_ns: 0,
            force: false,
            cached_now: None,
        }
    }

    /// Judge entries as if the clock were `shift` ahead.
    #[must_use]
    pub fn with_time_shift(mut self, shift: Duration) -> Self {
        self.time_shift_ns = i64::try_from(shift.as_nanos()).unwrap_or(i64::MAX);
        self
    }

    /// Expire every entry regardless of its state.
    #[must_use]
    pub fn force_expire(mut self) -> Self {
        self.force = true;
        self
    }

    fn now(&mut self) -> i64 {
        let now = match self.cached_now {
            Some((read_at, now)) if read_at.elapsed() < NOW_REFRESH => now,
            _ => {
                let now = self.clock.now_ns();
                self.cached_now = Some((Instant::now(), now));
                now
            }
        };
        now.saturating_add(self.time_shift_ns)
    }

    fn judge(
        &mut self,
        key: &Key,
        value: &Value,
        lookup: &dyn EntryLookup,
    ) -> Result<Option<ExpiryReason>, ConntrackError> {
        if self.force {
            return Ok(Some(ExpiryReason::Forced));
        }
        let now = self.now();

        let Some(reverse_key) = value.reverse_key() else {
            return Ok(self.timeouts.is_expired(now, key.protocol, value));
        };

        match lookup.lookup(reverse_key) {
            Ok(Some(reverse)) => Ok(self.timeouts.is_expired(now, key.protocol, &reverse)),
            Ok(None) => {
                // Either not written yet or already swept: age the forward
                // entry on its own activity.
                let verdict = self.timeouts.is_expired(now, key.protocol, value);
                tracing::debug!(
                    key = %key,
                    reverse_key = %reverse_key,
                    expired = verdict.is_some(),
                    "NAT reverse entry missing, judging forward entry alone"
                );
                Ok(verdict)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    reverse_key = %reverse_key,
                    error = %e,
                    "NAT reverse entry lookup failed, keeping forward entry"
                );
                Ok(None)
            }
        }
    }
}

impl EntryScanner for LivenessScanner {
    fn check(
        &mut self,
        key: &Key,
        value: &Value,
        lookup: &dyn EntryLookup,
    ) -> Result<ScanVerdict, ConntrackError> {
        match self.judge(key, value, lookup)? {
            Some(reason) => {
                tracing::debug!(
                    key = %key,
                    entry_type = %value.entry_type(),
                    reason = %reason,
                    "conntrack entry expired: {}",
                    reason.description()
                );
                self.metrics.record_conntrack_expiry(reason.as_str());
                Ok(ScanVerdict::Delete)
            }
            None => Ok(ScanVerdict::Ok),
        }
    }
}

impl SyncedEntryScanner for LivenessScanner {
    fn iteration_start(&mut self) {
        self.cached_now = None;
    }

    fn iteration_end(&mut self) {}
}
