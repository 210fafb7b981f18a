use std::sync::Arc;
use std::time::Duration;

use domain::conntrack::error::ConntrackError;
use ports::secondary::metrics_port::MetricsPort;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::conntrack_scanner::{ScanEngine, SweepOutcome};

/// When sweeps run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSchedule {
    pub interval: Duration,
    /// Upper bound of the random delay added to each interval.
    pub jitter: Duration,
}

impl Default for SweepSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            jitter: Duration::from_secs(1),
        }
    }
}

impl SweepSchedule {
    /// `interval + U(0, jitter)`.
    pub fn next_delay(&self) -> Duration {
        let max = u64::try_from(self.jitter.as_nanos()).unwrap_or(u64::MAX);
        if max == 0 {
            return self.interval;
        }
        self.interval
            .saturating_add(Duration::from_nanos(rand::rng().random_range(0..=max)))
    }
}

/// Background task sweeping the conntrack table on a schedule.
///
/// Owns the engine; sweeps run on the blocking pool one at a time.
pub struct ConntrackSweeper {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConntrackSweeper {
    /// Spawn the sweep loop. The first sweep starts immediately.
    pub fn start(
        engine: ScanEngine,
        schedule: SweepSchedule,
        metrics: Arc<dyn MetricsPort>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_sweep_loop(engine, schedule, metrics, cancel.clone()));
        tracing::info!(
            interval_ms = schedule.interval.as_millis(),
            jitter_ms = schedule.jitter.as_millis(),
            "conntrack sweeper started"
        );
        Self {
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Stop scheduling sweeps and wait for an in-flight sweep to finish.
    /// Safe to call more than once and from several tasks.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        self.cancel.cancel();
        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "conntrack sweeper task ended abnormally");
            }
            tracing::info!("conntrack sweeper stopped");
        }
    }

    /// Whether the loop has exited, either stopped or after a fatal sweep.
    pub async fn is_finished(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_none_or(JoinHandle::is_finished)
    }
}

async fn run_sweep_loop(
    mut engine: ScanEngine,
    schedule: SweepSchedule,
    metrics: Arc<dyn MetricsPort>,
    cancel: CancellationToken,
) {
    loop {
        let joined = tokio::task::spawn_blocking(move || {
            let result = engine.sweep();
            (engine, result)
        })
        .await;
        let result = match joined {
            Ok((returned, result)) => {
                engine = returned;
                result
            }
            Err(e) => {
                tracing::error!(error = %e, "conntrack sweep panicked, sweeper stopped");
                return;
            }
        };

        report_sweep(metrics.as_ref(), &result);
        if let Err(e) = result {
            tracing::error!(
                error = %e,
                "conntrack sweeper stopped: table layout does not match this build"
            );
            return;
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(schedule.next_delay()) => {}
        }
    }
}

/// Run one sweep outside any schedule and report it like a scheduled one.
pub fn sweep_once(
    engine: &mut ScanEngine,
    metrics: &dyn MetricsPort,
) -> Result<SweepOutcome, ConntrackError> {
    let result = engine.sweep();
    report_sweep(metrics, &result);
    result
}

fn report_sweep(metrics: &dyn MetricsPort, result: &Result<SweepOutcome, ConntrackError>) {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(_) => {
            metrics.record_conntrack_sweep_error("fatal");
            return;
        }
    };

    metrics.record_conntrack_sweep(
        outcome.examined,
        outcome.deleted,
        outcome.duration.as_secs_f64(),
    );
    for _ in 0..outcome.delete_failures {
        metrics.record_conntrack_sweep_error("delete");
    }
    if outcome.aborted {
        metrics.record_conntrack_sweep_error("iteration");
    } else {
        metrics.set_conntrack_entries(outcome.examined.saturating_sub(outcome.deleted));
    }
}
