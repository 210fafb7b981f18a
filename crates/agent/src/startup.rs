use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use adapters::ebpf::{ConntrackMapManager, MonotonicClock};
use adapters::http::server::run_http_server;
use adapters::http::state::AppState;
use adapters::nat::StaticBackendTable;
use application::conntrack_scanner::{ScanEngine, Scanner};
use application::conntrack_sweeper::{ConntrackSweeper, SweepSchedule, sweep_once};
use application::liveness_scanner::LivenessScanner;
use application::stale_nat_scanner::StaleNatScanner;
use domain::conntrack::timeouts::Timeouts;
use infrastructure::config::{AgentConfig, NatService};
use infrastructure::constants::GRACEFUL_SHUTDOWN_TIMEOUT;
use infrastructure::logging::init_logging;
use infrastructure::metrics::AgentMetrics;
use ports::secondary::clock_port::KernelClock;
use ports::secondary::conntrack_map_port::ConntrackMapPort;
use ports::secondary::metrics_port::MetricsPort;
use tracing::{error, info, warn};

use crate::cli::Cli;

/// How often the main task checks that the sweeper is still alive.
const SWEEPER_WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Run the agent startup sequence and block until shutdown.
pub async fn run(cli: &Cli) -> anyhow::Result<()> {
    // ── 1. Load config ──────────────────────────────────────────────
    let config = AgentConfig::load(Path::new(&cli.config))?;

    // ── 2. Initialize logging ───────────────────────────────────────
    // CLI flags take precedence over config file
    let log_level = cli.log_level.unwrap_or(config.agent.log_level);
    let log_format = cli.log_format.unwrap_or(config.agent.log_format);
    init_logging(log_level, log_format)?;

    let _root_span = tracing::span!(
        tracing::Level::INFO,
        "service",
        service.name = "ctsweeper",
        service.version = env!("CARGO_PKG_VERSION"),
    )
    .entered();

    info!(
        config_path = %cli.config,
        log_level = log_level.as_str(),
        log_format = log_format.as_str(),
        drain = cli.drain,
        "ctsweeper starting"
    );

    // ── 3. Open the pinned conntrack map ────────────────────────────
    let metrics = Arc::new(AgentMetrics::new());
    let map: Arc<dyn ConntrackMapPort> =
        Arc::new(ConntrackMapManager::open_pinned(&config.conntrack.map_path)?);
    let clock: Arc<dyn KernelClock> = Arc::new(MonotonicClock);

    if cli.drain {
        return drain(map, clock, Arc::clone(&metrics) as Arc<dyn MetricsPort>).await;
    }

    // ── 4. Build the scan engine ────────────────────────────────────
    let engine = build_engine(
        &config,
        map,
        clock,
        Arc::clone(&metrics) as Arc<dyn MetricsPort>,
    )?;

    // ── 5. Create cancellation token ────────────────────────────────
    let cancel_token = crate::shutdown::create_shutdown_token();
    let ready = Arc::new(AtomicBool::new(false));

    // ── 6. Spawn metrics and health server ──────────────────────────
    let app_state = Arc::new(AppState::new(Arc::clone(&metrics), Arc::clone(&ready)));
    let bind_ip = config.agent.bind_ip()?;
    let metrics_port = config.agent.metrics_port;
    let http_shutdown = cancel_token.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(e) =
            run_http_server(app_state, bind_ip, metrics_port, http_shutdown.cancelled_owned()).await
        {
            tracing::error!(error = %e, "metrics server failed");
        }
    });

    // ── 7. Start the sweeper ────────────────────────────────────────
    let schedule = SweepSchedule {
        interval: config.conntrack.sweep.interval(),
        jitter: config.conntrack.sweep.jitter(),
    };
    let sweeper = ConntrackSweeper::start(engine, schedule, metrics as Arc<dyn MetricsPort>);
    ready.store(true, Ordering::Relaxed);

    // ── 8. Ready: wait for cancellation or a dead sweeper ──────────
    info!("ctsweeper ready, waiting for shutdown signal");
    let mut crashed = false;
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            () = tokio::time::sleep(SWEEPER_WATCH_INTERVAL) => {
                if sweeper.is_finished().await {
                    error!("conntrack sweeper exited on its own, shutting down");
                    crashed = true;
                    break;
                }
            }
        }
    }

    // ── 9. Ordered shutdown sequence ────────────────────────────────
    ready.store(false, Ordering::Relaxed);

    info!("shutdown phase 1: stopping sweeper");
    if tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, sweeper.stop())
        .await
        .is_err()
    {
        warn!("sweeper did not stop in time, abandoning in-flight sweep");
    }

    info!("shutdown phase 2: draining metrics server");
    cancel_token.cancel();
    let _ = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, http_handle).await;

    if crashed {
        anyhow::bail!("conntrack sweeper stopped unexpectedly");
    }
    info!("ctsweeper stopped");
    Ok(())
}

/// Liveness scanner first, then stale-NAT when enabled.
fn build_engine(
    config: &AgentConfig,
    map: Arc<dyn ConntrackMapPort>,
    clock: Arc<dyn KernelClock>,
    metrics: Arc<dyn MetricsPort>,
) -> anyhow::Result<ScanEngine> {
    let timeouts = config.timeouts();
    timeouts.validate()?;

    let mut engine = ScanEngine::new(map);
    engine.add_scanner(Scanner::Synced(Box::new(LivenessScanner::new(
        timeouts,
        clock,
        Arc::clone(&metrics),
    ))));

    if config.conntrack.stale_nat.enabled {
        let table = backend_table(&config.stale_nat_services()?);
        info!(
            frontends = table.frontend_count(),
            "stale-NAT scanner enabled"
        );
        engine.add_scanner(Scanner::Stateless(Box::new(StaleNatScanner::new(
            Arc::new(table),
            metrics,
        ))));
    }

    info!(scanners = engine.scanner_count(), "scan engine initialized");
    Ok(engine)
}

fn backend_table(services: &[NatService]) -> StaticBackendTable {
    let mut table = StaticBackendTable::new();
    for service in services {
        table.insert(
            service.protocol.to_u8(),
            service.frontend,
            service.backends.iter().copied(),
        );
    }
    table
}

/// Expire every entry in a single sweep.
async fn drain(
    map: Arc<dyn ConntrackMapPort>,
    clock: Arc<dyn KernelClock>,
    metrics: Arc<dyn MetricsPort>,
) -> anyhow::Result<()> {
    let mut engine = ScanEngine::new(map);
    engine.add_scanner(Scanner::Synced(Box::new(
        LivenessScanner::new(Timeouts::default(), clock, Arc::clone(&metrics)).force_expire(),
    )));

    let outcome =
        tokio::task::spawn_blocking(move || sweep_once(&mut engine, metrics.as_ref())).await??;
    info!(
        examined = outcome.examined,
        deleted = outcome.deleted,
        delete_failures = outcome.delete_failures,
        aborted = outcome.aborted,
        "conntrack table drained"
    );
    if outcome.aborted {
        anyhow::bail!("drain sweep aborted before the end of the table");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};

    use domain::common::entity::Protocol;
    use domain::conntrack::entity::{EntryData, EntryFlags, Key, Legs, Value};
    use ports::secondary::nat_backend_port::NatBackendSelection;
    use ports::test_utils::{FakeClock, InMemoryConntrackMap, RecordingMetrics};

    use super::*;

    fn addr(last: u8, port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, last), port)
    }

    fn udp_entry(port: u16) -> (Key, Value) {
        (
            Key::new(Protocol::Udp, addr(1, port), addr(2, 53)),
            Value {
                created: 1_000,
                last_seen: 1_000,
                flags: EntryFlags::empty(),
                data: EntryData::Normal(Legs::default()),
            },
        )
    }

    #[test]
    fn engine_has_liveness_only_by_default() {
        let config = AgentConfig::default();
        let engine = build_engine(
            &config,
            Arc::new(InMemoryConntrackMap::new()),
            Arc::new(FakeClock::new(0)),
            Arc::new(RecordingMetrics::new()),
        )
        .unwrap();
        assert_eq!(engine.scanner_count(), 1);
    }

    #[test]
    fn engine_adds_stale_nat_when_enabled() {
        let config = AgentConfig::from_yaml(
            r#"
conntrack:
  stale_nat:
    enabled: true
    services:
      - frontend: 10.96.0.10:53
        protocol: udp
        backends: [10.1.2.3:53]
"#,
        )
        .unwrap();
        let engine = build_engine(
            &config,
            Arc::new(InMemoryConntrackMap::new()),
            Arc::new(FakeClock::new(0)),
            Arc::new(RecordingMetrics::new()),
        )
        .unwrap();
        assert_eq!(engine.scanner_count(), 2);
    }

    #[test]
    fn backend_table_from_services() {
        let services = vec![NatService {
            protocol: Protocol::Tcp,
            frontend: addr(100, 80),
            backends: vec![addr(7, 8080)],
        }];
        let table = backend_table(&services);
        assert_eq!(table.frontend_count(), 1);
        assert!(table.still_selected(addr(100, 80), addr(7, 8080), 6));
        assert!(!table.still_selected(addr(100, 80), addr(8, 8080), 6));
    }

    #[tokio::test]
    async fn drain_removes_every_entry() {
        let map = Arc::new(InMemoryConntrackMap::with_entries(&[
            udp_entry(1000),
            udp_entry(1001),
            udp_entry(1002),
        ]));
        let metrics = Arc::new(RecordingMetrics::new());
        // Fresh entries: nothing would expire without forcing.
        drain(map.clone(), Arc::new(FakeClock::new(1_000)), metrics.clone())
            .await
            .unwrap();
        assert!(map.is_empty());
        assert_eq!(metrics.expiries(), vec!["forced"; 3]);
        assert_eq!(metrics.entries(), Some(0));
    }

    #[tokio::test]
    async fn drain_reports_aborted_iteration() {
        let map = Arc::new(InMemoryConntrackMap::with_entries(&[
            udp_entry(1000),
            udp_entry(1001),
        ]));
        map.fail_iteration_after(1);
        let result = drain(
            map,
            Arc::new(FakeClock::new(0)),
            Arc::new(RecordingMetrics::new()),
        )
        .await;
        assert!(result.is_err());
    }
}
