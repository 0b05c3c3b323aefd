//! `wanctl` binary entry point: tracing setup, config load, wiring of every
//! concrete adapter behind the Orchestrator, and graceful shutdown.
//!
//! Signal handling follows the `wp-reactor` lifecycle reference file's
//! `ctrl_c`/SIGTERM `tokio::select!` shape, with one addition: SIGHUP
//! triggers a configuration reload instead of tearing the process down,
//! since live-reload is this daemon's whole reason for owning a
//! `ConfigHandle` rather than reading the file once at startup.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use wanctl_core::collector::Collector;
use wanctl_core::model::{MemberId, Sample, SignalReading};
use wanctl_core::notify::NotificationBus;
use wanctl_core::registry::MemberRegistry;
use wanctl_core::ring::TelemetryRing;
use wanctl_transport::collectors::{CollectorRouter, FixtureCollector, TcpProbeCollector};
use wanctl_transport::multiwan::{MemberDescriptor, MockMultiWanAdapter, NetifdMwanAdapter};
use wanctl_transport::notify::LogNotificationSink;

use wanctl_daemon::{Args, ConfigHandle, DecisionLog, IpcServer, Orchestrator, OrchestratorCommand};

/// Default target for the connectivity probe installed when no richer
/// per-class collector is configured. A public, highly available resolver
/// is a reasonable universal reachability check; there is no configuration
/// surface yet for overriding it per deployment.
const DEFAULT_PROBE_TARGET: &str = "1.1.1.1:53";

/// Name of the external integration script the real multi-WAN adapter
/// shells out to (see `NetifdMwanAdapter`'s `list`/`set-active`/`status`
/// contract). Expected to be on `PATH` in a production deployment.
const DEFAULT_MWAN_HELPER: &str = "wanctl-mwan-helper";

fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let config_handle = match ConfigHandle::load(&args.config) {
        Ok(handle) => Arc::new(handle),
        Err(err) => {
            eprintln!("fatal: failed to load configuration from {}: {err}", args.config.display());
            std::process::exit(1);
        }
    };

    if let Some(ticks) = args.once {
        return run_smoke(config_handle, ticks).await;
    }

    let registry = Arc::new(MemberRegistry::new());
    let ring = Arc::new(TelemetryRing::default());
    let decision_log = Arc::new(DecisionLog::default());

    let mut bus = NotificationBus::new();
    bus.add(Arc::new(LogNotificationSink));
    let notifications = Arc::new(bus);

    let probe_target: SocketAddr = DEFAULT_PROBE_TARGET.parse().expect("built-in probe target must be a valid socket address");
    let collector: Arc<dyn Collector> = Arc::new(CollectorRouter::new(Arc::new(TcpProbeCollector::new(probe_target))));
    let adapter = NetifdMwanAdapter::new(DEFAULT_MWAN_HELPER);

    let orchestrator = Orchestrator::new(
        Arc::clone(&registry),
        Arc::clone(&ring),
        Arc::clone(&config_handle),
        collector,
        adapter,
        Arc::clone(&notifications),
        Arc::clone(&decision_log),
    );

    let cancel = CancellationToken::new();
    let (command_tx, command_rx) = mpsc::channel(32);
    let signal_commands = command_tx.clone();

    let ipc = IpcServer::new(args.socket.clone(), registry, ring, Arc::clone(&decision_log), Arc::clone(&config_handle), command_tx);

    let orchestrator_cancel = cancel.clone();
    let orchestrator_handle = tokio::spawn(orchestrator.run(orchestrator_cancel, command_rx));

    let ipc_cancel = cancel.clone();
    let ipc_handle = tokio::spawn(async move {
        if let Err(err) = ipc.run(ipc_cancel).await {
            error!(error = %err, "control socket task exited with an error");
        }
    });

    wait_for_shutdown(&cancel, &config_handle, &signal_commands).await;

    let _ = tokio::join!(orchestrator_handle, ipc_handle);
    info!("wanctl stopped");
    Ok(())
}

/// Blocks until a termination signal arrives, reloading configuration in
/// place on every SIGHUP instead. Returns once `cancel` has been fired so
/// the caller can join its spawned tasks.
async fn wait_for_shutdown(cancel: &CancellationToken, config: &ConfigHandle, commands: &mpsc::Sender<OrchestratorCommand>) {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, reloading configuration");
                match config.reload() {
                    Ok(()) => {
                        let _ = commands.send(OrchestratorCommand::Reload).await;
                    }
                    Err(err) => warn!(error = %err, "SIGHUP reload rejected, keeping running configuration"),
                }
            }
        }
    }
    cancel.cancel();
}

/// `--once N`: drives `N` ticks against an in-memory adapter seeded from the
/// loaded configuration's `[members.*]` table, with no real network or
/// multi-WAN subsystem access, then exits. Intended for validating a config
/// file's shape and weights before deploying it, not for production use.
async fn run_smoke(config_handle: Arc<ConfigHandle>, ticks: u64) -> anyhow::Result<()> {
    let config = config_handle.current();
    let registry = Arc::new(MemberRegistry::new());
    let ring = Arc::new(TelemetryRing::default());
    let decision_log = Arc::new(DecisionLog::default());

    let mut bus = NotificationBus::new();
    bus.add(Arc::new(LogNotificationSink));
    let notifications = Arc::new(bus);

    let descriptors: Vec<MemberDescriptor> = config
        .members
        .iter()
        .map(|(id, member_config)| MemberDescriptor {
            id: MemberId::from(id.as_str()),
            interface_name: format!("sim-{id}"),
            class: member_config.class,
        })
        .collect();

    if descriptors.is_empty() {
        warn!("--once requested but the configuration has no [members.*] entries to simulate");
    }

    let mut fixtures = FixtureCollector::new();
    for descriptor in &descriptors {
        fixtures = fixtures.with_script(descriptor.id.to_string(), vec![smoke_sample()]);
    }
    let adapter = MockMultiWanAdapter::new(descriptors);

    let mut orchestrator = Orchestrator::new(
        registry,
        ring,
        Arc::clone(&config_handle),
        Arc::new(fixtures),
        adapter,
        notifications,
        Arc::clone(&decision_log),
    );
    orchestrator.run_ticks(ticks).await;

    for record in decision_log.tail(ticks as usize) {
        info!(
            tick = record.tick,
            previous = ?record.previous_active.as_deref(),
            new_active = ?record.new_active.as_deref(),
            reason = %record.reason,
            "decision"
        );
    }
    Ok(())
}

fn smoke_sample() -> Sample {
    Sample {
        timestamp: std::time::SystemTime::now(),
        latency_ms: Some(20.0),
        loss_fraction: Some(0.0),
        jitter_ms: Some(2.0),
        link_up: Some(true),
        throughput_kbps: Some(50_000.0),
        signal: SignalReading::Generic,
        events: Vec::new(),
    }
}
