//! Collector (C3) implementations. `wanctl-core` only defines the
//! `collect(member) -> sample` contract; every concrete transport — TCP
//! connect-time probing, an external vendor helper process, or a scripted
//! fixture for tests — lives here, grounded on
//! `spark-transport-tcp::listener::TcpListener`'s pattern of checking the
//! call context's deadline/cancellation before awaiting I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, warn};

use wanctl_core::collector::{timeout_error, Collector, CollectorContext};
use wanctl_core::error::{CollectorFailureKind, WanctlError};
use wanctl_core::model::{Member, MemberClass, Sample, SignalReading};

/// Produces the class-shaped "all fields absent" signal payload a collector
/// should fall back to when it has no class-specific reading to offer,
/// preserving the present/absent distinction the data model requires.
fn blank_signal(class: MemberClass) -> SignalReading {
    match class {
        MemberClass::Satellite => SignalReading::Satellite {
            obstruction_fraction: None,
            snr_db: None,
            uptime_s: None,
            outage_count: None,
            reboot_ready: None,
        },
        MemberClass::Cellular => SignalReading::Cellular {
            rsrp_dbm: None,
            rsrq_db: None,
            sinr_db: None,
            cell_id: None,
            band: None,
            network_type: None,
        },
        MemberClass::Wifi => SignalReading::Wifi { rssi_dbm: None, channel_util: None, bss_load: None },
        MemberClass::Lan => SignalReading::Lan,
        MemberClass::Generic => SignalReading::Generic,
    }
}

/// Connect-time latency/reachability probe, suitable for wired, Wi-Fi STA and
/// generic members where the connectivity component (not a class-specific
/// signal reading) carries most of the judgment. One TCP handshake against a
/// configured `host:port` per member per call.
pub struct TcpProbeCollector {
    targets: HashMap<String, std::net::SocketAddr>,
    default_target: std::net::SocketAddr,
}

impl TcpProbeCollector {
    pub fn new(default_target: std::net::SocketAddr) -> Self {
        Self { targets: HashMap::new(), default_target }
    }

    /// Override the probe target for one member id (e.g. a member-specific
    /// gateway address), falling back to `default_target` otherwise.
    pub fn with_target(mut self, member_id: impl Into<String>, target: std::net::SocketAddr) -> Self {
        self.targets.insert(member_id.into(), target);
        self
    }

    fn target_for(&self, member: &Member) -> std::net::SocketAddr {
        self.targets.get(member.id.as_ref()).copied().unwrap_or(self.default_target)
    }
}

#[async_trait]
impl Collector for TcpProbeCollector {
    fn describe(&self) -> &str {
        "tcp-probe"
    }

    async fn collect(&self, member: &Member, ctx: &CollectorContext) -> Result<Sample, WanctlError> {
        if let Some(err) = timeout_error(member, ctx) {
            return Err(err);
        }

        let target = self.target_for(member);
        let started = std::time::Instant::now();
        let attempt = tokio::time::timeout(ctx.remaining(), TcpStream::connect(target)).await;

        let (latency_ms, link_up, loss_fraction) = match attempt {
            Ok(Ok(_stream)) => (Some(started.elapsed().as_secs_f64() * 1000.0), Some(true), Some(0.0)),
            Ok(Err(io_err)) => {
                debug!(member = %member.id, error = %io_err, "tcp probe connect failed");
                (None, Some(false), Some(1.0))
            }
            Err(_elapsed) => {
                return Err(WanctlError::collector(
                    member.id.clone(),
                    CollectorFailureKind::Transient,
                    "tcp probe timed out",
                ));
            }
        };

        Ok(Sample {
            timestamp: SystemTime::now(),
            latency_ms,
            loss_fraction,
            jitter_ms: None,
            link_up,
            throughput_kbps: None,
            signal: blank_signal(member.policy.class),
            events: Vec::new(),
        })
    }
}

/// Bridges an external helper process (a vendor SDK wrapper, an AT-command
/// script, a ubus call) into the `Collector` contract. The core only knows
/// that some adapter produces a `Sample`; it never knows or cares that this
/// one happens to be a subprocess. The helper is expected to emit exactly one
/// JSON-encoded `Sample` on stdout and exit zero; a distinguished exit code
/// (`PERMANENT_EXIT_CODE`) tells the core this member's backing hardware is
/// gone for good rather than just having missed one poll.
pub struct CommandCollector {
    program: String,
    args: Vec<String>,
}

/// Exit status the helper process uses to signal a permanent failure (e.g.
/// "modem not present") rather than a one-off transient miss.
pub const PERMANENT_EXIT_CODE: i32 = 2;

impl CommandCollector {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

#[async_trait]
impl Collector for CommandCollector {
    fn describe(&self) -> &str {
        &self.program
    }

    async fn collect(&self, member: &Member, ctx: &CollectorContext) -> Result<Sample, WanctlError> {
        if let Some(err) = timeout_error(member, ctx) {
            return Err(err);
        }

        let mut command = Command::new(&self.program);
        command.args(&self.args).arg("--member").arg(member.id.as_ref()).kill_on_drop(true);

        let output = tokio::time::timeout(ctx.remaining(), command.output()).await;
        let output = match output {
            Ok(Ok(output)) => output,
            Ok(Err(io_err)) => {
                return Err(WanctlError::collector(
                    member.id.clone(),
                    CollectorFailureKind::Permanent,
                    format!("failed to spawn collector helper `{}`: {io_err}", self.program),
                ));
            }
            Err(_elapsed) => {
                return Err(WanctlError::collector(
                    member.id.clone(),
                    CollectorFailureKind::Transient,
                    "collector helper timed out",
                ));
            }
        };

        if output.status.code() == Some(PERMANENT_EXIT_CODE) {
            return Err(WanctlError::collector(
                member.id.clone(),
                CollectorFailureKind::Permanent,
                "collector helper reported a permanent failure",
            ));
        }
        if !output.status.success() {
            return Err(WanctlError::collector(
                member.id.clone(),
                CollectorFailureKind::Transient,
                format!("collector helper exited with {:?}", output.status.code()),
            ));
        }

        serde_json::from_slice::<Sample>(&output.stdout).map_err(|err| {
            warn!(member = %member.id, error = %err, "collector helper produced unparsable output");
            WanctlError::collector(member.id.clone(), CollectorFailureKind::Transient, format!("bad sample payload: {err}"))
        })
    }
}

/// Scripted test double: replays a fixed, per-member sequence of samples one
/// per `collect()` call, repeating the last entry once exhausted. Used by
/// integration tests and local demos in place of real hardware.
pub struct FixtureCollector {
    scripts: HashMap<String, Vec<Sample>>,
    cursors: Mutex<HashMap<String, AtomicUsize>>,
}

impl FixtureCollector {
    pub fn new() -> Self {
        Self { scripts: HashMap::new(), cursors: Mutex::new(HashMap::new()) }
    }

    pub fn with_script(mut self, member_id: impl Into<String>, samples: Vec<Sample>) -> Self {
        self.scripts.insert(member_id.into(), samples);
        self
    }
}

impl Default for FixtureCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for FixtureCollector {
    fn describe(&self) -> &str {
        "fixture"
    }

    async fn collect(&self, member: &Member, ctx: &CollectorContext) -> Result<Sample, WanctlError> {
        if let Some(err) = timeout_error(member, ctx) {
            return Err(err);
        }
        let Some(script) = self.scripts.get(member.id.as_ref()) else {
            return Err(WanctlError::collector(
                member.id.clone(),
                CollectorFailureKind::Permanent,
                "no fixture script registered for this member",
            ));
        };

        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry(member.id.to_string()).or_insert_with(|| AtomicUsize::new(0));
        let index = cursor.fetch_add(1, Ordering::SeqCst).min(script.len().saturating_sub(1));
        Ok(script[index].clone())
    }
}

/// Dispatches to a different collector per member class, falling back to a
/// default for classes with no dedicated entry registered. Lets the daemon
/// compose one `Arc<dyn Collector>` for the Orchestrator out of several
/// class-specific adapters (e.g. a vendor `CommandCollector` for satellite,
/// `TcpProbeCollector` for everything else) instead of teaching the
/// Orchestrator itself about per-class dispatch.
pub struct CollectorRouter {
    by_class: HashMap<MemberClass, Arc<dyn Collector>>,
    default: Arc<dyn Collector>,
}

impl CollectorRouter {
    pub fn new(default: Arc<dyn Collector>) -> Self {
        Self { by_class: HashMap::new(), default }
    }

    pub fn with_class(mut self, class: MemberClass, collector: Arc<dyn Collector>) -> Self {
        self.by_class.insert(class, collector);
        self
    }
}

#[async_trait]
impl Collector for CollectorRouter {
    fn describe(&self) -> &str {
        "router"
    }

    async fn collect(&self, member: &Member, ctx: &CollectorContext) -> Result<Sample, WanctlError> {
        self.by_class.get(&member.policy.class).unwrap_or(&self.default).collect(member, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wanctl_core::model::{MemberId, Policy};

    fn member(class: MemberClass) -> Member {
        let policy = Policy { class, base_priority: 0, enabled: true, metered: false, data_limit: None, poll_interval_override_ms: None };
        Member::new(MemberId::from("wan0"), "eth0", policy)
    }

    fn sample(latency_ms: f64) -> Sample {
        Sample {
            timestamp: SystemTime::now(),
            latency_ms: Some(latency_ms),
            loss_fraction: Some(0.0),
            jitter_ms: None,
            link_up: Some(true),
            throughput_kbps: None,
            signal: SignalReading::Lan,
            events: Vec::new(),
        }
    }

    #[tokio::test]
    async fn fixture_collector_advances_and_then_repeats_last() {
        let collector = FixtureCollector::new().with_script("wan0", vec![sample(5.0), sample(9.0)]);
        let member = member(MemberClass::Lan);
        let ctx = CollectorContext::with_timeout(std::time::Duration::from_secs(1));
        let first = collector.collect(&member, &ctx).await.unwrap();
        let second = collector.collect(&member, &ctx).await.unwrap();
        let third = collector.collect(&member, &ctx).await.unwrap();
        assert_eq!(first.latency_ms, Some(5.0));
        assert_eq!(second.latency_ms, Some(9.0));
        assert_eq!(third.latency_ms, Some(9.0));
    }

    #[tokio::test]
    async fn fixture_collector_errors_for_unknown_member() {
        let collector = FixtureCollector::new();
        let member = member(MemberClass::Lan);
        let ctx = CollectorContext::with_timeout(std::time::Duration::from_secs(1));
        let err = collector.collect(&member, &ctx).await.unwrap_err();
        assert!(matches!(err, WanctlError::Collector { kind: CollectorFailureKind::Permanent, .. }));
    }

    #[tokio::test]
    async fn tcp_probe_against_closed_port_reports_link_down_not_error() {
        // Port 0 on loopback never accepts; expect a connection failure
        // sample rather than a hard error, per the "degrade, don't remove"
        // contract for ordinary connectivity failures.
        let collector = TcpProbeCollector::new("127.0.0.1:1".parse().unwrap());
        let member = member(MemberClass::Generic);
        let ctx = CollectorContext::with_timeout(std::time::Duration::from_millis(500));
        let sample = collector.collect(&member, &ctx).await.unwrap();
        assert_eq!(sample.link_up, Some(false));
    }

    #[tokio::test]
    async fn router_dispatches_by_class_and_falls_back_to_default() {
        let satellite_fixture = FixtureCollector::new().with_script("wan0", vec![sample(1.0)]);
        let default_fixture = FixtureCollector::new().with_script("wan1", vec![sample(2.0)]);
        let router = CollectorRouter::new(Arc::new(default_fixture)).with_class(MemberClass::Satellite, Arc::new(satellite_fixture));

        let ctx = CollectorContext::with_timeout(std::time::Duration::from_secs(1));
        let routed_to_satellite = router.collect(&member(MemberClass::Satellite), &ctx).await.unwrap();
        assert_eq!(routed_to_satellite.latency_ms, Some(1.0));

        let mut generic_member = member(MemberClass::Generic);
        generic_member.id = MemberId::from("wan1");
        let routed_to_default = router.collect(&generic_member, &ctx).await.unwrap();
        assert_eq!(routed_to_default.latency_ms, Some(2.0));
    }
}
