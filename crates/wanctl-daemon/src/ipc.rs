//! Local control surface (§6.3): a Unix domain socket carrying one
//! newline-delimited JSON request per line and one newline-delimited JSON
//! response per request. Deliberately not HTTP/axum — this is a
//! single-operator, same-host control plane for an embedded router daemon,
//! not a service with remote callers or a need for content negotiation, so
//! the dependency and code a web framework would pull in buys nothing here.
//! `ControlRequest`/`ControlResponse` use serde's internally tagged `op`
//! field the same way `wanctl_core::model::SignalReading` tags its payload
//! by member class.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use wanctl_core::model::{DecisionRecord, MemberClass, MemberId, Role, Sample, Status};
use wanctl_core::registry::MemberRegistry;
use wanctl_core::ring::{TelemetryRing, Trend};

use crate::config_handle::ConfigHandle;
use crate::decision_log::DecisionLog;
use crate::orchestrator::OrchestratorCommand;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    Status,
    Members,
    Metrics { member: String, window_s: Option<u64> },
    Decisions { limit: Option<usize> },
    Failover { member: String, force: Option<bool> },
    Reload,
}

#[derive(Debug, Serialize)]
pub struct MemberSummary {
    pub id: MemberId,
    pub class: MemberClass,
    pub role: Role,
    pub status: Status,
    pub score: f64,
    pub base_priority: i32,
    pub enabled: bool,
}

/// Per-member `{score, status, latest sample age}` tuple for the `status`
/// response (§6.3). `sample_age_s` is `None` when the member has never
/// produced a sample.
#[derive(Debug, Serialize)]
pub struct MemberStatus {
    pub id: MemberId,
    pub score: f64,
    pub status: Status,
    pub sample_age_s: Option<u64>,
}

/// Trend summary accompanying a `metrics` response (§6.3): slope/variance of
/// the primary connectivity metric (latency) over the returned window, plus
/// the valid-sample count the regression was fit against. `None` when fewer
/// than 3 valid points are available, matching `TelemetryRing::trend`.
#[derive(Debug, Serialize)]
pub struct TrendSummary {
    pub slope: f64,
    pub variance: f64,
    pub count: usize,
}

impl From<Trend> for TrendSummary {
    fn from(t: Trend) -> Self {
        Self { slope: t.slope, variance: t.variance, count: t.count }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlResponse {
    Status {
        active: Option<MemberId>,
        members: Vec<MemberStatus>,
        tick: u64,
        last_decision_reason: Option<String>,
        uptime_s: u64,
    },
    Members { members: Vec<MemberSummary> },
    Metrics { member: MemberId, samples: Vec<Sample>, trend: Option<TrendSummary> },
    Decisions { records: Vec<DecisionRecord> },
    Failover { ok: bool, error: Option<String> },
    Reload { ok: bool, error: Option<String> },
    Error { message: String },
}

/// Owns the listening socket and the read-only/command handles needed to
/// answer every request without ever touching the Orchestrator's internals
/// directly — `commands` is the one channel through which this task can
/// influence orchestrator state, mirroring the Controller's position as the
/// sole writer of role transitions.
pub struct IpcServer {
    socket_path: PathBuf,
    registry: Arc<MemberRegistry>,
    ring: Arc<TelemetryRing>,
    decision_log: Arc<DecisionLog>,
    config: Arc<ConfigHandle>,
    commands: mpsc::Sender<OrchestratorCommand>,
    started_at: Instant,
}

impl IpcServer {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        registry: Arc<MemberRegistry>,
        ring: Arc<TelemetryRing>,
        decision_log: Arc<DecisionLog>,
        config: Arc<ConfigHandle>,
        commands: mpsc::Sender<OrchestratorCommand>,
    ) -> Self {
        Self { socket_path: socket_path.into(), registry, ring, decision_log, config, commands, started_at: Instant::now() }
    }

    pub async fn run(self, cancel: CancellationToken) -> io::Result<()> {
        remove_stale_socket(&self.socket_path)?;
        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = %self.socket_path.display(), "control socket listening");
        let shared = Arc::new(self);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("control socket shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let server = Arc::clone(&shared);
                            tokio::spawn(async move {
                                if let Err(err) = server.handle_connection(stream).await {
                                    warn!(error = %err, "control connection ended with an error");
                                }
                            });
                        }
                        Err(err) => warn!(error = %err, "failed to accept control connection"),
                    }
                }
            }
        }
        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }

    async fn handle_connection(&self, stream: UnixStream) -> io::Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<ControlRequest>(&line) {
                Ok(request) => self.dispatch(request).await,
                Err(err) => ControlResponse::Error { message: format!("malformed request: {err}") },
            };
            let mut payload = serde_json::to_vec(&response).unwrap_or_else(|_| b"{\"op\":\"error\"}".to_vec());
            payload.push(b'\n');
            write_half.write_all(&payload).await?;
            write_half.flush().await?;
        }
        Ok(())
    }

    async fn dispatch(&self, request: ControlRequest) -> ControlResponse {
        match request {
            ControlRequest::Status => self.status(),
            ControlRequest::Members => self.members(),
            ControlRequest::Metrics { member, window_s } => self.metrics(&member, window_s),
            ControlRequest::Decisions { limit } => ControlResponse::Decisions { records: self.decision_log.tail(limit.unwrap_or(50)) },
            ControlRequest::Failover { member, force } => self.failover(member, force.unwrap_or(false)).await,
            ControlRequest::Reload => self.reload().await,
        }
    }

    fn status(&self) -> ControlResponse {
        let now = SystemTime::now();
        let registry_members = self.registry.list();
        let active = registry_members.iter().find(|m| m.live.role == Role::Active).map(|m| m.id.clone());
        let members = registry_members
            .into_iter()
            .map(|m| {
                let sample_age_s = m.live.last_sample_at.and_then(|at| now.duration_since(at).ok()).map(|age| age.as_secs());
                MemberStatus { id: m.id, score: m.live.score, status: m.live.status, sample_age_s }
            })
            .collect();
        let last_decision = self.decision_log.tail(1).into_iter().next();
        let tick = last_decision.as_ref().map(|r| r.tick).unwrap_or(0);
        let last_decision_reason = last_decision.map(|r| r.reason);
        ControlResponse::Status { active, members, tick, last_decision_reason, uptime_s: self.started_at.elapsed().as_secs() }
    }

    fn members(&self) -> ControlResponse {
        let members = self
            .registry
            .list()
            .into_iter()
            .map(|m| MemberSummary {
                id: m.id,
                class: m.policy.class,
                role: m.live.role,
                status: m.live.status,
                score: m.live.score,
                base_priority: m.policy.base_priority,
                enabled: m.policy.enabled,
            })
            .collect();
        ControlResponse::Members { members }
    }

    fn metrics(&self, member: &str, window_s: Option<u64>) -> ControlResponse {
        let now = SystemTime::now();
        let samples = match window_s {
            Some(secs) => self.ring.window_by_duration(member, now, std::time::Duration::from_secs(secs)),
            None => self.ring.default_window(member, now),
        };
        let trend = self.ring.trend(member, samples.len(), |s| s.latency_ms).map(TrendSummary::from);
        ControlResponse::Metrics { member: MemberId::from(member), samples, trend }
    }

    async fn failover(&self, member: String, force: bool) -> ControlResponse {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = OrchestratorCommand::Failover { member: MemberId::from(member.as_str()), force, reply: reply_tx };
        if self.commands.send(command).await.is_err() {
            return ControlResponse::Failover { ok: false, error: Some("orchestrator task is not running".to_string()) };
        }
        match reply_rx.await {
            Ok(Ok(())) => ControlResponse::Failover { ok: true, error: None },
            Ok(Err(err)) => ControlResponse::Failover { ok: false, error: Some(err) },
            Err(_) => ControlResponse::Failover { ok: false, error: Some("orchestrator dropped the request".to_string()) },
        }
    }

    async fn reload(&self) -> ControlResponse {
        match self.config.reload() {
            Ok(()) => {
                if self.commands.send(OrchestratorCommand::Reload).await.is_err() {
                    return ControlResponse::Reload { ok: false, error: Some("orchestrator task is not running".to_string()) };
                }
                ControlResponse::Reload { ok: true, error: None }
            }
            Err(err) => ControlResponse::Reload { ok: false, error: Some(err.to_string()) },
        }
    }
}

fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
