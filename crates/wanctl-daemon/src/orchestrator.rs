//! Orchestrator (C8): the single task that drives the tick pipeline
//! (discover -> collect -> score/predict/decide -> control) and owns every
//! piece of mutable state the rest of the crates deliberately have none of.
//!
//! Collector dispatch uses `tokio::task::JoinSet` (one task per member per
//! tick): stragglers past the tick deadline are detached via
//! `JoinSet::detach_all` rather than aborted, so an in-flight probe that
//! finally returns after its tick has closed is a pure no-op instead of a
//! cancelled future fighting its own cleanup. Graceful shutdown and the
//! reload/manual-failover command channel follow the
//! `CancellationToken`-plus-task-handle shape from the `wp-reactor` lifecycle
//! reference file, trimmed down to this daemon's two long-running tasks
//! (orchestrator, IPC listener) instead of four.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wanctl_core::collector::{Collector, CollectorContext, DEFAULT_COLLECTOR_TIMEOUT};
use wanctl_core::controller::Controller;
use wanctl_core::decision::{DecisionEngine, Recommendation};
use wanctl_core::error::{CollectorFailureKind, WanctlError};
use wanctl_core::model::{DecisionRecord, MemberClass, MemberId, Policy, Role, Sample, Status, MAX_TICK_SLOWDOWN};
use wanctl_core::notify::{NotificationBus, NotificationEvent, NotificationKind};
use wanctl_core::registry::{DiscoveredMember, MemberRegistry, StateTransition};
use wanctl_core::ring::TelemetryRing;
use wanctl_transport::multiwan::MultiWanAdapter;

use crate::config_handle::ConfigHandle;
use crate::decision_log::DecisionLog;

/// Request sent to the orchestrator task from the IPC layer.
pub enum OrchestratorCommand {
    /// Re-run discovery and refresh every known member's policy from the
    /// currently live `Config` (the config file itself must already have
    /// been reloaded by the caller via `ConfigHandle::reload`).
    Reload,
    /// Operator-requested manual selection (`failover(member, force?)`,
    /// §6.3). `force` bypasses cooldown but never member eligibility.
    Failover { member: MemberId, force: bool, reply: oneshot::Sender<Result<(), String>> },
}

pub struct Orchestrator<A: MultiWanAdapter> {
    registry: Arc<MemberRegistry>,
    ring: Arc<TelemetryRing>,
    config: Arc<ConfigHandle>,
    collector: Arc<dyn Collector>,
    adapter: A,
    notifications: Arc<NotificationBus>,
    decision_log: Arc<DecisionLog>,
    controller: Controller,
    tick: u64,
    current_interval: Duration,
    base_interval: Duration,
}

impl<A: MultiWanAdapter> Orchestrator<A> {
    pub fn new(
        registry: Arc<MemberRegistry>,
        ring: Arc<TelemetryRing>,
        config: Arc<ConfigHandle>,
        collector: Arc<dyn Collector>,
        adapter: A,
        notifications: Arc<NotificationBus>,
        decision_log: Arc<DecisionLog>,
    ) -> Self {
        let base_interval = config.current().poll_interval();
        Self {
            registry,
            ring,
            config,
            collector,
            adapter,
            notifications,
            decision_log,
            controller: Controller::new(),
            tick: 0,
            current_interval: base_interval,
            base_interval,
        }
    }

    /// Drives the tick loop until `cancel` fires or the command channel
    /// closes. Runs an initial discovery pass before the first tick so a
    /// freshly started daemon doesn't wait a full interval to see its
    /// configured members.
    pub async fn run(mut self, cancel: CancellationToken, mut commands: mpsc::Receiver<OrchestratorCommand>) {
        self.discover().await;
        loop {
            let sleep = tokio::time::sleep(self.current_interval);
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("orchestrator shutting down");
                    break;
                }
                maybe_cmd = commands.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                _ = sleep => {
                    self.tick += 1;
                    self.run_tick().await;
                }
            }
        }
    }

    /// Runs a fixed number of ticks back-to-back with no inter-tick sleep,
    /// for `--once N` config smoke-testing (see `cli::Args::once`) rather
    /// than production use.
    pub async fn run_ticks(&mut self, count: u64) {
        self.discover().await;
        for _ in 0..count {
            self.tick += 1;
            self.run_tick().await;
        }
    }

    async fn handle_command(&mut self, cmd: OrchestratorCommand) {
        match cmd {
            OrchestratorCommand::Reload => {
                self.discover().await;
                let config = self.config.current();
                for member in self.registry.list() {
                    if let Some(member_config) = config.members.get(member.id.as_ref()) {
                        let _ = self.registry.update_policy(&member.id, Policy::from(member_config));
                    }
                }
                info!("reload: refreshed discovery and per-member policy");
            }
            OrchestratorCommand::Failover { member, force, reply } => {
                let now = SystemTime::now();
                let config = self.config.current();
                let outcome =
                    self.controller.force_activate(&member, force, &self.registry, &mut self.adapter, &config, now).await;
                match outcome {
                    Ok(()) => {
                        self.decision_log.push(DecisionRecord {
                            tick: self.tick,
                            timestamp: now,
                            previous_active: None,
                            new_active: Some(member.clone()),
                            reason: if force { "manual failover (forced)".to_string() } else { "manual failover".to_string() },
                            contributing_scores: Vec::new(),
                            predictor_flags: Vec::new(),
                        });
                        self.notifications
                            .publish(
                                NotificationEvent::new(NotificationKind::Failover, "operator-requested manual failover", now)
                                    .with_member(member.clone())
                                    .with_transition(None, Some(member.clone())),
                            )
                            .await;
                        let _ = reply.send(Ok(()));
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err.to_string()));
                    }
                }
            }
        }
    }

    /// Reconcile the registry and telemetry ring against the multi-WAN
    /// subsystem's current inventory.
    async fn discover(&self) {
        let config = self.config.current();
        let descriptors = match self.adapter.list_members().await {
            Ok(descriptors) => descriptors,
            Err(err) => {
                warn!(error = %err, "failed to refresh member inventory, keeping previous registry state");
                return;
            }
        };

        let seen: Vec<DiscoveredMember> = descriptors.iter().cloned().map(DiscoveredMember::from).collect();
        let removed = self.registry.discover(&seen, |discovered| {
            if let Some(member_config) = config.members.get(discovered.id.as_ref()) {
                return Policy::from(member_config);
            }
            let class = descriptors
                .iter()
                .find(|d| d.id == discovered.id)
                .map(|d| d.class)
                .unwrap_or(MemberClass::Generic);
            Policy { class, base_priority: 0, enabled: true, metered: false, data_limit: None, poll_interval_override_ms: None }
        });

        for id in &removed {
            self.ring.untrack(id);
        }
        for discovered in &seen {
            if !self.ring.is_tracked(&discovered.id) {
                self.ring.track(discovered.id.clone());
            }
        }
    }

    async fn run_tick(&mut self) {
        let now = SystemTime::now();
        let config = self.config.current();
        let tick_deadline = tokio::time::Instant::now() + self.current_interval * 2;

        self.dispatch_collectors(now, tick_deadline).await;

        let rec = DecisionEngine::decide(&self.registry, &self.ring, &config, self.tick, now, self.current_interval);
        self.decision_log.push(rec.record.clone());

        match self.controller.apply(&rec, &self.registry, &mut self.adapter, &config, now).await {
            Ok(()) => self.handle_transition(&rec, now).await,
            Err(err) => {
                warn!(error = %err, "controller apply failed after exhausting its retry schedule");
                self.notifications
                    .publish(
                        NotificationEvent::new(NotificationKind::ControlError, err.to_string(), now)
                            .with_transition(rec.record.previous_active.clone(), rec.record.new_active.clone()),
                    )
                    .await;
            }
        }

        self.adjust_interval(&rec);
    }

    async fn dispatch_collectors(&self, now: SystemTime, deadline: tokio::time::Instant) {
        let mut joinset: JoinSet<(MemberId, Result<Sample, WanctlError>)> = JoinSet::new();

        for member in self.registry.list() {
            if let Some(floor_ms) = member.policy.poll_interval_override_ms {
                let floor = Duration::from_millis(floor_ms);
                let recently_sampled = member
                    .live
                    .last_sample_at
                    .and_then(|last| now.duration_since(last).ok())
                    .map(|age| age < floor)
                    .unwrap_or(false);
                if recently_sampled {
                    continue;
                }
            }
            let collector = Arc::clone(&self.collector);
            joinset.spawn(async move {
                let ctx = CollectorContext::with_timeout(DEFAULT_COLLECTOR_TIMEOUT);
                let result = collector.collect(&member, &ctx).await;
                (member.id.clone(), result)
            });
        }

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                joinset.detach_all();
                break;
            }
            match tokio::time::timeout(remaining, joinset.join_next()).await {
                Ok(Some(Ok((member_id, result)))) => self.apply_collector_result(&member_id, result, now).await,
                Ok(Some(Err(join_err))) => warn!(error = %join_err, "collector task panicked"),
                Ok(None) => break,
                Err(_elapsed) => {
                    debug!("tick deadline reached with collectors still outstanding, detaching stragglers");
                    joinset.detach_all();
                    break;
                }
            }
        }
    }

    async fn apply_collector_result(&self, member_id: &MemberId, result: Result<Sample, WanctlError>, now: SystemTime) {
        match result {
            Ok(sample) => {
                let _ = self.ring.append(member_id, sample);
                let _ = self.registry.mutate_state(member_id, StateTransition::MarkSampleAt(now));
                let _ = self.registry.mutate_state(member_id, StateTransition::RecordGoodTick);

                let Some(member) = self.registry.get(member_id) else { return };
                let had_error_streak = member.live.consecutive_permanent_errors > 0;
                let recoverable_exclusion =
                    member.live.role == Role::Excluded && member.live.missing_ticks == 0 && member.policy.enabled;
                drop(member);

                if had_error_streak {
                    let _ = self.registry.mutate_state(member_id, StateTransition::ResetErrorStreak);
                }
                if recoverable_exclusion {
                    let _ = self.registry.mutate_state(member_id, StateTransition::SetRole(Role::Standby));
                    self.notifications
                        .publish(
                            NotificationEvent::new(NotificationKind::MemberRecovered, "collector succeeded after exclusion", now)
                                .with_member(member_id.clone()),
                        )
                        .await;
                }
            }
            Err(WanctlError::Collector { kind: CollectorFailureKind::Transient, reason, .. }) => {
                debug!(member = %member_id, reason, "transient collector failure");
                let _ = self.registry.mutate_state(member_id, StateTransition::RecordBadTick);
            }
            Err(WanctlError::Collector { kind: CollectorFailureKind::Permanent, reason, .. }) => {
                warn!(member = %member_id, reason, "permanent collector failure");
                let _ = self.registry.mutate_state(member_id, StateTransition::RecordBadTick);
                let _ = self.registry.mutate_state(member_id, StateTransition::RecordPermanentError);

                let Some(member) = self.registry.get(member_id) else { return };
                let should_exclude = member.live.consecutive_permanent_errors >= 3 && member.live.role != Role::Excluded;
                drop(member);

                if should_exclude {
                    let _ = self.registry.mutate_state(member_id, StateTransition::SetRole(Role::Excluded));
                    self.notifications
                        .publish(
                            NotificationEvent::new(NotificationKind::MemberExcluded, "three consecutive permanent collector errors", now)
                                .with_member(member_id.clone()),
                        )
                        .await;
                }
            }
            Err(err) => warn!(member = %member_id, error = %err, "unexpected collector error"),
        }
    }

    async fn handle_transition(&self, rec: &Recommendation, now: SystemTime) {
        let Some(new_active) = rec.record.new_active.clone() else { return };
        if rec.record.previous_active.as_ref() == Some(&new_active) {
            return;
        }
        let actually_active = self.registry.get(&new_active).map(|m| m.live.role == Role::Active).unwrap_or(false);
        if !actually_active {
            return;
        }

        let kind = self.classify_transition(rec, &new_active);
        self.notifications
            .publish(
                NotificationEvent::new(kind, rec.record.reason.clone(), now)
                    .with_transition(rec.record.previous_active.clone(), Some(new_active.clone())),
            )
            .await;

        if let Some(previous) = &rec.record.previous_active {
            if let Some(trigger) = rec.ranked.iter().find(|r| r.id == *previous).and_then(|r| r.predictor_trigger) {
                let _ = self.registry.mutate_state(previous, StateTransition::RecordPredictorTrigger(now));
                self.notifications
                    .publish(NotificationEvent::new(NotificationKind::PredictorTrigger, trigger.reason(), now).with_member(previous.clone()))
                    .await;
            }
        }
    }

    /// Distinguishes an ordinary "returning to the preferred uplink"
    /// hysteresis switch (`Failback`) from every other active-member change
    /// (`Failover`), using the declared priority ordering between the
    /// outgoing and incoming member as the signal: an urgent pre-emption
    /// (critical/unknown/predictor) is always a failover, and so is any
    /// switch that does not move to a strictly higher-priority member.
    fn classify_transition(&self, rec: &Recommendation, new_active: &MemberId) -> NotificationKind {
        if rec.urgent {
            return NotificationKind::Failover;
        }
        let previous_priority = rec.record.previous_active.as_ref().and_then(|p| self.registry.get(p)).map(|m| m.policy.base_priority);
        let new_priority = self.registry.get(new_active).map(|m| m.policy.base_priority);
        match (previous_priority, new_priority) {
            (Some(prev), Some(new)) if new > prev => NotificationKind::Failback,
            _ => NotificationKind::Failover,
        }
    }

    /// Adaptive slowdown (§4.8): lengthen the tick interval while every
    /// eligible member stays `Healthy` and the active member isn't
    /// changing, reset to the configured base the moment either stops
    /// holding. Growth is a fixed fraction of the base interval rather than
    /// a multiplicative backoff, since this is pacing a polling loop, not
    /// retrying a failed operation — `Controller::RETRY_SCHEDULE` is the
    /// adaptive-backoff-shaped problem in this crate, this isn't.
    fn adjust_interval(&mut self, rec: &Recommendation) {
        let quiescent =
            rec.record.new_active == rec.record.previous_active && rec.ranked.iter().all(|r| matches!(r.status, Status::Healthy));
        if quiescent {
            self.current_interval = (self.current_interval + self.base_interval / 2).min(MAX_TICK_SLOWDOWN);
        } else {
            self.current_interval = self.base_interval;
        }
    }
}
