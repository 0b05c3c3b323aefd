//! Controller (C7): the only component allowed to turn a
//! [`DecisionEngine`](crate::decision::DecisionEngine) recommendation into an
//! actual role transition.
//!
//! Owns the two pieces of state the Decision Engine deliberately has none
//! of: how long the current Active member has held the role (min-dwell
//! gating) and the fixed retry schedule for a failed apply. Retries use
//! literal fixed delays (100ms, 400ms, 1.5s) rather than the adaptive
//! congestion-aware backoff used elsewhere for load-shedding (see
//! `governance::retry::adaptive::compute`) — those tunings are about
//! load-shedding under contention, not about waiting out a one-shot
//! control-plane apply, so reusing that formula here would buy nothing but
//! a harder-to-explain schedule. A fixed-spacing rate limiter between
//! applies is the one idea carried over from it.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::decision::Recommendation;
use crate::error::{Retriable, WanctlError};
use crate::model::{MemberId, Role};
use crate::registry::{MemberRegistry, StateTransition};

/// Fixed apply-retry backoff schedule, in order.
pub const RETRY_SCHEDULE: [Duration; 3] = [Duration::from_millis(100), Duration::from_millis(400), Duration::from_millis(1500)];

/// Minimum spacing between two apply attempts to the multi-WAN subsystem,
/// regardless of how many members are flapping at once.
pub const MIN_APPLY_SPACING: Duration = Duration::from_millis(500);

/// Abstraction over "make `member` the active uplink at the OS/kernel
/// level", implemented outside this crate (see `wanctl-transport`'s
/// multi-WAN adapter) so the Controller's state machine can be tested
/// without a real multi-WAN subsystem.
#[async_trait]
pub trait ApplySink: Send {
    async fn apply(&mut self, member: &MemberId) -> Result<(), WanctlError>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum DwellGate {
    Clear,
    StillDwelling,
    Overridden,
}

/// Controller state machine driving standby -> active -> cooling ->
/// standby transitions, plus the excluded dead end reached independently
/// via the registry's discovery reconciliation.
pub struct Controller {
    active_since: Option<(MemberId, SystemTime)>,
    last_apply_at: Option<SystemTime>,
}

impl Default for Controller {
    fn default() -> Self {
        Self { active_since: None, last_apply_at: None }
    }
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a [`Recommendation`] from the Decision Engine, honoring
    /// min-dwell unless the recommendation is `urgent` (critical current
    /// member or predictor pre-emption), cooldown on the member being
    /// (re)activated, and the global apply-spacing rate limit.
    pub async fn apply(
        &mut self,
        recommendation: &Recommendation,
        registry: &MemberRegistry,
        sink: &mut dyn ApplySink,
        config: &crate::config::Config,
        now: SystemTime,
    ) -> Result<(), WanctlError> {
        let Some(target) = recommendation.record.new_active.clone() else {
            return Ok(());
        };

        if let Some((current_id, _)) = &self.active_since {
            if *current_id == target {
                return Ok(());
            }
        }

        match self.dwell_gate(now, recommendation.urgent, config.min_dwell()) {
            DwellGate::StillDwelling => {
                info!(member = %target, "decision engine proposed a switch but min-dwell has not elapsed");
                return Ok(());
            }
            DwellGate::Clear | DwellGate::Overridden => {}
        }

        if let Some(member) = registry.get(&target) {
            if member.in_cooldown(now) {
                info!(member = %target, "candidate is still in post-deactivation cooldown, holding");
                return Ok(());
            }
        }

        if let Some(last) = self.last_apply_at {
            if now.duration_since(last).map(|age| age < MIN_APPLY_SPACING).unwrap_or(true) {
                return Ok(());
            }
        }

        self.apply_with_retries(&target, registry, sink, config, now).await
    }

    /// Manual override entry point for an operator-requested
    /// `failover(member, force)` (§6.3). There is no `Recommendation` to
    /// evaluate here, so switch-margin/hysteresis scoring never enters into
    /// it — but exclusion is always respected, and cooldown/min-dwell are
    /// honored unless `force` is set.
    pub async fn force_activate(
        &mut self,
        target: &MemberId,
        force: bool,
        registry: &MemberRegistry,
        sink: &mut dyn ApplySink,
        config: &crate::config::Config,
        now: SystemTime,
    ) -> Result<(), WanctlError> {
        let member = registry
            .get(target)
            .ok_or_else(|| WanctlError::control(target.clone(), Retriable::No, "unknown member"))?;
        if member.live.role == Role::Excluded {
            return Err(WanctlError::control(target.clone(), Retriable::No, "member is excluded and cannot be activated"));
        }
        let in_cooldown = member.in_cooldown(now);
        drop(member);
        if in_cooldown && !force {
            return Err(WanctlError::control(target.clone(), Retriable::No, "member is in cooldown, retry with force"));
        }

        if let Some((current_id, _)) = &self.active_since {
            if *current_id == *target {
                return Ok(());
            }
        }

        self.apply_with_retries(target, registry, sink, config, now).await
    }

    fn dwell_gate(&self, now: SystemTime, urgent: bool, min_dwell: Duration) -> DwellGate {
        if urgent {
            return DwellGate::Overridden;
        }
        match &self.active_since {
            None => DwellGate::Clear,
            Some((_, since)) => {
                let elapsed = now.duration_since(*since).unwrap_or(Duration::ZERO);
                if elapsed >= min_dwell {
                    DwellGate::Clear
                } else {
                    DwellGate::StillDwelling
                }
            }
        }
    }

    async fn apply_with_retries(
        &mut self,
        target: &MemberId,
        registry: &MemberRegistry,
        sink: &mut dyn ApplySink,
        config: &crate::config::Config,
        now: SystemTime,
    ) -> Result<(), WanctlError> {
        let mut last_err = None;
        for (attempt, delay) in std::iter::once(Duration::ZERO).chain(RETRY_SCHEDULE).enumerate() {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }
            match sink.apply(target).await {
                Ok(()) => {
                    self.on_apply_succeeded(target, registry, config, now);
                    return Ok(());
                }
                Err(err) => {
                    warn!(member = %target, attempt, error = %err, "apply attempt failed");
                    let retriable = err.is_transient();
                    last_err = Some(err);
                    if !retriable {
                        break;
                    }
                }
            }
        }
        let err = last_err.unwrap_or_else(|| {
            WanctlError::control(target.clone(), Retriable::No, "apply failed with no recorded error")
        });
        Err(err)
    }

    fn on_apply_succeeded(&mut self, target: &MemberId, registry: &MemberRegistry, config: &crate::config::Config, now: SystemTime) {
        if let Some((previous_id, _)) = self.active_since.take() {
            if previous_id != *target {
                let _ = registry.mutate_state(&previous_id, StateTransition::SetRole(Role::Cooling));
                let cooldown_until = now + config.cooldown();
                let _ = registry.mutate_state(&previous_id, StateTransition::SetCooldownUntil(Some(cooldown_until)));
            }
        }
        let _ = registry.mutate_state(target, StateTransition::SetRole(Role::Active));
        let _ = registry.mutate_state(target, StateTransition::ResetTickCounters);
        self.active_since = Some((target.clone(), now));
        self.last_apply_at = Some(now);
        info!(member = %target, "activated");
    }
}
