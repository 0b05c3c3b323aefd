//! Decision Engine (C6): turns per-member scores and predictor flags into
//! one recommended active member per tick.
//!
//! Scoring and prediction are the Decision Engine's inputs, not its own
//! work — this module's only job is ranking and hysteresis. Dwell-time and
//! cooldown gating of the *actual* role transition belongs to the
//! Controller (C7), which is the only component with a notion of "how long
//! has the current member already been active"; the Decision Engine is
//! re-run from scratch every tick and keeps no memory of its own, the same
//! posture as the Predictor.

use std::time::{Duration, SystemTime};

use crate::config::{status_penalty, Config};
use crate::model::{DecisionRecord, Member, MemberId, Role, Status};
use crate::predictor::{Predictor, PredictorTrigger};
use crate::registry::MemberRegistry;
use crate::ring::TelemetryRing;
use crate::scorer::Scorer;

/// One candidate's computed standing for this tick, carried alongside the
/// [`DecisionRecord`] so the Controller doesn't have to re-score.
#[derive(Clone, Debug)]
pub struct Ranked {
    pub id: MemberId,
    /// Raw Scorer output, as recorded in the decision log's contributing
    /// scores.
    pub score: f64,
    /// `score - status_penalty + class_bonus + priority_bonus`, the value
    /// ranking and the switch-margin comparison actually use (§4.6 step 2).
    pub effective_score: f64,
    pub status: Status,
    pub in_cooldown: bool,
    pub predictor_trigger: Option<PredictorTrigger>,
}

#[derive(Clone, Debug)]
pub struct Recommendation {
    pub record: DecisionRecord,
    pub ranked: Vec<Ranked>,
    /// `true` when the recommendation should bypass the Controller's normal
    /// min-dwell gate (a predictor pre-emption or a critical current
    /// member).
    pub urgent: bool,
}

pub struct DecisionEngine;

impl DecisionEngine {
    /// Score every eligible member, evaluate the Predictor, and recommend
    /// the member that should hold the Active role this tick.
    ///
    /// Scores and statuses are written back into `registry` as a side
    /// effect (the registry is the single source of truth for "what do we
    /// currently believe about member X"), matching the specified flow of
    /// Scorer output feeding the registry before the Decision Engine reads
    /// it back.
    pub fn decide(
        registry: &MemberRegistry,
        ring: &TelemetryRing,
        config: &Config,
        tick: u64,
        now: SystemTime,
        tick_interval: Duration,
    ) -> Recommendation {
        let members = registry.list();
        let mut ranked = Vec::with_capacity(members.len());

        for member in &members {
            if !member.policy.eligible() || member.is_excluded() {
                continue;
            }
            let (breakdown, status) = Scorer::score(member, ring, config, now, tick_interval);
            let _ = registry.mutate_state(
                &member.id,
                crate::registry::StateTransition::SetScore { score: breakdown.effective_score, status },
            );
            let trigger = Predictor::evaluate(member, ring, config, now, tick_interval);
            let effective_score = breakdown.effective_score - status_penalty(status)
                + config.decision.class_bonus_for(member.policy.class)
                + config.decision.priority_bonus_for(member.policy.base_priority);
            ranked.push(Ranked {
                id: member.id.clone(),
                score: breakdown.effective_score,
                effective_score,
                status,
                in_cooldown: member.in_cooldown(now),
                predictor_trigger: trigger,
            });
        }

        let current_active = members.iter().find(|m| m.live.role == Role::Active);
        let (target, reason, urgent) = Self::select_target(current_active, &ranked, config);

        let contributing_scores = ranked.iter().map(|r| (r.id.clone(), r.score)).collect();
        let predictor_flags = ranked
            .iter()
            .filter_map(|r| r.predictor_trigger.map(|t| (r.id.clone(), t.reason())))
            .collect();

        let record = DecisionRecord {
            tick,
            timestamp: now,
            previous_active: current_active.map(|m| m.id.clone()),
            new_active: target,
            reason,
            contributing_scores,
            predictor_flags,
        };

        Recommendation { record, ranked, urgent }
    }

    /// Step 1 of §4.6: members with `Unknown` status carry no usable
    /// evidence and are never themselves a selectable target; members in
    /// cooldown are excluded unless doing so would leave nothing to pick
    /// from, in which case the cooldown filter is waived entirely.
    fn eligible_candidates(ranked: &[Ranked]) -> Vec<&Ranked> {
        let has_evidence = |r: &&Ranked| !matches!(r.status, Status::Unknown);
        let off_cooldown: Vec<&Ranked> = ranked.iter().filter(has_evidence).filter(|r| !r.in_cooldown).collect();
        if !off_cooldown.is_empty() {
            return off_cooldown;
        }
        ranked.iter().filter(has_evidence).collect()
    }

    fn select_target(
        current_active: Option<&Member>,
        ranked: &[Ranked],
        config: &Config,
    ) -> (Option<MemberId>, String, bool) {
        let candidates = Self::eligible_candidates(ranked);
        let best = candidates.iter().max_by(|a, b| a.effective_score.total_cmp(&b.effective_score)).copied();

        let Some(current) = current_active else {
            return match best {
                Some(b) => (Some(b.id.clone()), "no active member: selecting best candidate".to_string(), false),
                None => (None, "no_candidate".to_string(), false),
            };
        };

        let current_ranked = ranked.iter().find(|r| r.id == current.id);
        let current_critical = current_ranked.map(|r| matches!(r.status, Status::Critical)).unwrap_or(true);
        let current_unknown = current_ranked.map(|r| matches!(r.status, Status::Unknown)).unwrap_or(true);
        let current_predictor_trigger = current_ranked.and_then(|r| r.predictor_trigger);

        if current_critical || current_unknown || current_predictor_trigger.is_some() {
            if let Some(b) = best {
                if b.id != current.id {
                    let reason = match current_predictor_trigger {
                        Some(trigger) => format!("predictor_trigger: {}", trigger.reason()),
                        None if current_unknown => "current_unknown: failing over".to_string(),
                        None => "current_critical: failing over".to_string(),
                    };
                    return (Some(b.id.clone()), reason, true);
                }
            }
            if best.is_none() {
                return (Some(current.id.clone()), "no_candidate".to_string(), false);
            }
            return (Some(current.id.clone()), "current active has no better alternative".to_string(), current_critical || current_unknown);
        }

        match best {
            Some(b) if b.id != current.id => {
                let current_score = current_ranked.map(|r| r.effective_score).unwrap_or(0.0);
                if b.effective_score - current_score >= config.main.switch_margin {
                    (
                        Some(b.id.clone()),
                        format!(
                            "score_gap: candidate clears switch margin ({:.1} - {:.1} >= {:.1})",
                            b.effective_score, current_score, config.main.switch_margin
                        ),
                        false,
                    )
                } else {
                    (Some(current.id.clone()), "hysteresis: candidate does not clear switch margin".to_string(), false)
                }
            }
            Some(_) => (Some(current.id.clone()), "current active remains the best candidate".to_string(), false),
            None => (Some(current.id.clone()), "no_candidate".to_string(), false),
        }
    }
}
