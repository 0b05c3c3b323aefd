//! Predictor (C5): a stateless "is this member about to fail" check, run
//! once per member per tick alongside (not instead of) the Scorer.
//!
//! Deliberately has no fields and no memory of its own — every signal it
//! needs (trend, outage pattern, consecutive bad ticks) is re-derived from
//! the [`TelemetryRing`] and the member's [`LiveState`](crate::model::LiveState)
//! on each call, the same "derive, don't accumulate" posture as the
//! Scorer. The one piece of memory this module depends on,
//! `last_predictor_trigger_at`, lives on the member itself so the
//! Controller's cooldown bookkeeping stays in one place.

use std::time::{Duration, SystemTime};

use crate::config::Config;
use crate::model::{Member, MemberClass, Sample};
use crate::ring::TelemetryRing;

/// Minimum regression sample count before a trend is trusted for a
/// pre-emptive decision (stricter than the ring's bare "3 points" floor,
/// since acting early on a false positive costs real failover churn).
const TREND_MIN_SAMPLES: usize = 5;

/// §4.5.1: a warning-level event trigger needs at least this many warnings
/// somewhere in the window — a single stray warning must not pre-empt a
/// failover on its own.
const WARNING_BURST_THRESHOLD: usize = 3;

/// §4.5.1: tags the operator considers severe regardless of the severity
/// label attached to them (a collector might report a thermal shutdown as
/// `warning` if it can't yet tell whether recovery is underway).
const NAMED_SEVERE_EVENTS: &[&str] = &["thermal_shutdown", "hardware_failure", "connectivity_loss"];

/// §4.5.2: outage-pattern trigger thresholds — `≥3` increments within the
/// last 5 samples, or `≥5` total increments across the whole window.
const OUTAGE_RECENT_WINDOW: usize = 5;
const OUTAGE_RECENT_COUNT: usize = 3;
const OUTAGE_TOTAL_COUNT: u32 = 5;

/// §4.5.4: disruptive events (critical events or outage increments) needed
/// alongside a noisy signal trend before the stability trigger fires.
const STABILITY_MIN_DISRUPTIVE_EVENTS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PredictorTrigger {
    /// A critical-severity event appears anywhere in the window.
    CriticalEvent,
    /// A named severe event tag (thermal shutdown, hardware failure,
    /// connectivity loss, ...) appears anywhere in the window, independent
    /// of the severity label the collector attached to it.
    NamedSevereEvent,
    /// `≥3` warning-severity events accumulated somewhere in the window.
    WarningBurst,
    /// A satellite member's outage counter is climbing: `≥3` increments in
    /// the last 5 samples, or `≥5` total across the window.
    OutagePattern,
    /// Primary signal metric is on a confident downward trend projected to
    /// cross the class's unusable floor within the configured horizon.
    DegradingTrend { confidence: f64 },
    /// Primary signal metric is noisy (variance over threshold) and at
    /// least two disruptive events occurred in the same window.
    Instability,
}

impl PredictorTrigger {
    pub fn reason(&self) -> String {
        match self {
            PredictorTrigger::CriticalEvent => "critical event in window".to_string(),
            PredictorTrigger::NamedSevereEvent => "named severe event in window".to_string(),
            PredictorTrigger::WarningBurst => "warning burst in window".to_string(),
            PredictorTrigger::OutagePattern => "rising outage count".to_string(),
            PredictorTrigger::DegradingTrend { confidence } => {
                format!("degrading signal trend (confidence {confidence:.2})")
            }
            PredictorTrigger::Instability => "noisy signal trend with disruptive events".to_string(),
        }
    }
}

fn unusable_floor(class: MemberClass) -> Option<f64> {
    match class {
        MemberClass::Satellite => Some(2.0),
        MemberClass::Cellular => Some(-110.0),
        MemberClass::Wifi => Some(-85.0),
        MemberClass::Lan | MemberClass::Generic => None,
    }
}

/// §4.5.4's "class threshold" for the stability trigger — the signal
/// variance level past which the primary metric is considered noisy rather
/// than merely weak.
fn signal_variance_threshold(class: MemberClass) -> Option<f64> {
    match class {
        MemberClass::Satellite => Some(9.0),
        MemberClass::Cellular => Some(36.0),
        MemberClass::Wifi => Some(36.0),
        MemberClass::Lan | MemberClass::Generic => None,
    }
}

fn is_disruptive(sample: &Sample) -> bool {
    sample.has_critical_event() || sample.signal.outage_increment() > 0
}

pub struct Predictor;

impl Predictor {
    /// Evaluate all predictive triggers for one member. Returns the first
    /// trigger that fires, in priority order (hard event first, soft
    /// instability last) — callers that need every reason simultaneously
    /// should call the individual `check_*` helpers directly.
    pub fn evaluate(
        member: &Member,
        ring: &TelemetryRing,
        config: &Config,
        now: SystemTime,
        tick_interval: Duration,
    ) -> Option<PredictorTrigger> {
        if !config.main.predictive {
            return None;
        }
        if Self::in_predictive_cooldown(member, config, now) {
            return None;
        }

        let window = ring.default_window(&member.id, now);
        if window.is_empty() {
            return None;
        }

        if let Some(trigger) = Self::check_event_triggers(&window) {
            return Some(trigger);
        }
        if let Some(trigger) = Self::check_outage_pattern(member, &window) {
            return Some(trigger);
        }
        if let Some(trigger) = Self::check_degrading_trend(member, ring, config, &window, tick_interval) {
            return Some(trigger);
        }
        if let Some(trigger) = Self::check_stability(member, ring, &window) {
            return Some(trigger);
        }
        None
    }

    /// §4.5.1: critical events, named-severe events and warning bursts are
    /// evaluated over the *whole* window, not just the latest sample — a
    /// thermal shutdown tagged two samples ago is still a reason to fail
    /// over now.
    fn check_event_triggers(window: &[Sample]) -> Option<PredictorTrigger> {
        if window.iter().any(|s| s.has_critical_event()) {
            return Some(PredictorTrigger::CriticalEvent);
        }
        let has_named_severe = window
            .iter()
            .flat_map(|s| s.events.iter())
            .any(|e| NAMED_SEVERE_EVENTS.contains(&e.tag.as_str()));
        if has_named_severe {
            return Some(PredictorTrigger::NamedSevereEvent);
        }
        let warnings: usize = window.iter().map(|s| s.warning_count()).sum();
        if warnings >= WARNING_BURST_THRESHOLD {
            return Some(PredictorTrigger::WarningBurst);
        }
        None
    }

    fn in_predictive_cooldown(member: &Member, config: &Config, now: SystemTime) -> bool {
        member
            .live
            .last_predictor_trigger_at
            .and_then(|last| now.duration_since(last).ok())
            .map(|age| age < config.predictive_cooldown())
            .unwrap_or(false)
    }

    fn check_outage_pattern(member: &Member, window: &[Sample]) -> Option<PredictorTrigger> {
        if member.policy.class != MemberClass::Satellite {
            return None;
        }
        let recent = &window[window.len().saturating_sub(OUTAGE_RECENT_WINDOW)..];
        let recent_increments = recent.iter().filter(|s| s.signal.outage_increment() > 0).count();
        let total_increments: u32 = window.iter().map(|s| s.signal.outage_increment()).sum();
        if recent_increments >= OUTAGE_RECENT_COUNT || total_increments >= OUTAGE_TOTAL_COUNT {
            Some(PredictorTrigger::OutagePattern)
        } else {
            None
        }
    }

    /// §4.5.4: noisy primary-signal trend combined with at least two
    /// disruptive events (critical events or outage increments) in the same
    /// window. Classes with no signal concept (LAN, generic) never trip
    /// this — their connectivity numbers already carry the full judgment.
    fn check_stability(member: &Member, ring: &TelemetryRing, window: &[Sample]) -> Option<PredictorTrigger> {
        let threshold = signal_variance_threshold(member.policy.class)?;
        let trend = ring.trend(&member.id, window.len().max(1), |s| s.signal.primary_metric())?;
        let disruptive_events = window.iter().filter(|s| is_disruptive(s)).count();
        if trend.variance > threshold && disruptive_events >= STABILITY_MIN_DISRUPTIVE_EVENTS {
            Some(PredictorTrigger::Instability)
        } else {
            None
        }
    }

    fn check_degrading_trend(
        member: &Member,
        ring: &TelemetryRing,
        config: &Config,
        window: &[Sample],
        tick_interval: Duration,
    ) -> Option<PredictorTrigger> {
        let floor = unusable_floor(member.policy.class)?;
        let regression = ring.regression(&member.id, window.len().max(1), |s| s.signal.primary_metric())?;
        if regression.count < TREND_MIN_SAMPLES || regression.slope >= 0.0 {
            return None;
        }
        let confidence = regression.confidence();
        if confidence < config.predictor.confidence_min {
            return None;
        }

        let tick_ms = tick_interval.as_millis().max(1) as f64;
        let horizon_ticks = (config.prediction_horizon().as_millis() as f64 / tick_ms).max(1.0);
        let projected = regression.project((regression.count - 1) as f64, horizon_ticks);
        if projected <= floor {
            Some(PredictorTrigger::DegradingTrend { confidence })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MemberId, Policy, SignalReading};

    fn member(class: MemberClass) -> Member {
        let policy =
            Policy { class, base_priority: 0, enabled: true, metered: false, data_limit: None, poll_interval_override_ms: None };
        Member::new(MemberId::from("wan0"), "eth0", policy)
    }

    fn sample(snr_db: f64) -> Sample {
        Sample {
            timestamp: SystemTime::now(),
            latency_ms: Some(50.0),
            loss_fraction: Some(0.0),
            jitter_ms: Some(5.0),
            link_up: Some(true),
            throughput_kbps: Some(1000.0),
            signal: SignalReading::Satellite {
                obstruction_fraction: Some(0.0),
                snr_db: Some(snr_db),
                uptime_s: Some(1000),
                outage_count: Some(0),
                reboot_ready: Some(false),
            },
            events: Vec::new(),
        }
    }

    #[test]
    fn no_trigger_on_healthy_stable_signal() {
        let ring = TelemetryRing::new(20);
        let member = member(MemberClass::Satellite);
        ring.track(member.id.clone());
        for _ in 0..6 {
            ring.append(&member.id, sample(15.0)).unwrap();
        }
        let config = Config::default();
        let trigger = Predictor::evaluate(&member, &ring, &config, SystemTime::now(), Duration::from_millis(1500));
        assert!(trigger.is_none());
    }

    #[test]
    fn sharply_falling_snr_triggers_degrading_trend() {
        let ring = TelemetryRing::new(20);
        let member = member(MemberClass::Satellite);
        ring.track(member.id.clone());
        for i in 0..8 {
            ring.append(&member.id, sample(20.0 - i as f64 * 4.0)).unwrap();
        }
        let config = Config::default();
        let trigger = Predictor::evaluate(&member, &ring, &config, SystemTime::now(), Duration::from_millis(1500));
        assert!(matches!(trigger, Some(PredictorTrigger::DegradingTrend { .. })));
    }

    #[test]
    fn cooldown_suppresses_repeat_trigger() {
        let ring = TelemetryRing::new(20);
        let mut member = member(MemberClass::Satellite);
        ring.track(member.id.clone());
        for i in 0..8 {
            ring.append(&member.id, sample(20.0 - i as f64 * 4.0)).unwrap();
        }
        member.live.last_predictor_trigger_at = Some(SystemTime::now());
        let config = Config::default();
        let trigger = Predictor::evaluate(&member, &ring, &config, SystemTime::now(), Duration::from_millis(1500));
        assert!(trigger.is_none());
    }

    #[test]
    fn disabled_predictive_mode_never_triggers() {
        let ring = TelemetryRing::new(20);
        let member = member(MemberClass::Satellite);
        ring.track(member.id.clone());
        for i in 0..8 {
            ring.append(&member.id, sample(20.0 - i as f64 * 4.0)).unwrap();
        }
        let mut config = Config::default();
        config.main.predictive = false;
        let trigger = Predictor::evaluate(&member, &ring, &config, SystemTime::now(), Duration::from_millis(1500));
        assert!(trigger.is_none());
    }

    fn sample_with_outage(outage_count: u32) -> Sample {
        let mut s = sample(15.0);
        s.signal = SignalReading::Satellite {
            obstruction_fraction: Some(0.0),
            snr_db: Some(15.0),
            uptime_s: Some(1000),
            outage_count: Some(outage_count),
            reboot_ready: Some(false),
        };
        s
    }

    #[test]
    fn three_of_last_five_outage_increments_trigger_outage_pattern() {
        let ring = TelemetryRing::new(20);
        let member = member(MemberClass::Satellite);
        ring.track(member.id.clone());
        for outage in [0, 1, 0, 1, 1] {
            ring.append(&member.id, sample_with_outage(outage)).unwrap();
        }
        let config = Config::default();
        let trigger = Predictor::evaluate(&member, &ring, &config, SystemTime::now(), Duration::from_millis(1500));
        assert_eq!(trigger, Some(PredictorTrigger::OutagePattern));
    }

    #[test]
    fn warning_burst_triggers_independent_of_signal_health() {
        let ring = TelemetryRing::new(20);
        let member = member(MemberClass::Satellite);
        ring.track(member.id.clone());
        for _ in 0..2 {
            ring.append(&member.id, sample(15.0)).unwrap();
        }
        let mut noisy = sample(15.0);
        noisy.events = vec![
            crate::model::SampleEvent::new("cell_reselect", crate::model::EventSeverity::Warning),
            crate::model::SampleEvent::new("cell_reselect", crate::model::EventSeverity::Warning),
            crate::model::SampleEvent::new("cell_reselect", crate::model::EventSeverity::Warning),
        ];
        ring.append(&member.id, noisy).unwrap();
        let config = Config::default();
        let trigger = Predictor::evaluate(&member, &ring, &config, SystemTime::now(), Duration::from_millis(1500));
        assert_eq!(trigger, Some(PredictorTrigger::WarningBurst));
    }

    #[test]
    fn named_severe_event_triggers_even_at_warning_severity() {
        let ring = TelemetryRing::new(20);
        let member = member(MemberClass::Satellite);
        ring.track(member.id.clone());
        let mut flagged = sample(15.0);
        flagged.events = vec![crate::model::SampleEvent::new("thermal_shutdown", crate::model::EventSeverity::Warning)];
        ring.append(&member.id, flagged).unwrap();
        let config = Config::default();
        let trigger = Predictor::evaluate(&member, &ring, &config, SystemTime::now(), Duration::from_millis(1500));
        assert_eq!(trigger, Some(PredictorTrigger::NamedSevereEvent));
    }

    #[test]
    fn noisy_signal_with_two_disruptive_events_triggers_instability() {
        let ring = TelemetryRing::new(20);
        let member = member(MemberClass::Satellite);
        ring.track(member.id.clone());
        let swings = [4.0, 18.0, 3.0, 19.0, 4.0, 18.0];
        for (i, snr) in swings.iter().enumerate() {
            let mut s = sample(*snr);
            if i == 1 || i == 3 {
                s.signal = SignalReading::Satellite {
                    obstruction_fraction: Some(0.0),
                    snr_db: Some(*snr),
                    uptime_s: Some(1000),
                    outage_count: Some(1),
                    reboot_ready: Some(false),
                };
            }
            ring.append(&member.id, s).unwrap();
        }
        let config = Config::default();
        let trigger = Predictor::evaluate(&member, &ring, &config, SystemTime::now(), Duration::from_millis(1500));
        assert_eq!(trigger, Some(PredictorTrigger::Instability));
    }
}
