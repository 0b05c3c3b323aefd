//! Scorer (C4): turns a member's recent sample window into one `0..=100`
//! effective score plus a discrete [`Status`] label.
//!
//! The score is a weighted sum of four `0..=100` sub-components — signal,
//! connectivity, stability, quality — each produced by a small
//! [`PiecewiseLinear`] curve rather than a hand-tuned formula per metric, so
//! the curves themselves (not scattered arithmetic) are the thing config
//! and tests reason about, expressing a graded judgment as a handful of
//! named, independently testable functions (see
//! `spark-switch::core::codec_negotiation`'s per-codec preference tables)
//! rather than one large scoring expression.

use std::time::{Duration, SystemTime};

use crate::config::{Config, FailoverThresholds, ScoreThresholds, Weights};
use crate::model::{Member, MemberClass, Sample, SignalReading, Status};
use crate::piecewise::PiecewiseLinear;
use crate::ring::TelemetryRing;

/// Consecutive stale-or-missing-field samples before the "degrade to
/// Unknown"/"cap signal at 0" rules kick in.
const STALE_SAMPLE_GRACE: u32 = 3;

/// Event penalty weights, capped in total so a burst of warnings can never
/// drag a member below what a single critical event would.
const WARNING_PENALTY: f64 = 3.0;
const CRITICAL_PENALTY: f64 = 10.0;
const MAX_EVENT_PENALTY: f64 = 20.0;

fn satellite_signal_curve() -> PiecewiseLinear {
    // snr_db: below 2 dB is unusable, above 12 dB is clean.
    PiecewiseLinear::new(vec![(2.0, 0.0), (12.0, 100.0)])
}

fn cellular_signal_curve() -> PiecewiseLinear {
    // rsrp_dbm: -110 is barely registered, -80 is strong.
    PiecewiseLinear::new(vec![(-110.0, 0.0), (-80.0, 100.0)])
}

fn wifi_signal_curve() -> PiecewiseLinear {
    // rssi_dbm: -85 is fringe, -55 is strong.
    PiecewiseLinear::new(vec![(-85.0, 0.0), (-55.0, 100.0)])
}

fn latency_curve(thresholds: &FailoverThresholds) -> PiecewiseLinear {
    PiecewiseLinear::new(vec![(0.0, 100.0), (thresholds.latency_ms, 40.0), (thresholds.latency_ms * 2.0, 0.0)])
}

fn loss_curve(thresholds: &FailoverThresholds) -> PiecewiseLinear {
    let failover_fraction = thresholds.loss / 100.0;
    PiecewiseLinear::new(vec![(0.0, 100.0), (failover_fraction, 40.0), (failover_fraction * 3.0, 0.0)])
}

fn jitter_curve() -> PiecewiseLinear {
    PiecewiseLinear::new(vec![(0.0, 100.0), (50.0, 40.0), (150.0, 0.0)])
}

/// One member's sub-component breakdown, returned alongside the effective
/// score so the query API and decision log can show why a member scored the
/// way it did.
#[derive(Clone, Copy, Debug)]
pub struct ScoreBreakdown {
    pub signal: f64,
    pub connectivity: f64,
    pub stability: f64,
    pub quality: f64,
    pub event_penalty: f64,
    pub effective_score: f64,
}

/// Signal component from the class-specific primary metric. Classes with no
/// meaningful signal concept (LAN, generic wired) are never penalized here;
/// their connectivity and quality components carry the full judgment.
fn signal_component(class: MemberClass, signal: &SignalReading) -> Option<f64> {
    let metric = signal.primary_metric();
    match class {
        MemberClass::Satellite => metric.map(|v| satellite_signal_curve().evaluate(v)),
        MemberClass::Cellular => metric.map(|v| cellular_signal_curve().evaluate(v)),
        MemberClass::Wifi => metric.map(|v| wifi_signal_curve().evaluate(v)),
        MemberClass::Lan | MemberClass::Generic => Some(100.0),
    }
}

fn connectivity_component(sample: &Sample, thresholds: &FailoverThresholds) -> f64 {
    let mut parts = Vec::new();
    if let Some(latency) = sample.latency_ms {
        parts.push(latency_curve(thresholds).evaluate(latency));
    }
    if let Some(loss) = sample.loss_fraction {
        parts.push(loss_curve(thresholds).evaluate(loss));
    }
    if sample.link_up == Some(false) {
        parts.push(0.0);
    }
    if parts.is_empty() {
        return 50.0; // no connectivity evidence at all: neutral, not punished.
    }
    parts.iter().sum::<f64>() / parts.len() as f64
}

fn quality_component(sample: &Sample, window: &[Sample]) -> f64 {
    let jitter_score = sample.jitter_ms.map(|j| jitter_curve().evaluate(j)).unwrap_or(70.0);
    let up_count = window.iter().filter(|s| s.link_up != Some(false)).count();
    let up_ratio = if window.is_empty() { 1.0 } else { up_count as f64 / window.len() as f64 };
    (jitter_score + up_ratio * 100.0) / 2.0
}

/// Stability penalizes a noisy latency trend and disruptive events over the
/// scoring window, independent of the latest sample's raw connectivity
/// numbers — a member can look fine *right now* and still be unstable.
fn stability_component(ring: &TelemetryRing, member_id: &str, window: &[Sample]) -> f64 {
    let variance_penalty = ring
        .trend(member_id, window.len().max(1), |s| s.latency_ms)
        .map(|t| (t.variance / 4000.0).clamp(0.0, 1.0) * 100.0)
        .unwrap_or(0.0);
    let disruptive_events = window.iter().filter(|s| s.has_critical_event()).count();
    let event_penalty = (disruptive_events as f64 * 15.0).min(100.0);
    (100.0 - variance_penalty - event_penalty).clamp(0.0, 100.0)
}

fn event_penalty(window: &[Sample]) -> f64 {
    let warnings: usize = window.iter().map(|s| s.warning_count()).sum();
    let criticals = window.iter().filter(|s| s.has_critical_event()).count();
    (warnings as f64 * WARNING_PENALTY + criticals as f64 * CRITICAL_PENALTY).min(MAX_EVENT_PENALTY)
}

fn status_for_score(score: f64, thresholds: &ScoreThresholds) -> Status {
    if score >= thresholds.healthy {
        Status::Healthy
    } else if score >= thresholds.degraded {
        Status::Degraded
    } else if score >= thresholds.unhealthy {
        Status::Unhealthy
    } else {
        Status::Critical
    }
}

/// Counts the trailing run of samples (most recent first) missing the
/// class's primary metric, used for the "missing mandatory field" edge case.
fn trailing_missing_primary_metric(window: &[Sample]) -> u32 {
    window
        .iter()
        .rev()
        .take_while(|s| s.signal.primary_metric().is_none() && !matches!(s.signal, SignalReading::Lan | SignalReading::Generic))
        .count() as u32
}

pub struct Scorer;

impl Scorer {
    /// Score `member` from its telemetry window. `now` and `tick_interval`
    /// drive the staleness check independent of `config.poll_interval`,
    /// since a per-member poll override can run on a different cadence.
    pub fn score(
        member: &Member,
        ring: &TelemetryRing,
        config: &Config,
        now: SystemTime,
        tick_interval: Duration,
    ) -> (ScoreBreakdown, Status) {
        let window = ring.default_window(&member.id, now);
        let Some(latest) = window.last().cloned() else {
            let breakdown = ScoreBreakdown {
                signal: 0.0,
                connectivity: 0.0,
                stability: 0.0,
                quality: 0.0,
                event_penalty: 0.0,
                effective_score: 0.0,
            };
            return (breakdown, Status::Unknown);
        };

        let weights = config.weights_for(member.policy.class);
        let missing_run = trailing_missing_primary_metric(&window);
        let signal = if missing_run >= STALE_SAMPLE_GRACE {
            0.0
        } else {
            signal_component(member.policy.class, &latest.signal).unwrap_or(100.0)
        };
        let connectivity = connectivity_component(&latest, &config.failover_thresholds);
        let stability = stability_component(ring, &member.id, &window);
        let quality = quality_component(&latest, &window);
        let penalty = event_penalty(&window);

        let weighted = weighted_sum(&weights, signal, connectivity, stability, quality);
        let effective_score = (weighted - penalty).clamp(0.0, 100.0);

        let breakdown = ScoreBreakdown { signal, connectivity, stability, quality, event_penalty: penalty, effective_score };

        let mut status = status_for_score(effective_score, &config.score_thresholds);
        if missing_run >= STALE_SAMPLE_GRACE && matches!(status, Status::Healthy) {
            status = Status::Degraded;
        }

        let stale = member
            .live
            .last_sample_at
            .map(|last| now.duration_since(last).map(|age| age > tick_interval * STALE_SAMPLE_GRACE).unwrap_or(false))
            .unwrap_or(true);
        if stale {
            status = Status::Unknown;
        }

        (breakdown, status)
    }
}

fn weighted_sum(weights: &Weights, signal: f64, connectivity: f64, stability: f64, quality: f64) -> f64 {
    signal * weights.signal + connectivity * weights.connectivity + stability * weights.stability + quality * weights.quality
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MemberId, Policy};

    fn sample(latency_ms: f64, loss_fraction: f64, signal: SignalReading) -> Sample {
        Sample {
            timestamp: SystemTime::now(),
            latency_ms: Some(latency_ms),
            loss_fraction: Some(loss_fraction),
            jitter_ms: Some(5.0),
            link_up: Some(true),
            throughput_kbps: Some(5000.0),
            signal,
            events: Vec::new(),
        }
    }

    fn member(class: MemberClass) -> Member {
        let policy =
            Policy { class, base_priority: 0, enabled: true, metered: false, data_limit: None, poll_interval_override_ms: None };
        let mut m = Member::new(MemberId::from("wan0"), "eth0", policy);
        m.live.last_sample_at = Some(SystemTime::now());
        m
    }

    #[test]
    fn clean_lan_sample_scores_healthy() {
        let ring = TelemetryRing::new(10);
        let member = member(MemberClass::Lan);
        ring.track(member.id.clone());
        ring.append(&member.id, sample(5.0, 0.0, SignalReading::Lan)).unwrap();
        let config = Config::default();
        let (breakdown, status) = Scorer::score(&member, &ring, &config, SystemTime::now(), Duration::from_millis(1500));
        assert_eq!(status, Status::Healthy);
        assert!(breakdown.effective_score >= config.score_thresholds.healthy);
    }

    #[test]
    fn weak_satellite_signal_drags_score_down() {
        let ring = TelemetryRing::new(10);
        let member = member(MemberClass::Satellite);
        ring.track(member.id.clone());
        let weak = SignalReading::Satellite {
            obstruction_fraction: Some(0.4),
            snr_db: Some(1.0),
            uptime_s: Some(100),
            outage_count: Some(0),
            reboot_ready: Some(false),
        };
        ring.append(&member.id, sample(900.0, 0.05, weak)).unwrap();
        let config = Config::default();
        let (_, status) = Scorer::score(&member, &ring, &config, SystemTime::now(), Duration::from_millis(1500));
        assert!(matches!(status, Status::Unhealthy | Status::Critical));
    }

    #[test]
    fn missing_mandatory_field_for_three_ticks_caps_status_at_degraded() {
        let ring = TelemetryRing::new(10);
        let member = member(MemberClass::Cellular);
        ring.track(member.id.clone());
        let blank = SignalReading::Cellular {
            rsrp_dbm: None,
            rsrq_db: None,
            sinr_db: None,
            cell_id: None,
            band: None,
            network_type: None,
        };
        for _ in 0..3 {
            ring.append(&member.id, sample(5.0, 0.0, blank.clone())).unwrap();
        }
        let config = Config::default();
        let (breakdown, status) = Scorer::score(&member, &ring, &config, SystemTime::now(), Duration::from_millis(1500));
        assert_eq!(breakdown.signal, 0.0);
        assert!(matches!(status, Status::Degraded | Status::Unhealthy | Status::Critical));
    }

    #[test]
    fn stale_last_sample_forces_unknown_status() {
        let ring = TelemetryRing::new(10);
        let mut member = member(MemberClass::Lan);
        ring.track(member.id.clone());
        ring.append(&member.id, sample(5.0, 0.0, SignalReading::Lan)).unwrap();
        member.live.last_sample_at = Some(SystemTime::now() - Duration::from_secs(30));
        let config = Config::default();
        let (_, status) = Scorer::score(&member, &ring, &config, SystemTime::now(), Duration::from_millis(1500));
        assert_eq!(status, Status::Unknown);
    }

    #[test]
    fn critical_events_are_capped_not_unbounded() {
        let ring = TelemetryRing::new(10);
        let member = member(MemberClass::Lan);
        ring.track(member.id.clone());
        let mut noisy = sample(5.0, 0.0, SignalReading::Lan);
        noisy.events = vec![
            crate::model::SampleEvent::new("flap", crate::model::EventSeverity::Critical),
            crate::model::SampleEvent::new("flap2", crate::model::EventSeverity::Critical),
            crate::model::SampleEvent::new("flap3", crate::model::EventSeverity::Critical),
        ];
        ring.append(&member.id, noisy).unwrap();
        let config = Config::default();
        let (breakdown, _) = Scorer::score(&member, &ring, &config, SystemTime::now(), Duration::from_millis(1500));
        assert_eq!(breakdown.event_penalty, MAX_EVENT_PENALTY);
    }
}
