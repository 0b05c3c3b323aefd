//! Telemetry Ring (C1): bounded per-member sample history for a
//! single-writer (Orchestrator), multi-reader (query API, Scorer,
//! Predictor) access pattern.
//!
//! Rather than a lock-free slot/generation-counter scheme built on
//! per-slot `unsafe` cells, each member's ring lives behind an
//! [`arc_swap::ArcSwap`] snapshot: `append` builds the next ring state and
//! atomically swaps the pointer, so readers always observe a complete,
//! untorn snapshot and the writer never blocks. This crate's root `lib.rs`
//! declares `#![deny(unsafe_code)]`; the swap keeps the "no reader ever sees
//! a partially-written ring" guarantee without it.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::error::{Result, WanctlError};
use crate::model::{MemberId, Sample};

const DEFAULT_CAPACITY: usize = 100;
const DEFAULT_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Immutable ring contents, replaced wholesale on every append.
#[derive(Clone, Debug, Default)]
struct RingData {
    /// Logical order oldest..newest; truncated from the front once capacity
    /// is exceeded. A `Vec` clone per append is O(capacity), which is cheap
    /// at the specified capacity (~100) relative to the tick cadence.
    samples: Vec<Sample>,
    capacity: usize,
}

impl RingData {
    fn with_capacity(capacity: usize) -> Self {
        Self { samples: Vec::with_capacity(capacity), capacity }
    }

    fn pushed(&self, sample: Sample) -> Self {
        let mut samples = if self.samples.len() >= self.capacity {
            self.samples[self.samples.len() - self.capacity + 1..].to_vec()
        } else {
            self.samples.clone()
        };
        samples.push(sample);
        Self { samples, capacity: self.capacity }
    }
}

/// Slope/variance summary over an extracted numeric, as specified for
/// `trend(member_id, extractor, window)`. `None` (the whole `Trend`) when
/// fewer than 3 valid samples are available.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Trend {
    pub slope: f64,
    pub variance: f64,
    pub count: usize,
}

/// Full linear-regression result, used internally by the Predictor for
/// trend-trigger confidence in addition to the public `Trend` summary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    /// Sample variance of the extracted y-values (not of the residuals).
    pub variance: f64,
    pub residual_variance: f64,
    pub count: usize,
}

impl Regression {
    /// Goodness-of-fit in \[0, 1\]: `1 - residual_variance / variance`,
    /// clamped. Degenerate (zero-variance) inputs are treated as perfectly
    /// confident, since a constant series has no unexplained variance.
    pub fn confidence(&self) -> f64 {
        if self.variance <= f64::EPSILON {
            return 1.0;
        }
        (1.0 - self.residual_variance / self.variance).clamp(0.0, 1.0)
    }

    /// Linear projection of y at `steps_ahead` beyond the last observed x.
    pub fn project(&self, last_x: f64, steps_ahead: f64) -> f64 {
        self.intercept + self.slope * (last_x + steps_ahead)
    }
}

/// Ordinary least squares over `(x, y)` pairs. Returns `None` under 3
/// points, matching the ring's "undefined under 3 samples" rule.
pub fn linear_regression(points: &[(f64, f64)]) -> Option<Regression> {
    let count = points.len();
    if count < 3 {
        return None;
    }
    let n = count as f64;
    let mean_x: f64 = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y: f64 = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    for (x, y) in points {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x) * (x - mean_x);
    }
    let slope = if var_x.abs() > f64::EPSILON { cov / var_x } else { 0.0 };
    let intercept = mean_y - slope * mean_x;

    let variance = points.iter().map(|(_, y)| (y - mean_y).powi(2)).sum::<f64>() / n;
    let residual_variance = points
        .iter()
        .map(|(x, y)| {
            let predicted = intercept + slope * x;
            (y - predicted).powi(2)
        })
        .sum::<f64>()
        / n;

    Some(Regression { slope, intercept, variance, residual_variance, count })
}

/// Per-member fixed-capacity sample history with trend queries.
#[derive(Debug)]
pub struct TelemetryRing {
    capacity: usize,
    members: DashMap<MemberId, ArcSwap<RingData>>,
}

impl Default for TelemetryRing {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TelemetryRing {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, members: DashMap::new() }
    }

    /// Start tracking a member with an empty ring. Idempotent: re-tracking
    /// an already-tracked member resets its history, matching the "live
    /// state resets on creation" lifecycle rule.
    pub fn track(&self, member: MemberId) {
        self.members.insert(member, ArcSwap::new(Arc::new(RingData::with_capacity(self.capacity))));
    }

    pub fn untrack(&self, member: &str) {
        self.members.remove(member);
    }

    pub fn is_tracked(&self, member: &str) -> bool {
        self.members.contains_key(member)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Append a sample for `member`. Constant-time modulo the per-append
    /// ring clone; fails with `NoSuchMember` if the member has been removed.
    pub fn append(&self, member: &MemberId, sample: Sample) -> Result<()> {
        let slot = self
            .members
            .get(member.as_ref())
            .ok_or_else(|| WanctlError::NoSuchMember(member.clone()))?;
        let next = slot.load().pushed(sample);
        slot.store(Arc::new(next));
        Ok(())
    }

    pub fn latest(&self, member: &str) -> Option<Sample> {
        self.members.get(member)?.load().samples.last().cloned()
    }

    /// Read-only, finite snapshot of the last `count` samples (oldest
    /// first). Safe against concurrent appends: the snapshot is taken from
    /// one atomically loaded ring state.
    pub fn window_by_count(&self, member: &str, count: usize) -> Vec<Sample> {
        let Some(slot) = self.members.get(member) else { return Vec::new() };
        let data = slot.load();
        let len = data.samples.len();
        let start = len.saturating_sub(count);
        data.samples[start..].to_vec()
    }

    /// Read-only snapshot of samples within `duration` of `now`, capped by
    /// `default_window` semantics (N ≈ 100 or the duration, whichever is
    /// smaller — bounded naturally by ring capacity).
    pub fn window_by_duration(&self, member: &str, now: SystemTime, duration: Duration) -> Vec<Sample> {
        let Some(slot) = self.members.get(member) else { return Vec::new() };
        let data = slot.load();
        data.samples
            .iter()
            .filter(|s| now.duration_since(s.timestamp).map(|age| age <= duration).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Default scoring window: last 10 minutes, capped by ring capacity.
    pub fn default_window(&self, member: &str, now: SystemTime) -> Vec<Sample> {
        self.window_by_duration(member, now, DEFAULT_WINDOW)
    }

    /// Slope/variance of `extractor(sample)` over the last `window_count`
    /// samples. `None` under 3 valid (non-`None`-extracted) points.
    pub fn trend<F>(&self, member: &str, window_count: usize, extractor: F) -> Option<Trend>
    where
        F: Fn(&Sample) -> Option<f64>,
    {
        self.regression(member, window_count, extractor)
            .map(|r| Trend { slope: r.slope, variance: r.variance, count: r.count })
    }

    /// Full regression (used by the Predictor for confidence-gated trend
    /// triggers).
    pub fn regression<F>(&self, member: &str, window_count: usize, extractor: F) -> Option<Regression>
    where
        F: Fn(&Sample) -> Option<f64>,
    {
        let samples = self.window_by_count(member, window_count);
        let points: Vec<(f64, f64)> = samples
            .iter()
            .enumerate()
            .filter_map(|(i, s)| extractor(s).map(|y| (i as f64, y)))
            .collect();
        linear_regression(&points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn sample_at(t: SystemTime, latency_ms: Option<f64>) -> Sample {
        Sample {
            timestamp: t,
            latency_ms,
            loss_fraction: None,
            jitter_ms: None,
            link_up: Some(true),
            throughput_kbps: None,
            signal: crate::model::SignalReading::Generic,
            events: Vec::new(),
        }
    }

    #[test]
    fn append_on_untracked_member_fails() {
        let ring = TelemetryRing::new(4);
        let err = ring.append(&MemberId::from("ghost"), sample_at(SystemTime::now(), Some(1.0)));
        assert!(matches!(err, Err(WanctlError::NoSuchMember(_))));
    }

    #[test]
    fn ring_at_capacity_evicts_oldest_but_latest_unaffected() {
        let ring = TelemetryRing::new(3);
        let id = MemberId::from("a");
        ring.track(id.clone());
        let base = SystemTime::now();
        for i in 0..5u64 {
            ring.append(&id, sample_at(base + StdDuration::from_secs(i), Some(i as f64))).unwrap();
        }
        let window = ring.window_by_count(&id, 10);
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].latency_ms, Some(2.0));
        assert_eq!(ring.latest(&id).unwrap().latency_ms, Some(4.0));
    }

    #[test]
    fn trend_undefined_under_three_samples() {
        let ring = TelemetryRing::new(10);
        let id = MemberId::from("a");
        ring.track(id.clone());
        let base = SystemTime::now();
        ring.append(&id, sample_at(base, Some(1.0))).unwrap();
        ring.append(&id, sample_at(base, Some(2.0))).unwrap();
        assert!(ring.trend(&id, 10, |s| s.latency_ms).is_none());
    }

    #[test]
    fn trend_detects_rising_slope() {
        let ring = TelemetryRing::new(10);
        let id = MemberId::from("a");
        ring.track(id.clone());
        let base = SystemTime::now();
        for i in 0..6u64 {
            ring.append(&id, sample_at(base, Some(i as f64 * 2.0))).unwrap();
        }
        let trend = ring.trend(&id, 10, |s| s.latency_ms).unwrap();
        assert!((trend.slope - 2.0).abs() < 1e-9);
        assert_eq!(trend.count, 6);
    }

    #[test]
    fn untrack_removes_member() {
        let ring = TelemetryRing::new(10);
        let id = MemberId::from("a");
        ring.track(id.clone());
        assert!(ring.is_tracked(&id));
        ring.untrack(&id);
        assert!(!ring.is_tracked(&id));
        assert!(ring.append(&id, sample_at(SystemTime::now(), None)).is_err());
    }
}
