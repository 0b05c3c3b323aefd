//! Deliberately separates deserialization (`RawConfig`, via `serde` +
//! `toml`) from the validated, defaulted [`Config`] the rest of the crate
//! actually consumes: `RawConfig` can be any syntactically valid TOML,
//! while `Config` guarantees every invariant this module checks (weights
//! summing to 1.0, monotonic thresholds, ...).
//!
//! Loading never takes effect partially — either the whole document
//! validates into a new `Config`, or it returns `WanctlError::Config` and
//! the caller keeps whatever `Config` was already running. Reload is
//! atomic or it doesn't happen.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::WanctlError;
use crate::model::{DataLimit, MemberClass, Policy};

const WEIGHT_SUM_EPSILON: f64 = 1e-9;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MainConfig {
    pub enable: bool,
    pub poll_interval_ms: u64,
    pub switch_margin: f64,
    pub min_dwell_s: u64,
    pub cooldown_s: u64,
    pub predictive: bool,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            enable: true,
            poll_interval_ms: 1500,
            switch_margin: 10.0,
            min_dwell_s: 20,
            cooldown_s: 30,
            predictive: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreThresholds {
    pub healthy: f64,
    pub degraded: f64,
    pub unhealthy: f64,
}

impl Default for ScoreThresholds {
    fn default() -> Self {
        Self { healthy: 75.0, degraded: 50.0, unhealthy: 25.0 }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverThresholds {
    pub loss: f64,
    pub latency_ms: f64,
    pub obstruction: f64,
}

impl Default for FailoverThresholds {
    fn default() -> Self {
        Self { loss: 3.0, latency_ms: 800.0, obstruction: 0.10 }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Weights {
    pub signal: f64,
    pub connectivity: f64,
    pub stability: f64,
    pub quality: f64,
}

impl Weights {
    pub fn sum(&self) -> f64 {
        self.signal + self.connectivity + self.stability + self.quality
    }

    fn satellite_default() -> Self {
        Self { signal: 0.35, connectivity: 0.40, stability: 0.15, quality: 0.10 }
    }
}

/// Tuning for the Decision Engine's `effective_score` computation
/// (§4.6 step 2): a small class preference and a monotonic mapping from
/// configured base priority onto the same point scale as the score itself,
/// so ties between otherwise-equal candidates favor the operator's declared
/// preference rather than collection order.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionTuning {
    /// Per-class bonus added to `effective_score`, keyed the same way as
    /// `[weights.<class>]`.
    pub class_bonus: HashMap<String, f64>,
    /// `priority_bonus = base_priority * priority_scale`, clamped to
    /// `[0, max_priority_bonus]` so a single misconfigured policy can't
    /// dominate the score gap the scorer itself produces.
    pub priority_scale: f64,
    pub max_priority_bonus: f64,
}

impl Default for DecisionTuning {
    fn default() -> Self {
        let mut class_bonus = HashMap::new();
        class_bonus.insert("satellite".to_string(), 5.0);
        Self { class_bonus, priority_scale: 0.05, max_priority_bonus: 10.0 }
    }
}

impl DecisionTuning {
    pub fn class_bonus_for(&self, class: MemberClass) -> f64 {
        let key = match class {
            MemberClass::Satellite => "satellite",
            MemberClass::Cellular => "cellular",
            MemberClass::Wifi => "wifi",
            MemberClass::Lan => "lan",
            MemberClass::Generic => "generic",
        };
        self.class_bonus.get(key).copied().unwrap_or(0.0)
    }

    pub fn priority_bonus_for(&self, base_priority: i32) -> f64 {
        (base_priority as f64 * self.priority_scale).clamp(0.0, self.max_priority_bonus)
    }
}

/// Fixed point penalty subtracted from raw score per status, per §4.6
/// step 2. Not configurable: these values encode the relative ordering of
/// the status labels themselves, which `thresholds.score` already governs.
pub fn status_penalty(status: crate::model::Status) -> f64 {
    match status {
        crate::model::Status::Healthy => 0.0,
        crate::model::Status::Degraded => 10.0,
        crate::model::Status::Unhealthy => 25.0,
        crate::model::Status::Critical => 50.0,
        crate::model::Status::Unknown => 100.0,
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub horizon_s: u64,
    pub confidence_min: f64,
    pub cooldown_s: u64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self { horizon_s: 30, confidence_min: 0.7, cooldown_s: 120 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemberConfig {
    pub class: MemberClass,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub metered: bool,
    #[serde(default)]
    pub data_limit: Option<DataLimit>,
    #[serde(default)]
    pub poll_interval_override_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl From<&MemberConfig> for Policy {
    fn from(cfg: &MemberConfig) -> Self {
        Policy {
            class: cfg.class,
            base_priority: cfg.priority,
            enabled: cfg.enabled,
            metered: cfg.metered,
            data_limit: cfg.data_limit.clone(),
            poll_interval_override_ms: cfg.poll_interval_override_ms,
        }
    }
}

/// Un-validated, directly-deserializable mirror of the TOML document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub main: MainConfig,
    #[serde(rename = "thresholds")]
    pub thresholds: RawThresholds,
    #[serde(default)]
    pub weights: HashMap<String, Weights>,
    #[serde(default)]
    pub members: HashMap<String, MemberConfig>,
    pub predictor: PredictorConfig,
    #[serde(default)]
    pub decision: DecisionTuning,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawThresholds {
    pub score: ScoreThresholds,
    pub failover: FailoverThresholds,
}

/// Validated, defaulted configuration consumed by the rest of the crate.
#[derive(Clone, Debug)]
pub struct Config {
    pub main: MainConfig,
    pub score_thresholds: ScoreThresholds,
    pub failover_thresholds: FailoverThresholds,
    pub weights: HashMap<MemberClass, Weights>,
    pub members: HashMap<String, MemberConfig>,
    pub predictor: PredictorConfig,
    pub decision: DecisionTuning,
}

impl Default for Config {
    fn default() -> Self {
        let mut weights = HashMap::new();
        weights.insert(MemberClass::Satellite, Weights::satellite_default());
        weights.insert(MemberClass::Cellular, Weights::satellite_default());
        weights.insert(MemberClass::Wifi, Weights::satellite_default());
        weights.insert(MemberClass::Lan, Weights::satellite_default());
        weights.insert(MemberClass::Generic, Weights::satellite_default());
        Self {
            main: MainConfig::default(),
            score_thresholds: ScoreThresholds::default(),
            failover_thresholds: FailoverThresholds::default(),
            weights,
            members: HashMap::new(),
            predictor: PredictorConfig::default(),
            decision: DecisionTuning::default(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.main.poll_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.main.cooldown_s)
    }

    pub fn min_dwell(&self) -> Duration {
        Duration::from_secs(self.main.min_dwell_s)
    }

    pub fn predictive_cooldown(&self) -> Duration {
        Duration::from_secs(self.predictor.cooldown_s)
    }

    pub fn prediction_horizon(&self) -> Duration {
        Duration::from_secs(self.predictor.horizon_s)
    }

    pub fn weights_for(&self, class: MemberClass) -> Weights {
        self.weights.get(&class).copied().unwrap_or_else(Weights::satellite_default)
    }

    /// Parse a class key as it appears under `[weights.<class>]` in TOML.
    fn parse_class(key: &str) -> Option<MemberClass> {
        match key {
            "satellite" => Some(MemberClass::Satellite),
            "cellular" => Some(MemberClass::Cellular),
            "wifi" => Some(MemberClass::Wifi),
            "lan" => Some(MemberClass::Lan),
            "generic" => Some(MemberClass::Generic),
            _ => None,
        }
    }

    /// Validate a [`RawConfig`] into a [`Config`], atomically: any rule
    /// violation rejects the whole document.
    pub fn from_raw(raw: RawConfig) -> Result<Self, WanctlError> {
        let mut config = Config::default();
        config.main = raw.main;
        config.score_thresholds = raw.thresholds.score;
        config.failover_thresholds = raw.thresholds.failover;
        config.members = raw.members;
        config.predictor = raw.predictor;
        config.decision = raw.decision;

        for (key, weights) in &raw.weights {
            let class = Self::parse_class(key)
                .ok_or_else(|| WanctlError::config(format!("unknown member class `{key}` in [weights]")))?;
            config.weights.insert(class, *weights);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), WanctlError> {
        if self.main.switch_margin < 0.0 {
            return Err(WanctlError::config("main.switch_margin must be >= 0"));
        }
        if self.main.poll_interval_ms == 0 {
            return Err(WanctlError::config("main.poll_interval_ms must be > 0"));
        }

        let t = &self.score_thresholds;
        if !(t.unhealthy < t.degraded && t.degraded < t.healthy && t.unhealthy >= 0.0 && t.healthy <= 100.0) {
            return Err(WanctlError::config(
                "thresholds.score must satisfy 0 <= unhealthy < degraded < healthy <= 100",
            ));
        }

        if !(0.0..=1.0).contains(&self.predictor.confidence_min) {
            return Err(WanctlError::config("predictor.confidence_min must be within [0, 1]"));
        }

        if self.decision.priority_scale < 0.0 {
            return Err(WanctlError::config("decision.priority_scale must be >= 0"));
        }
        if self.decision.max_priority_bonus < 0.0 {
            return Err(WanctlError::config("decision.max_priority_bonus must be >= 0"));
        }
        for (key, bonus) in &self.decision.class_bonus {
            if Self::parse_class(key).is_none() {
                return Err(WanctlError::config(format!("unknown member class `{key}` in [decision.class_bonus]")));
            }
            if !bonus.is_finite() {
                return Err(WanctlError::config(format!("decision.class_bonus.{key} must be finite")));
            }
        }

        for (class, weights) in &self.weights {
            let sum = weights.sum();
            if (sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
                return Err(WanctlError::config(format!(
                    "weights.{class:?} must sum to 1.0 (got {sum})"
                )));
            }
            if [weights.signal, weights.connectivity, weights.stability, weights.quality]
                .iter()
                .any(|w| *w < 0.0)
            {
                return Err(WanctlError::config(format!("weights.{class:?} must be non-negative")));
            }
        }

        Ok(())
    }
}
