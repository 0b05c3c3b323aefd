//! Core data model: `Member`, `Policy`, `LiveState`, `Sample`,
//! `SignalReading`, `DecisionRecord`.
//!
//! `Sample` uses a common envelope plus a class-tagged payload rather than a
//! string map, so a missing field and a zero field stay distinguishable end
//! to end through collection, scoring and serialization. `SignalReading`
//! borrows that small-tagged-enum shape from session negotiation state and
//! applies it to per-class signal readings instead.
//!
//! `MemberId` is an `Arc<str>`, cheap to clone and usable as a concurrent map
//! key. `Policy` fields survive registry rebuilds; `LiveState::default()` is
//! the only reset point discovery uses when (re)creating a member.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Stable, discovery-assigned member identifier. Cheap to clone and share as
/// a `DashMap` key, mirroring `spark-switch`'s `Arc<str>` Call-ID convention.
pub type MemberId = Arc<str>;

/// Uplink member class. Drives which signal curve the Scorer applies and
/// which optional fields a Sample is expected to carry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberClass {
    Satellite,
    Cellular,
    Wifi,
    Lan,
    Generic,
}

/// Discrete health label derived from score and sample freshness.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
    Unknown,
}

/// Role a member currently holds in the Controller's state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Standby,
    Active,
    Cooling,
    Excluded,
}

/// Per-member configuration that survives registry updates; never touched by
/// the decision/control path.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Policy {
    pub class: MemberClass,
    /// Higher is preferred when effective scores tie.
    pub base_priority: i32,
    pub enabled: bool,
    pub metered: bool,
    pub data_limit: Option<DataLimit>,
    /// Per-member floor on the Orchestrator's collection interval; see
    /// `main.poll_interval_ms` in the configuration table. `None` means no
    /// override.
    pub poll_interval_override_ms: Option<u64>,
}

impl Policy {
    pub fn eligible(&self) -> bool {
        self.enabled
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataLimit {
    pub bytes_per_period: u64,
    pub period: DataLimitPeriod,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataLimitPeriod {
    Daily,
    Monthly,
}

/// Live, derived state. Reset whenever the member is (re)created by
/// discovery; policy fields are untouched by that reset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LiveState {
    pub score: f64,
    pub status: Status,
    pub last_sample_at: Option<SystemTime>,
    pub role: Role,
    pub cooldown_until: Option<SystemTime>,
    pub consecutive_good_ticks: u32,
    pub consecutive_bad_ticks: u32,
    pub consecutive_permanent_errors: u32,
    /// Set on the tick the predictor last fired a failover *from* this
    /// member, used to enforce `predictive_cooldown` independent of the
    /// Controller's own cooldown.
    pub last_predictor_trigger_at: Option<SystemTime>,
    /// Ticks since the interface backing this member was last seen by
    /// discovery; used for the removal grace window.
    pub missing_ticks: u32,
}

impl Default for LiveState {
    fn default() -> Self {
        Self {
            score: 0.0,
            status: Status::Unknown,
            last_sample_at: None,
            role: Role::Standby,
            cooldown_until: None,
            consecutive_good_ticks: 0,
            consecutive_bad_ticks: 0,
            consecutive_permanent_errors: 0,
            last_predictor_trigger_at: None,
            missing_ticks: 0,
        }
    }
}

/// One selectable uplink.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub interface_name: String,
    pub policy: Policy,
    pub live: LiveState,
}

impl Member {
    pub fn new(id: impl Into<MemberId>, interface_name: impl Into<String>, policy: Policy) -> Self {
        Self {
            id: id.into(),
            interface_name: interface_name.into(),
            policy,
            live: LiveState::default(),
        }
    }

    pub fn is_excluded(&self) -> bool {
        matches!(self.live.role, Role::Excluded)
    }

    pub fn in_cooldown(&self, now: SystemTime) -> bool {
        match self.live.cooldown_until {
            Some(until) => now < until,
            None => false,
        }
    }
}

/// Severity of a tagged event carried on a Sample.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SampleEvent {
    pub tag: String,
    pub severity: EventSeverity,
}

impl SampleEvent {
    pub fn new(tag: impl Into<String>, severity: EventSeverity) -> Self {
        Self { tag: tag.into(), severity }
    }
}

/// Class-specific optional numeric payload. An internally tagged enum keeps
/// the absent/present distinction per field (via `Option`) while still
/// guaranteeing that only fields meaningful for the member's class are ever
/// populated.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum SignalReading {
    Satellite {
        #[serde(skip_serializing_if = "Option::is_none")]
        obstruction_fraction: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        snr_db: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        uptime_s: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        outage_count: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reboot_ready: Option<bool>,
    },
    Cellular {
        #[serde(skip_serializing_if = "Option::is_none")]
        rsrp_dbm: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        rsrq_db: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sinr_db: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cell_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        band: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        network_type: Option<String>,
    },
    Wifi {
        #[serde(skip_serializing_if = "Option::is_none")]
        rssi_dbm: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel_util: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        bss_load: Option<f64>,
    },
    Lan,
    Generic,
}

impl SignalReading {
    pub fn class(&self) -> MemberClass {
        match self {
            SignalReading::Satellite { .. } => MemberClass::Satellite,
            SignalReading::Cellular { .. } => MemberClass::Cellular,
            SignalReading::Wifi { .. } => MemberClass::Wifi,
            SignalReading::Lan => MemberClass::Lan,
            SignalReading::Generic => MemberClass::Generic,
        }
    }

    /// The primary signal metric used by the Predictor's trend/stability
    /// triggers, in whatever unit that class reports it.
    pub fn primary_metric(&self) -> Option<f64> {
        match self {
            SignalReading::Satellite { snr_db, .. } => *snr_db,
            SignalReading::Cellular { rsrp_dbm, .. } => *rsrp_dbm,
            SignalReading::Wifi { rssi_dbm, .. } => *rssi_dbm,
            SignalReading::Lan | SignalReading::Generic => None,
        }
    }

    pub fn outage_increment(&self) -> u32 {
        match self {
            SignalReading::Satellite { outage_count, .. } => outage_count.unwrap_or(0),
            _ => 0,
        }
    }
}

/// One observation about one member at one instant. All numerics are either
/// absent or within their declared physical range; collectors must never
/// zero-fill an unknown value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: SystemTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss_fraction: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_up: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput_kbps: Option<f64>,
    pub signal: SignalReading,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SampleEvent>,
}

impl Sample {
    pub fn has_critical_event(&self) -> bool {
        self.events.iter().any(|e| e.severity == EventSeverity::Critical)
    }

    pub fn warning_count(&self) -> usize {
        self.events.iter().filter(|e| e.severity == EventSeverity::Warning).count()
    }
}

/// One audit tuple appended to the Decision Engine's bounded decision log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub tick: u64,
    pub timestamp: SystemTime,
    pub previous_active: Option<MemberId>,
    pub new_active: Option<MemberId>,
    pub reason: String,
    pub contributing_scores: Vec<(MemberId, f64)>,
    pub predictor_flags: Vec<(MemberId, String)>,
}

/// Default tick cadence clamp used by the Orchestrator's adaptive slowdown.
pub const DEFAULT_BASE_TICK: Duration = Duration::from_millis(1500);
pub const MAX_TICK_SLOWDOWN: Duration = Duration::from_secs(5);
