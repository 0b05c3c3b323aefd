//! End-to-end tick-pipeline coverage for the `Orchestrator`: discovery,
//! scoring, decision and control all wired together the way `main.rs` wires
//! them for `--once`, but against a `MockMultiWanAdapter` and scripted
//! `FixtureCollector`s instead of real hardware.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;

use wanctl_core::collector::{Collector, CollectorContext};
use wanctl_core::error::{CollectorFailureKind, WanctlError};
use wanctl_core::model::{EventSeverity, Member, MemberId, Role, Sample, SampleEvent, SignalReading};
use wanctl_core::notify::NotificationBus;
use wanctl_core::registry::MemberRegistry;
use wanctl_core::ring::TelemetryRing;
use wanctl_daemon::{ConfigHandle, DecisionLog, Orchestrator};
use wanctl_transport::collectors::FixtureCollector;
use wanctl_transport::multiwan::{MemberDescriptor, MockMultiWanAdapter};

fn config_file(body: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{body}").unwrap();
    file
}

fn good_cellular_sample() -> Sample {
    Sample {
        timestamp: std::time::SystemTime::now(),
        latency_ms: Some(15.0),
        loss_fraction: Some(0.0),
        jitter_ms: Some(5.0),
        link_up: Some(true),
        throughput_kbps: Some(20_000.0),
        signal: SignalReading::Cellular {
            rsrp_dbm: Some(-70.0),
            rsrq_db: Some(-8.0),
            sinr_db: Some(18.0),
            cell_id: Some("abc".into()),
            band: Some("b3".into()),
            network_type: Some("lte".into()),
        },
        events: Vec::new(),
    }
}

fn bad_cellular_sample() -> Sample {
    Sample {
        timestamp: std::time::SystemTime::now(),
        latency_ms: Some(3000.0),
        loss_fraction: Some(0.9),
        jitter_ms: Some(500.0),
        link_up: Some(false),
        throughput_kbps: Some(0.0),
        signal: SignalReading::Cellular {
            rsrp_dbm: Some(-130.0),
            rsrq_db: Some(-25.0),
            sinr_db: Some(-10.0),
            cell_id: None,
            band: None,
            network_type: None,
        },
        events: vec![SampleEvent::new("carrier_loss", EventSeverity::Critical)],
    }
}

fn good_lan_sample() -> Sample {
    Sample {
        timestamp: std::time::SystemTime::now(),
        latency_ms: Some(4.0),
        loss_fraction: Some(0.0),
        jitter_ms: Some(1.0),
        link_up: Some(true),
        throughput_kbps: Some(100_000.0),
        signal: SignalReading::Lan,
        events: Vec::new(),
    }
}

fn mediocre_cellular_sample() -> Sample {
    Sample {
        timestamp: std::time::SystemTime::now(),
        latency_ms: Some(15.0),
        loss_fraction: Some(0.0),
        jitter_ms: Some(5.0),
        link_up: Some(true),
        throughput_kbps: Some(20_000.0),
        signal: SignalReading::Cellular {
            rsrp_dbm: Some(-100.0),
            rsrq_db: Some(-15.0),
            sinr_db: Some(2.0),
            cell_id: Some("abc".into()),
            band: Some("b3".into()),
            network_type: Some("lte".into()),
        },
        events: Vec::new(),
    }
}

/// A member whose collector always reports its hardware gone, regardless of
/// how many times it's polled, standing in for a modem that has died.
struct AlwaysPermanentFailureCollector {
    failing_member: MemberId,
    good_sample: Sample,
}

#[async_trait]
impl Collector for AlwaysPermanentFailureCollector {
    fn describe(&self) -> &str {
        "fault-injector"
    }

    async fn collect(&self, member: &Member, _ctx: &CollectorContext) -> Result<Sample, WanctlError> {
        if member.id == self.failing_member {
            Err(WanctlError::collector(member.id.clone(), CollectorFailureKind::Permanent, "modem not present"))
        } else {
            Ok(self.good_sample.clone())
        }
    }
}

/// A severely degraded primary uplink is critical enough to pre-empt
/// min-dwell and switch to the healthy secondary, once the global
/// apply-spacing rate limit has genuinely elapsed.
#[tokio::test]
async fn critical_member_triggers_urgent_failover_to_healthy_alternative() {
    let config_toml = r#"
        [main]
        enable = true
        poll_interval_ms = 50
        switch_margin = 10.0
        min_dwell_s = 20
        cooldown_s = 5
        predictive = false

        [members.wan-a]
        class = "cellular"
        priority = 100

        [members.wan-b]
        class = "lan"
        priority = 80
    "#;
    let file = config_file(config_toml);
    let config = Arc::new(ConfigHandle::load(file.path()).unwrap());

    let registry = Arc::new(MemberRegistry::new());
    let ring = Arc::new(TelemetryRing::default());
    let decision_log = Arc::new(DecisionLog::default());
    let notifications = Arc::new(NotificationBus::new());

    let collector = Arc::new(
        FixtureCollector::new()
            .with_script("wan-a", vec![good_cellular_sample(), good_cellular_sample(), good_cellular_sample(), bad_cellular_sample()])
            .with_script("wan-b", vec![good_lan_sample()]),
    );
    let adapter = MockMultiWanAdapter::new(vec![
        MemberDescriptor { id: MemberId::from("wan-a"), interface_name: "wwan0".into(), class: wanctl_core::model::MemberClass::Cellular },
        MemberDescriptor { id: MemberId::from("wan-b"), interface_name: "eth0".into(), class: wanctl_core::model::MemberClass::Lan },
    ]);

    let mut orchestrator = Orchestrator::new(
        registry.clone(),
        ring.clone(),
        config.clone(),
        collector,
        adapter,
        notifications,
        decision_log.clone(),
    );

    // Ticks 1-3: both members report clean samples; wan-a (higher declared
    // priority) becomes the active member on tick 1.
    orchestrator.run_ticks(3).await;
    assert_eq!(registry.get("wan-a").unwrap().live.role, Role::Active);

    // The controller's apply-spacing rate limiter is a real wall clock gate,
    // independent of tokio's mockable time; clear it before the tick that's
    // expected to trigger the actual switch.
    tokio::time::sleep(Duration::from_millis(600)).await;

    // Tick 4: wan-a's collector returns a severely degraded sample, driving
    // its status to Critical and forcing an urgent, dwell-bypassing switch.
    orchestrator.run_ticks(1).await;

    assert_eq!(registry.get("wan-a").unwrap().live.role, Role::Cooling);
    assert_eq!(registry.get("wan-b").unwrap().live.role, Role::Active);

    let tail = decision_log.tail(4);
    let last = tail.last().unwrap();
    assert_eq!(last.new_active, Some(MemberId::from("wan-b")));
}

/// A competitor that never quite clears the configured switch margin must
/// never dethrone the incumbent active member, even when it consistently
/// scores a little higher.
#[tokio::test]
async fn modest_score_advantage_never_clears_switch_margin() {
    let config_toml = r#"
        [main]
        enable = true
        poll_interval_ms = 50
        switch_margin = 10.0
        min_dwell_s = 20
        cooldown_s = 5
        predictive = false

        [members.wan-a]
        class = "cellular"
        priority = 100

        [members.wan-b]
        class = "cellular"
        priority = 130
    "#;
    let file = config_file(config_toml);
    let config = Arc::new(ConfigHandle::load(file.path()).unwrap());

    let registry = Arc::new(MemberRegistry::new());
    let ring = Arc::new(TelemetryRing::default());
    let decision_log = Arc::new(DecisionLog::default());
    let notifications = Arc::new(NotificationBus::new());

    let a_samples = vec![good_cellular_sample(); 5];
    // wan-b starts out weaker than wan-a (so wan-a wins the initial, margin-
    // free selection), then turns in excellent samples for the rest of the
    // run; its higher declared priority gives it a persistent, but small,
    // score edge over wan-a from tick 2 onward.
    let mut b_samples = vec![mediocre_cellular_sample()];
    b_samples.extend(vec![good_cellular_sample(); 4]);

    let collector =
        Arc::new(FixtureCollector::new().with_script("wan-a", a_samples).with_script("wan-b", b_samples));
    let adapter = MockMultiWanAdapter::new(vec![
        MemberDescriptor { id: MemberId::from("wan-a"), interface_name: "wwan0".into(), class: wanctl_core::model::MemberClass::Cellular },
        MemberDescriptor { id: MemberId::from("wan-b"), interface_name: "wwan1".into(), class: wanctl_core::model::MemberClass::Cellular },
    ]);

    let mut orchestrator = Orchestrator::new(registry.clone(), ring.clone(), config.clone(), collector, adapter, notifications, decision_log);

    orchestrator.run_ticks(5).await;

    assert_eq!(registry.get("wan-a").unwrap().live.role, Role::Active);
    assert_eq!(registry.get("wan-b").unwrap().live.role, Role::Standby);
}

/// Three consecutive permanent collector failures exclude a member; the
/// registry never has a sample to score it on, so it's never even a
/// candidate, and the only healthy member becomes active without delay.
#[tokio::test]
async fn permanent_collector_failures_exclude_member_and_failover_proceeds() {
    let config_toml = r#"
        [main]
        enable = true
        poll_interval_ms = 50
        switch_margin = 10.0
        min_dwell_s = 0
        cooldown_s = 5
        predictive = false

        [members.wan-a]
        class = "cellular"
        priority = 100

        [members.wan-b]
        class = "lan"
        priority = 80
    "#;
    let file = config_file(config_toml);
    let config = Arc::new(ConfigHandle::load(file.path()).unwrap());

    let registry = Arc::new(MemberRegistry::new());
    let ring = Arc::new(TelemetryRing::default());
    let decision_log = Arc::new(DecisionLog::default());
    let notifications = Arc::new(NotificationBus::new());

    let collector = Arc::new(AlwaysPermanentFailureCollector {
        failing_member: MemberId::from("wan-a"),
        good_sample: good_lan_sample(),
    });
    let adapter = MockMultiWanAdapter::new(vec![
        MemberDescriptor { id: MemberId::from("wan-a"), interface_name: "wwan0".into(), class: wanctl_core::model::MemberClass::Cellular },
        MemberDescriptor { id: MemberId::from("wan-b"), interface_name: "eth0".into(), class: wanctl_core::model::MemberClass::Lan },
    ]);

    let mut orchestrator = Orchestrator::new(registry.clone(), ring.clone(), config.clone(), collector, adapter, notifications, decision_log);

    orchestrator.run_ticks(3).await;

    assert_eq!(registry.get("wan-a").unwrap().live.role, Role::Excluded);
    assert_eq!(registry.get("wan-a").unwrap().live.consecutive_permanent_errors, 3);
    assert_eq!(registry.get("wan-b").unwrap().live.role, Role::Active);
}
