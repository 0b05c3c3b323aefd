//! Notification event contract (failover, failback, member excluded/
//! recovered, control error, predictor trigger). These need to be
//! observable externally, but core state must never depend on whether a
//! notification actually lands — best-effort delivery is a hard requirement
//! here, not an implementation shortcut.
//!
//! Shaped after `spark-core::audit::recorder::AuditRecorder`: the framework
//! only cares that an event was attempted, leaving log/webhook/bus delivery
//! to the caller. Unlike `Recorder`, `notify` here returns no `Result` —
//! delivery failures are swallowed and logged inside the adapter, never
//! propagated to the core state machine.

use std::time::SystemTime;

use async_trait::async_trait;

use crate::model::MemberId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum NotificationKind {
    Failover,
    Failback,
    MemberExcluded,
    MemberRecovered,
    ControlError,
    PredictorTrigger,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Failover => "failover",
            NotificationKind::Failback => "failback",
            NotificationKind::MemberExcluded => "member_excluded",
            NotificationKind::MemberRecovered => "member_recovered",
            NotificationKind::ControlError => "control_error",
            NotificationKind::PredictorTrigger => "predictor_trigger",
        }
    }
}

/// One structured event published to the notification bus. Mirrors the
/// payload fields specified for §6.4: kind, member, previous/new active,
/// reason code, timestamp.
#[derive(Clone, Debug)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub member: Option<MemberId>,
    pub previous_active: Option<MemberId>,
    pub new_active: Option<MemberId>,
    pub reason: String,
    pub timestamp: SystemTime,
}

impl NotificationEvent {
    pub fn new(kind: NotificationKind, reason: impl Into<String>, timestamp: SystemTime) -> Self {
        Self {
            kind,
            member: None,
            previous_active: None,
            new_active: None,
            reason: reason.into(),
            timestamp,
        }
    }

    pub fn with_member(mut self, member: MemberId) -> Self {
        self.member = Some(member);
        self
    }

    pub fn with_transition(mut self, previous: Option<MemberId>, new: Option<MemberId>) -> Self {
        self.previous_active = previous;
        self.new_active = new;
        self
    }
}

/// Best-effort notification sink. Implementors must never let a delivery
/// failure escape as an error the Orchestrator would have to react to; log
/// and drop internally instead. Concrete sinks (webhook, MQTT, local log)
/// live in `wanctl-transport`.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: NotificationEvent);
}

/// Fan-out sink composed of zero or more inner sinks, so the Orchestrator can
/// be handed one object regardless of how many notification channels are
/// configured.
#[derive(Default)]
pub struct NotificationBus {
    sinks: Vec<std::sync::Arc<dyn NotificationSink>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sink: std::sync::Arc<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub async fn publish(&self, event: NotificationEvent) {
        for sink in &self.sinks {
            sink.notify(event.clone()).await;
        }
    }
}
