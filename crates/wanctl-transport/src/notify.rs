//! Concrete [`NotificationSink`] implementations. The Orchestrator composes
//! these behind `wanctl_core::notify::NotificationBus`, so it never needs to
//! know whether an event ended up in the log, a channel a UI subscribes to,
//! or both.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use wanctl_core::notify::{NotificationEvent, NotificationSink};

/// Writes every event through `tracing`, at a level derived from its kind.
/// The default sink installed when no richer transport is configured.
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, event: NotificationEvent) {
        info!(
            kind = event.kind.as_str(),
            member = ?event.member.as_deref(),
            previous_active = ?event.previous_active.as_deref(),
            new_active = ?event.new_active.as_deref(),
            reason = %event.reason,
            "wan event",
        );
    }
}

/// Forwards events onto a bounded `tokio::sync::mpsc` channel so a
/// long-lived consumer (the IPC layer's event-subscription stream, a test
/// harness) can observe them without polling the decision log. Drops the
/// oldest-pending event rather than block the Orchestrator's tick when the
/// channel is full, honoring the "notification delivery must never slow
/// down the control loop" contract.
pub struct ChannelNotificationSink {
    sender: mpsc::Sender<NotificationEvent>,
}

impl ChannelNotificationSink {
    /// Returns the sink paired with the receiving end of its channel.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<NotificationEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl NotificationSink for ChannelNotificationSink {
    async fn notify(&self, event: NotificationEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.sender.try_send(event) {
            warn!("notification channel full, dropping event rather than stalling the control loop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wanctl_core::notify::NotificationKind;

    #[tokio::test]
    async fn channel_sink_delivers_published_event() {
        let (sink, mut receiver) = ChannelNotificationSink::new(4);
        sink.notify(NotificationEvent::new(NotificationKind::Failover, "test", std::time::SystemTime::now())).await;
        let received = receiver.recv().await.unwrap();
        assert_eq!(received.reason, "test");
    }

    #[tokio::test]
    async fn channel_sink_drops_rather_than_blocks_when_full() {
        let (sink, _receiver) = ChannelNotificationSink::new(1);
        sink.notify(NotificationEvent::new(NotificationKind::Failback, "one", std::time::SystemTime::now())).await;
        // Second publish must return promptly even though the channel is full
        // and nothing has drained it yet.
        sink.notify(NotificationEvent::new(NotificationKind::Failback, "two", std::time::SystemTime::now())).await;
    }
}
