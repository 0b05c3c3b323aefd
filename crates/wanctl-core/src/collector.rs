//! Collector Interface (C3): the pull-based metric producer contract the
//! Orchestrator drives against any concrete adapter.
//!
//! `collect` is an object-safe async method (`async_trait`), matching
//! `spark-core::service::BoxService`'s erasure approach so the Orchestrator
//! can hold a homogeneous `Vec<Arc<dyn Collector>>`. `CollectorContext`
//! carries a per-call deadline and cancellation flag, mirroring
//! `spark-transport-tcp::listener::TcpListener::accept`'s habit of checking
//! `ctx.deadline()`/`ctx.cancellation()` before awaiting I/O.
//!
//! Concrete adapters (TCP probes, satellite/SIM vendor clients, ...) live
//! outside this crate; this module defines only the contract.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{CollectorFailureKind, WanctlError};
use crate::model::{Member, Sample};

pub const DEFAULT_COLLECTOR_TIMEOUT: Duration = Duration::from_secs(2);

/// Cooperative cancellation flag shared between the Orchestrator and an
/// in-flight collector call. Distinct from `tokio_util::CancellationToken`
/// to keep this crate's dependency surface minimal; the Orchestrator's own
/// shutdown path uses the richer token from `tokio-util` instead (see
/// `wanctl-daemon::orchestrator`).
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-call context: deadline and cancellation, handed to a collector so it
/// can honor both without the core needing to know how the adapter
/// implements its own I/O timeout.
#[derive(Clone, Debug)]
pub struct CollectorContext {
    deadline: Instant,
    cancel: CancelFlag,
}

impl CollectorContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { deadline: Instant::now() + timeout, cancel: CancelFlag::new() }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn cancellation(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn deadline_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Pull-based metric producer for one member class.
///
/// Implementors must:
/// - be non-blocking beyond the context's declared timeout;
/// - return partial samples (absent fields) rather than fabricate values;
/// - report fatal failures via `WanctlError::Collector` with the correct
///   [`CollectorFailureKind`] — transient errors do not remove the member,
///   three consecutive permanent errors do (enforced by the Orchestrator,
///   not by the collector itself);
/// - tolerate concurrent invocation across members (the core guarantees at
///   most one in-flight call per member, not across members).
#[async_trait]
pub trait Collector: Send + Sync {
    /// Human-readable adapter name, used in logs and the query API.
    fn describe(&self) -> &str;

    async fn collect(&self, member: &Member, ctx: &CollectorContext) -> Result<Sample, WanctlError>;
}

/// Helper for adapters: turns a timed-out/cancelled context into the
/// correctly-classified transient error, so every adapter doesn't have to
/// hand-roll the same check before awaiting I/O.
pub fn timeout_error(member: &Member, ctx: &CollectorContext) -> Option<WanctlError> {
    if ctx.deadline_expired() {
        return Some(WanctlError::collector(
            member.id.clone(),
            CollectorFailureKind::Transient,
            "collector timed out",
        ));
    }
    if ctx.cancellation().is_cancelled() {
        return Some(WanctlError::collector(
            member.id.clone(),
            CollectorFailureKind::Transient,
            "collector call cancelled",
        ));
    }
    None
}
