//! Centralized error definitions for the decision/control loop, rather than
//! every module maintaining its own `Other(String)` catch-all. The fixed set
//! of failure kinds (Collector/Control/Config/NoSuchMember/Internal) covers
//! every fallible path in this crate; nothing here panics.
//!
//! Shaped after `spark-switch::error::SwitchError`: named variants,
//! `#[error("...")]` display strings, owning context fields so an error
//! outlives the call that raised it.

use thiserror::Error;

use crate::model::MemberId;

/// Whether a collector failure should be treated as a transient blip (sample
/// degrades, member keeps its role) or counts toward exclusion.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CollectorFailureKind {
    Transient,
    Permanent,
}

/// Whether a Controller apply failure is worth retrying again later.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Retriable {
    Yes,
    No,
}

#[derive(Debug, Error)]
pub enum WanctlError {
    /// A collector failed to produce a sample for `member`. Three
    /// consecutive `Permanent` occurrences for the same member exclude it;
    /// `Transient` ones only degrade that tick's sample.
    #[error("collector for member `{member}` failed ({kind:?}): {reason}")]
    Collector {
        member: MemberId,
        kind: CollectorFailureKind,
        reason: String,
    },

    /// The Controller could not apply a selection to the multi-WAN
    /// subsystem after exhausting its retry schedule.
    #[error("control apply for member `{member}` failed: {reason}")]
    Control {
        member: MemberId,
        retriable: Retriable,
        reason: String,
    },

    /// Configuration failed validation at load time; the previously running
    /// configuration (if any) remains in effect.
    #[error("configuration rejected: {reason}")]
    Config { reason: String },

    /// A component referenced a member id that the registry no longer
    /// knows about, typically a stale handle racing a removal. Logged and
    /// ignored by callers, never escalated.
    #[error("no such member: `{0}`")]
    NoSuchMember(MemberId),

    /// An internal invariant was violated. The offending component is
    /// expected to fall back to a safe state (e.g. `no_candidate`) and
    /// continue; this variant exists purely so the violation is observable.
    #[error("internal error in `{component}`: {detail}")]
    Internal {
        component: &'static str,
        detail: String,
    },
}

impl WanctlError {
    pub fn collector(member: MemberId, kind: CollectorFailureKind, reason: impl Into<String>) -> Self {
        WanctlError::Collector { member, kind, reason: reason.into() }
    }

    pub fn control(member: MemberId, retriable: Retriable, reason: impl Into<String>) -> Self {
        WanctlError::Control { member, retriable, reason: reason.into() }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        WanctlError::Config { reason: reason.into() }
    }

    pub fn internal(component: &'static str, detail: impl Into<String>) -> Self {
        WanctlError::Internal { component, detail: detail.into() }
    }

    /// `true` for kinds that must never remove a member from eligibility by
    /// themselves (transient collector errors, retriable control errors).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WanctlError::Collector { kind: CollectorFailureKind::Transient, .. }
                | WanctlError::Control { retriable: Retriable::Yes, .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, WanctlError>;
