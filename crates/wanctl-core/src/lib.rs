//! Decision and control core for the multi-WAN failover controller.
//!
//! This crate is transport- and OS-agnostic: it owns the telemetry ring,
//! member registry, scoring, prediction, decision and controller state
//! machine, but never touches a socket, a file, or the system clock's wall
//! time beyond what callers hand it. Concrete collectors, the multi-WAN
//! kernel adapter and the daemon's process/IPC plumbing live in
//! `wanctl-transport` and `wanctl-daemon`.
#![deny(unsafe_code)]

pub mod collector;
pub mod config;
pub mod controller;
pub mod decision;
pub mod error;
pub mod model;
pub mod notify;
pub mod piecewise;
pub mod predictor;
pub mod registry;
pub mod ring;
pub mod scorer;

pub use collector::{CancelFlag, Collector, CollectorContext};
pub use config::Config;
pub use error::{Result, WanctlError};
pub use model::{Member, MemberClass, MemberId, Policy, Role, Sample, Status};
pub use notify::{NotificationBus, NotificationEvent, NotificationKind, NotificationSink};
pub use registry::MemberRegistry;
pub use ring::TelemetryRing;
