//! Concrete adapters implementing `wanctl-core`'s collector, multi-WAN
//! apply/inventory and notification contracts.
//!
//! Nothing here is exercised by the decision/control loop directly: the
//! Orchestrator in `wanctl-daemon` composes these behind the trait objects
//! `wanctl-core` defines (`Collector`, `ApplySink`, `NotificationSink`),
//! which keeps the core crate free of sockets, subprocess calls and file I/O.

pub mod collectors;
pub mod multiwan;
pub mod notify;

pub use collectors::{CollectorRouter, CommandCollector, FixtureCollector, TcpProbeCollector};
pub use multiwan::{MemberDescriptor, MemberStatus, MockMultiWanAdapter, MultiWanAdapter, NetifdMwanAdapter};
pub use notify::{ChannelNotificationSink, LogNotificationSink};
