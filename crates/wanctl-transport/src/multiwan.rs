//! Multi-WAN kernel/userspace adapter (§6.2): the thing that actually moves
//! default-route/policy-routing weight from one uplink to another, and the
//! richer inventory/status query surface the daemon's IPC layer exposes
//! beyond the narrow `ApplySink` contract `wanctl-core::controller` depends
//! on. Grounded on the same object-safe trait-plus-mock-double shape as
//! `wanctl-core::collector::Collector`, so the Controller's tests never need
//! a real netifd/mwan3 install.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;
use tracing::{info, warn};

use wanctl_core::controller::ApplySink;
use wanctl_core::error::{Retriable, WanctlError};
use wanctl_core::model::{MemberClass, MemberId};
use wanctl_core::registry::DiscoveredMember;

/// One interface the multi-WAN subsystem currently knows about, as reported
/// by its inventory query. Distinct from `wanctl_core::registry::DiscoveredMember`
/// in name only — kept as its own type here because an adapter may need to
/// report fields (link type, carrier state) the registry has no use for.
#[derive(Clone, Debug)]
pub struct MemberDescriptor {
    pub id: MemberId,
    pub interface_name: String,
    pub class: MemberClass,
}

impl From<MemberDescriptor> for DiscoveredMember {
    fn from(descriptor: MemberDescriptor) -> Self {
        DiscoveredMember { id: descriptor.id, interface_name: descriptor.interface_name }
    }
}

/// Point-in-time status of one member as the multi-WAN subsystem sees it,
/// independent of this crate's own scoring — used by the IPC `members` query
/// to cross-check what the controller believes against kernel-level truth.
#[derive(Clone, Debug)]
pub struct MemberStatus {
    pub id: MemberId,
    pub carrier_up: bool,
    pub is_default_route: bool,
}

/// Adapter surface the Orchestrator needs beyond "apply a role transition":
/// periodic re-discovery of the interface inventory, and a status query used
/// to answer IPC requests without going through a full collector round.
#[async_trait]
pub trait MultiWanAdapter: ApplySink {
    async fn list_members(&self) -> Result<Vec<MemberDescriptor>, WanctlError>;

    async fn status(&self, member: &MemberId) -> Result<MemberStatus, WanctlError>;
}

/// Real adapter: shells out to a configurable command template, the same
/// indirection `CommandCollector` uses for vendor probes. Keeps this crate
/// free of any direct dependency on a specific router OS's netifd/ubus ABI —
/// the template is whatever the deployment's integration script expects.
///
/// Expected invocations:
/// - `<program> list` — prints one JSON array of `MemberDescriptor`-shaped
///   objects on stdout.
/// - `<program> set-active <member-id>` — exit 0 on success.
/// - `<program> status <member-id>` — prints one JSON `MemberStatus` object.
pub struct NetifdMwanAdapter {
    program: String,
}

impl NetifdMwanAdapter {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, WanctlError> {
        let output = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| WanctlError::control(MemberId::from("*"), Retriable::Yes, format!("failed to spawn {}: {err}", self.program)))?;

        if !output.status.success() {
            return Err(WanctlError::control(
                MemberId::from("*"),
                Retriable::Yes,
                format!("{} {:?} exited with {:?}", self.program, args, output.status.code()),
            ));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl ApplySink for NetifdMwanAdapter {
    async fn apply(&mut self, member: &MemberId) -> Result<(), WanctlError> {
        self.run(&["set-active", member.as_ref()]).await?;
        info!(member = %member, "multi-wan adapter applied new active member");
        Ok(())
    }
}

#[async_trait]
impl MultiWanAdapter for NetifdMwanAdapter {
    async fn list_members(&self) -> Result<Vec<MemberDescriptor>, WanctlError> {
        #[derive(serde::Deserialize)]
        struct Raw {
            id: String,
            interface_name: String,
            class: MemberClass,
        }
        let stdout = self.run(&["list"]).await?;
        let raw: Vec<Raw> = serde_json::from_slice(&stdout).map_err(|err| {
            WanctlError::control(MemberId::from("*"), Retriable::No, format!("bad inventory payload: {err}"))
        })?;
        Ok(raw
            .into_iter()
            .map(|r| MemberDescriptor { id: MemberId::from(r.id), interface_name: r.interface_name, class: r.class })
            .collect())
    }

    async fn status(&self, member: &MemberId) -> Result<MemberStatus, WanctlError> {
        #[derive(serde::Deserialize)]
        struct Raw {
            carrier_up: bool,
            is_default_route: bool,
        }
        let stdout = self.run(&["status", member.as_ref()]).await?;
        let raw: Raw = serde_json::from_slice(&stdout).map_err(|err| {
            WanctlError::control(member.clone(), Retriable::No, format!("bad status payload: {err}"))
        })?;
        Ok(MemberStatus { id: member.clone(), carrier_up: raw.carrier_up, is_default_route: raw.is_default_route })
    }
}

/// In-memory test double used by daemon integration tests and local demos.
/// Tracks whichever member was last applied and reports every known member
/// as carrier-up unless explicitly poisoned via `fail_next_apply`.
pub struct MockMultiWanAdapter {
    members: Vec<MemberDescriptor>,
    active: Mutex<Option<MemberId>>,
    poisoned: Mutex<HashMap<String, WanctlError>>,
}

impl MockMultiWanAdapter {
    pub fn new(members: Vec<MemberDescriptor>) -> Self {
        Self { members, active: Mutex::new(None), poisoned: Mutex::new(HashMap::new()) }
    }

    /// Makes the next `apply()` call for `member` fail once with `error`.
    pub fn fail_next_apply(&self, member: &MemberId, error: WanctlError) {
        self.poisoned.lock().insert(member.to_string(), error);
    }

    pub fn active_member(&self) -> Option<MemberId> {
        self.active.lock().clone()
    }
}

#[async_trait]
impl ApplySink for MockMultiWanAdapter {
    async fn apply(&mut self, member: &MemberId) -> Result<(), WanctlError> {
        if let Some(err) = self.poisoned.lock().remove(member.as_ref()) {
            warn!(member = %member, "mock adapter returning poisoned apply result");
            return Err(err);
        }
        *self.active.lock() = Some(member.clone());
        Ok(())
    }
}

#[async_trait]
impl MultiWanAdapter for MockMultiWanAdapter {
    async fn list_members(&self) -> Result<Vec<MemberDescriptor>, WanctlError> {
        Ok(self.members.clone())
    }

    async fn status(&self, member: &MemberId) -> Result<MemberStatus, WanctlError> {
        if !self.members.iter().any(|m| m.id == *member) {
            return Err(WanctlError::NoSuchMember(member.clone()));
        }
        let is_default_route = self.active_member().as_ref() == Some(member);
        Ok(MemberStatus { id: member.clone(), carrier_up: true, is_default_route })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str) -> MemberDescriptor {
        MemberDescriptor { id: MemberId::from(id), interface_name: format!("if-{id}"), class: MemberClass::Lan }
    }

    #[tokio::test]
    async fn mock_adapter_tracks_last_applied_member() {
        let mut adapter = MockMultiWanAdapter::new(vec![descriptor("wan0"), descriptor("wan1")]);
        adapter.apply(&MemberId::from("wan1")).await.unwrap();
        assert_eq!(adapter.active_member(), Some(MemberId::from("wan1")));
        let status = adapter.status(&MemberId::from("wan1")).await.unwrap();
        assert!(status.is_default_route);
        let other = adapter.status(&MemberId::from("wan0")).await.unwrap();
        assert!(!other.is_default_route);
    }

    #[tokio::test]
    async fn mock_adapter_fails_exactly_once_when_poisoned() {
        let mut adapter = MockMultiWanAdapter::new(vec![descriptor("wan0")]);
        adapter.fail_next_apply(&MemberId::from("wan0"), WanctlError::control(MemberId::from("wan0"), Retriable::Yes, "injected"));
        assert!(adapter.apply(&MemberId::from("wan0")).await.is_err());
        assert!(adapter.apply(&MemberId::from("wan0")).await.is_ok());
    }

    #[tokio::test]
    async fn status_for_unknown_member_errors() {
        let adapter = MockMultiWanAdapter::new(vec![descriptor("wan0")]);
        let err = adapter.status(&MemberId::from("ghost")).await.unwrap_err();
        assert!(matches!(err, WanctlError::NoSuchMember(_)));
    }
}
