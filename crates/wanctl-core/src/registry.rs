//! Member Registry (C2): the authoritative id -> [`Member`] mapping.
//!
//! The concurrency shape is lifted directly from
//! `spark-switch::core::session_manager::SessionManager`: a `DashMap` keyed
//! by a cheaply-cloned `Arc<str>`, entry-based insert-if-absent on
//! discovery, guard-based get/get_mut for readers. Unlike `SessionManager`,
//! state mutation is further restricted by convention (not the type system)
//! to the Decision Engine/Controller call path: member state transitions are
//! serialized through the Orchestrator, the only component holding a
//! tick-advancing `&MemberRegistry`.

use std::time::SystemTime;

use dashmap::DashMap;
use dashmap::mapref::one::{Ref, RefMut};

use crate::model::{Member, MemberId, Policy, Role};

/// Number of consecutive missing discovery ticks before a member is
/// physically removed from the registry (the "removal grace window").
pub const REMOVAL_GRACE_TICKS: u32 = 3;

/// A descriptor returned by the external multi-WAN inventory during
/// discovery. Intentionally narrow: a stable name and an OS interface name,
/// as specified for `list_members()`.
#[derive(Clone, Debug)]
pub struct DiscoveredMember {
    pub id: MemberId,
    pub interface_name: String,
}

/// State transitions the Decision Engine/Controller may apply to a member.
/// Modeled as an explicit enum (rather than exposing `&mut LiveState`
/// directly) so every mutation path is self-describing in logs and tests.
#[derive(Clone, Debug)]
pub enum StateTransition {
    SetRole(Role),
    SetScore { score: f64, status: crate::model::Status },
    MarkSampleAt(SystemTime),
    SetCooldownUntil(Option<SystemTime>),
    RecordGoodTick,
    RecordBadTick,
    RecordPermanentError,
    ResetErrorStreak,
    ResetTickCounters,
    RecordPredictorTrigger(SystemTime),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("member `{0}` is already registered")]
    DuplicateMember(MemberId),
    #[error("member `{0}` is not registered")]
    UnknownMember(MemberId),
}

#[derive(Default, Debug)]
pub struct MemberRegistry {
    members: DashMap<MemberId, Member>,
}

impl MemberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile the registry against a freshly discovered inventory: add
    /// newly-seen members (live state reset, policy defaulted from
    /// `default_policy`), mark previously-known-but-now-missing members as
    /// `Excluded` and start their removal grace timer, and clear the grace
    /// timer for any member that reappeared. Members whose grace timer
    /// reaches [`REMOVAL_GRACE_TICKS`] are dropped from the registry
    /// entirely and returned to the caller for ring/log cleanup.
    pub fn discover<F>(&self, seen: &[DiscoveredMember], mut default_policy: F) -> Vec<MemberId>
    where
        F: FnMut(&DiscoveredMember) -> Policy,
    {
        let seen_ids: std::collections::HashSet<&str> = seen.iter().map(|d| d.id.as_ref()).collect();

        for discovered in seen {
            match self.members.entry(discovered.id.clone()) {
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    let policy = default_policy(discovered);
                    vacant.insert(Member::new(
                        discovered.id.clone(),
                        discovered.interface_name.clone(),
                        policy,
                    ));
                }
                dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                    let member = occupied.get_mut();
                    member.interface_name = discovered.interface_name.clone();
                    if member.live.missing_ticks > 0 {
                        member.live.missing_ticks = 0;
                        if matches!(member.live.role, Role::Excluded) {
                            member.live.role = Role::Standby;
                        }
                    }
                }
            }
        }

        let mut removed = Vec::new();
        for mut entry in self.members.iter_mut() {
            if seen_ids.contains(entry.id.as_ref()) {
                continue;
            }
            entry.live.role = Role::Excluded;
            entry.live.missing_ticks += 1;
            if entry.live.missing_ticks >= REMOVAL_GRACE_TICKS {
                removed.push(entry.id.clone());
            }
        }
        for id in &removed {
            self.members.remove(id.as_ref());
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Ref<'_, MemberId, Member>> {
        self.members.get(id)
    }

    pub fn get_mut(&self, id: &str) -> Option<RefMut<'_, MemberId, Member>> {
        self.members.get_mut(id)
    }

    pub fn list(&self) -> Vec<Member> {
        self.members.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Apply a configuration-reload policy update. Never touches live
    /// state.
    pub fn update_policy(&self, id: &str, policy: Policy) -> Result<(), RegistryError> {
        let mut member = self
            .members
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownMember(MemberId::from(id)))?;
        member.policy = policy;
        Ok(())
    }

    /// Apply a live-state transition. Only the Decision Engine/Controller
    /// call path (i.e. code running on the Orchestrator task) should invoke
    /// this.
    pub fn mutate_state(&self, id: &str, transition: StateTransition) -> Result<(), RegistryError> {
        let mut member = self
            .members
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownMember(MemberId::from(id)))?;
        apply_transition(&mut member, transition);
        Ok(())
    }
}

fn apply_transition(member: &mut Member, transition: StateTransition) {
    match transition {
        StateTransition::SetRole(role) => member.live.role = role,
        StateTransition::SetScore { score, status } => {
            member.live.score = score;
            member.live.status = status;
        }
        StateTransition::MarkSampleAt(t) => member.live.last_sample_at = Some(t),
        StateTransition::SetCooldownUntil(t) => member.live.cooldown_until = t,
        StateTransition::RecordGoodTick => {
            member.live.consecutive_good_ticks += 1;
            member.live.consecutive_bad_ticks = 0;
        }
        StateTransition::RecordBadTick => {
            member.live.consecutive_bad_ticks += 1;
            member.live.consecutive_good_ticks = 0;
        }
        StateTransition::RecordPermanentError => {
            member.live.consecutive_permanent_errors += 1;
        }
        StateTransition::ResetErrorStreak => {
            member.live.consecutive_permanent_errors = 0;
        }
        StateTransition::ResetTickCounters => {
            member.live.consecutive_good_ticks = 0;
            member.live.consecutive_bad_ticks = 0;
        }
        StateTransition::RecordPredictorTrigger(t) => {
            member.live.last_predictor_trigger_at = Some(t);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MemberClass, Policy};

    fn policy(class: MemberClass, priority: i32) -> Policy {
        Policy {
            class,
            base_priority: priority,
            enabled: true,
            metered: false,
            data_limit: None,
            poll_interval_override_ms: None,
        }
    }

    #[test]
    fn discover_adds_new_members_with_reset_live_state() {
        let registry = MemberRegistry::new();
        let seen = vec![DiscoveredMember { id: MemberId::from("a"), interface_name: "wan0".into() }];
        registry.discover(&seen, |_| policy(MemberClass::Lan, 100));
        let member = registry.get("a").unwrap();
        assert_eq!(member.live.role, Role::Standby);
        assert_eq!(member.policy.base_priority, 100);
    }

    #[test]
    fn missing_member_excluded_then_removed_after_grace() {
        let registry = MemberRegistry::new();
        let seen = vec![DiscoveredMember { id: MemberId::from("a"), interface_name: "wan0".into() }];
        registry.discover(&seen, |_| policy(MemberClass::Lan, 100));

        let removed_tick1 = registry.discover(&[], |_| policy(MemberClass::Lan, 100));
        assert!(removed_tick1.is_empty());
        assert_eq!(registry.get("a").unwrap().live.role, Role::Excluded);

        let removed_tick2 = registry.discover(&[], |_| policy(MemberClass::Lan, 100));
        assert!(removed_tick2.is_empty());

        let removed_tick3 = registry.discover(&[], |_| policy(MemberClass::Lan, 100));
        assert_eq!(removed_tick3, vec![MemberId::from("a")]);
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn reappearing_member_clears_exclusion() {
        let registry = MemberRegistry::new();
        let seen = vec![DiscoveredMember { id: MemberId::from("a"), interface_name: "wan0".into() }];
        registry.discover(&seen, |_| policy(MemberClass::Lan, 100));
        registry.discover(&[], |_| policy(MemberClass::Lan, 100));
        assert_eq!(registry.get("a").unwrap().live.role, Role::Excluded);
        registry.discover(&seen, |_| policy(MemberClass::Lan, 100));
        assert_eq!(registry.get("a").unwrap().live.role, Role::Standby);
    }

    #[test]
    fn update_policy_never_touches_live_state() {
        let registry = MemberRegistry::new();
        let seen = vec![DiscoveredMember { id: MemberId::from("a"), interface_name: "wan0".into() }];
        registry.discover(&seen, |_| policy(MemberClass::Lan, 100));
        registry
            .mutate_state(
                "a",
                StateTransition::SetScore { score: 42.0, status: crate::model::Status::Degraded },
            )
            .unwrap();
        registry.update_policy("a", policy(MemberClass::Lan, 50)).unwrap();
        let member = registry.get("a").unwrap();
        assert_eq!(member.policy.base_priority, 50);
        assert_eq!(member.live.score, 42.0);
    }

    #[test]
    fn mutate_unknown_member_errors() {
        let registry = MemberRegistry::new();
        let err = registry.mutate_state("ghost", StateTransition::RecordGoodTick);
        assert!(matches!(err, Err(RegistryError::UnknownMember(_))));
    }
}
