//! Spawn coordinator
//!
//! Single source of truth for "does this participant have an actor, and who
//! may create one". Every spawn path asks [`SpawnCoordinator::request_spawn`]
//! and registers what it created through
//! [`SpawnCoordinator::register_spawned`]. The coordinator is shared behind an
//! `Arc` and guards its state with one mutex, so the check-and-grant step and
//! the duplicate reconciler's read-compare-replace step cannot interleave.

use std::collections::VecDeque;

use hashbrown::HashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::actor::state::{ActorId, ParticipantId};
use crate::actor::world::World;

/// Number of grant decisions kept for diagnostics
pub const GRANT_HISTORY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnPhase {
    Idle,
    /// A request is being evaluated under the lock
    Requested,
    /// Creation is in flight for `requester`
    Granted { requester: String },
    Registered(ActorId),
}

/// Outcome of one spawn request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GrantDecision {
    Granted,
    /// The coordinator already holds a live actor
    AlreadyHeld,
    /// An unregistered local actor was found and is now held
    Adopted,
    /// Another requester's creation is in flight
    Pending,
    LevelNotPermitted,
}

/// Audit record of a spawn request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpawnGrant {
    pub requester: String,
    pub tick: u64,
    pub decision: GrantDecision,
    pub actor: Option<ActorId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Accepted,
    /// Another actor is already held; the new one was destroyed
    Duplicate { kept: ActorId },
    /// The actor is not in the world
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32 },
    Exhausted,
}

/// Side effects the session forwards to its hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorNotice {
    /// Registration completed; other in-flight spawners should stand down
    StandDown(ActorId),
    CameraFollow(ActorId),
}

#[derive(Debug)]
struct Inner {
    phase: SpawnPhase,
    held: Option<ActorId>,
    remote: HashMap<ParticipantId, ActorId>,
    grants: VecDeque<SpawnGrant>,
    failed_attempts: u32,
    exhausted: bool,
    notices: Vec<CoordinatorNotice>,
}

impl Inner {
    fn record(&mut self, requester: &str, tick: u64, decision: GrantDecision, actor: Option<ActorId>) {
        self.grants.push_back(SpawnGrant {
            requester: requester.to_string(),
            tick,
            decision,
            actor,
        });
        while self.grants.len() > GRANT_HISTORY {
            self.grants.pop_front();
        }
    }

    fn hold(&mut self, actor: ActorId) {
        self.held = Some(actor);
        self.phase = SpawnPhase::Registered(actor);
        self.notices.push(CoordinatorNotice::CameraFollow(actor));
    }
}

pub struct SpawnCoordinator {
    local: ParticipantId,
    inner: Mutex<Inner>,
}

impl SpawnCoordinator {
    pub fn new(local: ParticipantId) -> Self {
        Self {
            local,
            inner: Mutex::new(Inner {
                phase: SpawnPhase::Idle,
                held: None,
                remote: HashMap::new(),
                grants: VecDeque::with_capacity(GRANT_HISTORY),
                failed_attempts: 0,
                exhausted: false,
                notices: Vec::new(),
            }),
        }
    }

    pub fn local_participant(&self) -> ParticipantId {
        self.local
    }

    /// Ask for permission to create the local actor
    ///
    /// Returns true only when the caller must now create it. A stale held
    /// reference is dropped first; an unregistered local actor found by the
    /// live scan is adopted instead of granting a second one.
    pub fn request_spawn(&self, requester: &str, world: &World, permitted: bool, tick: u64) -> bool {
        let mut inner = self.inner.lock();
        let previous = std::mem::replace(&mut inner.phase, SpawnPhase::Requested);

        if let Some(held) = inner.held {
            if world.contains(held) {
                inner.phase = previous;
                inner.record(requester, tick, GrantDecision::AlreadyHeld, Some(held));
                debug!("Spawn request from {} denied: {} already held", requester, held);
                return false;
            }
            warn!("Held actor {} no longer exists, clearing", held);
            inner.held = None;
        }

        if let Some(&found) = world.locally_owned().first() {
            inner.hold(found);
            inner.record(requester, tick, GrantDecision::Adopted, Some(found));
            info!("Adopted unregistered local actor {} on request from {}", found, requester);
            return false;
        }

        if let SpawnPhase::Granted { requester: holder } = &previous {
            debug!(
                "Spawn request from {} denied: creation pending for {}",
                requester, holder
            );
            inner.phase = previous;
            inner.record(requester, tick, GrantDecision::Pending, None);
            return false;
        }

        if !permitted {
            inner.phase = SpawnPhase::Idle;
            inner.record(requester, tick, GrantDecision::LevelNotPermitted, None);
            debug!("Spawn request from {} denied: level not permitted", requester);
            return false;
        }

        inner.phase = SpawnPhase::Granted {
            requester: requester.to_string(),
        };
        inner.record(requester, tick, GrantDecision::Granted, None);
        info!("Spawn granted to {}", requester);
        true
    }

    /// Record a freshly created local actor
    ///
    /// If a different live actor is already held the new one is destroyed on
    /// the spot, so a racing creation can never leave two behind.
    pub fn register_spawned(&self, actor: ActorId, requester: &str, world: &mut World) -> Registration {
        let mut inner = self.inner.lock();

        if !world.contains(actor) {
            warn!("Registration of unknown actor {} from {}", actor, requester);
            if matches!(inner.phase, SpawnPhase::Granted { .. }) {
                inner.phase = SpawnPhase::Idle;
            }
            return Registration::Missing;
        }

        if let Some(held) = inner.held {
            if held != actor && world.contains(held) {
                world.remove(actor);
                warn!(
                    "Duplicate actor {} from {} destroyed, keeping {}",
                    actor, requester, held
                );
                return Registration::Duplicate { kept: held };
            }
        }

        inner.hold(actor);
        inner.failed_attempts = 0;
        inner.exhausted = false;
        inner.notices.push(CoordinatorNotice::StandDown(actor));
        info!("Registered local actor {} (requested by {})", actor, requester);
        Registration::Accepted
    }

    /// Creation failed; the phase returns to idle and the caller learns whether to retry
    pub fn creation_failed(&self, requester: &str, max_retries: u32) -> RetryDecision {
        let mut inner = self.inner.lock();
        if matches!(inner.phase, SpawnPhase::Granted { .. }) {
            inner.phase = SpawnPhase::Idle;
        }
        inner.failed_attempts += 1;

        if inner.failed_attempts > max_retries {
            inner.exhausted = true;
            warn!(
                "Spawn for {} failed {} times, giving up",
                requester, inner.failed_attempts
            );
            RetryDecision::Exhausted
        } else {
            RetryDecision::Retry {
                attempt: inner.failed_attempts,
            }
        }
    }

    /// Clear the held reference (the caller destroys the actor)
    pub fn unregister(&self) -> Option<ActorId> {
        let mut inner = self.inner.lock();
        let held = inner.held.take();
        if matches!(inner.phase, SpawnPhase::Registered(_)) {
            inner.phase = SpawnPhase::Idle;
        }
        if let Some(id) = held {
            info!("Unregistered local actor {}", id);
        }
        held
    }

    /// Abandon an in-flight grant (level change or disconnect)
    pub fn cancel_pending(&self) {
        let mut inner = self.inner.lock();
        if let SpawnPhase::Granted { requester } = &inner.phase {
            debug!("Cancelled pending grant for {}", requester);
            inner.phase = SpawnPhase::Idle;
        }
    }

    /// Forget failed attempts, e.g. on a new level or reconnect
    pub fn reset_attempts(&self) {
        let mut inner = self.inner.lock();
        inner.failed_attempts = 0;
        inner.exhausted = false;
    }

    pub fn held(&self) -> Option<ActorId> {
        self.inner.lock().held
    }

    pub fn phase(&self) -> SpawnPhase {
        self.inner.lock().phase.clone()
    }

    pub fn retries_exhausted(&self) -> bool {
        self.inner.lock().exhausted
    }

    /// Most recent grant decisions, oldest first
    pub fn recent_grants(&self) -> Vec<SpawnGrant> {
        self.inner.lock().grants.iter().cloned().collect()
    }

    pub fn take_notices(&self) -> Vec<CoordinatorNotice> {
        std::mem::take(&mut self.inner.lock().notices)
    }

    /// Exclusive access to the held reference for the duplicate reconciler
    pub fn held_section(&self) -> HeldSection<'_> {
        HeldSection {
            inner: self.inner.lock(),
        }
    }

    /// Track a remote participant's announced actor
    ///
    /// Returns the replica it displaces, which the caller destroys.
    pub fn register_remote(&self, owner: ParticipantId, actor: ActorId) -> Option<ActorId> {
        let mut inner = self.inner.lock();
        match inner.remote.insert(owner, actor) {
            Some(previous) if previous != actor => {
                warn!(
                    "Participant {} announced {} while {} was live, replacing",
                    owner, actor, previous
                );
                Some(previous)
            }
            _ => None,
        }
    }

    /// Drop the mapping if it still points at `actor`
    pub fn unregister_remote(&self, owner: ParticipantId, actor: ActorId) -> bool {
        let mut inner = self.inner.lock();
        if inner.remote.get(&owner) == Some(&actor) {
            inner.remote.remove(&owner);
            true
        } else {
            false
        }
    }

    pub fn forget_participant(&self, owner: ParticipantId) -> Option<ActorId> {
        self.inner.lock().remote.remove(&owner)
    }

    pub fn clear_remote(&self) {
        self.inner.lock().remote.clear();
    }

    pub fn remote_actor(&self, owner: ParticipantId) -> Option<ActorId> {
        self.inner.lock().remote.get(&owner).copied()
    }
}

/// Held reference locked for a read-compare-replace
pub struct HeldSection<'a> {
    inner: MutexGuard<'a, Inner>,
}

impl HeldSection<'_> {
    pub fn held(&self) -> Option<ActorId> {
        self.inner.held
    }

    /// Point the held reference at `keeper`, returning whether it changed
    pub fn replace(&mut self, keeper: Option<ActorId>) -> bool {
        if self.inner.held == keeper {
            return false;
        }
        match keeper {
            Some(id) => {
                info!("Reconciler now holds {}", id);
                self.inner.hold(id);
            }
            None => {
                self.inner.held = None;
                if matches!(self.inner.phase, SpawnPhase::Registered(_)) {
                    self.inner.phase = SpawnPhase::Idle;
                }
            }
        }
        true
    }

    pub fn request_camera_follow(&mut self, actor: ActorId) {
        self.inner.notices.push(CoordinatorNotice::CameraFollow(actor));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::authority::ActorKind;
    use crate::actor::state::Actor;
    use crate::config::ActorConfig;
    use crate::util::vec3::Vec3;
    use std::sync::Arc;
    use uuid::Uuid;

    fn setup() -> (SpawnCoordinator, World) {
        let local = Uuid::new_v4();
        (SpawnCoordinator::new(local), World::new(local))
    }

    fn spawn_local(world: &mut World) -> ActorId {
        let owner = world.local_participant();
        world.insert(Actor::new(
            Uuid::new_v4(),
            Some(owner),
            ActorKind::Participant,
            Vec3::ZERO,
            0.0,
            Arc::new(ActorConfig::default()),
        ))
    }

    #[test]
    fn test_grant_then_register() {
        let (coordinator, mut world) = setup();
        assert!(coordinator.request_spawn("join", &world, true, 1));
        assert!(matches!(coordinator.phase(), SpawnPhase::Granted { .. }));

        let id = spawn_local(&mut world);
        assert_eq!(
            coordinator.register_spawned(id, "join", &mut world),
            Registration::Accepted
        );
        assert_eq!(coordinator.held(), Some(id));
        assert_eq!(coordinator.phase(), SpawnPhase::Registered(id));
        assert_eq!(
            coordinator.take_notices(),
            vec![
                CoordinatorNotice::CameraFollow(id),
                CoordinatorNotice::StandDown(id)
            ]
        );
    }

    #[test]
    fn test_second_request_while_pending_is_denied() {
        let (coordinator, world) = setup();
        assert!(coordinator.request_spawn("join", &world, true, 1));
        assert!(!coordinator.request_spawn("level", &world, true, 1));

        let grants = coordinator.recent_grants();
        assert_eq!(grants[1].decision, GrantDecision::Pending);
        assert!(matches!(coordinator.phase(), SpawnPhase::Granted { requester } if requester == "join"));
    }

    #[test]
    fn test_denied_while_held() {
        let (coordinator, mut world) = setup();
        coordinator.request_spawn("join", &world, true, 1);
        let id = spawn_local(&mut world);
        coordinator.register_spawned(id, "join", &mut world);

        assert!(!coordinator.request_spawn("level", &world, true, 2));
        assert_eq!(coordinator.phase(), SpawnPhase::Registered(id));
    }

    #[test]
    fn test_denied_when_level_not_permitted() {
        let (coordinator, world) = setup();
        assert!(!coordinator.request_spawn("join", &world, false, 1));
        assert_eq!(coordinator.phase(), SpawnPhase::Idle);
        assert_eq!(
            coordinator.recent_grants()[0].decision,
            GrantDecision::LevelNotPermitted
        );
    }

    #[test]
    fn test_unregistered_local_actor_is_adopted() {
        let (coordinator, mut world) = setup();
        let stray = spawn_local(&mut world);

        assert!(!coordinator.request_spawn("reconnect", &world, true, 1));
        assert_eq!(coordinator.held(), Some(stray));
    }

    #[test]
    fn test_stale_held_reference_is_cleared() {
        let (coordinator, mut world) = setup();
        coordinator.request_spawn("join", &world, true, 1);
        let id = spawn_local(&mut world);
        coordinator.register_spawned(id, "join", &mut world);
        world.remove(id);

        assert!(coordinator.request_spawn("retry", &world, true, 2));
        assert!(coordinator.held().is_none());
    }

    #[test]
    fn test_duplicate_registration_destroys_newcomer() {
        let (coordinator, mut world) = setup();
        coordinator.request_spawn("join", &world, true, 1);
        let first = spawn_local(&mut world);
        coordinator.register_spawned(first, "join", &mut world);

        let second = spawn_local(&mut world);
        assert_eq!(
            coordinator.register_spawned(second, "legacy", &mut world),
            Registration::Duplicate { kept: first }
        );
        assert!(!world.contains(second));
        assert_eq!(world.locally_owned().len(), 1);
    }

    #[test]
    fn test_registration_of_missing_actor() {
        let (coordinator, mut world) = setup();
        coordinator.request_spawn("join", &world, true, 1);
        assert_eq!(
            coordinator.register_spawned(Uuid::new_v4(), "join", &mut world),
            Registration::Missing
        );
        assert_eq!(coordinator.phase(), SpawnPhase::Idle);
    }

    #[test]
    fn test_creation_failure_retries_then_exhausts() {
        let (coordinator, world) = setup();
        for attempt in 1..=2 {
            assert!(coordinator.request_spawn("join", &world, true, 1));
            assert_eq!(
                coordinator.creation_failed("join", 2),
                RetryDecision::Retry { attempt }
            );
            assert_eq!(coordinator.phase(), SpawnPhase::Idle);
        }
        assert!(coordinator.request_spawn("join", &world, true, 1));
        assert_eq!(coordinator.creation_failed("join", 2), RetryDecision::Exhausted);
        assert!(coordinator.retries_exhausted());

        coordinator.reset_attempts();
        assert!(!coordinator.retries_exhausted());
    }

    #[test]
    fn test_grant_history_is_bounded() {
        let (coordinator, world) = setup();
        for tick in 0..(GRANT_HISTORY as u64 + 10) {
            coordinator.request_spawn("spam", &world, false, tick);
        }
        let grants = coordinator.recent_grants();
        assert_eq!(grants.len(), GRANT_HISTORY);
        assert_eq!(grants[0].tick, 10);
    }

    #[test]
    fn test_unregister_returns_to_idle() {
        let (coordinator, mut world) = setup();
        coordinator.request_spawn("join", &world, true, 1);
        let id = spawn_local(&mut world);
        coordinator.register_spawned(id, "join", &mut world);

        assert_eq!(coordinator.unregister(), Some(id));
        assert_eq!(coordinator.phase(), SpawnPhase::Idle);
        assert_eq!(coordinator.unregister(), None);
    }

    #[test]
    fn test_cancel_pending() {
        let (coordinator, world) = setup();
        coordinator.request_spawn("join", &world, true, 1);
        coordinator.cancel_pending();
        assert_eq!(coordinator.phase(), SpawnPhase::Idle);
    }

    #[test]
    fn test_remote_mapping_keeps_newest() {
        let (coordinator, _) = setup();
        let owner = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert_eq!(coordinator.register_remote(owner, a), None);
        assert_eq!(coordinator.register_remote(owner, a), None);
        assert_eq!(coordinator.register_remote(owner, b), Some(a));
        assert!(!coordinator.unregister_remote(owner, a));
        assert_eq!(coordinator.remote_actor(owner), Some(b));
        assert!(coordinator.unregister_remote(owner, b));
        assert_eq!(coordinator.remote_actor(owner), None);
    }

    #[test]
    fn test_held_section_replace() {
        let (coordinator, mut world) = setup();
        let id = spawn_local(&mut world);
        {
            let mut section = coordinator.held_section();
            assert!(section.replace(Some(id)));
            assert!(!section.replace(Some(id)));
        }
        assert_eq!(coordinator.held(), Some(id));
        assert_eq!(coordinator.phase(), SpawnPhase::Registered(id));
    }
}
