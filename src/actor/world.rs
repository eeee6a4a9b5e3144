//! Registry of every live actor this participant knows about
//!
//! Holds both locally-owned actors and observed replicas. Only the spawn
//! coordinator, the duplicate reconciler and session teardown paths insert or
//! remove participant actors; movement and replication only mutate the actor
//! they are handed.

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::actor::authority::{ActorKind, Authority};
use crate::actor::state::{Actor, ActorId, ParticipantId};

/// Result of a live scan: usually zero or one entry
pub type ActorScan = SmallVec<[ActorId; 2]>;

pub struct World {
    local: ParticipantId,
    actors: HashMap<ActorId, Actor>,
    next_serial: u64,
}

impl World {
    pub fn new(local: ParticipantId) -> Self {
        Self {
            local,
            actors: HashMap::new(),
            next_serial: 1,
        }
    }

    /// The participant this world is simulated for
    pub fn local_participant(&self) -> ParticipantId {
        self.local
    }

    /// Insert an actor, resolving its authority against the local participant
    pub fn insert(&mut self, mut actor: Actor) -> ActorId {
        let id = actor.id;
        actor.authority = Authority::resolve(actor.owner, self.local);
        actor.serial = self.next_serial;
        self.next_serial += 1;
        self.actors.insert(id, actor);
        id
    }

    pub fn remove(&mut self, id: ActorId) -> Option<Actor> {
        self.actors.remove(&id)
    }

    pub fn get(&self, id: ActorId) -> Option<&Actor> {
        self.actors.get(&id)
    }

    pub fn get_mut(&mut self, id: ActorId) -> Option<&mut Actor> {
        self.actors.get_mut(&id)
    }

    pub fn contains(&self, id: ActorId) -> bool {
        self.actors.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Actor> {
        self.actors.values()
    }

    /// Mutable access to every actor, for parallel per-actor passes
    pub fn actors_mut(&mut self) -> &mut HashMap<ActorId, Actor> {
        &mut self.actors
    }

    /// Live scan for participant actors flagged as locally owned, oldest first
    pub fn locally_owned(&self) -> ActorScan {
        self.scan(|a| a.is_locally_owned())
    }

    /// Live scan for participant actors owned by `participant`, oldest first
    pub fn owned_by(&self, participant: ParticipantId) -> ActorScan {
        self.scan(|a| a.is_owned_by(participant))
    }

    fn scan(&self, filter: impl Fn(&Actor) -> bool) -> ActorScan {
        let mut found: SmallVec<[(u64, ActorId); 2]> = self
            .actors
            .values()
            .filter(|a| a.kind == ActorKind::Participant && filter(a))
            .map(|a| (a.serial, a.id))
            .collect();
        found.sort_unstable_by_key(|(serial, _)| *serial);
        found.into_iter().map(|(_, id)| id).collect()
    }

    /// Remove every actor owned by `participant`, returning the removed ids
    pub fn remove_owned_by(&mut self, participant: ParticipantId) -> ActorScan {
        let ids = self.owned_by(participant);
        for id in &ids {
            self.actors.remove(id);
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActorConfig;
    use crate::util::vec3::Vec3;
    use std::sync::Arc;
    use uuid::Uuid;

    fn participant_actor(owner: ParticipantId) -> Actor {
        Actor::new(
            Uuid::new_v4(),
            Some(owner),
            ActorKind::Participant,
            Vec3::ZERO,
            0.0,
            Arc::new(ActorConfig::default()),
        )
    }

    #[test]
    fn test_insert_resolves_authority() {
        let local = Uuid::new_v4();
        let remote = Uuid::new_v4();
        let mut world = World::new(local);

        let mine = world.insert(participant_actor(local));
        let theirs = world.insert(participant_actor(remote));

        assert_eq!(world.get(mine).unwrap().authority, Authority::Owned);
        assert_eq!(world.get(theirs).unwrap().authority, Authority::Observed);
        assert_eq!(world.len(), 2);
    }

    #[test]
    fn test_locally_owned_scan_is_oldest_first() {
        let local = Uuid::new_v4();
        let mut world = World::new(local);

        let first = world.insert(participant_actor(local));
        let second = world.insert(participant_actor(local));
        world.insert(participant_actor(Uuid::new_v4()));

        let scan = world.locally_owned();
        assert_eq!(scan.as_slice(), &[first, second]);
    }

    #[test]
    fn test_props_are_not_scanned() {
        let local = Uuid::new_v4();
        let mut world = World::new(local);
        let mut prop = participant_actor(local);
        prop.kind = ActorKind::Prop;
        world.insert(prop);

        assert!(world.locally_owned().is_empty());
    }

    #[test]
    fn test_remove_owned_by() {
        let local = Uuid::new_v4();
        let remote = Uuid::new_v4();
        let mut world = World::new(local);
        world.insert(participant_actor(remote));
        world.insert(participant_actor(remote));
        let mine = world.insert(participant_actor(local));

        let removed = world.remove_owned_by(remote);
        assert_eq!(removed.len(), 2);
        assert_eq!(world.len(), 1);
        assert!(world.contains(mine));
    }
}
