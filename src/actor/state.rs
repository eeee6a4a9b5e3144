//! Actor data model
//!
//! An actor is the controllable body of one participant. It is created by a
//! granted spawn, destroyed on disconnect, level exit or duplicate pruning, and
//! never resurrected: a later spawn always produces a new identity.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::actor::authority::{ActorKind, Authority};
use crate::config::ActorConfig;
use crate::util::vec3::Vec3;

/// Unique participant identifier
pub type ParticipantId = Uuid;

/// Unique network identity of an actor
pub type ActorId = Uuid;

/// Animation flags driven by the owner and applied verbatim by observers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimFlags {
    pub moving: bool,
    pub jumping: bool,
    pub grounded: bool,
}

/// Actor state
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: ActorId,
    /// Owning participant; unset until the spawn that created the actor completes
    pub owner: Option<ParticipantId>,
    /// Capability marker, fixed at creation
    pub kind: ActorKind,
    /// Whether this participant simulates the actor or renders a replica
    pub authority: Authority,

    pub position: Vec3,
    /// Orientation around +Y (radians)
    pub yaw: f32,
    pub velocity: Vec3,
    pub grounded: bool,
    /// Jumps used since last grounded, 0..=max_jumps
    pub jump_count: u8,
    /// Simulation time of the last accepted jump
    pub last_jump_time: Option<f64>,
    /// Simulation time the actor was last grounded
    pub last_ground_time: Option<f64>,
    /// Where the actor last stood on ground, used for fall recovery
    pub last_grounded_position: Option<Vec3>,
    pub anim: AnimFlags,
    /// Horizontal speed, replicated to drive observer animation blend
    pub anim_speed: f32,

    pub config: Arc<ActorConfig>,
    /// Local insertion order, assigned by the world
    pub(crate) serial: u64,
}

impl Actor {
    pub fn new(
        id: ActorId,
        owner: Option<ParticipantId>,
        kind: ActorKind,
        position: Vec3,
        yaw: f32,
        config: Arc<ActorConfig>,
    ) -> Self {
        Self {
            id,
            owner,
            kind,
            authority: Authority::Observed,
            position,
            yaw,
            velocity: Vec3::ZERO,
            grounded: false,
            jump_count: 0,
            last_jump_time: None,
            last_ground_time: None,
            last_grounded_position: None,
            anim: AnimFlags::default(),
            anim_speed: 0.0,
            config,
            serial: 0,
        }
    }

    /// A participant-controlled actor simulated by this participant
    pub fn is_locally_owned(&self) -> bool {
        self.kind == ActorKind::Participant && self.authority == Authority::Owned
    }

    pub fn is_owned_by(&self, participant: ParticipantId) -> bool {
        self.kind == ActorKind::Participant && self.owner == Some(participant)
    }

    /// Snapshot of the publicly queryable state
    pub fn state(&self) -> ActorState {
        ActorState {
            id: self.id,
            owner: self.owner,
            position: self.position,
            yaw: self.yaw,
            velocity: self.velocity,
            grounded: self.grounded,
            anim: self.anim,
        }
    }

    /// Relocate and stop the actor
    pub fn place(&mut self, position: Vec3) {
        self.position = position;
        self.velocity = Vec3::ZERO;
        self.anim_speed = 0.0;
        self.anim.moving = false;
        self.anim.jumping = false;
    }
}

/// Read-only view of an actor handed to collaborators
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActorState {
    pub id: ActorId,
    pub owner: Option<ParticipantId>,
    pub position: Vec3,
    pub yaw: f32,
    pub velocity: Vec3,
    pub grounded: bool,
    pub anim: AnimFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_actor(owner: Option<ParticipantId>) -> Actor {
        Actor::new(
            Uuid::new_v4(),
            owner,
            ActorKind::Participant,
            Vec3::new(1.0, 2.0, 3.0),
            0.5,
            Arc::new(ActorConfig::default()),
        )
    }

    #[test]
    fn test_new_actor_is_observed_until_world_assigns_authority() {
        let actor = test_actor(Some(Uuid::new_v4()));
        assert_eq!(actor.authority, Authority::Observed);
        assert!(!actor.is_locally_owned());
        assert_eq!(actor.jump_count, 0);
    }

    #[test]
    fn test_is_owned_by() {
        let owner = Uuid::new_v4();
        let actor = test_actor(Some(owner));
        assert!(actor.is_owned_by(owner));
        assert!(!actor.is_owned_by(Uuid::new_v4()));
        assert!(!test_actor(None).is_owned_by(owner));
    }

    #[test]
    fn test_state_mirrors_fields() {
        let actor = test_actor(None);
        let state = actor.state();
        assert_eq!(state.id, actor.id);
        assert_eq!(state.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(state.yaw, 0.5);
    }

    #[test]
    fn test_place_zeroes_motion() {
        let mut actor = test_actor(None);
        actor.velocity = Vec3::new(3.0, -9.0, 1.0);
        actor.anim.moving = true;
        actor.place(Vec3::new(0.0, 5.0, 0.0));
        assert_eq!(actor.velocity, Vec3::ZERO);
        assert_eq!(actor.position, Vec3::new(0.0, 5.0, 0.0));
        assert!(!actor.anim.moving);
    }
}
