//! Owner/observer split
//!
//! Exactly one participant simulates an actor; everyone else renders a replica
//! driven by replication snapshots.

use serde::{Deserialize, Serialize};

use crate::actor::state::{Actor, ActorId, ParticipantId};

/// Simulation authority this participant holds over an actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Authority {
    /// Full simulation authority: movement, jumps, respawn, publishing
    Owned,
    /// Replica only: reconciled toward the owner's snapshots
    Observed,
}

impl Authority {
    /// Authority the local participant holds over an actor owned by `owner`
    pub fn resolve(owner: Option<ParticipantId>, local: ParticipantId) -> Self {
        match owner {
            Some(owner) if owner == local => Authority::Owned,
            _ => Authority::Observed,
        }
    }
}

/// Capability marker set once when an actor is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorKind {
    /// The controllable body of a participant
    Participant,
    /// Anything else sharing the world (props, hazards)
    Prop,
}

/// Errors from owner-only operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    #[error("Actor {0} is not owned by the local participant")]
    NotOwner(ActorId),
    #[error("Unknown actor {0}")]
    UnknownActor(ActorId),
}

/// Gate an owner-only write
pub fn require_owned(actor: Option<&mut Actor>, id: ActorId) -> Result<&mut Actor, AuthorityError> {
    match actor {
        Some(actor) if actor.authority == Authority::Owned => Ok(actor),
        Some(_) => Err(AuthorityError::NotOwner(id)),
        None => Err(AuthorityError::UnknownActor(id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActorConfig;
    use crate::util::vec3::Vec3;
    use std::sync::Arc;
    use uuid::Uuid;

    #[test]
    fn test_resolve() {
        let local = Uuid::new_v4();
        assert_eq!(Authority::resolve(Some(local), local), Authority::Owned);
        assert_eq!(
            Authority::resolve(Some(Uuid::new_v4()), local),
            Authority::Observed
        );
        assert_eq!(Authority::resolve(None, local), Authority::Observed);
    }

    #[test]
    fn test_require_owned() {
        let id = Uuid::new_v4();
        let mut actor = Actor::new(
            id,
            None,
            ActorKind::Participant,
            Vec3::ZERO,
            0.0,
            Arc::new(ActorConfig::default()),
        );
        assert_eq!(
            require_owned(Some(&mut actor), id).unwrap_err(),
            AuthorityError::NotOwner(id)
        );
        actor.authority = Authority::Owned;
        assert!(require_owned(Some(&mut actor), id).is_ok());
        assert_eq!(
            require_owned(None, id).unwrap_err(),
            AuthorityError::UnknownActor(id)
        );
    }
}
