//! Actor creation seam
//!
//! The coordinator decides *whether* an actor may exist; an [`Instantiator`]
//! actually builds it. Hosts backed by an engine implement the trait over
//! their object factory; [`LocalInstantiator`] builds plain in-memory actors.

use std::sync::Arc;

use uuid::Uuid;

use crate::actor::authority::ActorKind;
use crate::actor::state::{Actor, ParticipantId};
use crate::config::ActorConfig;
use crate::util::vec3::Vec3;

/// Everything needed to create a participant actor
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub owner: ParticipantId,
    pub position: Vec3,
    pub yaw: f32,
    /// Who asked, for logs and the grant audit trail
    pub requester: String,
    pub config: Arc<ActorConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstantiateError {
    /// Worth retrying (e.g. the factory was busy)
    #[error("Transient creation failure: {0}")]
    Transient(String),
    /// The host refused outright
    #[error("Creation rejected: {0}")]
    Rejected(String),
}

pub trait Instantiator: Send {
    /// Create a new participant actor with a fresh identity
    fn instantiate(&mut self, request: &SpawnRequest) -> Result<Actor, InstantiateError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalInstantiator;

impl Instantiator for LocalInstantiator {
    fn instantiate(&mut self, request: &SpawnRequest) -> Result<Actor, InstantiateError> {
        if !request.position.is_finite() {
            return Err(InstantiateError::Rejected(format!(
                "non-finite spawn position for {}",
                request.owner
            )));
        }
        Ok(Actor::new(
            Uuid::new_v4(),
            Some(request.owner),
            ActorKind::Participant,
            request.position,
            request.yaw,
            request.config.clone(),
        ))
    }
}
