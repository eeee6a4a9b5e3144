use serde::{Deserialize, Serialize};

use crate::actor::state::{Actor, ActorId, AnimFlags, ParticipantId};
use crate::util::vec3::Vec3;

/// Messages exchanged between participants of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    /// An owner created its actor (also re-sent to late joiners)
    ActorSpawned {
        actor_id: ActorId,
        owner: ParticipantId,
        position: Vec3,
        yaw: f32,
    },
    /// An owner destroyed its actor
    ActorDespawned {
        actor_id: ActorId,
        owner: ParticipantId,
    },
    /// Periodic transform/animation state of an owned actor
    Snapshot(SnapshotEnvelope),
    /// An accepted jump, so observers can trigger the jump animation
    Jump {
        actor_id: ActorId,
        owner: ParticipantId,
        /// Shares the per-actor sequence with snapshots
        sequence: u32,
        jump_count: u8,
    },
}

impl WireMessage {
    /// Participant that produced this message
    pub fn owner(&self) -> ParticipantId {
        match self {
            WireMessage::ActorSpawned { owner, .. }
            | WireMessage::ActorDespawned { owner, .. }
            | WireMessage::Jump { owner, .. } => *owner,
            WireMessage::Snapshot(envelope) => envelope.owner,
        }
    }
}

/// Addressed, sequenced snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    pub actor_id: ActorId,
    pub owner: ParticipantId,
    /// Per-actor publish order; observers drop anything not newer than what they hold
    pub sequence: u32,
    /// Owner's simulation tick at publish time
    pub tick: u64,
    pub snapshot: ReplicationSnapshot,
}

/// Point-in-time replicated state of one actor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplicationSnapshot {
    pub position: Vec3,
    pub yaw: f32,
    pub velocity: Vec3,
    pub grounded: bool,
    /// Horizontal speed, drives observer locomotion blend
    pub anim_speed: f32,
    pub anim: AnimFlags,
}

impl ReplicationSnapshot {
    pub fn from_actor(actor: &Actor) -> Self {
        Self {
            position: actor.position,
            yaw: actor.yaw,
            velocity: actor.velocity,
            grounded: actor.grounded,
            anim_speed: actor.velocity.horizontal_length(),
            anim: actor.anim,
        }
    }
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::authority::ActorKind;
    use crate::config::ActorConfig;
    use std::sync::Arc;
    use uuid::Uuid;

    #[test]
    fn test_snapshot_message_roundtrip() {
        let owner = Uuid::new_v4();
        let msg = WireMessage::Snapshot(SnapshotEnvelope {
            actor_id: Uuid::new_v4(),
            owner,
            sequence: 42,
            tick: 900,
            snapshot: ReplicationSnapshot {
                position: Vec3::new(1.0, 2.0, 3.0),
                yaw: 0.25,
                velocity: Vec3::new(4.0, 0.0, -1.0),
                grounded: true,
                anim_speed: 4.1,
                anim: AnimFlags {
                    moving: true,
                    jumping: false,
                    grounded: true,
                },
            },
        });

        let encoded = encode(&msg).unwrap();
        let decoded: WireMessage = decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.owner(), owner);
    }

    #[test]
    fn test_snapshot_from_actor_derives_speed() {
        let mut actor = Actor::new(
            Uuid::new_v4(),
            None,
            ActorKind::Participant,
            Vec3::ZERO,
            0.0,
            Arc::new(ActorConfig::default()),
        );
        actor.velocity = Vec3::new(3.0, -7.0, 4.0);
        let snapshot = ReplicationSnapshot::from_actor(&actor);
        assert!((snapshot.anim_speed - 5.0).abs() < 1e-5);
        assert_eq!(snapshot.velocity, actor.velocity);
    }

    #[test]
    fn test_invalid_decode() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        let result: Result<WireMessage, _> = decode(&garbage);
        assert!(result.is_err());
    }
}
