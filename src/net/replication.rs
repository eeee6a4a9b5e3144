//! Replication channel
//!
//! Owner side publishes a sequenced snapshot of its actor at a fixed cadence.
//! Observer side keeps exactly one target per actor: the newest snapshot by
//! sequence. Older or duplicate sequences are dropped, never queued.

use hashbrown::HashMap;

use crate::actor::state::{Actor, ActorId};
use crate::net::protocol::{ReplicationSnapshot, SnapshotEnvelope, WireMessage};

/// Owner-side snapshot producer for the locally-owned actor
#[derive(Debug)]
pub struct ReplicationPublisher {
    interval_ticks: u64,
    last_publish_tick: Option<u64>,
    sequence: u32,
}

impl ReplicationPublisher {
    pub fn new(interval_ticks: u64) -> Self {
        Self {
            interval_ticks: interval_ticks.max(1),
            last_publish_tick: None,
            sequence: 0,
        }
    }

    /// Check if a snapshot is due this tick
    pub fn should_publish(&self, tick: u64) -> bool {
        match self.last_publish_tick {
            None => true,
            Some(last) => tick > last && tick - last >= self.interval_ticks,
        }
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.saturating_add(1);
        self.sequence
    }

    /// Produce a snapshot if one is due
    pub fn poll(&mut self, actor: &Actor, tick: u64) -> Option<SnapshotEnvelope> {
        let owner = actor.owner?;
        if !self.should_publish(tick) {
            return None;
        }
        self.last_publish_tick = Some(tick);
        Some(SnapshotEnvelope {
            actor_id: actor.id,
            owner,
            sequence: self.next_sequence(),
            tick,
            snapshot: ReplicationSnapshot::from_actor(actor),
        })
    }

    /// Sequenced jump notification for an accepted jump
    pub fn jump_event(&mut self, actor: &Actor, jump_count: u8) -> Option<WireMessage> {
        let owner = actor.owner?;
        Some(WireMessage::Jump {
            actor_id: actor.id,
            owner,
            sequence: self.next_sequence(),
            jump_count,
        })
    }

    /// Start over for a newly registered actor
    pub fn reset(&mut self) {
        self.last_publish_tick = None;
        self.sequence = 0;
    }
}

/// Whether an incoming sequenced message was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    Stored,
    /// Not newer than the last accepted sequence for this actor
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct Channel {
    last_sequence: u32,
    target: Option<ReplicationSnapshot>,
}

/// Observer-side latest-target store
#[derive(Debug, Default)]
pub struct SnapshotTargets {
    channels: HashMap<ActorId, Channel>,
}

impl SnapshotTargets {
    pub fn new() -> Self {
        Self::default()
    }

    fn admit(&mut self, actor_id: ActorId, sequence: u32) -> Option<&mut Channel> {
        let channel = self.channels.entry(actor_id).or_insert(Channel {
            last_sequence: 0,
            target: None,
        });
        if sequence <= channel.last_sequence {
            return None;
        }
        channel.last_sequence = sequence;
        Some(channel)
    }

    /// Store a snapshot as the new target, last-write-wins by sequence
    pub fn accept(&mut self, envelope: &SnapshotEnvelope) -> Accept {
        match self.admit(envelope.actor_id, envelope.sequence) {
            Some(channel) => {
                channel.target = Some(envelope.snapshot);
                Accept::Stored
            }
            None => Accept::Stale,
        }
    }

    /// Order a jump event against the same per-actor sequence
    ///
    /// The stored target carries the jump so interpolation keeps the flag
    /// until the owner's next snapshot replaces it.
    pub fn accept_jump(&mut self, actor_id: ActorId, sequence: u32) -> Accept {
        match self.admit(actor_id, sequence) {
            Some(channel) => {
                if let Some(target) = channel.target.as_mut() {
                    target.anim.jumping = true;
                    target.anim.grounded = false;
                }
                Accept::Stored
            }
            None => Accept::Stale,
        }
    }

    pub fn target(&self, actor_id: ActorId) -> Option<&ReplicationSnapshot> {
        self.channels.get(&actor_id).and_then(|c| c.target.as_ref())
    }

    pub fn remove(&mut self, actor_id: ActorId) {
        self.channels.remove(&actor_id);
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
