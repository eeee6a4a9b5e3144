//! Outbound transport seam and an in-process loopback hub
//!
//! A session hands every outbound [`WireMessage`] to a [`Transport`]. The
//! loopback hub fans encoded packets out to every other connected session's
//! inbox and emits join/leave events, which is enough to run several
//! participants in one process.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::actor::state::ParticipantId;
use crate::net::inbox::{CoreEvent, EventSender};
use crate::net::protocol::{encode, WireMessage};

/// Delivery of outbound messages to every other participant
pub trait Transport: Send + Sync {
    fn broadcast(&self, message: &WireMessage);
}

/// Transport that drops everything, for a participant playing alone
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn broadcast(&self, _message: &WireMessage) {}
}

/// In-process hub connecting several sessions
#[derive(Clone, Default)]
pub struct LoopbackHub {
    peers: Arc<RwLock<HashMap<ParticipantId, EventSender>>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a participant's inbox; existing peers and the newcomer learn about each other
    pub fn connect(&self, participant: ParticipantId, inbox: EventSender) -> LoopbackTransport {
        let mut peers = self.peers.write();
        for (id, sender) in peers.iter() {
            deliver(sender, *id, CoreEvent::ParticipantJoined(participant));
            deliver(&inbox, participant, CoreEvent::ParticipantJoined(*id));
        }
        deliver(&inbox, participant, CoreEvent::LocalConnected);
        peers.insert(participant, inbox);

        LoopbackTransport {
            hub: self.clone(),
            participant,
        }
    }

    /// Detach a participant; it receives a local disconnect, peers see it leave
    pub fn disconnect(&self, participant: ParticipantId) {
        let mut peers = self.peers.write();
        if let Some(inbox) = peers.remove(&participant) {
            deliver(&inbox, participant, CoreEvent::LocalDisconnected);
        }
        for (id, sender) in peers.iter() {
            deliver(sender, *id, CoreEvent::ParticipantLeft(participant));
        }
    }

    /// Send an event to every connected participant (e.g. a shared level change)
    pub fn announce(&self, event: CoreEvent) {
        for (id, sender) in self.peers.read().iter() {
            deliver(sender, *id, event.clone());
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }
}

fn deliver(sender: &EventSender, to: ParticipantId, event: CoreEvent) {
    if let Err(e) = sender.try_send(event) {
        warn!("Loopback delivery to {} failed: {}", to, e);
    }
}

/// A participant's handle onto the hub
#[derive(Clone)]
pub struct LoopbackTransport {
    hub: LoopbackHub,
    participant: ParticipantId,
}

impl Transport for LoopbackTransport {
    fn broadcast(&self, message: &WireMessage) {
        let encoded = match encode(message) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to encode message for broadcast: {}", e);
                return;
            }
        };

        for (id, sender) in self.hub.peers.read().iter() {
            if *id == self.participant {
                continue;
            }
            deliver(sender, *id, CoreEvent::Packet(encoded.clone()));
        }
        debug!(
            "Broadcast from {}: {} bytes",
            self.participant,
            encoded.len()
        );
    }
}
