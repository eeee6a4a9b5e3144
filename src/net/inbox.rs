//! Lock-free event inbox for the simulation loop
//!
//! Network callbacks and collaborators never touch actor state directly. They
//! push a [`CoreEvent`] through a cloned [`EventSender`], and the session
//! drains everything pending at the start of its next tick.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::actor::state::ParticipantId;
use crate::net::protocol::WireMessage;
use crate::spawn::level::LevelChange;

/// Everything that can happen to a session from the outside
#[derive(Debug, Clone)]
pub enum CoreEvent {
    LevelChanged(LevelChange),
    ParticipantJoined(ParticipantId),
    ParticipantLeft(ParticipantId),
    LocalConnected,
    LocalDisconnected,
    /// Already-decoded message from a peer
    Wire(WireMessage),
    /// Raw bytes from a peer, decoded on the loop
    Packet(Vec<u8>),
}

/// Bounded MPSC inbox owned by a session
pub struct EventInbox {
    sender: Sender<CoreEvent>,
    receiver: Receiver<CoreEvent>,
    capacity: usize,
}

impl EventInbox {
    /// Capacity should cover every event that can arrive between two ticks
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Create a new sender handle for a network callback or collaborator
    pub fn sender(&self) -> EventSender {
        EventSender {
            sender: self.sender.clone(),
        }
    }

    /// Drain all pending events, in arrival order
    pub fn drain(&self) -> Vec<CoreEvent> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventInbox {
    fn default() -> Self {
        Self::new(4096)
    }
}

/// Clonable sender handle
#[derive(Clone)]
pub struct EventSender {
    sender: Sender<CoreEvent>,
}

impl EventSender {
    /// Submit an event (non-blocking)
    #[inline]
    pub fn try_send(&self, event: CoreEvent) -> Result<(), InboxError> {
        self.sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => InboxError::Full,
            TrySendError::Disconnected(_) => InboxError::Disconnected,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InboxError {
    /// Inbox is full (backpressure)
    #[error("Event inbox is full")]
    Full,
    /// Session was dropped
    #[error("Event inbox disconnected")]
    Disconnected,
}
