//! Outbound notifications to the embedding host
//!
//! Calls are fire-and-forget and run on the simulation loop, so
//! implementations must return quickly.

use parking_lot::Mutex;

use crate::actor::state::ActorId;

pub trait SessionHooks: Send + Sync {
    /// Point the camera at this actor
    fn request_camera_follow(&self, _actor: ActorId) {}

    /// The local actor is registered; any other spawner should stand down
    fn spawn_completed(&self, _actor: ActorId) {}

    /// Spawning gave up after exhausting its retries
    fn local_actor_unavailable(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl SessionHooks for NoopHooks {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookCall {
    CameraFollow(ActorId),
    SpawnCompleted(ActorId),
    LocalActorUnavailable,
}

/// Keeps every call in order, for hosts that poll instead of reacting
#[derive(Debug, Default)]
pub struct RecordingHooks {
    calls: Mutex<Vec<HookCall>>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<HookCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    pub fn calls(&self) -> Vec<HookCall> {
        self.calls.lock().clone()
    }
}

impl SessionHooks for RecordingHooks {
    fn request_camera_follow(&self, actor: ActorId) {
        self.calls.lock().push(HookCall::CameraFollow(actor));
    }

    fn spawn_completed(&self, actor: ActorId) {
        self.calls.lock().push(HookCall::SpawnCompleted(actor));
    }

    fn local_actor_unavailable(&self) {
        self.calls.lock().push(HookCall::LocalActorUnavailable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_recording_hooks_keep_order() {
        let hooks = RecordingHooks::new();
        let id = Uuid::new_v4();
        hooks.spawn_completed(id);
        hooks.request_camera_follow(id);

        assert_eq!(
            hooks.take(),
            vec![HookCall::SpawnCompleted(id), HookCall::CameraFollow(id)]
        );
        assert!(hooks.calls().is_empty());
    }
}
