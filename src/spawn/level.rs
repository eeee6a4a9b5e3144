//! Level lifecycle adapter
//!
//! Translates level-change events into coordinator actions. A disallowed level
//! tears the local actor down immediately; a permitted level arms one settled
//! spawn request. Every change bumps the level generation so that anything
//! scheduled for the previous level is dropped instead of firing late.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::actor::world::{ActorScan, World};
use crate::spawn::coordinator::SpawnCoordinator;

/// Level transition reported by the scene loader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub previous: Option<String>,
    pub next: String,
}

impl LevelChange {
    pub fn new(previous: Option<&str>, next: &str) -> Self {
        Self {
            previous: previous.map(String::from),
            next: next.to_string(),
        }
    }
}

/// What the session must do after a level change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelDirective {
    /// Destroy and unregister the local actor now
    Teardown,
    /// Request one spawn once the level has settled
    SpawnAfterSettle { due_tick: u64, generation: u64 },
}

#[derive(Debug)]
pub struct LevelLifecycle {
    permitted: BTreeSet<String>,
    current: Option<String>,
    generation: u64,
    settle_delay_ticks: u64,
}

impl LevelLifecycle {
    pub fn new(permitted: BTreeSet<String>, settle_delay_ticks: u64) -> Self {
        Self {
            permitted,
            current: None,
            generation: 0,
            settle_delay_ticks,
        }
    }

    pub fn current_level(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Incremented on every level change
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_permitted(&self, level: &str) -> bool {
        self.permitted.contains(level)
    }

    /// Whether the active level allows a local actor, evaluated fresh on each call
    pub fn permission(&self) -> bool {
        self.current
            .as_deref()
            .is_some_and(|level| self.is_permitted(level))
    }

    /// Settle directive for the current level, if it permits spawning
    pub fn settle_directive(&self, tick: u64) -> Option<LevelDirective> {
        self.permission().then_some(LevelDirective::SpawnAfterSettle {
            due_tick: tick + self.settle_delay_ticks,
            generation: self.generation,
        })
    }

    pub fn on_level_changed(&mut self, change: &LevelChange, tick: u64) -> LevelDirective {
        self.generation += 1;
        self.current = Some(change.next.clone());
        let permitted = self.permission();

        info!(
            "Level change {} -> {} (permitted: {}, generation {})",
            change.previous.as_deref().unwrap_or("<none>"),
            change.next,
            permitted,
            self.generation
        );

        self.settle_directive(tick)
            .unwrap_or(LevelDirective::Teardown)
    }
}

/// Destroy every locally-owned actor and clear the coordinator's reference
pub fn teardown_local(world: &mut World, coordinator: &SpawnCoordinator) -> ActorScan {
    let mut removed = world.locally_owned();
    if let Some(held) = coordinator.unregister() {
        if world.contains(held) && !removed.contains(&held) {
            removed.push(held);
        }
    }
    for id in &removed {
        world.remove(*id);
    }
    removed
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

    fn lifecycle() -> LevelLifecycle {
        let permitted = ["Arena".to_string()].into_iter().collect();
        LevelLifecycle::new(permitted, 10)
    }

    #[test]
    fn test_no_level_is_not_permitted() {
        assert!(!lifecycle().permission());
    }

    #[test]
    fn test_permitted_level_arms_settled_spawn() {
        let mut level = lifecycle();
        let directive = level.on_level_changed(&LevelChange::new(None, "Arena"), 5);
        assert_eq!(
            directive,
            LevelDirective::SpawnAfterSettle {
                due_tick: 15,
                generation: 1
            }
        );
        assert!(level.permission());
    }

    #[test]
    fn test_disallowed_level_tears_down() {
        let mut level = lifecycle();
        level.on_level_changed(&LevelChange::new(None, "Arena"), 0);
        let directive = level.on_level_changed(&LevelChange::new(Some("Arena"), "MainMenu"), 1);
        assert_eq!(directive, LevelDirective::Teardown);
        assert!(!level.permission());
        assert_eq!(level.generation(), 2);
        assert_eq!(level.current_level(), Some("MainMenu"));
    }

    #[test]
    fn test_teardown_removes_local_actors_only() {
        let local = Uuid::new_v4();
        let remote = Uuid::new_v4();
        let mut world = World::new(local);
        let coordinator = SpawnCoordinator::new(local);
        let config = Arc::new(ActorConfig::default());

        let mine = world.insert(Actor::new(
            Uuid::new_v4(),
            Some(local),
            ActorKind::Participant,
            Vec3::ZERO,
            0.0,
            config.clone(),
        ));
        world.insert(Actor::new(
            Uuid::new_v4(),
            Some(remote),
            ActorKind::Participant,
            Vec3::ZERO,
            0.0,
            config,
        ));
        coordinator.register_spawned(mine, "test", &mut world);

        let removed = teardown_local(&mut world, &coordinator);
        assert_eq!(removed.as_slice(), &[mine]);
        assert_eq!(world.len(), 1);
        assert!(coordinator.held().is_none());
    }
}
