//! Duplicate reconciler
//!
//! Periodic safety net behind the coordinator. While the session is live it
//! scans for locally-owned participant actors and, if more than one exists,
//! keeps exactly one and destroys the rest. The scan, the destruction and the
//! coordinator update all happen inside the coordinator's held section.

use tracing::{debug, warn};

use crate::actor::state::ActorId;
use crate::actor::world::{ActorScan, World};
use crate::spawn::coordinator::SpawnCoordinator;

/// Result of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub keeper: Option<ActorId>,
    pub removed: ActorScan,
    /// The coordinator's held reference was repointed
    pub replaced: bool,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.removed.is_empty() && !self.replaced
    }
}

#[derive(Debug)]
pub struct DuplicateReconciler {
    interval_ticks: u64,
    last_run_tick: Option<u64>,
}

impl DuplicateReconciler {
    pub fn new(interval_ticks: u64) -> Self {
        Self {
            interval_ticks: interval_ticks.max(1),
            last_run_tick: None,
        }
    }

    pub fn is_due(&self, tick: u64) -> bool {
        match self.last_run_tick {
            None => true,
            Some(last) => tick >= last + self.interval_ticks,
        }
    }

    /// Sweep if the interval has elapsed and the session is live
    pub fn run_if_due(
        &mut self,
        tick: u64,
        active: bool,
        world: &mut World,
        coordinator: &SpawnCoordinator,
    ) -> Option<SweepReport> {
        if !active {
            self.last_run_tick = None;
            return None;
        }
        if !self.is_due(tick) {
            return None;
        }
        self.last_run_tick = Some(tick);
        Some(sweep(world, coordinator))
    }
}

/// Keep one locally-owned actor and destroy the others
///
/// The held actor wins if it is live, otherwise the oldest one found. Running
/// it again with nothing changed removes nothing.
pub fn sweep(world: &mut World, coordinator: &SpawnCoordinator) -> SweepReport {
    let mut section = coordinator.held_section();
    let found = world.locally_owned();

    let keeper = match section.held() {
        Some(held) if found.contains(&held) => Some(held),
        _ => found.first().copied(),
    };

    let removed: ActorScan = found
        .iter()
        .copied()
        .filter(|id| Some(*id) != keeper)
        .collect();
    for id in &removed {
        world.remove(*id);
    }

    let replaced = section.replace(keeper);

    if let Some(keeper) = keeper {
        if !removed.is_empty() {
            warn!(
                "Removed {} duplicate local actor(s), keeping {}",
                removed.len(),
                keeper
            );
            if !replaced {
                section.request_camera_follow(keeper);
            }
        }
    }
    debug!(
        "Duplicate sweep: {} found, keeper {:?}",
        found.len(),
        keeper
    );

    SweepReport {
        keeper,
        removed,
        replaced,
    }
}
