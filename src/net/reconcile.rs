//! Remote reconciliation: drive observed replicas toward their latest snapshot
//!
//! A replica further than `max_position_error` from its target is a position
//! fault and is snapped. Anything closer is blended exponentially at
//! `smoothing_rate`. Animation flags are copied, never smoothed.

use rayon::prelude::*;

use crate::actor::authority::Authority;
use crate::actor::state::Actor;
use crate::actor::world::World;
use crate::net::protocol::ReplicationSnapshot;
use crate::net::replication::SnapshotTargets;
use crate::util::vec3::lerp_angle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    Snapped,
    Blended,
}

/// Per-tick blend factor for an exponential approach at `rate` per second
#[inline]
pub fn blend_factor(rate: f32, dt: f32) -> f32 {
    1.0 - (-rate * dt).exp()
}

/// Move one replica toward its target
pub fn reconcile(actor: &mut Actor, target: &ReplicationSnapshot, dt: f32) -> Correction {
    let error = actor.position.distance_to(target.position);

    let correction = if error > actor.config.max_position_error || !actor.position.is_finite() {
        actor.position = target.position;
        actor.yaw = target.yaw;
        actor.velocity = target.velocity;
        Correction::Snapped
    } else {
        let t = blend_factor(actor.config.smoothing_rate, dt);
        actor.position = actor.position.lerp(target.position, t);
        actor.yaw = lerp_angle(actor.yaw, target.yaw, t);
        actor.velocity = actor.velocity.lerp(target.velocity, t);
        Correction::Blended
    };

    actor.grounded = target.grounded;
    actor.anim_speed = target.anim_speed;
    actor.anim = target.anim;

    correction
}

/// Counts from one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub blended: u64,
    pub snapped: u64,
}

/// Reconcile every observed actor that has a target, in parallel
pub fn reconcile_all(world: &mut World, targets: &SnapshotTargets, dt: f32) -> ReconcileStats {
    world
        .actors_mut()
        .par_values_mut()
        .filter(|actor| actor.authority == Authority::Observed)
        .filter_map(|actor| {
            let target = targets.target(actor.id)?;
            Some(reconcile(actor, target, dt))
        })
        .map(|correction| match correction {
            Correction::Snapped => ReconcileStats {
                blended: 0,
                snapped: 1,
            },
            Correction::Blended => ReconcileStats {
                blended: 1,
                snapped: 0,
            },
        })
        .reduce(ReconcileStats::default, |a, b| ReconcileStats {
            blended: a.blended + b.blended,
            snapped: a.snapped + b.snapped,
        })
}
