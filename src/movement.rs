//! Owner-side movement: input to motion, ground contact, jumps and fall recovery
//!
//! Runs only for the locally-owned actor. Observers never call into this
//! module; they receive the results through replication.

use crate::actor::state::Actor;
use crate::util::vec3::Vec3;

/// Probes start slightly above the feet so a resting actor still hits the floor
const PROBE_LIFT: f32 = 0.05;

/// Horizontal speed below which the actor counts as standing still
const MOVING_THRESHOLD: f32 = 0.1;

/// A downward probe contact
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeHit {
    pub point: Vec3,
    pub distance: f32,
    /// Surface is tagged as walkable ground
    pub ground: bool,
}

/// Ground-surface query provided by the scene
pub trait GroundProbe {
    fn probe(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<ProbeHit>;
}

/// Infinite horizontal ground plane
#[derive(Debug, Clone, Copy)]
pub struct FlatGround {
    pub height: f32,
}

impl GroundProbe for FlatGround {
    fn probe(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<ProbeHit> {
        if direction.y >= 0.0 || origin.y < self.height {
            return None;
        }
        let distance = (origin.y - self.height) / -direction.y;
        (distance <= max_distance).then(|| ProbeHit {
            point: Vec3::new(origin.x, self.height, origin.z),
            distance,
            ground: true,
        })
    }
}

/// Per-tick input for the owned actor
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MoveInput {
    /// Strafe axis, -1 to 1
    pub axis_x: f32,
    /// Forward axis, -1 to 1
    pub axis_z: f32,
    /// Jump button went down this tick
    pub jump_pressed: bool,
}

impl MoveInput {
    pub fn new(axis_x: f32, axis_z: f32, jump_pressed: bool) -> Self {
        Self {
            axis_x,
            axis_z,
            jump_pressed,
        }
    }

    /// Intent as a horizontal vector, clamped to unit length
    fn intent(&self) -> Vec3 {
        let v = Vec3::new(self.axis_x, 0.0, self.axis_z);
        if v.length_sq() > 1.0 {
            v.normalize()
        } else {
            v
        }
    }
}

/// Why a jump request changed nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpRejection {
    /// Inside the cooldown after the previous jump
    Cooldown,
    /// No jumps left until the actor lands
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JumpOutcome {
    Accepted {
        /// Jumps used since last grounded, including this one
        jump_count: u8,
        /// Vertical velocity applied
        power: f32,
        /// Granted through the coyote window rather than from the ground
        coyote: bool,
    },
    Rejected(JumpRejection),
}

impl JumpOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, JumpOutcome::Accepted { .. })
    }
}

/// What happened during one movement step
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepReport {
    pub jump: Option<JumpOutcome>,
    /// Entered the grounded state this tick
    pub landed: bool,
    /// Fell below the floor and was relocated
    pub respawned: bool,
}

/// Sample the footprint: center plus four points on the footprint ring
pub fn detect_ground(actor: &Actor, probe: &dyn GroundProbe) -> Option<ProbeHit> {
    let r = actor.config.footprint_radius;
    let offsets = [
        Vec3::ZERO,
        Vec3::new(r, 0.0, 0.0),
        Vec3::new(-r, 0.0, 0.0),
        Vec3::new(0.0, 0.0, r),
        Vec3::new(0.0, 0.0, -r),
    ];
    let reach = actor.config.ground_probe_distance + PROBE_LIFT;

    offsets
        .iter()
        .filter_map(|offset| {
            let origin = actor.position + *offset + Vec3::UP * PROBE_LIFT;
            probe.probe(origin, Vec3::DOWN, reach)
        })
        .filter(|hit| hit.ground)
        .min_by(|a, b| a.distance.total_cmp(&b.distance))
}

/// Attempt a jump at simulation time `now`
///
/// Rejections leave the actor untouched.
pub fn try_jump(actor: &mut Actor, now: f64) -> JumpOutcome {
    let config = actor.config.clone();

    if let Some(last) = actor.last_jump_time {
        if now - last < f64::from(config.jump_cooldown) {
            return JumpOutcome::Rejected(JumpRejection::Cooldown);
        }
    }

    let within_coyote = !actor.grounded
        && actor.jump_count == 0
        && actor
            .last_ground_time
            .is_some_and(|t| now - t <= f64::from(config.coyote_window));

    let (jump_count, multiplier) = if actor.grounded || within_coyote {
        (1, 1.0)
    } else {
        // Walking off a ledge without jumping spends the ground jump
        let used = actor.jump_count.max(1);
        if used >= config.max_jumps() {
            return JumpOutcome::Rejected(JumpRejection::Exhausted);
        }
        (used + 1, config.second_jump_multiplier)
    };

    let power = config.jump_power * multiplier;
    actor.velocity.y = 0.0;
    actor.velocity.y += power;
    actor.jump_count = jump_count;
    actor.last_jump_time = Some(now);
    actor.grounded = false;
    actor.anim.jumping = true;
    actor.anim.grounded = false;

    JumpOutcome::Accepted {
        jump_count,
        power,
        coyote: within_coyote,
    }
}

/// Relocate to the last grounded position, or `fallback` if the actor never stood anywhere
pub fn respawn(actor: &mut Actor, fallback: Vec3) {
    let target = actor.last_grounded_position.unwrap_or(fallback);
    actor.place(target);
    actor.grounded = false;
    actor.jump_count = 0;
}

/// Advance the owned actor by one fixed step
pub fn step(
    actor: &mut Actor,
    input: &MoveInput,
    probe: &dyn GroundProbe,
    fallback: Vec3,
    now: f64,
    dt: f32,
) -> StepReport {
    let mut report = StepReport::default();
    let config = actor.config.clone();

    // Rising actors never count as grounded, so a fresh jump is not cancelled by its own floor
    match detect_ground(actor, probe) {
        Some(hit) if actor.velocity.y <= 0.0 => {
            if !actor.grounded {
                report.landed = true;
            }
            actor.grounded = true;
            actor.jump_count = 0;
            actor.last_ground_time = Some(now);
            actor.position.y = hit.point.y;
            actor.velocity.y = 0.0;
            actor.last_grounded_position = Some(actor.position);
            actor.anim.jumping = false;
        }
        _ => actor.grounded = false,
    }

    if input.jump_pressed {
        report.jump = Some(try_jump(actor, now));
    }

    let intent = input.intent();
    actor.velocity.x = intent.x * config.move_speed;
    actor.velocity.z = intent.z * config.move_speed;
    if intent.length_sq() > 0.0 {
        actor.yaw = intent.x.atan2(intent.z);
    }

    if !actor.grounded {
        actor.velocity.y += config.gravity * dt;
    }
    actor.position += actor.velocity * dt;

    if actor.position.y < config.respawn_floor_y {
        respawn(actor, fallback);
        report.respawned = true;
    }

    actor.anim_speed = actor.velocity.horizontal_length();
    actor.anim.moving = actor.anim_speed > MOVING_THRESHOLD;
    actor.anim.grounded = actor.grounded;
    if !report.jump.is_some_and(|j| j.is_accepted()) && actor.velocity.y <= 0.0 {
        actor.anim.jumping = false;
    }

    report
}
