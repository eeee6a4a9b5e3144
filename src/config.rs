use std::collections::BTreeSet;

use crate::util::vec3::Vec3;

/// Per-actor tuning, handed to an actor when it is created and never mutated afterwards
#[derive(Debug, Clone, PartialEq)]
pub struct ActorConfig {
    /// Horizontal speed at full intent (units/s)
    pub move_speed: f32,
    /// Vertical velocity set by a first jump (units/s)
    pub jump_power: f32,
    /// Allow exactly one extra mid-air jump
    pub double_jump_enabled: bool,
    /// Power of the mid-air jump relative to the first, in (0, 1]
    pub second_jump_multiplier: f32,
    /// Seconds after leaving the ground during which a jump still counts as grounded
    pub coyote_window: f32,
    /// Minimum seconds between accepted jumps
    pub jump_cooldown: f32,
    /// How far below the footprint a ground probe reaches
    pub ground_probe_distance: f32,
    /// Distance beyond which an observed actor is snapped instead of blended
    pub max_position_error: f32,
    /// Exponential blend rate toward replicated targets (1/s)
    pub smoothing_rate: f32,
    /// Vertical acceleration while airborne (negative is down)
    pub gravity: f32,
    /// Radius of the ring of ground probes around the actor center
    pub footprint_radius: f32,
    /// Falling below this height relocates the actor to safety
    pub respawn_floor_y: f32,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            move_speed: 6.0,
            jump_power: 8.0,
            double_jump_enabled: true,
            second_jump_multiplier: 0.8,
            coyote_window: 0.15,
            jump_cooldown: 0.1,
            ground_probe_distance: 0.15,
            max_position_error: 3.0,
            smoothing_rate: 12.0,
            gravity: -20.0,
            footprint_radius: 0.4,
            respawn_floor_y: -20.0,
        }
    }
}

impl ActorConfig {
    /// Number of jumps allowed between two grounded states
    pub fn max_jumps(&self) -> u8 {
        if self.double_jump_enabled && cfg!(feature = "double_jump") {
            2
        } else {
            1
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.second_jump_multiplier > 0.0 && self.second_jump_multiplier <= 1.0) {
            return Err(ConfigError::Invalid(
                "second_jump_multiplier must be in (0, 1]",
            ));
        }
        if self.ground_probe_distance <= 0.0 {
            return Err(ConfigError::Invalid("ground_probe_distance must be > 0"));
        }
        if self.max_position_error <= 0.0 {
            return Err(ConfigError::Invalid("max_position_error must be > 0"));
        }
        if self.smoothing_rate <= 0.0 {
            return Err(ConfigError::Invalid("smoothing_rate must be > 0"));
        }
        if self.coyote_window < 0.0 || self.jump_cooldown < 0.0 {
            return Err(ConfigError::Invalid(
                "coyote_window and jump_cooldown cannot be negative",
            ));
        }
        Ok(())
    }
}

/// Session-wide configuration for the actor lifecycle core
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Level identifiers in which participants get an actor
    pub permitted_levels: BTreeSet<String>,
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Ticks to wait after entering a permitted level before requesting a spawn
    pub settle_delay_ticks: u64,
    /// Ticks between duplicate reconciler sweeps
    pub reconcile_interval_ticks: u64,
    /// Automatic retries after a failed instantiate before giving up
    pub max_spawn_retries: u32,
    /// Base retry delay, doubled per attempt
    pub retry_backoff_ticks: u64,
    /// Upper bound on the retry delay
    pub retry_backoff_cap_ticks: u64,
    /// Random extra ticks added to each retry delay
    pub retry_jitter_ticks: u64,
    /// Ticks between outbound replication snapshots
    pub snapshot_interval_ticks: u64,
    /// Spawn positions, indexed by participant join order
    pub spawn_points: Vec<Vec3>,
    /// Tuning handed to every actor created by this session
    pub actor: ActorConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            permitted_levels: ["Arena", "Forest", "Rooftops"]
                .into_iter()
                .map(String::from)
                .collect(),
            tick_rate: 50,
            settle_delay_ticks: 25,
            reconcile_interval_ticks: 100,
            max_spawn_retries: 3,
            retry_backoff_ticks: 10,
            retry_backoff_cap_ticks: 200,
            retry_jitter_ticks: 0,
            snapshot_interval_ticks: 3,
            spawn_points: vec![
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::new(4.0, 1.0, 0.0),
                Vec3::new(-4.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 4.0),
                Vec3::new(0.0, 1.0, -4.0),
                Vec3::new(4.0, 1.0, 4.0),
                Vec3::new(-4.0, 1.0, -4.0),
                Vec3::new(4.0, 1.0, -4.0),
            ],
            actor: ActorConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Fixed simulation step in seconds
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    /// Convert milliseconds to whole ticks, rounding up
    pub fn ms_to_ticks(&self, ms: u64) -> u64 {
        ms.saturating_mul(u64::from(self.tick_rate)).div_ceil(1000)
    }

    /// Spawn position for a participant by join order
    pub fn spawn_point(&self, participant_index: usize) -> Vec3 {
        if self.spawn_points.is_empty() {
            return Vec3::ZERO;
        }
        self.spawn_points[participant_index % self.spawn_points.len()]
    }

    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(levels) = std::env::var("PERMITTED_LEVELS") {
            let parsed: BTreeSet<String> = levels
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if parsed.is_empty() {
                tracing::warn!("PERMITTED_LEVELS is empty, no level will spawn actors");
            }
            config.permitted_levels = parsed;
        }

        if let Some(ms) = parse_env::<u64>("SETTLE_DELAY_MS") {
            config.settle_delay_ticks = config.ms_to_ticks(ms);
        }

        if let Some(ms) = parse_env::<u64>("RECONCILE_INTERVAL_MS") {
            if ms > 0 {
                config.reconcile_interval_ticks = config.ms_to_ticks(ms).max(1);
            } else {
                tracing::warn!("RECONCILE_INTERVAL_MS must be > 0, using default");
            }
        }

        if let Some(retries) = parse_env::<u32>("MAX_SPAWN_RETRIES") {
            if retries <= 20 {
                config.max_spawn_retries = retries;
            } else {
                tracing::warn!("MAX_SPAWN_RETRIES must be 0-20, using default");
            }
        }

        if let Some(hz) = parse_env::<u32>("SNAPSHOT_RATE_HZ") {
            if hz > 0 && hz <= config.tick_rate {
                config.snapshot_interval_ticks = (config.tick_rate / hz) as u64;
            } else {
                tracing::warn!(
                    "SNAPSHOT_RATE_HZ must be 1-{}, using default",
                    config.tick_rate
                );
            }
        }

        if let Some(enabled) = parse_env::<bool>("DOUBLE_JUMP") {
            config.actor.double_jump_enabled = enabled;
        }

        if let Some(speed) = parse_env::<f32>("MOVE_SPEED") {
            if speed > 0.0 {
                config.actor.move_speed = speed;
            } else {
                tracing::warn!("MOVE_SPEED must be > 0, using default");
            }
        }

        if let Some(power) = parse_env::<f32>("JUMP_POWER") {
            if power > 0.0 {
                config.actor.jump_power = power;
            } else {
                tracing::warn!("JUMP_POWER must be > 0, using default");
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be at least 1"));
        }
        if self.reconcile_interval_ticks == 0 {
            return Err(ConfigError::Invalid(
                "reconcile_interval_ticks must be at least 1",
            ));
        }
        if self.snapshot_interval_ticks == 0 {
            return Err(ConfigError::Invalid(
                "snapshot_interval_ticks must be at least 1",
            ));
        }
        if self.spawn_points.is_empty() {
            return Err(ConfigError::Invalid("at least one spawn point is required"));
        }
        self.actor.validate()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
