//! Party Actor Core
//!
//! Player-actor lifecycle for a small multiplayer party game: at most one
//! controllable actor per participant, spawned only in permitted levels,
//! simulated by its owner and replicated to everyone else.
//!
//! # Features
//!
//! - `double_jump` - Allow a second, weaker jump while airborne (enabled by default)
//! - `metrics_http` - Serve Prometheus/JSON metrics from the host binary (enabled by default)

pub mod actor;
pub mod config;
pub mod hooks;
pub mod metrics;
pub mod movement;
pub mod net;
pub mod session;
pub mod spawn;
pub mod util;
