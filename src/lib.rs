//! Frame Mirror - frame-synchronized game-state mirror
//!
//! Mirrors a live game simulation for script callbacks:
//! - an entity snapshot refreshed once per frame at a fixed stage
//! - ray, bullet and smoke traces against that snapshot
//! - grenade trajectory prediction across future ticks
//! - the frame-stage scheduler that ties them together

pub mod config;
pub mod entity;
pub mod grenade;
pub mod host;
pub mod scheduler;
pub mod trace;
pub mod util;
pub mod world;

pub use config::Config;
pub use entity::{EntityHandle, EntityIndex, SnapshotStore};
pub use grenade::{GrenadePredictor, PredictedGrenade};
pub use host::{HostSimulation, SceneHost};
pub use scheduler::{FrameScheduler, FrameStage, ScriptContext};
pub use trace::TraceEngine;
