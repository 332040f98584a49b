//! Grenade trajectory prediction

pub mod kind;
pub mod physics;
pub mod predictor;

pub use kind::{GrenadeKind, GrenadeStats};
pub use predictor::GrenadePredictor;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::entity::EntityIndex;

/// Default cap on simultaneously tracked grenades
pub const DEFAULT_MAX_TRACKED: usize = 64;
/// Default distance from the local player beyond which grenades are dropped
pub const DEFAULT_TRACKING_RANGE: f32 = 4096.0;
/// Default ticks a detonated grenade stays readable before it is purged
pub const DEFAULT_LINGER_TICKS: u64 = 64;

/// Predictor errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PredictorError {
    #[error("Tracked grenade cap of {cap} reached with nothing evictable")]
    Overrun { cap: usize },
}

/// A player the blast reaches and how hard
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictedGrenadeHit {
    pub entity: EntityIndex,
    /// Damage, or blind strength for flashbangs
    pub damage: f32,
}

/// Prediction exposed to callbacks for one tracked grenade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedGrenade {
    pub is_live: bool,
    pub owner: Option<EntityIndex>,
    pub kind: GrenadeKind,
    /// Projectile entity, if the grenade was discovered in the snapshot
    pub entity: Option<EntityIndex>,
    /// Detonation (or resting) position
    pub position: Vec3,
    pub detonation_tick: u64,
    /// Forecast path from the current position to detonation
    pub path: Vec<Vec3>,
    /// Sorted by descending damage, ties by ascending entity index
    pub hits: Vec<PredictedGrenadeHit>,
}

/// Explicit request to start tracking a throw
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThrowRequest {
    pub kind: GrenadeKind,
    pub owner: Option<EntityIndex>,
    pub origin: Vec3,
    pub velocity: Vec3,
}

impl ThrowRequest {
    pub fn new(kind: GrenadeKind, owner: Option<EntityIndex>, origin: Vec3, velocity: Vec3) -> Self {
        Self {
            kind,
            owner,
            origin,
            velocity,
        }
    }
}

/// Predictor limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictorSettings {
    pub max_tracked: usize,
    pub tracking_range: f32,
    pub linger_ticks: u64,
}

impl Default for PredictorSettings {
    fn default() -> Self {
        Self {
            max_tracked: DEFAULT_MAX_TRACKED,
            tracking_range: DEFAULT_TRACKING_RANGE,
            linger_ticks: DEFAULT_LINGER_TICKS,
        }
    }
}
