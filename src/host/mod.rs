//! Host simulation interface and the bundled in-memory scene host

pub mod driver;
pub mod external;
pub mod scene;

pub use external::{KeyValueStore, MemoryStore};
pub use scene::{SceneError, SceneFile, SceneHost};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::entity::{EntityIndex, EntityRecord};
use crate::util::time::GlobalVars;
use crate::world::SmokeVolume;

/// Everything the host hands over when the snapshot is refreshed
#[derive(Debug, Clone, Default)]
pub struct HostFrame {
    pub globals: GlobalVars,
    pub local_player: Option<EntityIndex>,
    pub entities: Vec<EntityRecord>,
    pub smokes: Vec<SmokeVolume>,
}

/// Value of a networked property. The host decides the type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Vector(Vec3),
    String(String),
}

impl PropValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropValue::Int(v) => Some(*v),
            PropValue::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropValue::Float(v) => Some(*v),
            PropValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

/// The live game simulation this crate mirrors
pub trait HostSimulation: Send + Sync {
    /// Capture the fully applied network state of the current frame
    fn capture(&self) -> HostFrame;

    /// Read a networked property straight from the simulation
    fn get_prop(&self, index: EntityIndex, table: &str, prop: &str) -> Option<PropValue>;

    /// Write a networked property straight into the simulation.
    /// Last write wins; returns false when the host rejects the write.
    fn set_prop(&self, index: EntityIndex, table: &str, prop: &str, value: PropValue) -> bool;
}
