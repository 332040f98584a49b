//! Fixed hitbox slots and the default standing layout

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::world::Capsule;

pub const HITBOX_COUNT: usize = 17;

/// Eye height above the feet of a standing player
pub const EYE_HEIGHT: f32 = 64.0;

/// Hitbox slots in declaration order, head first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum HitboxIndex {
    Head = 0,
    Neck,
    Pelvis,
    Body,
    Thorax,
    Chest,
    UpperChest,
    RightThigh,
    LeftThigh,
    RightCalf,
    LeftCalf,
    RightFoot,
    LeftFoot,
    RightHand,
    LeftHand,
    RightUpperArm,
    LeftUpperArm,
}

impl HitboxIndex {
    pub const ALL: [HitboxIndex; HITBOX_COUNT] = [
        HitboxIndex::Head,
        HitboxIndex::Neck,
        HitboxIndex::Pelvis,
        HitboxIndex::Body,
        HitboxIndex::Thorax,
        HitboxIndex::Chest,
        HitboxIndex::UpperChest,
        HitboxIndex::RightThigh,
        HitboxIndex::LeftThigh,
        HitboxIndex::RightCalf,
        HitboxIndex::LeftCalf,
        HitboxIndex::RightFoot,
        HitboxIndex::LeftFoot,
        HitboxIndex::RightHand,
        HitboxIndex::LeftHand,
        HitboxIndex::RightUpperArm,
        HitboxIndex::LeftUpperArm,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Damage multiplier applied to bullets striking this slot
    pub fn damage_multiplier(self) -> f32 {
        match self {
            HitboxIndex::Head => 4.0,
            HitboxIndex::Pelvis | HitboxIndex::Body => 1.25,
            HitboxIndex::RightThigh
            | HitboxIndex::LeftThigh
            | HitboxIndex::RightCalf
            | HitboxIndex::LeftCalf
            | HitboxIndex::RightFoot
            | HitboxIndex::LeftFoot => 0.75,
            _ => 1.0,
        }
    }
}

/// (bottom offset, top offset, radius) relative to the feet, per slot
const STANDING_LAYOUT: [([f32; 3], [f32; 3], f32); HITBOX_COUNT] = [
    ([0.0, 0.0, 62.0], [0.0, 0.0, 67.0], 4.2),
    ([0.0, 0.0, 57.0], [0.0, 0.0, 60.0], 3.5),
    ([0.0, 0.0, 36.0], [0.0, 0.0, 40.0], 6.0),
    ([0.0, 0.0, 40.0], [0.0, 0.0, 44.0], 6.0),
    ([0.0, 0.0, 44.0], [0.0, 0.0, 48.0], 6.2),
    ([0.0, 0.0, 48.0], [0.0, 0.0, 52.0], 6.5),
    ([0.0, 0.0, 52.0], [0.0, 0.0, 56.0], 6.0),
    ([0.0, -4.0, 36.0], [0.0, -4.0, 20.0], 4.5),
    ([0.0, 4.0, 36.0], [0.0, 4.0, 20.0], 4.5),
    ([0.0, -4.0, 20.0], [0.0, -4.0, 5.0], 3.5),
    ([0.0, 4.0, 20.0], [0.0, 4.0, 5.0], 3.5),
    ([0.0, -4.0, 3.0], [4.0, -4.0, 2.0], 2.5),
    ([0.0, 4.0, 3.0], [4.0, 4.0, 2.0], 2.5),
    ([12.0, -10.0, 40.0], [14.0, -10.0, 40.0], 2.5),
    ([12.0, 10.0, 40.0], [14.0, 10.0, 40.0], 2.5),
    ([0.0, -9.0, 55.0], [0.0, -10.0, 44.0], 3.0),
    ([0.0, 9.0, 55.0], [0.0, 10.0, 44.0], 3.0),
];

/// Hit volumes of a player standing with feet at `origin`, facing +x
pub fn standing_hitboxes(origin: Vec3) -> [Capsule; HITBOX_COUNT] {
    STANDING_LAYOUT.map(|(bottom, top, radius)| {
        Capsule::new(origin + Vec3::from(bottom), origin + Vec3::from(top), radius)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_head_first_and_bounded() {
        assert_eq!(HitboxIndex::from_index(0), Some(HitboxIndex::Head));
        assert_eq!(HitboxIndex::from_index(16), Some(HitboxIndex::LeftUpperArm));
        assert_eq!(HitboxIndex::from_index(17), None);
    }

    #[test]
    fn head_sits_near_eye_height() {
        let head = standing_hitboxes(Vec3::ZERO)[HitboxIndex::Head as usize];
        assert!((head.center().z - EYE_HEIGHT).abs() < 3.0);
    }
}
