//! Entity identifiers, per-entity records and the snapshot store

pub mod hitbox;
pub mod store;

pub use hitbox::{standing_hitboxes, HitboxIndex, HITBOX_COUNT};
pub use store::{EntitySnapshot, SnapshotStore};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::grenade::GrenadeKind;
use crate::world::{Aabb, Capsule};

/// Raw host slot of an entity. Slots are recycled after an entity is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityIndex(pub u32);

impl std::fmt::Display for EntityIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User id as reported by game events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i32);

/// Entity reference valid for exactly one snapshot generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityHandle {
    index: EntityIndex,
    generation: u64,
}

impl EntityHandle {
    pub(crate) fn new(index: EntityIndex, generation: u64) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> EntityIndex {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Team membership
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    #[default]
    Unassigned,
    Spectator,
    Terrorist,
    CounterTerrorist,
}

impl Team {
    /// Whether the two teams fight each other
    pub fn is_opposing(self, other: Team) -> bool {
        matches!(
            (self, other),
            (Team::Terrorist, Team::CounterTerrorist) | (Team::CounterTerrorist, Team::Terrorist)
        )
    }
}

/// Network class of an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityClass {
    pub id: u32,
    pub name: String,
}

impl EntityClass {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Well-known class ids used by the bundled scene host
pub mod class_ids {
    pub const PLAYER: u32 = 40;
    pub const GAME_RULES_PROXY: u32 = 43;
    pub const WEAPON: u32 = 100;
    pub const GRENADE_PROJECTILE: u32 = 9;
}

/// Class name of the entity that carries game rules
pub const GAME_RULES_PROXY_CLASS: &str = "CCSGameRulesProxy";

/// Motion data of a thrown grenade still in flight
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrenadeProjectile {
    pub kind: GrenadeKind,
    pub owner: Option<EntityIndex>,
    pub velocity: Vec3,
    pub thrown_tick: u64,
    /// Release point of the throw
    #[serde(default)]
    pub thrown_from: Vec3,
    #[serde(default)]
    pub bounces: u32,
    #[serde(default)]
    pub landed: bool,
    #[serde(default)]
    pub resting: bool,
}

/// Everything the host reports about one entity at capture time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub index: EntityIndex,
    /// Host serial number, bumped every time the slot is reused
    #[serde(default)]
    pub serial: u32,
    pub class: EntityClass,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub team: Team,
    #[serde(default)]
    pub is_player: bool,
    #[serde(default = "default_true")]
    pub alive: bool,
    #[serde(default)]
    pub dormant: bool,
    #[serde(default)]
    pub is_bot: bool,
    pub origin: Vec3,
    #[serde(default)]
    pub eye_position: Vec3,
    /// World-space hit volumes, one per `HitboxIndex` slot (players only)
    #[serde(default)]
    pub hitboxes: Vec<Capsule>,
    #[serde(default)]
    pub weapon: Option<EntityIndex>,
    #[serde(default)]
    pub weapons: Vec<EntityIndex>,
    /// World-space collision box for non-player entities
    #[serde(default)]
    pub bounds: Option<Aabb>,
    #[serde(default)]
    pub grenade: Option<GrenadeProjectile>,
}

fn default_true() -> bool {
    true
}

impl EntityRecord {
    /// Bare entity of the given class at `origin`
    pub fn new(index: EntityIndex, class: EntityClass, origin: Vec3) -> Self {
        Self {
            index,
            serial: 0,
            class,
            name: String::new(),
            user_id: None,
            team: Team::Unassigned,
            is_player: false,
            alive: true,
            dormant: false,
            is_bot: false,
            origin,
            eye_position: origin,
            hitboxes: Vec::new(),
            weapon: None,
            weapons: Vec::new(),
            bounds: None,
            grenade: None,
        }
    }

    /// Standing player with the default hitbox layout
    pub fn player(index: EntityIndex, name: impl Into<String>, team: Team, origin: Vec3) -> Self {
        let mut record = Self::new(index, EntityClass::new(class_ids::PLAYER, "CCSPlayer"), origin);
        record.name = name.into();
        record.team = team;
        record.is_player = true;
        record.eye_position = origin + Vec3::new(0.0, 0.0, hitbox::EYE_HEIGHT);
        record.hitboxes = standing_hitboxes(origin).to_vec();
        record
    }

    /// Grenade projectile in flight
    pub fn grenade(
        index: EntityIndex,
        kind: GrenadeKind,
        owner: Option<EntityIndex>,
        origin: Vec3,
        velocity: Vec3,
        thrown_tick: u64,
    ) -> Self {
        let mut record = Self::new(
            index,
            EntityClass::new(class_ids::GRENADE_PROJECTILE, kind.class_name()),
            origin,
        );
        record.grenade = Some(GrenadeProjectile {
            kind,
            owner,
            velocity,
            thrown_tick,
            thrown_from: origin,
            bounces: 0,
            landed: false,
            resting: false,
        });
        record
    }

    pub fn with_serial(mut self, serial: u32) -> Self {
        self.serial = serial;
        self
    }

    pub fn with_user_id(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Move the entity, carrying eye position, hitboxes and bounds along
    pub fn translate(&mut self, delta: Vec3) {
        self.origin += delta;
        self.eye_position += delta;
        for capsule in &mut self.hitboxes {
            *capsule = capsule.translate(delta);
        }
        if let Some(bounds) = self.bounds.as_mut() {
            *bounds = bounds.translate(delta);
        }
    }

    /// Whether traces can strike this entity
    pub fn is_collidable(&self) -> bool {
        if self.dormant || !self.alive {
            return false;
        }
        if self.is_player {
            self.hitboxes.len() == HITBOX_COUNT
        } else {
            self.bounds.is_some()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposing_teams() {
        assert!(Team::Terrorist.is_opposing(Team::CounterTerrorist));
        assert!(!Team::Terrorist.is_opposing(Team::Terrorist));
        assert!(!Team::Spectator.is_opposing(Team::Terrorist));
    }

    #[test]
    fn translate_moves_hit_volumes() {
        let mut player = EntityRecord::player(EntityIndex(1), "a", Team::Terrorist, Vec3::ZERO);
        let head = player.hitboxes[HitboxIndex::Head as usize].center();
        player.translate(Vec3::new(10.0, 0.0, 0.0));
        let moved = player.hitboxes[HitboxIndex::Head as usize].center();
        assert_eq!(moved - head, Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(player.eye_position.x, 10.0);
    }

    #[test]
    fn dormant_players_are_not_collidable() {
        let mut player = EntityRecord::player(EntityIndex(1), "a", Team::Terrorist, Vec3::ZERO);
        assert!(player.is_collidable());
        player.dormant = true;
        assert!(!player.is_collidable());
    }
}
