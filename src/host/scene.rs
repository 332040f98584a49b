//! In-memory host simulation backed by a scene description

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use glam::Vec3;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::entity::{class_ids, EntityClass, EntityIndex, EntityRecord, Team, GAME_RULES_PROXY_CLASS};
use crate::grenade::physics::{self, GrenadeBody, StepEnv, DEFAULT_GRAVITY};
use crate::grenade::GrenadeKind;
use crate::trace::weapons::{weapon_class, StaticWeaponTable};
use crate::util::time::{seconds_to_ticks, TickClock, DEFAULT_TICKRATE};
use crate::world::{Aabb, Solid, SmokeVolume, WorldGeometry};

use super::external::{KeyValueStore, MemoryStore, SV_GRAVITY};
use super::{HostFrame, HostSimulation, PropValue};

/// Radius of the cloud a smoke grenade leaves behind
pub const SMOKE_CLOUD_RADIUS: f32 = 144.0;
/// How long a smoke cloud lasts (seconds)
pub const SMOKE_CLOUD_SECONDS: f32 = 18.0;

/// Built-in properties derived from the entity record when never written
pub const PROP_ORIGIN: &str = "m_vecOrigin";
pub const PROP_TEAM: &str = "m_iTeamNum";
pub const PROP_HEALTH: &str = "m_iHealth";

/// Scene loading errors
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("Failed to read scene file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse scene file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// JSON scene description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneFile {
    #[serde(default = "default_tickrate")]
    pub tickrate: u32,
    #[serde(default)]
    pub world: Vec<Solid>,
    #[serde(default)]
    pub smokes: Vec<SmokeVolume>,
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
    #[serde(default)]
    pub local_player: Option<EntityIndex>,
    #[serde(default)]
    pub weapons: Option<StaticWeaponTable>,
}

fn default_tickrate() -> u32 {
    DEFAULT_TICKRATE
}

#[derive(Debug, Clone, Copy)]
struct SmokeCloud {
    volume: SmokeVolume,
    /// Tick after which the cloud is gone; `None` for permanent scene smokes
    expires: Option<u64>,
}

#[derive(Debug)]
struct SceneState {
    clock: TickClock,
    entities: BTreeMap<EntityIndex, EntityRecord>,
    projectiles: HashMap<EntityIndex, GrenadeBody>,
    smokes: Vec<SmokeCloud>,
    local_player: Option<EntityIndex>,
    next_serial: u32,
}

impl SceneState {
    fn lowest_free_index(&self) -> EntityIndex {
        let mut candidate = 1;
        for index in self.entities.keys() {
            if index.0 > candidate {
                break;
            }
            if index.0 == candidate {
                candidate += 1;
            }
        }
        EntityIndex(candidate)
    }

    fn insert(&mut self, mut record: EntityRecord) -> EntityIndex {
        self.next_serial = self.next_serial.wrapping_add(1);
        record.serial = self.next_serial;
        let index = record.index;
        self.entities.insert(index, record);
        index
    }
}

/// Host simulation that lives entirely in memory.
///
/// Used by the demo binary and by tests; a real integration would implement
/// `HostSimulation` over the game client instead.
pub struct SceneHost {
    world: Arc<WorldGeometry>,
    weapons: Option<StaticWeaponTable>,
    state: Mutex<SceneState>,
    props: DashMap<(EntityIndex, String), PropValue>,
    convars: Arc<dyn KeyValueStore>,
}

impl SceneHost {
    pub fn new(world: WorldGeometry, tickrate: u32) -> Self {
        Self {
            world: Arc::new(world),
            weapons: None,
            state: Mutex::new(SceneState {
                clock: TickClock::new(tickrate),
                entities: BTreeMap::new(),
                projectiles: HashMap::new(),
                smokes: Vec::new(),
                local_player: None,
                next_serial: 0,
            }),
            props: DashMap::new(),
            convars: Arc::new(MemoryStore::with_defaults()),
        }
    }

    /// Read `sv_gravity` from a store shared with the predictor
    pub fn with_convars(mut self, convars: Arc<dyn KeyValueStore>) -> Self {
        self.convars = convars;
        self
    }

    /// Load a JSON scene file
    pub fn from_scene_file(path: impl AsRef<Path>) -> Result<Self, SceneError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let scene: SceneFile = serde_json::from_str(&raw)?;
        info!(
            path = %path.as_ref().display(),
            solids = scene.world.len(),
            entities = scene.entities.len(),
            "Loaded scene file"
        );
        Ok(Self::from_scene(scene))
    }

    pub fn from_scene(scene: SceneFile) -> Self {
        let mut host = Self::new(WorldGeometry::new(scene.world), scene.tickrate);
        host.weapons = scene.weapons;
        {
            let mut state = host.state.lock();
            let tick = state.clock.globals().tickcount;
            for record in scene.entities {
                if let Some(projectile) = record.grenade {
                    let body = GrenadeBody::from_projectile(record.origin, &projectile, tick);
                    state.projectiles.insert(record.index, body);
                }
                state.insert(record);
            }
            state.smokes = scene
                .smokes
                .into_iter()
                .map(|volume| SmokeCloud { volume, expires: None })
                .collect();
            state.local_player = scene.local_player;
        }
        host
    }

    /// Randomized arena: a floor, a few cover walls, a local player and
    /// two teams around it. Same seed, same scene.
    pub fn from_seed(seed: u64, tickrate: u32) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let mut solids = vec![Solid::floor(0.0)];
        for _ in 0..6 {
            let center = Vec3::new(rng.gen_range(-1200.0..1200.0), rng.gen_range(-1200.0..1200.0), 64.0);
            let half = Vec3::new(rng.gen_range(16.0..96.0), rng.gen_range(16.0..96.0), 64.0);
            solids.push(Solid::wall(Aabb::from_center(center, half)));
        }

        let host = Self::new(WorldGeometry::new(solids), tickrate);
        host.spawn(EntityRecord::new(
            EntityIndex(0),
            EntityClass::new(class_ids::GAME_RULES_PROXY, GAME_RULES_PROXY_CLASS),
            Vec3::ZERO,
        ));

        let local = host.spawn_armed_player("local", Team::CounterTerrorist, Vec3::ZERO);
        host.set_local_player(Some(local));

        for (i, team) in [Team::CounterTerrorist, Team::CounterTerrorist]
            .into_iter()
            .chain([Team::Terrorist; 4])
            .enumerate()
        {
            let angle = rng.gen_range(0.0..std::f32::consts::TAU);
            let distance = rng.gen_range(200.0..1500.0);
            let origin = Vec3::new(angle.cos() * distance, angle.sin() * distance, 0.0);
            let index = host.spawn_armed_player(&format!("bot{i}"), team, origin);
            host.update(index, |record| record.is_bot = true);
        }

        info!(seed, tickrate, "Generated demo scene");
        host
    }

    pub fn world(&self) -> Arc<WorldGeometry> {
        self.world.clone()
    }

    /// Weapon table shipped with the scene file, if any
    pub fn weapon_table(&self) -> Option<StaticWeaponTable> {
        self.weapons.clone()
    }

    pub fn tick(&self) -> u64 {
        self.state.lock().clock.globals().tickcount
    }

    /// Add an entity in the lowest free slot; returns the slot
    pub fn spawn(&self, mut record: EntityRecord) -> EntityIndex {
        let mut state = self.state.lock();
        record.index = state.lowest_free_index();
        let index = state.insert(record);
        debug!(index = %index, "Spawned entity");
        index
    }

    pub fn despawn(&self, index: EntityIndex) -> Option<EntityRecord> {
        let removed = {
            let mut state = self.state.lock();
            state.projectiles.remove(&index);
            if state.local_player == Some(index) {
                state.local_player = None;
            }
            state.entities.remove(&index)
        };
        self.props.retain(|(owner, _), _| *owner != index);
        if removed.is_some() {
            debug!(index = %index, "Despawned entity");
        }
        removed
    }

    /// Apply an in-place change to one entity. Returns false if it does not exist.
    pub fn update(&self, index: EntityIndex, f: impl FnOnce(&mut EntityRecord)) -> bool {
        let mut state = self.state.lock();
        match state.entities.get_mut(&index) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    pub fn move_entity(&self, index: EntityIndex, delta: Vec3) -> bool {
        self.update(index, |record| record.translate(delta))
    }

    pub fn set_local_player(&self, index: Option<EntityIndex>) {
        self.state.lock().local_player = index;
    }

    pub fn add_smoke(&self, volume: SmokeVolume) {
        self.state.lock().smokes.push(SmokeCloud { volume, expires: None });
    }

    /// Spawn a grenade projectile thrown on the current tick
    pub fn throw_grenade(
        &self,
        kind: GrenadeKind,
        owner: Option<EntityIndex>,
        origin: Vec3,
        velocity: Vec3,
    ) -> EntityIndex {
        let mut state = self.state.lock();
        let tick = state.clock.globals().tickcount;
        let mut record = EntityRecord::grenade(EntityIndex(0), kind, owner, origin, velocity, tick);
        record.index = state.lowest_free_index();
        let index = state.insert(record);
        state.projectiles.insert(index, GrenadeBody::new(origin, velocity, 0));
        debug!(index = %index, kind = kind.label(), tick, "Grenade thrown");
        index
    }

    /// Advance by one rendered frame; returns the ticks simulated
    pub fn advance_frame(&self, frametime: f32) -> u64 {
        let mut state = self.state.lock();
        let elapsed = state.clock.advance_frame(frametime);
        let end = state.clock.globals().tickcount;
        for tick in (end - elapsed + 1)..=end {
            self.simulate_tick(&mut state, tick);
        }
        elapsed
    }

    /// Advance exactly one tick
    pub fn advance_tick(&self) {
        let mut state = self.state.lock();
        state.clock.advance_tick();
        let tick = state.clock.globals().tickcount;
        self.simulate_tick(&mut state, tick);
    }

    fn simulate_tick(&self, state: &mut SceneState, tick: u64) {
        let globals = state.clock.globals();
        let tickrate = globals.tickrate();
        let env = StepEnv {
            tracer: self.world.as_ref(),
            gravity: self.convars.get_float(SV_GRAVITY).unwrap_or(DEFAULT_GRAVITY),
            dt: globals.tick_interval,
        };

        let mut detonated = Vec::new();
        for (index, body) in state.projectiles.iter_mut() {
            let Some(record) = state.entities.get_mut(index) else {
                continue;
            };
            let Some(projectile) = record.grenade.as_mut() else {
                continue;
            };
            let kind = projectile.kind;
            let stats = kind.stats();
            let event = physics::step(body, &stats, &env);
            body.write_back(projectile);
            let delta = body.position - record.origin;
            record.translate(delta);
            if physics::should_detonate(body, &stats, event, tickrate) {
                detonated.push((*index, kind, body.position));
            }
        }

        for (index, kind, position) in detonated {
            state.projectiles.remove(&index);
            state.entities.remove(&index);
            if kind == GrenadeKind::Smoke {
                state.smokes.push(SmokeCloud {
                    volume: SmokeVolume::new(position, SMOKE_CLOUD_RADIUS),
                    expires: Some(tick + seconds_to_ticks(SMOKE_CLOUD_SECONDS, tickrate)),
                });
            }
            debug!(index = %index, kind = kind.label(), tick, "Host grenade went off");
        }

        state.smokes.retain(|cloud| cloud.expires.map_or(true, |at| tick <= at));
    }

    fn spawn_armed_player(&self, name: &str, team: Team, origin: Vec3) -> EntityIndex {
        let class_id = if team == Team::Terrorist {
            weapon_class::AK47
        } else {
            weapon_class::USP
        };
        let weapon = self.spawn(EntityRecord::new(
            EntityIndex(0),
            EntityClass::new(class_id, "CWeaponCSBase"),
            origin,
        ));
        let mut player = EntityRecord::player(EntityIndex(0), name, team, origin);
        player.weapon = Some(weapon);
        player.weapons = vec![weapon];
        self.spawn(player)
    }
}

fn team_number(team: Team) -> i64 {
    match team {
        Team::Unassigned => 0,
        Team::Spectator => 1,
        Team::Terrorist => 2,
        Team::CounterTerrorist => 3,
    }
}

impl HostSimulation for SceneHost {
    fn capture(&self) -> HostFrame {
        let state = self.state.lock();
        HostFrame {
            globals: state.clock.globals(),
            local_player: state.local_player,
            entities: state.entities.values().cloned().collect(),
            smokes: state.smokes.iter().map(|cloud| cloud.volume).collect(),
        }
    }

    fn get_prop(&self, index: EntityIndex, table: &str, prop: &str) -> Option<PropValue> {
        if let Some(value) = self.props.get(&(index, format!("{table}.{prop}"))) {
            return Some(value.value().clone());
        }
        let state = self.state.lock();
        let record = state.entities.get(&index)?;
        match prop {
            PROP_ORIGIN => Some(PropValue::Vector(record.origin)),
            PROP_TEAM => Some(PropValue::Int(team_number(record.team))),
            PROP_HEALTH if record.is_player => Some(PropValue::Int(if record.alive { 100 } else { 0 })),
            _ => None,
        }
    }

    fn set_prop(&self, index: EntityIndex, table: &str, prop: &str, value: PropValue) -> bool {
        let mut state = self.state.lock();
        let Some(record) = state.entities.get_mut(&index) else {
            return false;
        };
        if let (PROP_ORIGIN, PropValue::Vector(origin)) = (prop, &value) {
            let delta = *origin - record.origin;
            record.translate(delta);
        }
        drop(state);
        self.props.insert((index, format!("{table}.{prop}")), value);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_reuses_lowest_free_slot_with_new_serial() {
        let host = SceneHost::new(WorldGeometry::empty(), 64);
        let a = host.spawn(EntityRecord::player(EntityIndex(0), "a", Team::Terrorist, Vec3::ZERO));
        let b = host.spawn(EntityRecord::player(EntityIndex(0), "b", Team::Terrorist, Vec3::ZERO));
        assert_eq!((a, b), (EntityIndex(1), EntityIndex(2)));

        let first_serial = host.capture().entities[0].serial;
        host.despawn(a);
        let c = host.spawn(EntityRecord::player(EntityIndex(0), "c", Team::Terrorist, Vec3::ZERO));
        assert_eq!(c, EntityIndex(1));
        assert_ne!(host.capture().entities[0].serial, first_serial);
    }

    #[test]
    fn props_fall_back_to_record_and_last_write_wins() {
        let host = SceneHost::new(WorldGeometry::empty(), 64);
        let a = host.spawn(EntityRecord::player(EntityIndex(0), "a", Team::Terrorist, Vec3::ZERO));
        assert_eq!(host.get_prop(a, "DT_BaseEntity", PROP_TEAM), Some(PropValue::Int(2)));

        assert!(host.set_prop(a, "DT_BasePlayer", PROP_HEALTH, PropValue::Int(40)));
        assert!(host.set_prop(a, "DT_BasePlayer", PROP_HEALTH, PropValue::Int(20)));
        assert_eq!(host.get_prop(a, "DT_BasePlayer", PROP_HEALTH), Some(PropValue::Int(20)));

        assert!(!host.set_prop(EntityIndex(99), "DT_BasePlayer", PROP_HEALTH, PropValue::Int(1)));
    }

    #[test]
    fn smoke_grenade_leaves_a_cloud() {
        let host = SceneHost::new(WorldGeometry::new(vec![Solid::floor(0.0)]), 64);
        host.throw_grenade(GrenadeKind::Smoke, None, Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO);
        for _ in 0..seconds_to_ticks(3.0, 64) {
            host.advance_tick();
        }
        let frame = host.capture();
        assert!(frame.entities.is_empty());
        assert_eq!(frame.smokes.len(), 1);
        assert!(frame.smokes[0].center.z < 10.0);
    }

    #[test]
    fn projectiles_fall_with_the_gravity_convar() {
        let convars = Arc::new(MemoryStore::with_defaults());
        let host = SceneHost::new(WorldGeometry::empty(), 64).with_convars(convars.clone());
        let index = host.throw_grenade(GrenadeKind::Frag, None, Vec3::new(0.0, 0.0, 500.0), Vec3::ZERO);

        convars.set(SV_GRAVITY, PropValue::Float(0.0));
        for _ in 0..10 {
            host.advance_tick();
        }
        let floating = host.capture().entities.into_iter().find(|r| r.index == index).unwrap();
        assert_eq!(floating.origin.z, 500.0);

        convars.set(SV_GRAVITY, PropValue::Float(800.0));
        host.advance_tick();
        let falling = host.capture().entities.into_iter().find(|r| r.index == index).unwrap();
        assert!(falling.origin.z < 500.0);
        assert!(falling.grenade.unwrap().velocity.z < 0.0);
    }

    #[test]
    fn same_seed_same_scene() {
        let a = SceneHost::from_seed(7, 64).capture();
        let b = SceneHost::from_seed(7, 64).capture();
        assert_eq!(a.entities, b.entities);
        assert!(a.local_player.is_some());
    }

    #[test]
    fn scene_file_parses() {
        let raw = r#"{
            "tickrate": 128,
            "world": [{ "shape": "plane", "normal": [0.0, 0.0, 1.0], "dist": 0.0 }],
            "smokes": [{ "center": [0.0, 0.0, 0.0], "radius": 100.0 }],
            "local_player": 1
        }"#;
        let scene: SceneFile = serde_json::from_str(raw).unwrap();
        let host = SceneHost::from_scene(scene);
        let frame = host.capture();
        assert_eq!(frame.globals.tickrate(), 128);
        assert_eq!(frame.smokes.len(), 1);
        assert_eq!(host.world().solids.len(), 1);
    }
}
