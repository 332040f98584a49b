// Shared scene builders for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use glam::Vec3;

use frame_mirror::entity::{EntityClass, EntityIndex, EntityRecord, Team};
use frame_mirror::grenade::{GrenadePredictor, PredictorSettings};
use frame_mirror::host::{HostSimulation, MemoryStore, SceneHost};
use frame_mirror::scheduler::FrameScheduler;
use frame_mirror::trace::weapons::weapon_class;
use frame_mirror::trace::{StaticWeaponTable, TraceEngine, DEFAULT_SMOKE_OPAQUE_DEPTH};
use frame_mirror::world::{Aabb, Solid, WorldGeometry};
use frame_mirror::SnapshotStore;

// Every component of the mirror wired over one in-memory host.
pub struct Mirror {
    pub convars: Arc<MemoryStore>,
    pub host: Arc<SceneHost>,
    pub store: Arc<SnapshotStore>,
    pub trace: Arc<TraceEngine>,
    pub predictor: Arc<GrenadePredictor>,
    pub scheduler: Arc<FrameScheduler>,
}

impl Mirror {
    pub fn new(world: WorldGeometry) -> Self {
        Self::with_settings(world, PredictorSettings::default())
    }

    pub fn with_settings(world: WorldGeometry, settings: PredictorSettings) -> Self {
        let convars = Arc::new(MemoryStore::with_defaults());
        let host = Arc::new(SceneHost::new(world, 64).with_convars(convars.clone()));
        let store = Arc::new(SnapshotStore::new(host.clone()));
        let trace = Arc::new(TraceEngine::new(
            store.clone(),
            host.world(),
            Arc::new(StaticWeaponTable::default()),
            DEFAULT_SMOKE_OPAQUE_DEPTH,
        ));
        let predictor = Arc::new(GrenadePredictor::new(
            store.clone(),
            trace.clone(),
            convars.clone(),
            settings,
        ));
        let scheduler = Arc::new(FrameScheduler::new(
            host.clone(),
            store.clone(),
            trace.clone(),
            predictor.clone(),
        ));
        Self {
            convars,
            host,
            store,
            trace,
            predictor,
            scheduler,
        }
    }

    // Capture the host into a new snapshot generation.
    pub fn refresh(&self) -> u64 {
        self.store.refresh(self.host.capture())
    }

    // One simulation tick: host step, snapshot refresh, predictor pump.
    pub fn tick(&self) {
        self.host.advance_tick();
        self.refresh();
        self.predictor.run();
    }

    pub fn player(&self, name: &str, team: Team, origin: Vec3) -> EntityIndex {
        self.host.spawn(EntityRecord::player(EntityIndex(0), name, team, origin))
    }

    // Player holding an AK-47.
    pub fn armed_player(&self, name: &str, team: Team, origin: Vec3) -> EntityIndex {
        let weapon = self.host.spawn(EntityRecord::new(
            EntityIndex(0),
            EntityClass::new(weapon_class::AK47, "CAK47"),
            origin,
        ));
        let index = self.player(name, team, origin);
        self.host.update(index, |record| {
            record.weapon = Some(weapon);
            record.weapons = vec![weapon];
        });
        index
    }
}

// Floor at z = 0.
pub fn floor() -> WorldGeometry {
    WorldGeometry::new(vec![Solid::floor(0.0)])
}

// Thick wall whose near face is the plane x = `x`.
pub fn wall_at_x(x: f32) -> Solid {
    Solid::wall(Aabb::new(
        Vec3::new(x, -200.0, -200.0),
        Vec3::new(x + 20.0, 200.0, 200.0),
    ))
}
