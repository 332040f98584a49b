//! Tick-guarded grenade tracking, stepping and forecasting

use std::collections::HashSet;
use std::sync::Arc;

use glam::Vec3;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::entity::{EntityIndex, EntitySnapshot, GrenadeProjectile, HitboxIndex, SnapshotStore};
use crate::host::external::{KeyValueStore, SV_GRAVITY};
use crate::trace::{TraceEngine, VISIBLE_EPSILON};
use crate::util::time::seconds_to_ticks;
use crate::world::{contents, EPSILON};

use super::kind::{Exposure, GrenadeKind};
use super::physics::{self, GrenadeBody, StepEnv, DEFAULT_GRAVITY};
use super::{PredictedGrenade, PredictedGrenadeHit, PredictorError, PredictorSettings, ThrowRequest};

/// How far a host projectile's release point may sit from a tracked throw it claims
const CLAIM_DISTANCE: f32 = 16.0;
/// Ticks between a tracked throw and the host spawning its projectile
const CLAIM_TICKS: u64 = 2;

/// One grenade the predictor follows
#[derive(Debug, Clone)]
struct TrackedGrenade {
    /// Insertion order
    sequence: u64,
    /// Projectile slot and serial, once the host reports the grenade
    source: Option<(EntityIndex, u32)>,
    /// Release point and tick of an explicitly tracked throw
    request: Option<(Vec3, u64)>,
    kind: GrenadeKind,
    owner: Option<EntityIndex>,
    body: GrenadeBody,
    /// Tick the body state belongs to
    body_tick: u64,
    detonated_tick: Option<u64>,
    prediction: PredictedGrenade,
}

impl TrackedGrenade {
    fn new(
        sequence: u64,
        source: Option<(EntityIndex, u32)>,
        kind: GrenadeKind,
        owner: Option<EntityIndex>,
        body: GrenadeBody,
        tick: u64,
    ) -> Self {
        let prediction = PredictedGrenade {
            is_live: true,
            owner,
            kind,
            entity: source.map(|(index, _)| index),
            position: body.position,
            detonation_tick: tick,
            path: vec![body.position],
            hits: Vec::new(),
        };
        Self {
            sequence,
            source,
            request: None,
            kind,
            owner,
            body,
            body_tick: tick,
            detonated_tick: None,
            prediction,
        }
    }

    fn is_live(&self) -> bool {
        self.detonated_tick.is_none()
    }

    /// Replace the body with what the host reports for this tick
    fn reseed(&mut self, origin: Vec3, projectile: &GrenadeProjectile, tick: u64) {
        self.body = GrenadeBody::from_projectile(origin, projectile, tick);
        self.body_tick = tick;
    }

    /// Whether a new host projectile is the throw this entry was tracking
    fn claims(&self, projectile: &GrenadeProjectile) -> bool {
        let Some((origin, tick)) = self.request else {
            return false;
        };
        self.source.is_none()
            && self.is_live()
            && self.kind == projectile.kind
            && self.owner == projectile.owner
            && tick.abs_diff(projectile.thrown_tick) <= CLAIM_TICKS
            && origin.distance(projectile.thrown_from) <= CLAIM_DISTANCE
    }
}

#[derive(Debug, Default)]
struct PredictorState {
    last_run_tick: Option<u64>,
    next_sequence: u64,
    tracked: Vec<TrackedGrenade>,
}

/// Follows thrown grenades and predicts where and whom they hit
pub struct GrenadePredictor {
    store: Arc<SnapshotStore>,
    trace: Arc<TraceEngine>,
    convars: Arc<dyn KeyValueStore>,
    settings: PredictorSettings,
    state: Mutex<PredictorState>,
}

impl GrenadePredictor {
    pub fn new(
        store: Arc<SnapshotStore>,
        trace: Arc<TraceEngine>,
        convars: Arc<dyn KeyValueStore>,
        settings: PredictorSettings,
    ) -> Self {
        Self {
            store,
            trace,
            convars,
            settings,
            state: Mutex::new(PredictorState::default()),
        }
    }

    /// Advance predictions to the current snapshot tick.
    ///
    /// Only the first call per tick does any work; returns whether it did.
    pub fn run(&self) -> bool {
        let snapshot = self.store.snapshot();
        let tick = snapshot.tick();
        let mut state = self.state.lock();
        if state.last_run_tick == Some(tick) {
            return false;
        }
        state.last_run_tick = Some(tick);

        self.sync(&mut state, &snapshot);

        let globals = snapshot.globals();
        let tickrate = globals.tickrate();
        let env = StepEnv {
            tracer: self.trace.as_ref(),
            gravity: self.gravity(),
            dt: globals.tick_interval,
        };

        // Host grenades were re-seeded in sync; only explicit throws still lag
        for grenade in state.tracked.iter_mut().filter(|g| g.is_live()) {
            let stats = grenade.kind.stats();
            while grenade.body_tick < tick {
                let event = physics::step(&mut grenade.body, &stats, &env);
                grenade.body_tick += 1;
                if physics::should_detonate(&grenade.body, &stats, event, tickrate) {
                    let (position, at) = (grenade.body.position, grenade.body_tick);
                    self.detonate(&snapshot, grenade, position, at);
                    break;
                }
            }
        }

        for grenade in state.tracked.iter_mut().filter(|g| g.is_live()) {
            grenade.prediction = self.forecast(grenade, &env, tickrate, &snapshot);
        }

        let linger = self.settings.linger_ticks;
        let before = state.tracked.len();
        state
            .tracked
            .retain(|g| g.detonated_tick.map_or(true, |at| tick <= at.saturating_add(linger)));
        let purged = before - state.tracked.len();
        if purged > 0 {
            debug!(tick, purged, "Purged detonated grenades");
        }

        true
    }

    /// Start tracking a throw that is not (yet) in the snapshot.
    ///
    /// When the host later reports a projectile with the same owner and kind
    /// released from the same spot, the entry follows that projectile.
    pub fn track(&self, request: ThrowRequest) -> Result<(), PredictorError> {
        let snapshot = self.store.snapshot();
        let tick = snapshot.tick();
        let mut state = self.state.lock();

        let sequence = state.next_sequence;
        let body = GrenadeBody::new(request.origin, request.velocity, 0);
        let mut grenade = TrackedGrenade::new(sequence, None, request.kind, request.owner, body, tick);
        grenade.request = Some((request.origin, tick));

        let globals = snapshot.globals();
        let env = StepEnv {
            tracer: self.trace.as_ref(),
            gravity: self.gravity(),
            dt: globals.tick_interval,
        };
        grenade.prediction = self.forecast(&grenade, &env, globals.tickrate(), &snapshot);

        self.insert(&mut state, grenade)?;
        debug!(kind = request.kind.label(), tick, "Tracking thrown grenade");
        Ok(())
    }

    /// Every tracked grenade that has not gone off yet, oldest first
    pub fn live_grenades(&self) -> Vec<PredictedGrenade> {
        let state = self.state.lock();
        state
            .tracked
            .iter()
            .filter(|g| g.is_live())
            .map(|g| g.prediction.clone())
            .collect()
    }

    /// Every tracked grenade, including detonated ones still lingering
    pub fn tracked_grenades(&self) -> Vec<PredictedGrenade> {
        let state = self.state.lock();
        state.tracked.iter().map(|g| g.prediction.clone()).collect()
    }

    /// Most recent grenade thrown by the local player, live ones first
    pub fn predicted_grenade(&self) -> Option<PredictedGrenade> {
        let local = self.store.snapshot().local_index()?;
        let state = self.state.lock();
        state
            .tracked
            .iter()
            .filter(|g| g.owner == Some(local))
            .max_by_key(|g| (g.is_live(), g.sequence))
            .map(|g| g.prediction.clone())
    }

    fn gravity(&self) -> f32 {
        self.convars.get_float(SV_GRAVITY).unwrap_or(DEFAULT_GRAVITY)
    }

    fn insert(&self, state: &mut PredictorState, grenade: TrackedGrenade) -> Result<(), PredictorError> {
        let cap = self.settings.max_tracked;
        if state.tracked.len() >= cap {
            let oldest = state
                .tracked
                .iter()
                .enumerate()
                .filter(|(_, g)| !g.is_live())
                .min_by_key(|(_, g)| (g.detonated_tick, g.sequence))
                .map(|(position, _)| position);
            match oldest {
                Some(position) => {
                    let evicted = state.tracked.remove(position);
                    debug!(kind = evicted.kind.label(), cap, "Evicted detonated grenade");
                }
                None => {
                    warn!(cap, kind = grenade.kind.label(), "Grenade tracking overrun, request refused");
                    return Err(PredictorError::Overrun { cap });
                }
            }
        }
        state.next_sequence += 1;
        state.tracked.push(grenade);
        Ok(())
    }

    fn detonate(&self, snapshot: &EntitySnapshot, grenade: &mut TrackedGrenade, position: Vec3, at: u64) {
        let hits = self.blast_hits(snapshot, grenade.kind, position);
        info!(
            kind = grenade.kind.label(),
            tick = at,
            x = position.x,
            y = position.y,
            z = position.z,
            hits = hits.len(),
            "Grenade detonated"
        );
        grenade.detonated_tick = Some(at);
        grenade.prediction = PredictedGrenade {
            is_live: false,
            position,
            detonation_tick: at,
            path: vec![position],
            hits,
            ..grenade.prediction.clone()
        };
    }

    fn sync(&self, state: &mut PredictorState, snapshot: &EntitySnapshot) {
        let tick = snapshot.tick();

        for grenade in state.tracked.iter_mut().filter(|g| g.is_live()) {
            let Some((index, serial)) = grenade.source else {
                continue;
            };
            let reported = snapshot
                .record(index)
                .filter(|r| r.serial == serial)
                .and_then(|r| r.grenade.map(|projectile| (r.origin, projectile)));
            match reported {
                Some((origin, projectile)) => grenade.reseed(origin, &projectile, tick),
                None => {
                    // The host removes a projectile the tick it goes off. Use the
                    // forecast when it was due by now, else the last known state.
                    let (position, at) = if grenade.prediction.detonation_tick <= tick {
                        (grenade.prediction.position, grenade.prediction.detonation_tick)
                    } else {
                        (grenade.body.position, tick)
                    };
                    debug!(index = %index, tick, "Grenade projectile left the snapshot");
                    self.detonate(snapshot, grenade, position, at);
                }
            }
        }

        let local_eye = snapshot.local_player().map(|local| local.eye_position);
        let range = self.settings.tracking_range;
        let in_range = |position: Vec3| local_eye.map_or(true, |eye| eye.distance(position) <= range);

        let before = state.tracked.len();
        state.tracked.retain(|g| in_range(g.body.position));
        let dropped = before - state.tracked.len();
        if dropped > 0 {
            debug!(tick, dropped, "Dropped grenades out of tracking range");
        }

        let known: HashSet<(EntityIndex, u32)> = state.tracked.iter().filter_map(|g| g.source).collect();
        for record in snapshot.records() {
            let Some(projectile) = record.grenade else {
                continue;
            };
            let source = (record.index, record.serial);
            if known.contains(&source) || !in_range(record.origin) {
                continue;
            }

            if let Some(grenade) = state.tracked.iter_mut().find(|g| g.claims(&projectile)) {
                grenade.source = Some(source);
                grenade.reseed(record.origin, &projectile, tick);
                debug!(index = %record.index, kind = projectile.kind.label(), "Tracked throw matched to projectile");
                continue;
            }

            let body = GrenadeBody::from_projectile(record.origin, &projectile, tick);
            let grenade = TrackedGrenade::new(
                state.next_sequence,
                Some(source),
                projectile.kind,
                projectile.owner,
                body,
                tick,
            );
            match self.insert(state, grenade) {
                Ok(()) => debug!(index = %record.index, kind = projectile.kind.label(), "Tracking grenade projectile"),
                Err(err) => warn!(index = %record.index, error = %err, "Grenade projectile not tracked"),
            }
        }
    }

    /// Integrate a copy of the grenade until it goes off
    fn forecast(
        &self,
        grenade: &TrackedGrenade,
        env: &StepEnv<'_>,
        tickrate: u32,
        snapshot: &EntitySnapshot,
    ) -> PredictedGrenade {
        let stats = grenade.kind.stats();
        let horizon = seconds_to_ticks(stats.fuse_seconds, tickrate).saturating_sub(grenade.body.ticks_alive);

        let mut body = grenade.body.clone();
        let mut path = vec![body.position];
        let mut detonation_tick = grenade.body_tick;
        for ahead in 1..=horizon {
            let event = physics::step(&mut body, &stats, env);
            detonation_tick = grenade.body_tick + ahead;
            if path.last() != Some(&body.position) {
                path.push(body.position);
            }
            if physics::should_detonate(&body, &stats, event, tickrate) {
                break;
            }
        }

        PredictedGrenade {
            is_live: true,
            owner: grenade.owner,
            kind: grenade.kind,
            entity: grenade.source.map(|(index, _)| index),
            position: body.position,
            detonation_tick,
            path,
            hits: self.blast_hits(snapshot, grenade.kind, body.position),
        }
    }

    /// Players reached by a blast at `center`
    fn blast_hits(&self, snapshot: &EntitySnapshot, kind: GrenadeKind, center: Vec3) -> Vec<PredictedGrenadeHit> {
        let stats = kind.stats();
        if stats.exposure == Exposure::None {
            return Vec::new();
        }

        let mut hits: Vec<PredictedGrenadeHit> = snapshot
            .records()
            .filter(|r| r.is_player && r.alive && !r.dormant)
            .filter_map(|record| {
                let target = if kind == GrenadeKind::Flashbang {
                    record.eye_position
                } else {
                    record
                        .hitboxes
                        .get(HitboxIndex::Chest as usize)
                        .map_or(record.origin, |chest| chest.center())
                };

                let distance = center.distance(target);
                let mut damage = stats.damage_at(distance);
                if damage <= 0.0 {
                    return None;
                }

                if distance > EPSILON {
                    let world = self.trace.trace_world(center, target, contents::MASK_OPAQUE);
                    if world.fraction < 1.0 - VISIBLE_EPSILON {
                        return None;
                    }
                    if stats.exposure == Exposure::WorldAndSmoke {
                        damage *= 1.0 - self.trace.trace_smoke(center, target);
                        if damage <= 0.0 {
                            return None;
                        }
                    }
                }

                Some(PredictedGrenadeHit {
                    entity: record.index,
                    damage,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.damage.total_cmp(&a.damage).then(a.entity.cmp(&b.entity)));
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityRecord, Team};
    use crate::host::{HostSimulation, MemoryStore, SceneHost};
    use crate::trace::{StaticWeaponTable, DEFAULT_SMOKE_OPAQUE_DEPTH};
    use crate::world::{Solid, WorldGeometry};

    struct Rig {
        host: Arc<SceneHost>,
        store: Arc<SnapshotStore>,
        predictor: GrenadePredictor,
    }

    impl Rig {
        fn new(settings: PredictorSettings) -> Self {
            let world = WorldGeometry::new(vec![Solid::floor(0.0)]);
            let host = Arc::new(SceneHost::new(world.clone(), 64));
            let store = Arc::new(SnapshotStore::new(host.clone()));
            let trace = Arc::new(TraceEngine::new(
                store.clone(),
                Arc::new(world),
                Arc::new(StaticWeaponTable::default()),
                DEFAULT_SMOKE_OPAQUE_DEPTH,
            ));
            let predictor = GrenadePredictor::new(
                store.clone(),
                trace,
                Arc::new(MemoryStore::with_defaults()),
                settings,
            );
            store.refresh(host.capture());
            Self { host, store, predictor }
        }

        fn tick(&self) {
            self.host.advance_tick();
            self.store.refresh(self.host.capture());
            self.predictor.run();
        }
    }

    fn frag_at(z: f32) -> ThrowRequest {
        ThrowRequest::new(GrenadeKind::Frag, None, Vec3::new(0.0, 0.0, z), Vec3::ZERO)
    }

    #[test]
    fn run_is_idempotent_within_a_tick() {
        let rig = Rig::new(PredictorSettings::default());
        rig.predictor.track(frag_at(100.0)).unwrap();
        rig.host.advance_tick();
        rig.store.refresh(rig.host.capture());

        assert!(rig.predictor.run());
        let once = rig.predictor.live_grenades();
        assert!(!rig.predictor.run());
        assert_eq!(rig.predictor.live_grenades(), once);
    }

    #[test]
    fn forecast_lands_on_the_fuse_tick() {
        let rig = Rig::new(PredictorSettings::default());
        rig.predictor.track(frag_at(100.0)).unwrap();
        let live = rig.predictor.live_grenades();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].detonation_tick, 96);
        assert!(live[0].position.z < 100.0);
        assert!(live[0].path.len() > 1);
    }

    #[test]
    fn overrun_evicts_detonated_before_refusing() {
        let rig = Rig::new(PredictorSettings {
            max_tracked: 2,
            ..PredictorSettings::default()
        });
        rig.predictor.track(frag_at(10.0)).unwrap();
        rig.predictor.track(frag_at(20.0)).unwrap();
        assert_eq!(
            rig.predictor.track(frag_at(30.0)),
            Err(PredictorError::Overrun { cap: 2 })
        );

        for _ in 0..96 {
            rig.tick();
        }
        assert!(rig.predictor.live_grenades().is_empty());
        assert_eq!(rig.predictor.tracked_grenades().len(), 2);

        rig.predictor.track(frag_at(30.0)).unwrap();
        assert_eq!(rig.predictor.tracked_grenades().len(), 2);
        assert_eq!(rig.predictor.live_grenades().len(), 1);
    }

    #[test]
    fn detonated_entries_are_purged_after_linger() {
        let rig = Rig::new(PredictorSettings {
            linger_ticks: 4,
            ..PredictorSettings::default()
        });
        rig.predictor.track(frag_at(10.0)).unwrap();
        for _ in 0..96 {
            rig.tick();
        }
        assert_eq!(rig.predictor.tracked_grenades().len(), 1);
        for _ in 0..5 {
            rig.tick();
        }
        assert!(rig.predictor.tracked_grenades().is_empty());
    }

    #[test]
    fn predicted_grenade_belongs_to_local_player() {
        let rig = Rig::new(PredictorSettings::default());
        let me = rig
            .host
            .spawn(EntityRecord::player(EntityIndex(0), "me", Team::Terrorist, Vec3::ZERO));
        rig.host.set_local_player(Some(me));
        rig.store.refresh(rig.host.capture());

        assert!(rig.predictor.predicted_grenade().is_none());
        rig.predictor
            .track(ThrowRequest::new(GrenadeKind::Smoke, Some(me), Vec3::new(0.0, 0.0, 64.0), Vec3::X * 300.0))
            .unwrap();
        let mine = rig.predictor.predicted_grenade().unwrap();
        assert_eq!(mine.owner, Some(me));
        assert_eq!(mine.kind, GrenadeKind::Smoke);
    }

    #[test]
    fn snapshot_projectiles_are_discovered_and_detonate() {
        let rig = Rig::new(PredictorSettings::default());
        let index = rig
            .host
            .throw_grenade(GrenadeKind::Frag, None, Vec3::new(0.0, 0.0, 50.0), Vec3::ZERO);
        rig.store.refresh(rig.host.capture());
        rig.predictor.run();

        let live = rig.predictor.live_grenades();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].entity, Some(index));

        for _ in 0..96 {
            rig.tick();
        }
        let tracked = rig.predictor.tracked_grenades();
        assert_eq!(tracked.len(), 1);
        assert!(!tracked[0].is_live);
        assert_eq!(tracked[0].detonation_tick, 96);
    }
}
