//! Snapshot building and generation-checked entity queries

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use glam::Vec3;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::host::{HostFrame, HostSimulation, PropValue};
use crate::util::time::GlobalVars;
use crate::world::{Aabb, Capsule, SmokeVolume};

use super::{
    EntityHandle, EntityIndex, EntityRecord, HitboxIndex, Team, UserId, GAME_RULES_PROXY_CLASS,
    HITBOX_COUNT,
};

/// One immutable generation of mirrored world state
#[derive(Debug, Clone)]
pub struct EntitySnapshot {
    generation: u64,
    globals: GlobalVars,
    local_player: Option<EntityIndex>,
    entities: BTreeMap<EntityIndex, EntityRecord>,
    by_user_id: HashMap<UserId, EntityIndex>,
    smokes: Vec<SmokeVolume>,
}

impl EntitySnapshot {
    /// Generation zero: nothing has been captured yet
    pub fn empty() -> Self {
        Self {
            generation: 0,
            globals: GlobalVars::default(),
            local_player: None,
            entities: BTreeMap::new(),
            by_user_id: HashMap::new(),
            smokes: Vec::new(),
        }
    }

    /// Build a generation from a captured host frame
    pub fn build(generation: u64, frame: HostFrame) -> Self {
        let mut entities = BTreeMap::new();
        let mut by_user_id = HashMap::new();

        for mut record in frame.entities {
            if record.is_player && !record.hitboxes.is_empty() && record.hitboxes.len() != HITBOX_COUNT {
                warn!(
                    index = %record.index,
                    hitboxes = record.hitboxes.len(),
                    "Player captured with malformed hitbox set, dropping hit volumes"
                );
                record.hitboxes.clear();
            }
            if let Some(user_id) = record.user_id {
                by_user_id.insert(user_id, record.index);
            }
            if entities.insert(record.index, record).is_some() {
                warn!(generation, "Duplicate entity index in captured frame, keeping last");
            }
        }

        let local_player = frame
            .local_player
            .filter(|index| entities.contains_key(index));

        Self {
            generation,
            globals: frame.globals,
            local_player,
            entities,
            by_user_id,
            smokes: frame.smokes,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn globals(&self) -> GlobalVars {
        self.globals
    }

    pub fn tick(&self) -> u64 {
        self.globals.tickcount
    }

    pub fn smokes(&self) -> &[SmokeVolume] {
        &self.smokes
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Handle for a raw slot in this generation
    pub fn handle(&self, index: EntityIndex) -> Option<EntityHandle> {
        self.entities
            .contains_key(&index)
            .then(|| EntityHandle::new(index, self.generation))
    }

    /// Record behind a handle, or `None` for stale/unknown handles
    pub fn resolve(&self, handle: EntityHandle) -> Option<&EntityRecord> {
        if handle.generation() != self.generation {
            return None;
        }
        self.entities.get(&handle.index())
    }

    /// Record by raw slot
    pub fn record(&self, index: EntityIndex) -> Option<&EntityRecord> {
        self.entities.get(&index)
    }

    /// All records in slot order
    pub fn records(&self) -> impl Iterator<Item = &EntityRecord> {
        self.entities.values()
    }

    pub fn local_player(&self) -> Option<&EntityRecord> {
        self.local_player.and_then(|index| self.entities.get(&index))
    }

    pub fn local_index(&self) -> Option<EntityIndex> {
        self.local_player
    }

    fn handles_where(&self, predicate: impl Fn(&EntityRecord) -> bool) -> Vec<EntityHandle> {
        self.entities
            .values()
            .filter(|record| predicate(record))
            .map(|record| EntityHandle::new(record.index, self.generation))
            .collect()
    }
}

/// Owner of the current snapshot generation.
///
/// The scheduler is the only writer; every other component reads through the
/// query methods or holds an `Arc` to a generation it already received.
pub struct SnapshotStore {
    current: RwLock<Arc<EntitySnapshot>>,
    host: Arc<dyn HostSimulation>,
}

impl SnapshotStore {
    pub fn new(host: Arc<dyn HostSimulation>) -> Self {
        Self {
            current: RwLock::new(Arc::new(EntitySnapshot::empty())),
            host,
        }
    }

    /// Current generation. Holding the `Arc` keeps it alive across refreshes.
    pub fn snapshot(&self) -> Arc<EntitySnapshot> {
        self.current.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    pub fn globals(&self) -> GlobalVars {
        self.current.read().globals
    }

    /// Replace the current generation with one built from `frame`.
    /// Returns the new generation number.
    pub fn refresh(&self, frame: HostFrame) -> u64 {
        let previous = self.snapshot();
        let next = EntitySnapshot::build(previous.generation + 1, frame);

        let alive: HashSet<(EntityIndex, u32)> =
            next.records().map(|r| (r.index, r.serial)).collect();
        let destroyed = previous
            .records()
            .filter(|r| !alive.contains(&(r.index, r.serial)))
            .count();

        debug!(
            generation = next.generation,
            tick = next.tick(),
            entities = next.len(),
            destroyed,
            "Snapshot refreshed"
        );

        let generation = next.generation;
        *self.current.write() = Arc::new(next);
        generation
    }

    /// Handle for a raw slot in the current generation
    pub fn handle_for_index(&self, index: EntityIndex) -> Option<EntityHandle> {
        self.snapshot().handle(index)
    }

    fn with_record<T>(&self, handle: EntityHandle, f: impl FnOnce(&EntityRecord) -> T) -> Option<T> {
        let snapshot = self.current.read();
        snapshot.resolve(handle).map(f)
    }

    // --- Collections -------------------------------------------------------

    pub fn entities(&self) -> Vec<EntityHandle> {
        self.snapshot().handles_where(|_| true)
    }

    pub fn players(&self) -> Vec<EntityHandle> {
        self.snapshot().handles_where(|r| r.is_player)
    }

    pub fn local_player(&self) -> Option<EntityHandle> {
        let snapshot = self.snapshot();
        snapshot.local_index().and_then(|index| snapshot.handle(index))
    }

    /// Players on the team opposing `local`
    pub fn enemies_of(&self, local: EntityHandle) -> Vec<EntityHandle> {
        let snapshot = self.snapshot();
        let Some(team) = snapshot.resolve(local).map(|r| r.team) else {
            return Vec::new();
        };
        snapshot.handles_where(move |r| r.is_player && r.team.is_opposing(team))
    }

    /// Players sharing `local`'s team, `local` excluded
    pub fn teammates_of(&self, local: EntityHandle) -> Vec<EntityHandle> {
        let snapshot = self.snapshot();
        let Some(team) = snapshot.resolve(local).map(|r| r.team) else {
            return Vec::new();
        };
        let own = local.index();
        snapshot.handles_where(move |r| r.is_player && r.team == team && r.index != own)
    }

    pub fn enemies(&self) -> Vec<EntityHandle> {
        self.local_player()
            .map(|local| self.enemies_of(local))
            .unwrap_or_default()
    }

    pub fn teammates(&self) -> Vec<EntityHandle> {
        self.local_player()
            .map(|local| self.teammates_of(local))
            .unwrap_or_default()
    }

    pub fn entity_from_user_id(&self, user_id: UserId) -> Option<EntityHandle> {
        let snapshot = self.snapshot();
        snapshot
            .by_user_id
            .get(&user_id)
            .and_then(|index| snapshot.handle(*index))
    }

    pub fn entities_by_class_id(&self, class_id: u32) -> Vec<EntityHandle> {
        self.snapshot().handles_where(move |r| r.class.id == class_id)
    }

    pub fn game_rules_proxy(&self) -> Option<EntityHandle> {
        self.snapshot()
            .handles_where(|r| r.class.name == GAME_RULES_PROXY_CLASS)
            .into_iter()
            .next()
    }

    // --- Predicates --------------------------------------------------------

    pub fn is_valid(&self, handle: EntityHandle) -> bool {
        self.with_record(handle, |_| ()).is_some()
    }

    pub fn is_alive(&self, handle: EntityHandle) -> bool {
        self.with_record(handle, |r| r.alive).unwrap_or(false)
    }

    pub fn is_dormant(&self, handle: EntityHandle) -> bool {
        self.with_record(handle, |r| r.dormant).unwrap_or(false)
    }

    pub fn is_bot(&self, handle: EntityHandle) -> bool {
        self.with_record(handle, |r| r.is_bot).unwrap_or(false)
    }

    pub fn is_player(&self, handle: EntityHandle) -> bool {
        self.with_record(handle, |r| r.is_player).unwrap_or(false)
    }

    pub fn is_local_player(&self, handle: EntityHandle) -> bool {
        self.is_valid(handle) && self.snapshot().local_index() == Some(handle.index())
    }

    /// Same team as the local player (the local player included)
    pub fn is_teammate(&self, handle: EntityHandle) -> bool {
        self.relation_to_local(handle, |own, other| own == other)
    }

    /// Opposing team of the local player
    pub fn is_enemy(&self, handle: EntityHandle) -> bool {
        self.relation_to_local(handle, |own, other| own.is_opposing(other))
    }

    fn relation_to_local(&self, handle: EntityHandle, relation: impl Fn(Team, Team) -> bool) -> bool {
        let snapshot = self.snapshot();
        let (Some(local), Some(other)) = (snapshot.local_player(), snapshot.resolve(handle)) else {
            return false;
        };
        other.is_player && relation(local.team, other.team)
    }

    // --- Getters -----------------------------------------------------------

    pub fn team(&self, handle: EntityHandle) -> Option<Team> {
        self.with_record(handle, |r| r.team)
    }

    pub fn class_id(&self, handle: EntityHandle) -> Option<u32> {
        self.with_record(handle, |r| r.class.id)
    }

    pub fn class_name(&self, handle: EntityHandle) -> Option<String> {
        self.with_record(handle, |r| r.class.name.clone())
    }

    pub fn name(&self, handle: EntityHandle) -> Option<String> {
        self.with_record(handle, |r| r.name.clone())
    }

    pub fn render_origin(&self, handle: EntityHandle) -> Option<Vec3> {
        self.with_record(handle, |r| r.origin)
    }

    pub fn eye_position(&self, handle: EntityHandle) -> Option<Vec3> {
        self.with_record(handle, |r| r.eye_position)
    }

    /// Center of hitbox `index` (0–16)
    pub fn hitbox_position(&self, handle: EntityHandle, index: usize) -> Option<Vec3> {
        let slot = HitboxIndex::from_index(index)?;
        self.hitbox(handle, slot).map(|capsule| capsule.center())
    }

    pub fn hitbox(&self, handle: EntityHandle, slot: HitboxIndex) -> Option<Capsule> {
        self.with_record(handle, |r| r.hitboxes.get(slot as usize).copied())
            .flatten()
    }

    /// World-space box around the entity: its collision bounds, or the hull
    /// of its hitboxes for players
    pub fn render_box(&self, handle: EntityHandle) -> Option<Aabb> {
        self.with_record(handle, |r| {
            r.bounds.or_else(|| {
                let mut iter = r.hitboxes.iter();
                let first = iter.next()?;
                let pad = Vec3::splat(first.radius);
                let mut bounds = Aabb::new(first.a.min(first.b) - pad, first.a.max(first.b) + pad);
                for capsule in iter {
                    let pad = Vec3::splat(capsule.radius);
                    bounds.min = bounds.min.min(capsule.a.min(capsule.b) - pad);
                    bounds.max = bounds.max.max(capsule.a.max(capsule.b) + pad);
                }
                Some(bounds)
            })
        })
        .flatten()
    }

    pub fn weapon(&self, handle: EntityHandle) -> Option<EntityHandle> {
        let snapshot = self.snapshot();
        snapshot
            .resolve(handle)
            .and_then(|r| r.weapon)
            .and_then(|index| snapshot.handle(index))
    }

    pub fn weapons(&self, handle: EntityHandle) -> Vec<EntityHandle> {
        let snapshot = self.snapshot();
        snapshot
            .resolve(handle)
            .map(|r| {
                r.weapons
                    .iter()
                    .filter_map(|index| snapshot.handle(*index))
                    .collect()
            })
            .unwrap_or_default()
    }

    // --- Property passthrough ---------------------------------------------

    /// Read a property from the live simulation (not from the snapshot)
    pub fn get_prop(&self, handle: EntityHandle, table: &str, prop: &str) -> Option<PropValue> {
        if !self.is_valid(handle) {
            return None;
        }
        self.host.get_prop(handle.index(), table, prop)
    }

    /// Write a property into the live simulation. Last write wins, no
    /// conflict detection, and the current snapshot is not updated.
    pub fn set_prop(&self, handle: EntityHandle, table: &str, prop: &str, value: PropValue) -> bool {
        if !self.is_valid(handle) {
            debug!(index = %handle.index(), table, prop, "Property write on stale handle ignored");
            return false;
        }
        self.host.set_prop(handle.index(), table, prop, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SceneHost;
    use crate::world::WorldGeometry;

    fn frame_with(entities: Vec<EntityRecord>, local: Option<EntityIndex>) -> HostFrame {
        HostFrame {
            local_player: local,
            entities,
            ..HostFrame::default()
        }
    }

    fn store() -> SnapshotStore {
        SnapshotStore::new(Arc::new(SceneHost::new(WorldGeometry::empty(), 64)))
    }

    #[test]
    fn empty_store_has_no_valid_handles() {
        let store = store();
        assert_eq!(store.generation(), 0);
        assert!(store.entities().is_empty());
        assert!(store.local_player().is_none());
    }

    #[test]
    fn enemies_and_teammates_follow_local_team() {
        let store = store();
        store.refresh(frame_with(
            vec![
                EntityRecord::player(EntityIndex(1), "me", Team::CounterTerrorist, Vec3::ZERO),
                EntityRecord::player(EntityIndex(2), "mate", Team::CounterTerrorist, Vec3::X * 100.0),
                EntityRecord::player(EntityIndex(3), "foe", Team::Terrorist, Vec3::X * 200.0),
            ],
            Some(EntityIndex(1)),
        ));

        let enemies: Vec<_> = store.enemies().iter().map(|h| h.index()).collect();
        let mates: Vec<_> = store.teammates().iter().map(|h| h.index()).collect();
        assert_eq!(enemies, vec![EntityIndex(3)]);
        assert_eq!(mates, vec![EntityIndex(2)]);

        let foe = store.handle_for_index(EntityIndex(3)).unwrap();
        assert!(store.is_enemy(foe));
        assert!(!store.is_teammate(foe));
    }

    #[test]
    fn stale_handle_returns_invalid_sentinel() {
        let store = store();
        store.refresh(frame_with(
            vec![EntityRecord::player(EntityIndex(1), "a", Team::Terrorist, Vec3::ZERO)],
            None,
        ));
        let old = store.handle_for_index(EntityIndex(1)).unwrap();
        assert_eq!(store.render_origin(old), Some(Vec3::ZERO));

        store.refresh(frame_with(
            vec![EntityRecord::player(EntityIndex(1), "a", Team::Terrorist, Vec3::X)],
            None,
        ));
        assert!(!store.is_valid(old));
        assert_eq!(store.render_origin(old), None);
        assert_eq!(store.name(old), None);
    }

    #[test]
    fn hitbox_index_out_of_range_is_none() {
        let store = store();
        store.refresh(frame_with(
            vec![EntityRecord::player(EntityIndex(1), "a", Team::Terrorist, Vec3::ZERO)],
            None,
        ));
        let handle = store.handle_for_index(EntityIndex(1)).unwrap();
        assert!(store.hitbox_position(handle, 0).is_some());
        assert!(store.hitbox_position(handle, 16).is_some());
        assert!(store.hitbox_position(handle, 17).is_none());
    }

    #[test]
    fn user_ids_resolve_to_current_handles() {
        let store = store();
        store.refresh(frame_with(
            vec![EntityRecord::player(EntityIndex(4), "a", Team::Terrorist, Vec3::ZERO)
                .with_user_id(UserId(12))],
            None,
        ));
        let handle = store.entity_from_user_id(UserId(12)).unwrap();
        assert_eq!(handle.index(), EntityIndex(4));
        assert!(store.entity_from_user_id(UserId(13)).is_none());
    }

    #[test]
    fn old_generation_survives_while_held() {
        let store = store();
        store.refresh(frame_with(
            vec![EntityRecord::player(EntityIndex(1), "a", Team::Terrorist, Vec3::ZERO)],
            None,
        ));
        let held = store.snapshot();
        store.refresh(frame_with(Vec::new(), None));
        assert_eq!(held.len(), 1);
        assert!(store.snapshot().is_empty());
    }
}
