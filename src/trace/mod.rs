//! Ray and bullet traces against world geometry and the current snapshot

pub mod weapons;

pub use weapons::{StaticWeaponTable, WeaponInfo, WeaponTable};

use std::sync::Arc;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entity::{EntityHandle, EntityIndex, EntityRecord, EntitySnapshot, HitboxIndex, SnapshotStore};
use crate::world::{contents, WorldGeometry, EPSILON};

/// A bullet sees its end point when the world stops it no earlier than this
pub const VISIBLE_EPSILON: f32 = 1e-3;

/// Default chord length through smoke that counts as fully opaque
pub const DEFAULT_SMOKE_OPAQUE_DEPTH: f32 = 100.0;

/// Trace errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TraceError {
    #[error("Unknown trace domain flag: {0}")]
    UnknownDomain(u8),
}

/// Which kind of geometry a raw trace walks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceDomain {
    Everything = 0,
    WorldOnly = 1,
    EntitiesOnly = 2,
}

impl TraceDomain {
    fn includes_world(self) -> bool {
        matches!(self, TraceDomain::Everything | TraceDomain::WorldOnly)
    }

    fn includes_entities(self) -> bool {
        matches!(self, TraceDomain::Everything | TraceDomain::EntitiesOnly)
    }
}

impl TryFrom<u8> for TraceDomain {
    type Error = TraceError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TraceDomain::Everything),
            1 => Ok(TraceDomain::WorldOnly),
            2 => Ok(TraceDomain::EntitiesOnly),
            other => Err(TraceError::UnknownDomain(other)),
        }
    }
}

/// What stopped a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "entity", rename_all = "snake_case")]
pub enum TraceHit {
    None,
    World,
    Entity(EntityHandle),
}

/// Result of a line trace
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceResult {
    pub hit: TraceHit,
    /// 0 = stopped immediately, 1 = went all the way through
    pub fraction: f32,
    pub end_pos: Vec3,
    /// Surface normal at the stop point, if anything was hit
    pub normal: Option<Vec3>,
}

impl TraceResult {
    fn clear(to: Vec3) -> Self {
        Self {
            hit: TraceHit::None,
            fraction: 1.0,
            end_pos: to,
            normal: None,
        }
    }

    fn degenerate(at: Vec3) -> Self {
        Self {
            hit: TraceHit::None,
            fraction: 0.0,
            end_pos: at,
            normal: None,
        }
    }

    pub fn did_hit(&self) -> bool {
        self.hit != TraceHit::None
    }

    pub fn entity(&self) -> Option<EntityHandle> {
        match self.hit {
            TraceHit::Entity(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Result of a bullet trace
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BulletResult {
    pub trace: TraceResult,
    /// Estimated damage to the victim; zero unless the victim is struck first
    pub damage: f32,
    pub hitbox: Option<HitboxIndex>,
    /// The world does not block the end point
    pub visible: bool,
}

/// Closest entity struck along a segment
#[derive(Debug, Clone, Copy)]
struct EntityStrike {
    index: EntityIndex,
    fraction: f32,
    normal: Vec3,
    hitbox: Option<HitboxIndex>,
}

/// Read-only query engine over world geometry and the current snapshot
pub struct TraceEngine {
    store: Arc<SnapshotStore>,
    world: Arc<WorldGeometry>,
    weapons: Arc<dyn WeaponTable>,
    smoke_opaque_depth: f32,
}

impl TraceEngine {
    pub fn new(
        store: Arc<SnapshotStore>,
        world: Arc<WorldGeometry>,
        weapons: Arc<dyn WeaponTable>,
        smoke_opaque_depth: f32,
    ) -> Self {
        Self {
            store,
            world,
            weapons,
            smoke_opaque_depth: smoke_opaque_depth.max(EPSILON),
        }
    }

    pub fn world(&self) -> &WorldGeometry {
        &self.world
    }

    /// Trace against the world and every collidable entity except `skip`
    pub fn trace_line(&self, skip: Option<EntityHandle>, from: Vec3, to: Vec3) -> TraceResult {
        let snapshot = self.store.snapshot();
        let skip = skip_index(&snapshot, skip);
        self.walk(&snapshot, skip, from, to, contents::MASK_VISIBLE, TraceDomain::Everything)
            .0
    }

    /// Trace with a caller-supplied contents mask and domain flag
    /// (0 = everything, 1 = world only, 2 = entities only)
    pub fn trace_raw(
        &self,
        skip: Option<EntityHandle>,
        from: Vec3,
        to: Vec3,
        mask: u32,
        domain: u8,
    ) -> Result<TraceResult, TraceError> {
        let domain = TraceDomain::try_from(domain)?;
        let snapshot = self.store.snapshot();
        let skip = skip_index(&snapshot, skip);
        Ok(self.walk(&snapshot, skip, from, to, mask, domain).0)
    }

    /// World-only trace; never touches the snapshot
    pub fn trace_world(&self, from: Vec3, to: Vec3, mask: u32) -> TraceResult {
        let delta = to - from;
        if delta.length_squared() <= EPSILON * EPSILON {
            return TraceResult::degenerate(from);
        }
        match self.world.trace(from, to, mask) {
            Some(hit) => TraceResult {
                hit: TraceHit::World,
                fraction: hit.fraction,
                end_pos: from + delta * hit.fraction,
                normal: Some(hit.normal),
            },
            None => TraceResult::clear(to),
        }
    }

    /// Trace a bullet from `attacker` and estimate the damage dealt to `victim`
    pub fn trace_bullet(
        &self,
        attacker: EntityHandle,
        victim: EntityHandle,
        from: Vec3,
        to: Vec3,
    ) -> BulletResult {
        let snapshot = self.store.snapshot();
        let skip = skip_index(&snapshot, Some(attacker));
        let (trace, hitbox) =
            self.walk(&snapshot, skip, from, to, contents::MASK_SHOT, TraceDomain::Everything);

        let visible = self
            .world
            .trace(from, to, contents::MASK_SHOT)
            .map_or(true, |hit| hit.fraction >= 1.0 - VISIBLE_EPSILON);

        let victim_struck = match trace.hit {
            TraceHit::Entity(handle) => {
                snapshot.resolve(victim).is_some() && handle.index() == victim.index()
            }
            _ => false,
        };

        let damage = if victim_struck {
            let weapon = self.weapon_of(&snapshot, attacker);
            let distance = (to - from).length() * trace.fraction;
            let multiplier = hitbox.map_or(1.0, HitboxIndex::damage_multiplier);
            weapon.damage_at(distance) * multiplier
        } else {
            0.0
        };

        BulletResult {
            trace,
            damage,
            hitbox: if victim_struck { hitbox } else { None },
            visible,
        }
    }

    /// Opacity in [0, 1] of the smoke clouds crossed by the segment
    pub fn trace_smoke(&self, from: Vec3, to: Vec3) -> f32 {
        let snapshot = self.store.snapshot();
        let chord: f32 = snapshot
            .smokes()
            .iter()
            .map(|smoke| smoke.chord_length(from, to))
            .sum();
        (chord / self.smoke_opaque_depth).clamp(0.0, 1.0)
    }

    fn weapon_of(&self, snapshot: &EntitySnapshot, attacker: EntityHandle) -> WeaponInfo {
        let class_id = snapshot
            .resolve(attacker)
            .and_then(|record| record.weapon)
            .and_then(|index| snapshot.record(index))
            .map(|weapon| weapon.class.id);
        self.weapons.info_or_fallback(class_id)
    }

    fn walk(
        &self,
        snapshot: &EntitySnapshot,
        skip: Option<EntityIndex>,
        from: Vec3,
        to: Vec3,
        mask: u32,
        domain: TraceDomain,
    ) -> (TraceResult, Option<HitboxIndex>) {
        let delta = to - from;
        if delta.length_squared() <= EPSILON * EPSILON {
            return (TraceResult::degenerate(from), None);
        }

        let world_hit = if domain.includes_world() {
            self.world.trace(from, to, mask)
        } else {
            None
        };

        let entity_hit = if domain.includes_entities() && mask & contents::MASK_ENTITIES != 0 {
            nearest_entity(snapshot, skip, from, delta)
        } else {
            None
        };

        match (world_hit, entity_hit) {
            (Some(world), Some(entity)) if entity.fraction < world.fraction => {
                (entity_result(snapshot, &entity, from, delta), entity.hitbox)
            }
            (Some(world), _) => (
                TraceResult {
                    hit: TraceHit::World,
                    fraction: world.fraction,
                    end_pos: from + delta * world.fraction,
                    normal: Some(world.normal),
                },
                None,
            ),
            (None, Some(entity)) => (entity_result(snapshot, &entity, from, delta), entity.hitbox),
            (None, None) => (TraceResult::clear(to), None),
        }
    }
}

fn skip_index(snapshot: &EntitySnapshot, skip: Option<EntityHandle>) -> Option<EntityIndex> {
    let handle = skip?;
    if snapshot.resolve(handle).is_none() {
        debug!(index = %handle.index(), "Skip entity is not in the current generation");
        return None;
    }
    Some(handle.index())
}

fn entity_result(snapshot: &EntitySnapshot, strike: &EntityStrike, from: Vec3, delta: Vec3) -> TraceResult {
    let hit = snapshot
        .handle(strike.index)
        .map_or(TraceHit::None, TraceHit::Entity);
    TraceResult {
        hit,
        fraction: strike.fraction,
        end_pos: from + delta * strike.fraction,
        normal: Some(strike.normal),
    }
}

fn nearest_entity(
    snapshot: &EntitySnapshot,
    skip: Option<EntityIndex>,
    from: Vec3,
    delta: Vec3,
) -> Option<EntityStrike> {
    let mut best: Option<EntityStrike> = None;
    for record in snapshot.records() {
        if Some(record.index) == skip || !record.is_collidable() {
            continue;
        }
        let Some(strike) = strike_entity(record, from, delta) else {
            continue;
        };
        // Strict comparison keeps the lowest slot on equal fractions
        if best.map_or(true, |b| strike.fraction < b.fraction) {
            best = Some(strike);
        }
    }
    best
}

fn strike_entity(record: &EntityRecord, from: Vec3, delta: Vec3) -> Option<EntityStrike> {
    if record.is_player {
        let fraction = record
            .hitboxes
            .iter()
            .filter_map(|capsule| capsule.intersect_segment(from, delta))
            .min_by(|a, b| a.total_cmp(b))?;
        let impact = from + delta * fraction;
        let hitbox = innermost_hitbox(record, impact);
        let normal = hitbox
            .map(|slot| {
                let capsule = record.hitboxes[slot as usize];
                let ab = capsule.b - capsule.a;
                let len_sq = ab.length_squared();
                let t = if len_sq <= EPSILON {
                    0.0
                } else {
                    ((impact - capsule.a).dot(ab) / len_sq).clamp(0.0, 1.0)
                };
                (impact - (capsule.a + ab * t)).normalize_or_zero()
            })
            .unwrap_or_else(|| -delta.normalize_or_zero());
        Some(EntityStrike {
            index: record.index,
            fraction,
            normal,
            hitbox,
        })
    } else {
        let hit = record.bounds?.intersect_segment(from, delta)?;
        Some(EntityStrike {
            index: record.index,
            fraction: hit.fraction,
            normal: hit.normal,
            hitbox: None,
        })
    }
}

/// Deepest hitbox containing `point`; ties go to the earlier slot
fn innermost_hitbox(record: &EntityRecord, point: Vec3) -> Option<HitboxIndex> {
    let mut best: Option<(HitboxIndex, f32)> = None;
    for (slot, capsule) in HitboxIndex::ALL.iter().zip(&record.hitboxes) {
        if !capsule.contains(point) {
            continue;
        }
        let depth = capsule.normalized_depth(point);
        if best.map_or(true, |(_, d)| depth < d) {
            best = Some((*slot, depth));
        }
    }
    best.map(|(slot, _)| slot)
}
