//! Fixed-step grenade flight integration

use glam::Vec3;

use crate::entity::GrenadeProjectile;
use crate::trace::TraceEngine;
use crate::util::time::seconds_to_ticks;
use crate::world::{contents, SurfaceHit, WorldGeometry, EPSILON};

use super::kind::{Detonation, GrenadeStats};

/// Default `sv_gravity`
pub const DEFAULT_GRAVITY: f32 = 800.0;

/// Distance kept between a grenade and the surface it bounced off
const SURFACE_OFFSET: f32 = 0.03;

/// Below this speed a grenade on floor-like ground stops moving
const REST_SPEED: f32 = 20.0;

/// Minimum normal z for a surface to count as floor
const FLOOR_NORMAL_Z: f32 = 0.7;

/// Simulated state of a grenade in flight
#[derive(Debug, Clone, PartialEq)]
pub struct GrenadeBody {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Simulation steps since the throw
    pub ticks_alive: u64,
    pub bounces: u32,
    /// Has touched floor-like ground at least once
    pub landed: bool,
    /// Settled on the floor, no longer integrated
    pub resting: bool,
}

/// What happened during one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepEvent {
    Flying,
    Bounced { normal: Vec3, floor: bool },
    Resting,
}

impl GrenadeBody {
    pub fn new(position: Vec3, velocity: Vec3, ticks_alive: u64) -> Self {
        Self {
            position,
            velocity,
            ticks_alive,
            bounces: 0,
            landed: false,
            resting: false,
        }
    }

    /// Body state the host reports for a projectile at `position` on `tick`
    pub fn from_projectile(position: Vec3, projectile: &GrenadeProjectile, tick: u64) -> Self {
        Self {
            position,
            velocity: projectile.velocity,
            ticks_alive: tick.saturating_sub(projectile.thrown_tick),
            bounces: projectile.bounces,
            landed: projectile.landed,
            resting: projectile.resting,
        }
    }

    /// Copy the flags the host reports back onto its projectile
    pub fn write_back(&self, projectile: &mut GrenadeProjectile) {
        projectile.velocity = self.velocity;
        projectile.bounces = self.bounces;
        projectile.landed = self.landed;
        projectile.resting = self.resting;
    }
}

/// World-only segment test a grenade flies against
pub trait SegmentTest {
    fn test_segment(&self, from: Vec3, to: Vec3, mask: u32) -> Option<SurfaceHit>;
}

impl SegmentTest for TraceEngine {
    fn test_segment(&self, from: Vec3, to: Vec3, mask: u32) -> Option<SurfaceHit> {
        let result = self.trace_world(from, to, mask);
        if !result.did_hit() {
            return None;
        }
        result.normal.map(|normal| SurfaceHit {
            fraction: result.fraction,
            normal,
        })
    }
}

impl SegmentTest for WorldGeometry {
    fn test_segment(&self, from: Vec3, to: Vec3, mask: u32) -> Option<SurfaceHit> {
        if (to - from).length_squared() <= EPSILON * EPSILON {
            return None;
        }
        self.trace(from, to, mask)
    }
}

/// Integration parameters shared by every grenade in a run
#[derive(Clone, Copy)]
pub struct StepEnv<'a> {
    pub tracer: &'a dyn SegmentTest,
    /// sv_gravity, before the per-type scale
    pub gravity: f32,
    /// Fixed step: one tick interval
    pub dt: f32,
}

/// Advance `body` by exactly one tick
pub fn step(body: &mut GrenadeBody, stats: &GrenadeStats, env: &StepEnv<'_>) -> StepEvent {
    body.ticks_alive += 1;
    if body.resting {
        return StepEvent::Resting;
    }

    let dt = env.dt;
    let start_velocity = body.velocity;

    // Gravity then drag on the end-of-step velocity
    let mut velocity = start_velocity;
    velocity.z -= env.gravity * stats.gravity_scale * dt;
    velocity *= (1.0 - stats.drag * dt).max(0.0);

    // Average velocity over the step keeps the arc exact under constant gravity
    let displacement = (start_velocity + velocity) * 0.5 * dt;
    let from = body.position;
    let to = from + displacement;

    let Some(hit) = env.tracer.test_segment(from, to, contents::MASK_GRENADE) else {
        body.position = to;
        body.velocity = velocity;
        return StepEvent::Flying;
    };

    let normal = hit.normal;
    body.position = from + displacement * hit.fraction + normal * SURFACE_OFFSET;

    let into_surface = velocity.dot(normal);
    if into_surface < 0.0 {
        let normal_part = normal * into_surface;
        let tangent = velocity - normal_part;
        velocity = tangent * (1.0 - stats.friction) - normal_part * stats.restitution;
    }

    let floor = normal.z >= FLOOR_NORMAL_Z;
    body.bounces += 1;
    if floor {
        body.landed = true;
        if velocity.length() < REST_SPEED {
            velocity = Vec3::ZERO;
            body.resting = true;
        }
    }
    body.velocity = velocity;

    StepEvent::Bounced { normal, floor }
}

/// Whether the grenade goes off after the step that produced `event`
pub fn should_detonate(body: &GrenadeBody, stats: &GrenadeStats, event: StepEvent, tickrate: u32) -> bool {
    if body.ticks_alive >= seconds_to_ticks(stats.fuse_seconds, tickrate) {
        return true;
    }
    let armed = body.ticks_alive >= seconds_to_ticks(stats.arming_seconds, tickrate);
    match stats.detonation {
        Detonation::Fuse => false,
        Detonation::FuseOrLanding => armed && matches!(event, StepEvent::Bounced { floor: true, .. }),
        Detonation::FuseOrRest => armed && body.resting,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grenade::GrenadeKind;
    use crate::world::Solid;

    fn env(world: &WorldGeometry) -> StepEnv<'_> {
        StepEnv {
            tracer: world,
            gravity: DEFAULT_GRAVITY,
            dt: 1.0 / 64.0,
        }
    }

    #[test]
    fn free_fall_matches_closed_form() {
        let world = WorldGeometry::empty();
        let env = env(&world);
        let stats = GrenadeKind::Frag.stats();
        let mut body = GrenadeBody::new(Vec3::new(0.0, 0.0, 1000.0), Vec3::ZERO, 0);
        for _ in 0..64 {
            assert_eq!(step(&mut body, &stats, &env), StepEvent::Flying);
        }
        // z = z0 - g t^2 / 2 with g = 800 * 0.4, t = 1 s
        assert!((body.position.z - (1000.0 - 160.0)).abs() < 1e-2);
        assert_eq!(body.ticks_alive, 64);
    }

    #[test]
    fn bounce_reflects_and_eventually_rests() {
        let world = WorldGeometry::new(vec![Solid::floor(0.0)]);
        let env = env(&world);
        let stats = GrenadeKind::Frag.stats();
        let mut body = GrenadeBody::new(Vec3::new(0.0, 0.0, 50.0), Vec3::new(100.0, 0.0, 0.0), 0);

        let mut bounced = false;
        for _ in 0..640 {
            if let StepEvent::Bounced { floor, .. } = step(&mut body, &stats, &env) {
                assert!(floor);
                bounced = true;
            }
            assert!(body.position.z >= 0.0);
        }
        assert!(bounced);
        assert!(body.resting);
        assert_eq!(body.velocity, Vec3::ZERO);
    }

    #[test]
    fn frag_only_detonates_on_fuse() {
        let stats = GrenadeKind::Frag.stats();
        let mut body = GrenadeBody::new(Vec3::ZERO, Vec3::ZERO, 95);
        body.resting = true;
        assert!(!should_detonate(&body, &stats, StepEvent::Resting, 64));
        body.ticks_alive = 96;
        assert!(should_detonate(&body, &stats, StepEvent::Resting, 64));
    }

    #[test]
    fn molotov_detonates_on_landing() {
        let stats = GrenadeKind::Molotov.stats();
        let body = GrenadeBody::new(Vec3::ZERO, Vec3::ZERO, 10);
        let landing = StepEvent::Bounced {
            normal: Vec3::Z,
            floor: true,
        };
        let wall = StepEvent::Bounced {
            normal: Vec3::X,
            floor: false,
        };
        assert!(should_detonate(&body, &stats, landing, 64));
        assert!(!should_detonate(&body, &stats, wall, 64));
    }

    #[test]
    fn smoke_waits_for_arming_before_rest_detonation() {
        let stats = GrenadeKind::Smoke.stats();
        let mut body = GrenadeBody::new(Vec3::ZERO, Vec3::ZERO, 10);
        body.resting = true;
        assert!(!should_detonate(&body, &stats, StepEvent::Resting, 64));
        body.ticks_alive = 96;
        assert!(should_detonate(&body, &stats, StepEvent::Resting, 64));
    }
}
