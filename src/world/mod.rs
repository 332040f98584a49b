//! Static world geometry and the shape primitives traces are run against

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Tolerance used by every intersection test in the crate
pub const EPSILON: f32 = 1e-5;

/// Content bits carried by world solids and tested against trace masks
pub mod contents {
    pub const SOLID: u32 = 0x1;
    pub const WINDOW: u32 = 0x2;
    pub const GRATE: u32 = 0x8;
    pub const PLAYER_CLIP: u32 = 0x1_0000;
    pub const GRENADE_CLIP: u32 = 0x2_0000;
    pub const MONSTER: u32 = 0x200_0000;
    pub const HITBOX: u32 = 0x4000_0000;

    /// Everything a bullet can stop on. Grates let bullets through.
    pub const MASK_SHOT: u32 = SOLID | WINDOW | MONSTER | HITBOX;
    /// Line of sight / plain line traces
    pub const MASK_VISIBLE: u32 = SOLID | WINDOW | MONSTER | HITBOX;
    /// World only, used for blast exposure checks
    pub const MASK_OPAQUE: u32 = SOLID;
    /// Thrown grenades bounce off grates and grenade clips too
    pub const MASK_GRENADE: u32 = SOLID | WINDOW | GRATE | GRENADE_CLIP;
    /// Any bit that lets entities participate in a trace
    pub const MASK_ENTITIES: u32 = MONSTER | HITBOX;
}

/// Where a segment entered a shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    /// Fraction along the segment in [0, 1]
    pub fraction: f32,
    /// Outward surface normal at the entry point
    pub normal: Vec3,
}

/// Axis-aligned box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Box of the given half extents around a center point
    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        Self::new(center - half_extents, center + half_extents)
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn translate(&self, delta: Vec3) -> Self {
        Self {
            min: self.min + delta,
            max: self.max + delta,
        }
    }

    /// Slab test of the segment `from .. from + delta`
    pub fn intersect_segment(&self, from: Vec3, delta: Vec3) -> Option<SurfaceHit> {
        let mut t_enter = 0.0f32;
        let mut t_exit = 1.0f32;
        let mut normal = Vec3::ZERO;

        for axis in 0..3 {
            let origin = from[axis];
            let d = delta[axis];
            let (min, max) = (self.min[axis], self.max[axis]);

            if d.abs() < EPSILON {
                if origin < min || origin > max {
                    return None;
                }
                continue;
            }

            let mut t0 = (min - origin) / d;
            let mut t1 = (max - origin) / d;
            let mut sign = -1.0;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
                sign = 1.0;
            }

            if t0 > t_enter {
                t_enter = t0;
                normal = Vec3::ZERO;
                normal[axis] = sign;
            }
            t_exit = t_exit.min(t1);
            if t_enter > t_exit {
                return None;
            }
        }

        if normal == Vec3::ZERO {
            // Started inside the box
            normal = -delta.normalize_or_zero();
        }

        Some(SurfaceHit {
            fraction: t_enter,
            normal,
        })
    }
}

/// Half-space `normal · p < dist` is solid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub normal: Vec3,
    pub dist: f32,
}

impl Plane {
    pub fn new(normal: Vec3, dist: f32) -> Self {
        Self {
            normal: normal.normalize_or_zero(),
            dist,
        }
    }

    /// Signed distance from the surface (negative = inside the solid)
    pub fn distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) - self.dist
    }

    pub fn intersect_segment(&self, from: Vec3, delta: Vec3) -> Option<SurfaceHit> {
        let d0 = self.distance(from);
        if d0 < 0.0 {
            return Some(SurfaceHit {
                fraction: 0.0,
                normal: self.normal,
            });
        }
        let d1 = self.distance(from + delta);
        if d1 >= 0.0 {
            return None;
        }
        Some(SurfaceHit {
            fraction: (d0 / (d0 - d1)).clamp(0.0, 1.0),
            normal: self.normal,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum SolidShape {
    Box(Aabb),
    Plane(Plane),
}

/// A piece of static world geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Solid {
    #[serde(flatten)]
    pub shape: SolidShape,
    #[serde(default = "default_contents")]
    pub contents: u32,
}

fn default_contents() -> u32 {
    contents::SOLID
}

impl Solid {
    pub fn wall(aabb: Aabb) -> Self {
        Self {
            shape: SolidShape::Box(aabb),
            contents: contents::SOLID,
        }
    }

    pub fn floor(height: f32) -> Self {
        Self {
            shape: SolidShape::Plane(Plane::new(Vec3::Z, height)),
            contents: contents::SOLID,
        }
    }

    pub fn with_contents(mut self, contents: u32) -> Self {
        self.contents = contents;
        self
    }

    pub fn intersect_segment(&self, from: Vec3, delta: Vec3) -> Option<SurfaceHit> {
        match &self.shape {
            SolidShape::Box(aabb) => aabb.intersect_segment(from, delta),
            SolidShape::Plane(plane) => plane.intersect_segment(from, delta),
        }
    }
}

/// Static collision geometry of the loaded map
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldGeometry {
    pub solids: Vec<Solid>,
}

impl WorldGeometry {
    pub fn new(solids: Vec<Solid>) -> Self {
        Self { solids }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Nearest solid whose contents intersect `mask`
    pub fn trace(&self, from: Vec3, to: Vec3, mask: u32) -> Option<SurfaceHit> {
        let delta = to - from;
        self.solids
            .iter()
            .filter(|solid| solid.contents & mask != 0)
            .filter_map(|solid| solid.intersect_segment(from, delta))
            .min_by(|a, b| a.fraction.total_cmp(&b.fraction))
    }
}

/// Swept-sphere hit volume (segment `a..b` inflated by `radius`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Capsule {
    pub a: Vec3,
    pub b: Vec3,
    pub radius: f32,
}

impl Capsule {
    pub fn new(a: Vec3, b: Vec3, radius: f32) -> Self {
        Self { a, b, radius }
    }

    pub fn sphere(center: Vec3, radius: f32) -> Self {
        Self::new(center, center, radius)
    }

    pub fn center(&self) -> Vec3 {
        (self.a + self.b) * 0.5
    }

    pub fn translate(&self, delta: Vec3) -> Self {
        Self::new(self.a + delta, self.b + delta, self.radius)
    }

    /// Distance from `point` to the capsule axis
    pub fn distance_to_axis(&self, point: Vec3) -> f32 {
        let ab = self.b - self.a;
        let len_sq = ab.length_squared();
        let t = if len_sq <= EPSILON {
            0.0
        } else {
            ((point - self.a).dot(ab) / len_sq).clamp(0.0, 1.0)
        };
        point.distance(self.a + ab * t)
    }

    pub fn contains(&self, point: Vec3) -> bool {
        self.distance_to_axis(point) <= self.radius + 1e-3
    }

    /// How deep `point` sits inside the capsule: 0 on the axis, 1 on the surface
    pub fn normalized_depth(&self, point: Vec3) -> f32 {
        if self.radius <= EPSILON {
            return f32::INFINITY;
        }
        self.distance_to_axis(point) / self.radius
    }

    /// Entry fraction of the segment `from .. from + delta`
    pub fn intersect_segment(&self, from: Vec3, delta: Vec3) -> Option<f32> {
        let len = delta.length();
        if len <= EPSILON {
            return None;
        }
        if self.contains(from) {
            return Some(0.0);
        }
        let dir = delta / len;
        let r = self.radius;

        let mut best: Option<f32> = None;

        // Cylinder body
        let ba = self.b - self.a;
        let oa = from - self.a;
        let baba = ba.dot(ba);
        let bard = ba.dot(dir);
        let baoa = ba.dot(oa);
        let rdoa = dir.dot(oa);
        let oaoa = oa.dot(oa);
        let qa = baba - bard * bard;
        if qa > EPSILON {
            let qb = baba * rdoa - baoa * bard;
            let qc = baba * oaoa - baoa * baoa - r * r * baba;
            let h = qb * qb - qa * qc;
            if h >= 0.0 {
                let t = (-qb - h.sqrt()) / qa;
                let y = baoa + t * bard;
                if t >= 0.0 && y > 0.0 && y < baba {
                    best = Some(t);
                }
            }
        }

        // End caps
        for center in [self.a, self.b] {
            if let Some(t) = ray_sphere(from, dir, center, r) {
                best = Some(best.map_or(t, |b| b.min(t)));
            }
        }

        best.filter(|t| *t <= len).map(|t| t / len)
    }
}

/// Entry distance of a normalized ray into a sphere the ray starts outside of
fn ray_sphere(origin: Vec3, dir: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let oc = origin - center;
    let b = oc.dot(dir);
    let c = oc.dot(oc) - radius * radius;
    let h = b * b - c;
    if h < 0.0 {
        return None;
    }
    let t = -b - h.sqrt();
    (t >= 0.0).then_some(t)
}

/// Active smoke cloud, modelled as a sphere
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmokeVolume {
    pub center: Vec3,
    pub radius: f32,
}

impl SmokeVolume {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Length of the part of `from .. to` that lies inside the cloud
    pub fn chord_length(&self, from: Vec3, to: Vec3) -> f32 {
        let delta = to - from;
        let len = delta.length();
        if len <= EPSILON {
            return 0.0;
        }
        let dir = delta / len;
        let oc = from - self.center;
        let b = oc.dot(dir);
        let c = oc.dot(oc) - self.radius * self.radius;
        let h = b * b - c;
        if h <= 0.0 {
            return 0.0;
        }
        let root = h.sqrt();
        let enter = (-b - root).clamp(0.0, len);
        let exit = (-b + root).clamp(0.0, len);
        (exit - enter).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_stops_segment_halfway() {
        let wall = Aabb::new(Vec3::new(500.0, -100.0, -100.0), Vec3::new(510.0, 100.0, 100.0));
        let hit = wall
            .intersect_segment(Vec3::ZERO, Vec3::new(1000.0, 0.0, 0.0))
            .expect("segment crosses the wall");
        assert!((hit.fraction - 0.5).abs() < 1e-6);
        assert_eq!(hit.normal, Vec3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn box_missed_when_segment_passes_beside_it() {
        let wall = Aabb::new(Vec3::new(500.0, 50.0, -10.0), Vec3::new(510.0, 100.0, 10.0));
        assert!(wall
            .intersect_segment(Vec3::ZERO, Vec3::new(1000.0, 0.0, 0.0))
            .is_none());
    }

    #[test]
    fn floor_plane_reports_up_normal() {
        let floor = Plane::new(Vec3::Z, 0.0);
        let hit = floor
            .intersect_segment(Vec3::new(0.0, 0.0, 10.0), Vec3::new(0.0, 0.0, -20.0))
            .expect("falls through floor");
        assert!((hit.fraction - 0.5).abs() < 1e-6);
        assert_eq!(hit.normal, Vec3::Z);
    }

    #[test]
    fn capsule_entry_on_body_and_caps() {
        let capsule = Capsule::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 10.0), 2.0);
        let side = capsule
            .intersect_segment(Vec3::new(-10.0, 0.0, 5.0), Vec3::new(20.0, 0.0, 0.0))
            .expect("hits body");
        assert!((side * 20.0 - 8.0).abs() < 1e-3);

        let top = capsule
            .intersect_segment(Vec3::new(0.0, 0.0, 20.0), Vec3::new(0.0, 0.0, -20.0))
            .expect("hits top cap");
        assert!((top * 20.0 - 8.0).abs() < 1e-3);
    }

    #[test]
    fn smoke_chord_through_center_is_diameter() {
        let smoke = SmokeVolume::new(Vec3::new(50.0, 0.0, 0.0), 10.0);
        let chord = smoke.chord_length(Vec3::ZERO, Vec3::new(100.0, 0.0, 0.0));
        assert!((chord - 20.0).abs() < 1e-3);
        assert_eq!(smoke.chord_length(Vec3::new(0.0, 50.0, 0.0), Vec3::new(100.0, 50.0, 0.0)), 0.0);
    }

    #[test]
    fn world_trace_respects_contents_mask() {
        let grate = Solid::wall(Aabb::new(Vec3::new(100.0, -10.0, -10.0), Vec3::new(101.0, 10.0, 10.0)))
            .with_contents(contents::GRATE);
        let world = WorldGeometry::new(vec![grate]);
        let to = Vec3::new(200.0, 0.0, 0.0);
        assert!(world.trace(Vec3::ZERO, to, contents::MASK_SHOT).is_none());
        assert!(world.trace(Vec3::ZERO, to, contents::MASK_GRENADE).is_some());
    }
}
