//! Grenade types and their physics / blast constants

use serde::{Deserialize, Serialize};

/// Closed set of throwable grenade types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrenadeKind {
    /// High-explosive fragmentation grenade
    Frag,
    Flashbang,
    Smoke,
    /// Molotov or incendiary, same behavior
    #[serde(alias = "incendiary")]
    Molotov,
    Decoy,
}

/// When a grenade goes off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detonation {
    /// Only when the fuse runs out
    Fuse,
    /// Fuse, or the first landing on floor-like ground
    FuseOrLanding,
    /// Fuse, or coming to rest after the arming time
    FuseOrRest,
}

/// What must be clear between blast center and target for the target to count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exposure {
    /// No blast effect at all
    None,
    /// World geometry blocks the blast
    World,
    /// World geometry and smoke both block the blast
    WorldAndSmoke,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Falloff {
    /// Gaussian with sigma = radius / 3
    Gaussian,
    /// Full damage anywhere inside the radius
    Flat,
}

/// Physics and blast constants per grenade type
#[derive(Debug, Clone, Copy)]
pub struct GrenadeStats {
    /// Fuse / maximum lifetime (seconds)
    pub fuse_seconds: f32,
    /// Minimum flight time before landing/rest detonation (seconds)
    pub arming_seconds: f32,
    /// Fraction of sv_gravity applied
    pub gravity_scale: f32,
    /// Velocity kept along the surface normal on a bounce
    pub restitution: f32,
    /// Velocity lost along the surface on a bounce
    pub friction: f32,
    /// Linear air drag per second
    pub drag: f32,
    pub detonation: Detonation,
    /// Blast radius (units)
    pub blast_radius: f32,
    /// Damage at the blast center (blind strength for flashbangs)
    pub damage: f32,
    pub exposure: Exposure,
    pub falloff: Falloff,
}

impl GrenadeKind {
    pub const ALL: [GrenadeKind; 5] = [
        GrenadeKind::Frag,
        GrenadeKind::Flashbang,
        GrenadeKind::Smoke,
        GrenadeKind::Molotov,
        GrenadeKind::Decoy,
    ];

    pub fn stats(self) -> GrenadeStats {
        match self {
            GrenadeKind::Frag => GrenadeStats {
                fuse_seconds: 1.5,
                arming_seconds: 0.0,
                gravity_scale: 0.4,
                restitution: 0.45,
                friction: 0.2,
                drag: 0.0,
                detonation: Detonation::Fuse,
                blast_radius: 350.0,
                damage: 98.0,
                exposure: Exposure::World,
                falloff: Falloff::Gaussian,
            },
            GrenadeKind::Flashbang => GrenadeStats {
                fuse_seconds: 1.5,
                arming_seconds: 0.0,
                gravity_scale: 0.4,
                restitution: 0.45,
                friction: 0.2,
                drag: 0.0,
                detonation: Detonation::Fuse,
                blast_radius: 1500.0,
                damage: 100.0,
                exposure: Exposure::WorldAndSmoke,
                falloff: Falloff::Gaussian,
            },
            GrenadeKind::Smoke => GrenadeStats {
                fuse_seconds: 20.0,
                arming_seconds: 1.5,
                gravity_scale: 0.4,
                restitution: 0.45,
                friction: 0.2,
                drag: 0.0,
                detonation: Detonation::FuseOrRest,
                blast_radius: 0.0,
                damage: 0.0,
                exposure: Exposure::None,
                falloff: Falloff::Flat,
            },
            GrenadeKind::Molotov => GrenadeStats {
                fuse_seconds: 2.0,
                arming_seconds: 0.0,
                gravity_scale: 0.4,
                restitution: 0.45,
                friction: 0.2,
                drag: 0.0,
                detonation: Detonation::FuseOrLanding,
                blast_radius: 150.0,
                damage: 40.0,
                exposure: Exposure::World,
                falloff: Falloff::Flat,
            },
            GrenadeKind::Decoy => GrenadeStats {
                fuse_seconds: 15.0,
                arming_seconds: 2.0,
                gravity_scale: 0.4,
                restitution: 0.45,
                friction: 0.2,
                drag: 0.0,
                detonation: Detonation::FuseOrRest,
                blast_radius: 0.0,
                damage: 0.0,
                exposure: Exposure::None,
                falloff: Falloff::Flat,
            },
        }
    }

    /// Network class name of the projectile entity
    pub fn class_name(self) -> &'static str {
        match self {
            GrenadeKind::Frag => "CBaseCSGrenadeProjectile",
            GrenadeKind::Flashbang => "CFlashbangProjectile",
            GrenadeKind::Smoke => "CSmokeGrenadeProjectile",
            GrenadeKind::Molotov => "CMolotovProjectile",
            GrenadeKind::Decoy => "CDecoyProjectile",
        }
    }

    /// Display label scripts receive as the grenade type
    pub fn label(self) -> &'static str {
        match self {
            GrenadeKind::Frag => "HE grenade",
            GrenadeKind::Flashbang => "Flashbang",
            GrenadeKind::Smoke => "Smoke",
            GrenadeKind::Molotov => "Molotov",
            GrenadeKind::Decoy => "Decoy",
        }
    }
}

impl GrenadeStats {
    /// Damage dealt at `distance` from the blast center, before occlusion
    pub fn damage_at(&self, distance: f32) -> f32 {
        if self.blast_radius <= 0.0 || distance > self.blast_radius {
            return 0.0;
        }
        match self.falloff {
            Falloff::Flat => self.damage,
            Falloff::Gaussian => {
                let sigma = self.blast_radius / 3.0;
                self.damage * (-(distance * distance) / (2.0 * sigma * sigma)).exp()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frag_damage_falls_off_and_cuts_at_radius() {
        let stats = GrenadeKind::Frag.stats();
        assert!((stats.damage_at(0.0) - 98.0).abs() < 1e-4);
        assert!(stats.damage_at(100.0) > stats.damage_at(200.0));
        assert_eq!(stats.damage_at(351.0), 0.0);
    }

    #[test]
    fn smoke_and_decoy_deal_no_damage() {
        assert_eq!(GrenadeKind::Smoke.stats().damage_at(0.0), 0.0);
        assert_eq!(GrenadeKind::Decoy.stats().damage_at(0.0), 0.0);
    }

    #[test]
    fn molotov_is_flat_inside_radius() {
        let stats = GrenadeKind::Molotov.stats();
        assert_eq!(stats.damage_at(0.0), stats.damage_at(149.0));
    }

    #[test]
    fn incendiary_alias_parses_as_molotov() {
        let kind: GrenadeKind = serde_json::from_str("\"incendiary\"").unwrap();
        assert_eq!(kind, GrenadeKind::Molotov);
    }
}
