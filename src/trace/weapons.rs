//! Per-weapon bullet damage table

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Distance over which `range_modifier` is applied once
pub const RANGE_MODIFIER_DISTANCE: f32 = 500.0;

/// Bullet stats of one weapon class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaponInfo {
    pub name: String,
    /// Damage at zero distance
    pub damage: f32,
    /// Damage multiplier per 500 units of travel
    pub range_modifier: f32,
    /// Maximum bullet travel
    pub range: f32,
}

impl WeaponInfo {
    pub fn new(name: impl Into<String>, damage: f32, range_modifier: f32, range: f32) -> Self {
        Self {
            name: name.into(),
            damage,
            range_modifier,
            range,
        }
    }

    /// Damage after travelling `distance` units, before hitgroup scaling
    pub fn damage_at(&self, distance: f32) -> f32 {
        if distance > self.range {
            return 0.0;
        }
        self.damage * self.range_modifier.powf(distance / RANGE_MODIFIER_DISTANCE)
    }
}

/// Base-damage lookup owned outside the mirror
pub trait WeaponTable: Send + Sync {
    /// Stats for a weapon entity class
    fn info(&self, class_id: u32) -> Option<WeaponInfo>;

    /// Stats used when the attacker holds nothing the table knows
    fn fallback(&self) -> WeaponInfo;

    fn info_or_fallback(&self, class_id: Option<u32>) -> WeaponInfo {
        class_id
            .and_then(|id| self.info(id))
            .unwrap_or_else(|| self.fallback())
    }
}

/// Weapon class ids known to the bundled table
pub mod weapon_class {
    pub const AK47: u32 = 100;
    pub const AWP: u32 = 101;
    pub const DEAGLE: u32 = 102;
    pub const USP: u32 = 103;
}

/// In-memory weapon table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticWeaponTable {
    #[serde(default)]
    weapons: HashMap<u32, WeaponInfo>,
    fallback: WeaponInfo,
}

impl StaticWeaponTable {
    pub fn new(fallback: WeaponInfo) -> Self {
        Self {
            weapons: HashMap::new(),
            fallback,
        }
    }

    pub fn insert(&mut self, class_id: u32, info: WeaponInfo) {
        self.weapons.insert(class_id, info);
    }
}

impl Default for StaticWeaponTable {
    fn default() -> Self {
        let mut table = Self::new(WeaponInfo::new("generic", 30.0, 0.85, 4096.0));
        table.insert(weapon_class::AK47, WeaponInfo::new("ak47", 36.0, 0.98, 8192.0));
        table.insert(weapon_class::AWP, WeaponInfo::new("awp", 115.0, 0.99, 8192.0));
        table.insert(weapon_class::DEAGLE, WeaponInfo::new("deagle", 63.0, 0.81, 4096.0));
        table.insert(weapon_class::USP, WeaponInfo::new("usp", 35.0, 0.91, 4096.0));
        table
    }
}

impl WeaponTable for StaticWeaponTable {
    fn info(&self, class_id: u32) -> Option<WeaponInfo> {
        self.weapons.get(&class_id).cloned()
    }

    fn fallback(&self) -> WeaponInfo {
        self.fallback.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn damage_decays_with_distance() {
        let ak = StaticWeaponTable::default().info(weapon_class::AK47).unwrap();
        assert_eq!(ak.damage_at(0.0), 36.0);
        let at_500 = ak.damage_at(500.0);
        assert!((at_500 - 36.0 * 0.98).abs() < 1e-4);
        assert!(ak.damage_at(1000.0) < at_500);
        assert_eq!(ak.damage_at(9000.0), 0.0);
    }

    #[test]
    fn unknown_class_uses_fallback() {
        let table = StaticWeaponTable::default();
        assert_eq!(table.info_or_fallback(Some(9999)).name, "generic");
        assert_eq!(table.info_or_fallback(None).name, "generic");
    }
}
