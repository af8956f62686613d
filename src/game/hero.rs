//! Hero and weapon stat tables

use std::collections::HashMap;

use super::collab::MovementParams;

/// Hero picked when a participant never chose one
pub const DEFAULT_HERO: &str = "ranger";

/// Projectile ballistics for weapons that do not hit-scan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectileStats {
    /// Launch speed (units per second)
    pub speed: f32,
    /// Downward acceleration (units per second squared)
    pub gravity: f32,
    /// Hit radius of the projectile
    pub radius: f32,
    /// Lifetime before the projectile expires
    pub lifetime_ms: u64,
}

/// Weapon stats per hero
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeaponStats {
    /// Damage per hit
    pub damage: f32,
    /// Minimum time between shots
    pub fire_interval_ms: u64,
    pub magazine_size: u32,
    pub reload_ms: u64,
    /// Hit-scan range
    pub range: f32,
    /// Whether a shot continues through targets it does not kill
    pub pierce: bool,
    /// `Some` for projectile weapons, `None` for hit-scan
    pub projectile: Option<ProjectileStats>,
    /// Tracer color sent with shot events (0xRRGGBB)
    pub tracer_color: u32,
    pub melee_damage: f32,
    pub melee_range: f32,
    pub melee_cooldown_ms: u64,
    /// How long a swing lasts; shooting is suppressed meanwhile
    pub melee_swing_ms: u64,
}

/// Hero stats
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeroStats {
    pub max_health: f32,
    pub walk_speed: f32,
    pub sprint_speed: f32,
    pub jump_speed: f32,
    /// Body radius used for hit detection
    pub hitbox_radius: f32,
    pub weapon: WeaponStats,
}

impl HeroStats {
    pub fn movement(&self) -> MovementParams {
        MovementParams {
            walk_speed: self.walk_speed,
            sprint_speed: self.sprint_speed,
            jump_speed: self.jump_speed,
        }
    }
}

/// Lookup table from hero id to stats
#[derive(Debug, Clone)]
pub struct HeroCatalog {
    heroes: HashMap<String, HeroStats>,
}

impl HeroCatalog {
    pub fn empty() -> Self {
        Self {
            heroes: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: impl Into<String>, stats: HeroStats) {
        self.heroes.insert(id.into(), stats);
    }

    pub fn get(&self, id: &str) -> Option<&HeroStats> {
        self.heroes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.heroes.contains_key(id)
    }

    /// Stats for `id`, falling back to the default hero
    pub fn stats_or_default(&self, id: &str) -> HeroStats {
        self.heroes
            .get(id)
            .or_else(|| self.heroes.get(DEFAULT_HERO))
            .copied()
            .unwrap_or_else(ranger)
    }
}

impl Default for HeroCatalog {
    fn default() -> Self {
        let mut catalog = Self::empty();
        catalog.insert("ranger", ranger());
        catalog.insert("grenadier", grenadier());
        catalog.insert("bruiser", bruiser());
        catalog
    }
}

/// Balanced hit-scan rifle
fn ranger() -> HeroStats {
    HeroStats {
        max_health: 100.0,
        walk_speed: 6.0,
        sprint_speed: 9.0,
        jump_speed: 7.0,
        hitbox_radius: 0.5,
        weapon: WeaponStats {
            damage: 20.0,
            fire_interval_ms: 120,
            magazine_size: 24,
            reload_ms: 1_600,
            range: 120.0,
            pierce: false,
            projectile: None,
            tracer_color: 0xffd75e,
            melee_damage: 35.0,
            melee_range: 2.0,
            melee_cooldown_ms: 800,
            melee_swing_ms: 350,
        },
    }
}

/// Slow lobbed projectiles
fn grenadier() -> HeroStats {
    HeroStats {
        max_health: 120.0,
        walk_speed: 5.5,
        sprint_speed: 8.0,
        jump_speed: 6.5,
        hitbox_radius: 0.55,
        weapon: WeaponStats {
            damage: 45.0,
            fire_interval_ms: 700,
            magazine_size: 6,
            reload_ms: 2_200,
            range: 60.0,
            pierce: false,
            projectile: Some(ProjectileStats {
                speed: 28.0,
                gravity: 9.8,
                radius: 0.3,
                lifetime_ms: 3_000,
            }),
            tracer_color: 0xff7a2e,
            melee_damage: 30.0,
            melee_range: 2.0,
            melee_cooldown_ms: 900,
            melee_swing_ms: 400,
        },
    }
}

/// Short range piercing slug, heavy melee
fn bruiser() -> HeroStats {
    HeroStats {
        max_health: 150.0,
        walk_speed: 5.0,
        sprint_speed: 7.5,
        jump_speed: 6.0,
        hitbox_radius: 0.65,
        weapon: WeaponStats {
            damage: 30.0,
            fire_interval_ms: 450,
            magazine_size: 8,
            reload_ms: 2_000,
            range: 25.0,
            pierce: true,
            projectile: None,
            tracer_color: 0x9be7ff,
            melee_damage: 60.0,
            melee_range: 2.6,
            melee_cooldown_ms: 700,
            melee_swing_ms: 450,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_hero_falls_back_to_default() {
        let catalog = HeroCatalog::default();
        assert_eq!(catalog.stats_or_default("nobody"), ranger());
        assert!(catalog.contains("grenadier"));
    }
}
