//! Participant state and the authoritative registry

use glam::Vec3;
use std::collections::BTreeMap;

use super::hero::{HeroStats, WeaponStats};
use super::ParticipantId;

/// Eye height above the feet
pub const EYE_HEIGHT: f32 = 1.6;

/// Who drives a participant on this peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantKind {
    /// This peer's own avatar
    Local,
    /// Driven by another peer's input
    Remote,
    /// Driven by the AI subsystem on the authority
    Ai,
}

/// Kinematic state, mutated only by the movement resolver (or by
/// reconciliation/interpolation on a client)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kinematics {
    /// Eye position; `position.y == feet_y + EYE_HEIGHT`
    pub position: Vec3,
    pub feet_y: f32,
    pub vertical_velocity: f32,
    pub grounded: bool,
}

impl Kinematics {
    /// Standing at `feet`
    pub fn standing_at(feet: Vec3) -> Self {
        Self {
            position: Vec3::new(feet.x, feet.y + EYE_HEIGHT, feet.z),
            feet_y: feet.y,
            vertical_velocity: 0.0,
            grounded: true,
        }
    }

    /// Re-derive the eye height from `feet_y`
    pub fn sync_eye(&mut self) {
        self.position.y = self.feet_y + EYE_HEIGHT;
    }

    pub fn feet(&self) -> Vec3 {
        Vec3::new(self.position.x, self.feet_y, self.position.z)
    }

    /// Center of the body, used as the hit target
    pub fn torso(&self) -> Vec3 {
        Vec3::new(self.position.x, self.feet_y + EYE_HEIGHT * 0.6, self.position.z)
    }
}

/// Magazine, reload and cooldown bookkeeping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeaponState {
    pub ammo: u32,
    pub magazine_size: u32,
    pub reloading: bool,
    /// When the running reload completes (0 when not reloading)
    pub reload_end_at: u64,
    pub last_shot_at: Option<u64>,
    pub last_melee_at: Option<u64>,
    /// Melee swing in progress until this time
    pub swing_until: u64,
    /// No shots before this time (countdown grace)
    pub shots_blocked_until: u64,
}

impl WeaponState {
    pub fn full(stats: &WeaponStats) -> Self {
        Self {
            ammo: stats.magazine_size,
            magazine_size: stats.magazine_size,
            reloading: false,
            reload_end_at: 0,
            last_shot_at: None,
            last_melee_at: None,
            swing_until: 0,
            shots_blocked_until: 0,
        }
    }

    pub fn is_swinging(&self, now: u64) -> bool {
        now < self.swing_until
    }

    pub fn can_fire(&self, now: u64, stats: &WeaponStats) -> bool {
        if self.reloading || self.ammo == 0 || now < self.shots_blocked_until {
            return false;
        }
        match self.last_shot_at {
            Some(last) => now >= last + stats.fire_interval_ms,
            None => true,
        }
    }

    pub fn can_melee(&self, now: u64, stats: &WeaponStats) -> bool {
        if self.is_swinging(now) {
            return false;
        }
        match self.last_melee_at {
            Some(last) => now >= last + stats.melee_cooldown_ms,
            None => true,
        }
    }

    /// Start a reload if one makes sense. Returns true when started.
    pub fn start_reload(&mut self, now: u64, stats: &WeaponStats) -> bool {
        if self.reloading || self.ammo >= self.magazine_size {
            return false;
        }
        self.reloading = true;
        self.reload_end_at = now + stats.reload_ms;
        true
    }

    /// Complete a reload whose end time has passed. Returns true on completion.
    pub fn finish_reload_if_due(&mut self, now: u64) -> bool {
        if self.reloading && now >= self.reload_end_at {
            self.ammo = self.magazine_size;
            self.reloading = false;
            self.reload_end_at = 0;
            return true;
        }
        false
    }
}

/// One simulated combatant
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: ParticipantId,
    pub kind: ParticipantKind,
    pub hero: String,
    /// 0 = free-for-all, 1..N = team id
    pub team: u8,
    pub body: Kinematics,
    /// Look direction, independent of the movement direction
    pub facing_yaw: f32,
    pub health: f32,
    pub max_health: f32,
    pub alive: bool,
    pub respawn_at: Option<u64>,
    pub weapon: WeaponState,
}

impl Participant {
    pub fn new(
        id: ParticipantId,
        kind: ParticipantKind,
        hero: impl Into<String>,
        stats: &HeroStats,
        team: u8,
        spawn: Vec3,
    ) -> Self {
        Self {
            id,
            kind,
            hero: hero.into(),
            team,
            body: Kinematics::standing_at(spawn),
            facing_yaw: 0.0,
            health: stats.max_health,
            max_health: stats.max_health,
            alive: true,
            respawn_at: None,
            weapon: WeaponState::full(&stats.weapon),
        }
    }

    pub fn is_ai(&self) -> bool {
        self.kind == ParticipantKind::Ai
    }

    /// Put back at `spawn` with full health and a full magazine
    pub fn respawn(&mut self, spawn: Vec3, stats: &HeroStats) {
        self.body = Kinematics::standing_at(spawn);
        self.health = stats.max_health;
        self.max_health = stats.max_health;
        self.alive = true;
        self.respawn_at = None;
        self.weapon = WeaponState::full(&stats.weapon);
    }

    /// Subtract damage. Returns true if this hit killed the participant.
    pub fn apply_damage(&mut self, damage: f32) -> bool {
        if !self.alive {
            return false;
        }
        self.health = (self.health - damage).max(0.0);
        if self.health <= 0.0 {
            self.alive = false;
            return true;
        }
        false
    }
}

/// Canonical id → participant map.
///
/// Iteration is ordered by id so every tick resolves participants in the
/// same order.
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    participants: BTreeMap<ParticipantId, Participant>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, participant: Participant) -> Option<Participant> {
        self.participants.insert(participant.id.clone(), participant)
    }

    pub fn remove(&mut self, id: &ParticipantId) -> Option<Participant> {
        self.participants.remove(id)
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn get_mut(&mut self, id: &ParticipantId) -> Option<&mut Participant> {
        self.participants.get_mut(id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Participant> {
        self.participants.values_mut()
    }

    /// Snapshot of the current ids, for loops that mutate the registry
    pub fn ids(&self) -> Vec<ParticipantId> {
        self.participants.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn local_id(&self) -> Option<&ParticipantId> {
        self.participants
            .values()
            .find(|p| p.kind == ParticipantKind::Local)
            .map(|p| &p.id)
    }

    pub fn alive_count(&self) -> usize {
        self.participants.values().filter(|p| p.alive).count()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::hero::HeroCatalog;

    fn ranger() -> HeroStats {
        HeroCatalog::default().stats_or_default("ranger")
    }

    #[test]
    fn standing_body_keeps_eye_above_feet() {
        let body = Kinematics::standing_at(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(body.position, Vec3::new(1.0, 2.0 + EYE_HEIGHT, 3.0));
        assert!(body.grounded);
    }

    #[test]
    fn damage_kills_exactly_once() {
        let stats = ranger();
        let mut p = Participant::new(
            "a".into(),
            ParticipantKind::Remote,
            "ranger",
            &stats,
            0,
            Vec3::ZERO,
        );
        assert!(!p.apply_damage(40.0));
        assert!(p.apply_damage(80.0));
        assert!(!p.alive);
        assert_eq!(p.health, 0.0);
        assert!(!p.apply_damage(10.0));
    }

    #[test]
    fn reload_completes_only_after_end_time() {
        let stats = ranger().weapon;
        let mut weapon = WeaponState::full(&stats);
        assert!(!weapon.start_reload(0, &stats), "full magazine needs no reload");
        weapon.ammo = 3;
        assert!(weapon.start_reload(1_000, &stats));
        assert!(!weapon.can_fire(1_001, &stats));
        assert!(!weapon.finish_reload_if_due(1_000 + stats.reload_ms - 1));
        assert!(weapon.finish_reload_if_due(1_000 + stats.reload_ms));
        assert_eq!(weapon.ammo, stats.magazine_size);
    }

    #[test]
    fn fire_interval_and_grace_gate_shots() {
        let stats = ranger().weapon;
        let mut weapon = WeaponState::full(&stats);
        weapon.shots_blocked_until = 500;
        assert!(!weapon.can_fire(499, &stats));
        assert!(weapon.can_fire(500, &stats));
        weapon.last_shot_at = Some(500);
        assert!(!weapon.can_fire(500 + stats.fire_interval_ms - 1, &stats));
        assert!(weapon.can_fire(500 + stats.fire_interval_ms, &stats));
    }

    #[test]
    fn registry_iterates_in_id_order() {
        let stats = ranger();
        let mut registry = ParticipantRegistry::new();
        for id in ["c", "a", "b"] {
            registry.insert(Participant::new(
                id.into(),
                ParticipantKind::Remote,
                "ranger",
                &stats,
                0,
                Vec3::ZERO,
            ));
        }
        let order: Vec<_> = registry.iter().map(|p| p.id.as_str().to_string()).collect();
        assert_eq!(order, ["a", "b", "c"]);
    }
}
