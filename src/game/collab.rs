//! Interfaces of the collaborators the core consumes but does not own.
//!
//! The session resolves these once at construction. Required ones are plain
//! boxes; optional ones are `Option<Box<dyn _>>` and their tick phase is
//! skipped when absent.

use glam::Vec3;
use std::collections::HashMap;

use super::combat::Projectile;
use super::error::ArenaError;
use super::hero::HeroStats;
use super::participant::{Kinematics, Participant};
use super::rules::GameMode;
use super::{InputIntent, ParticipantId};
use crate::ws::protocol::ShotEvent;

/// Per-hero movement tuning handed to the movement resolver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementParams {
    pub walk_speed: f32,
    pub sprint_speed: f32,
    pub jump_speed: f32,
}

/// Axis-aligned solid block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn contains_xz(&self, p: Vec3, pad: f32) -> bool {
        p.x > self.min.x - pad && p.x < self.max.x + pad && p.z > self.min.z - pad && p.z < self.max.z + pad
    }
}

/// Static collision geometry of an arena
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionWorld {
    pub floor_y: f32,
    /// Playable area is `[-half_extent, half_extent]` on x and z
    pub half_extent: f32,
    pub gravity: f32,
    pub blocks: Vec<Aabb>,
}

impl Default for CollisionWorld {
    fn default() -> Self {
        Self {
            floor_y: 0.0,
            half_extent: 40.0,
            gravity: 20.0,
            blocks: Vec::new(),
        }
    }
}

/// Advances kinematics for one step.
///
/// Must be pure: identical `(body, intent, params, world, dt)` yield an
/// identical result. Client prediction depends on it.
pub trait MovementResolver: Send {
    fn advance(
        &self,
        body: &Kinematics,
        intent: &InputIntent,
        params: &MovementParams,
        world: &CollisionWorld,
        dt: f32,
    ) -> Kinematics;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackKind {
    Shot,
    Melee,
    /// Sweep of an in-flight projectile over one step
    Projectile,
}

/// What is being resolved
#[derive(Debug, Clone, PartialEq)]
pub struct AttackRequest {
    pub kind: AttackKind,
    pub attacker: ParticipantId,
    pub origin: Vec3,
    /// Unit direction
    pub direction: Vec3,
    pub range: f32,
    pub damage: f32,
    /// Thickness of the ray or projectile
    pub radius: f32,
}

/// A candidate target as seen by the combat resolver and the AI
#[derive(Debug, Clone, PartialEq)]
pub struct TargetView {
    pub id: ParticipantId,
    pub team: u8,
    pub center: Vec3,
    pub radius: f32,
    pub health: f32,
}

impl TargetView {
    pub fn of(participant: &Participant, hero: &HeroStats) -> Self {
        Self {
            id: participant.id.clone(),
            team: participant.team,
            center: participant.body.torso(),
            radius: hero.hitbox_radius,
            health: participant.health,
        }
    }
}

/// One target struck
#[derive(Debug, Clone, PartialEq)]
pub struct HitRecord {
    pub attacker: ParticipantId,
    pub target: ParticipantId,
    pub point: Vec3,
    pub distance: f32,
    pub damage: f32,
    /// Damage meets or exceeds the target's health at resolution time
    pub lethal: bool,
}

/// Resolves a hit-scan shot, a melee swing or a projectile sweep.
///
/// Returns hits nearest first. The resolver stops after the first hit for
/// which `stop` returns true.
pub trait CombatResolver: Send {
    fn resolve(
        &self,
        request: &AttackRequest,
        targets: &[TargetView],
        stop: &dyn Fn(&HitRecord) -> bool,
    ) -> Vec<HitRecord>;
}

/// Authoring-side map description
#[derive(Debug, Clone, PartialEq)]
pub struct MapData {
    pub name: String,
    pub half_extent: f32,
    pub floor_y: f32,
    /// Feet positions
    pub spawn_points: Vec<Vec3>,
    pub team_spawns: HashMap<u8, Vec<Vec3>>,
    pub blocks: Vec<Aabb>,
}

/// A built arena
#[derive(Debug, Clone, PartialEq)]
pub struct Arena {
    pub world: CollisionWorld,
    pub spawn_points: Vec<Vec3>,
    pub team_spawns: HashMap<u8, Vec<Vec3>>,
}

pub trait ArenaBuilder {
    fn build(&self, map: &MapData, mode: &GameMode) -> Result<Arena, ArenaError>;
}

/// This peer's input device
pub trait LocalController: Send {
    fn poll(&mut self) -> InputIntent;
}

/// Everything an AI participant may look at during its tick
pub struct AiContext<'a> {
    pub dt: f32,
    pub now: u64,
    /// Bots hold still and hold fire while the round is not live
    pub round_active: bool,
    /// Other alive participants, teammates excluded in team modes
    pub visible_targets: &'a [TargetView],
    pub world: &'a CollisionWorld,
    pub movement: &'a dyn MovementResolver,
    pub combat: Option<&'a dyn CombatResolver>,
    pub hero: &'a HeroStats,
}

/// What an AI did this tick. Hits are applied by the session through the
/// same damage path as player hits.
#[derive(Debug, Default)]
pub struct AiOutcome {
    pub hits: Vec<HitRecord>,
    pub shots: Vec<ShotEvent>,
    /// Projectiles launched this tick, handed over to the session
    pub projectiles: Vec<Projectile>,
}

/// Drives AI participants. Mutates only the participant it is handed.
pub trait AiSubsystem: Send {
    fn tick(&mut self, me: &mut Participant, ctx: &AiContext<'_>) -> AiOutcome;

    /// Drop any per-bot memory for a removed participant
    fn forget(&mut self, _id: &ParticipantId) {}
}
