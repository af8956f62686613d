//! Simulation core: registry, input routing, tick engine, prediction and rounds

pub mod ai;
pub mod arena;
pub mod collab;
pub mod combat;
pub mod error;
pub mod hero;
pub mod input;
pub mod participant;
pub mod physics;
pub mod prediction;
pub mod round;
pub mod rules;
pub mod session;
pub mod snapshot;
mod tick;

pub use error::SessionError;
pub use participant::{Kinematics, Participant, ParticipantKind, ParticipantRegistry, WeaponState};
pub use session::{
    Collaborators, EndReason, Outbound, Recipient, Role, Session, SessionConfig, SessionStatus,
    SessionSummary,
};

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable participant identifier: a peer connection id, or `ai-N` for bots
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Synthetic id for the n-th bot of a session
    pub fn ai(n: u32) -> Self {
        Self(format!("ai-{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One tick's worth of desired action for one participant.
///
/// `jump`, `reload` and `melee` are edge-triggered: they must be acted on once
/// and then cleared. `fire` is held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InputIntent {
    /// Sender-side sequence number, used to drop stale echoes
    pub seq: u32,
    /// Planar move axis relative to facing: x strafes right, y moves forward
    pub move_axis: Vec2,
    pub sprint: bool,
    pub jump: bool,
    pub fire: bool,
    pub reload: bool,
    pub melee: bool,
    /// Forward (aim) direction
    pub aim: Vec3,
    /// Eye position at the instant melee was pressed
    pub melee_origin: Option<Vec3>,
    /// Aim direction at the instant melee was pressed
    pub melee_direction: Option<Vec3>,
}

impl Default for InputIntent {
    fn default() -> Self {
        Self {
            seq: 0,
            move_axis: Vec2::ZERO,
            sprint: false,
            jump: false,
            fire: false,
            reload: false,
            melee: false,
            aim: Vec3::NEG_Z,
            melee_origin: None,
            melee_direction: None,
        }
    }
}

impl InputIntent {
    /// Same aim, no action. Used while the round is not active.
    pub fn idle(&self) -> Self {
        Self {
            seq: self.seq,
            aim: self.aim,
            ..Self::default()
        }
    }

    /// Yaw of the aim vector around +Y; 0 looks down -Z
    pub fn facing_yaw(&self) -> f32 {
        yaw_of(self.aim)
    }

    /// Clamp analog fields into their valid ranges
    pub fn sanitized(mut self) -> Self {
        if self.move_axis.length_squared() > 1.0 {
            self.move_axis = self.move_axis.normalize_or_zero();
        }
        if !self.move_axis.is_finite() {
            self.move_axis = Vec2::ZERO;
        }
        self.aim = self.aim.try_normalize().unwrap_or(Vec3::NEG_Z);
        self.melee_direction = self.melee_direction.and_then(Vec3::try_normalize);
        self
    }
}

/// Yaw of a forward vector around +Y; 0 looks down -Z
pub fn yaw_of(forward: Vec3) -> f32 {
    (-forward.x).atan2(-forward.z)
}

/// Forward vector for a yaw produced by [`yaw_of`]
pub fn forward_of(yaw: f32) -> Vec3 {
    Vec3::new(-yaw.sin(), 0.0, -yaw.cos())
}
