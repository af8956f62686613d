//! Client-side prediction shadow and remote interpolation.
//!
//! The local participant is simulated ahead of the authority and pulled
//! toward each snapshot. Remote participants are drawn between the two most
//! recent snapshot samples, parameterised by receive time.

use glam::Vec3;

use super::participant::Kinematics;

/// Divergence (squared distance) beyond which the shadow snaps
pub const HARD_SNAP_DISTANCE_SQ: f32 = 25.0;
/// Fraction of the remaining error removed per snapshot
pub const BLEND_FRACTION: f32 = 0.15;

/// What reconciliation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    /// Hard snap onto the authoritative state
    Snapped,
    /// Partial blend toward it
    Blended,
}

/// The last locally simulated kinematics of the local participant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionShadow {
    pub body: Kinematics,
}

impl PredictionShadow {
    pub fn new(body: Kinematics) -> Self {
        Self { body }
    }

    /// Pull the shadow toward the authoritative state
    pub fn reconcile(&mut self, auth: &Kinematics) -> Correction {
        let divergence = self.body.position.distance_squared(auth.position);
        if divergence > HARD_SNAP_DISTANCE_SQ {
            self.body = *auth;
            self.body.vertical_velocity = 0.0;
            return Correction::Snapped;
        }

        let body = &mut self.body;
        body.position.x += (auth.position.x - body.position.x) * BLEND_FRACTION;
        body.position.z += (auth.position.z - body.position.z) * BLEND_FRACTION;
        body.feet_y += (auth.feet_y - body.feet_y) * BLEND_FRACTION;
        body.sync_eye();
        // A stale airborne snapshot must not cancel a jump in progress
        if auth.grounded {
            body.vertical_velocity = 0.0;
        }
        Correction::Blended
    }
}

/// One received position of a remote participant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoteSample {
    pub position: Vec3,
    pub feet_y: f32,
    pub received_at: u64,
}

/// The two newest samples of one remote participant
#[derive(Debug, Clone, Default)]
pub struct InterpolationBuffer {
    from: Option<RemoteSample>,
    to: Option<RemoteSample>,
}

impl InterpolationBuffer {
    pub fn push(&mut self, position: Vec3, feet_y: f32, received_at: u64) {
        let sample = RemoteSample {
            position,
            feet_y,
            received_at,
        };
        self.from = self.to.or(Some(sample));
        self.to = Some(sample);
    }

    /// Position and feet height to draw at `now`, rendered `delay_ms` behind
    /// the newest sample's arrival clock.
    pub fn sample(&self, now: u64, delay_ms: u64) -> Option<(Vec3, f32)> {
        let to = self.to?;
        let from = self.from.unwrap_or(to);
        let span = to.received_at.saturating_sub(from.received_at);
        if span == 0 {
            return Some((to.position, to.feet_y));
        }
        let render_at = now as f64 - delay_ms as f64;
        let t = ((render_at - from.received_at as f64) / span as f64).clamp(0.0, 1.0) as f32;
        Some((
            from.position.lerp(to.position, t),
            from.feet_y + (to.feet_y - from.feet_y) * t,
        ))
    }

    pub fn latest(&self) -> Option<RemoteSample> {
        self.to
    }
}
