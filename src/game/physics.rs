//! Reference movement resolver: arcade walking, jumping and block collision

use glam::Vec3;

use super::collab::{CollisionWorld, MovementParams, MovementResolver};
use super::participant::Kinematics;
use super::{forward_of, InputIntent};

/// Horizontal body radius used against blocks
const BODY_RADIUS: f32 = 0.4;
/// Ledge height that can be stepped onto without jumping
const STEP_HEIGHT: f32 = 0.05;

/// Velocity-free walker: horizontal speed comes straight from the move axis,
/// vertical motion integrates gravity.
#[derive(Debug, Clone, Copy, Default)]
pub struct KinematicMover;

impl KinematicMover {
    /// Highest walkable surface under `p` whose top is not above `feet_y`
    fn ground_height(world: &CollisionWorld, p: Vec3, feet_y: f32) -> f32 {
        world
            .blocks
            .iter()
            .filter(|b| b.contains_xz(p, 0.0) && b.max.y <= feet_y + STEP_HEIGHT)
            .map(|b| b.max.y)
            .fold(world.floor_y, f32::max)
    }

    /// Whether a body at `p` with feet at `feet_y` overlaps a block
    fn blocked(world: &CollisionWorld, p: Vec3, feet_y: f32) -> bool {
        world
            .blocks
            .iter()
            .any(|b| b.contains_xz(p, BODY_RADIUS) && feet_y < b.max.y - STEP_HEIGHT && feet_y + 1.8 > b.min.y)
    }
}

impl MovementResolver for KinematicMover {
    fn advance(
        &self,
        body: &Kinematics,
        intent: &InputIntent,
        params: &MovementParams,
        world: &CollisionWorld,
        dt: f32,
    ) -> Kinematics {
        let mut next = *body;

        // Clamp inputs
        let axis = intent.move_axis.clamp_length_max(1.0);
        let speed = if intent.sprint {
            params.sprint_speed
        } else {
            params.walk_speed
        };

        let forward = forward_of(intent.facing_yaw());
        let right = Vec3::new(-forward.z, 0.0, forward.x);
        let velocity = (right * axis.x + forward * axis.y) * speed;

        // Axis-separated so walls let the body slide
        let feet = body.feet();
        let try_x = Vec3::new(feet.x + velocity.x * dt, feet.y, feet.z);
        if !Self::blocked(world, try_x, feet.y) {
            next.position.x = try_x.x;
        }
        let try_z = Vec3::new(next.position.x, feet.y, feet.z + velocity.z * dt);
        if !Self::blocked(world, try_z, feet.y) {
            next.position.z = try_z.z;
        }

        let limit = world.half_extent - BODY_RADIUS;
        next.position.x = next.position.x.clamp(-limit, limit);
        next.position.z = next.position.z.clamp(-limit, limit);

        // Vertical
        if body.grounded && intent.jump {
            next.vertical_velocity = params.jump_speed;
            next.grounded = false;
        }
        next.vertical_velocity -= world.gravity * dt;
        next.feet_y += next.vertical_velocity * dt;

        let ground = Self::ground_height(world, next.position, body.feet_y.max(next.feet_y));
        if next.feet_y <= ground {
            next.feet_y = ground;
            next.vertical_velocity = 0.0;
            next.grounded = true;
        } else {
            next.grounded = false;
        }

        next.sync_eye();
        next
    }
}
