//! Combat: reference ray/sphere resolver and in-flight projectiles

use glam::Vec3;
use uuid::Uuid;

use super::collab::{AttackKind, AttackRequest, CombatResolver, HitRecord, TargetView};
use super::hero::ProjectileStats;
use super::ParticipantId;

/// Ray (or fat ray) against target spheres.
///
/// Melee uses the same test with a generous radius over a short range.
#[derive(Debug, Clone, Copy, Default)]
pub struct RayCombat;

impl RayCombat {
    /// Distance along the ray at which it touches the target, if it does
    fn intersect(request: &AttackRequest, target: &TargetView) -> Option<f32> {
        let to_center = target.center - request.origin;
        let along = to_center.dot(request.direction);
        let reach = target.radius + request.radius;
        if along < -reach || along > request.range + reach {
            return None;
        }
        let closest = request.origin + request.direction * along.max(0.0);
        if closest.distance_squared(target.center) <= reach * reach {
            Some(along.clamp(0.0, request.range))
        } else {
            None
        }
    }
}

impl CombatResolver for RayCombat {
    fn resolve(
        &self,
        request: &AttackRequest,
        targets: &[TargetView],
        stop: &dyn Fn(&HitRecord) -> bool,
    ) -> Vec<HitRecord> {
        let mut candidates: Vec<(f32, &TargetView)> = targets
            .iter()
            .filter(|t| t.id != request.attacker)
            .filter_map(|t| Self::intersect(request, t).map(|d| (d, t)))
            .collect();
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));

        let mut hits = Vec::new();
        for (distance, target) in candidates {
            let hit = HitRecord {
                attacker: request.attacker.clone(),
                target: target.id.clone(),
                point: request.origin + request.direction * distance,
                distance,
                damage: request.damage,
                lethal: request.damage >= target.health,
            };
            let halt = stop(&hit);
            hits.push(hit);
            if halt {
                break;
            }
        }
        hits
    }
}

/// Active projectile in the arena
#[derive(Debug, Clone)]
pub struct Projectile {
    pub id: Uuid,
    pub owner: ParticipantId,
    pub position: Vec3,
    pub velocity: Vec3,
    pub gravity: f32,
    pub radius: f32,
    pub damage: f32,
    pub expires_at: u64,
}

impl Projectile {
    pub fn launch(
        owner: ParticipantId,
        origin: Vec3,
        direction: Vec3,
        stats: &ProjectileStats,
        damage: f32,
        now: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            position: origin,
            velocity: direction * stats.speed,
            gravity: stats.gravity,
            radius: stats.radius,
            damage,
            expires_at: now + stats.lifetime_ms,
        }
    }

    /// Advance one step. Returns the swept segment `(from, to)`.
    pub fn advance(&mut self, dt: f32) -> (Vec3, Vec3) {
        let from = self.position;
        self.velocity.y -= self.gravity * dt;
        self.position += self.velocity * dt;
        (from, self.position)
    }

    pub fn expired(&self, now: u64, floor_y: f32) -> bool {
        now >= self.expires_at || self.position.y <= floor_y
    }

    /// Attack request covering the segment just swept
    pub fn sweep_request(&self, from: Vec3, to: Vec3) -> Option<AttackRequest> {
        let delta = to - from;
        let range = delta.length();
        let direction = delta.try_normalize()?;
        Some(AttackRequest {
            kind: AttackKind::Projectile,
            attacker: self.owner.clone(),
            origin: from,
            direction,
            range,
            damage: self.damage,
            radius: self.radius,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, z: f32, health: f32) -> TargetView {
        TargetView {
            id: id.into(),
            team: 0,
            center: Vec3::new(0.0, 1.0, z),
            radius: 0.5,
            health,
        }
    }

    fn shot(damage: f32) -> AttackRequest {
        AttackRequest {
            kind: AttackKind::Shot,
            attacker: "shooter".into(),
            origin: Vec3::new(0.0, 1.0, 0.0),
            direction: Vec3::NEG_Z,
            range: 50.0,
            damage,
            radius: 0.0,
        }
    }

    #[test]
    fn hits_are_ordered_nearest_first() {
        let targets = vec![target("far", -20.0, 100.0), target("near", -5.0, 100.0)];
        let hits = RayCombat.resolve(&shot(10.0), &targets, &|_| false);
        let order: Vec<_> = hits.iter().map(|h| h.target.as_str()).collect();
        assert_eq!(order, ["near", "far"]);
    }

    #[test]
    fn stop_predicate_ends_iteration() {
        let targets = vec![target("a", -5.0, 10.0), target("b", -10.0, 100.0)];
        let hits = RayCombat.resolve(&shot(30.0), &targets, &|h: &HitRecord| h.lethal);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].lethal);
    }

    #[test]
    fn attacker_and_out_of_range_targets_are_skipped() {
        let mut own = target("shooter", -3.0, 100.0);
        own.id = "shooter".into();
        let targets = vec![own, target("behind", 5.0, 100.0), target("beyond", -80.0, 100.0)];
        assert!(RayCombat.resolve(&shot(10.0), &targets, &|_| false).is_empty());
    }

    #[test]
    fn projectile_falls_under_gravity() {
        let stats = ProjectileStats {
            speed: 10.0,
            gravity: 10.0,
            radius: 0.2,
            lifetime_ms: 1_000,
        };
        let mut p = Projectile::launch("o".into(), Vec3::new(0.0, 2.0, 0.0), Vec3::NEG_Z, &stats, 5.0, 0);
        let (from, to) = p.advance(0.1);
        assert_eq!(from, Vec3::new(0.0, 2.0, 0.0));
        assert!(to.y < 2.0);
        assert!(to.z < 0.0);
        assert!(p.expired(1_000, 0.0));
    }
}
