//! Reference bot AI: wander until something is in sight, then chase and shoot

use glam::{Vec2, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use tracing::debug;

use super::collab::{
    AiContext, AiOutcome, AiSubsystem, AttackKind, AttackRequest, HitRecord, TargetView,
};
use super::combat::Projectile;
use super::participant::Participant;
use super::{forward_of, InputIntent, ParticipantId};
use crate::ws::protocol::ShotEvent;

/// Targets farther than this are ignored
const SIGHT_RANGE: f32 = 45.0;
/// Bots stop closing in at this distance and strafe instead
const PREFERRED_RANGE: f32 = 9.0;
/// Maximum aim error in radians
const AIM_SPREAD: f32 = 0.035;

#[derive(Debug, Clone, Copy)]
struct BotMemory {
    wander_yaw: f32,
    next_turn_at: u64,
    strafe: f32,
}

/// Seeded so a session replays the same bot decisions
pub struct BotBrains {
    rng: ChaCha8Rng,
    bots: HashMap<ParticipantId, BotMemory>,
}

impl BotBrains {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            bots: HashMap::new(),
        }
    }

    fn memory(&mut self, id: &ParticipantId) -> &mut BotMemory {
        let rng = &mut self.rng;
        self.bots.entry(id.clone()).or_insert_with(|| BotMemory {
            wander_yaw: rng.gen_range(-std::f32::consts::PI..std::f32::consts::PI),
            next_turn_at: 0,
            strafe: if rng.gen_bool(0.5) { 1.0 } else { -1.0 },
        })
    }

    /// Aim at `target` with a little jitter
    fn aim_at(&mut self, eye: Vec3, target: &TargetView) -> Vec3 {
        let exact = (target.center - eye).try_normalize().unwrap_or(Vec3::NEG_Z);
        let jitter = Vec3::new(
            self.rng.gen_range(-AIM_SPREAD..AIM_SPREAD),
            self.rng.gen_range(-AIM_SPREAD..AIM_SPREAD) * 0.5,
            self.rng.gen_range(-AIM_SPREAD..AIM_SPREAD),
        );
        (exact + jitter).try_normalize().unwrap_or(exact)
    }
}

impl Default for BotBrains {
    fn default() -> Self {
        Self::new(0x5eed)
    }
}

fn nearest<'a>(eye: Vec3, targets: &'a [TargetView]) -> Option<&'a TargetView> {
    targets
        .iter()
        .map(|t| (t.center.distance_squared(eye), t))
        .filter(|(d, _)| *d <= SIGHT_RANGE * SIGHT_RANGE)
        .min_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)))
        .map(|(_, t)| t)
}

impl AiSubsystem for BotBrains {
    fn tick(&mut self, me: &mut Participant, ctx: &AiContext<'_>) -> AiOutcome {
        let mut outcome = AiOutcome::default();
        if !me.alive || !ctx.round_active {
            return outcome;
        }

        let eye = me.body.position;
        let target = nearest(eye, ctx.visible_targets).cloned();
        let mut intent = InputIntent::default();

        match &target {
            Some(target) => {
                intent.aim = self.aim_at(eye, target);
                let distance = target.center.distance(eye);
                let memory = self.memory(&me.id);
                if ctx.now >= memory.next_turn_at {
                    memory.strafe = -memory.strafe;
                    memory.next_turn_at = ctx.now + 1_200;
                }
                intent.move_axis = if distance > PREFERRED_RANGE {
                    Vec2::new(0.0, 1.0)
                } else {
                    Vec2::new(memory.strafe, 0.0)
                };
            }
            None => {
                let now = ctx.now;
                let turn = self.rng.gen_range(-1.2..1.2);
                let delay = self.rng.gen_range(1_500..4_000);
                let memory = self.memory(&me.id);
                if now >= memory.next_turn_at {
                    memory.wander_yaw += turn;
                    memory.next_turn_at = now + delay;
                }
                intent.aim = forward_of(memory.wander_yaw);
                intent.move_axis = Vec2::new(0.0, 1.0);
            }
        }

        // Turn around at the arena edge
        let edge = ctx.world.half_extent - 1.0;
        if me.body.position.x.abs() > edge || me.body.position.z.abs() > edge {
            let home = (-me.body.position * Vec3::new(1.0, 0.0, 1.0)).try_normalize();
            if let (Some(home), None) = (home, &target) {
                intent.aim = home;
                self.memory(&me.id).wander_yaw = super::yaw_of(home);
            }
        }

        me.facing_yaw = intent.facing_yaw();
        me.body = ctx
            .movement
            .advance(&me.body, &intent, &ctx.hero.movement(), ctx.world, ctx.dt);

        let weapon = ctx.hero.weapon;
        if me.weapon.ammo == 0 {
            me.weapon.start_reload(ctx.now, &weapon);
        }

        let Some(target) = target else {
            return outcome;
        };
        if target.center.distance(eye) > weapon.range || !me.weapon.can_fire(ctx.now, &weapon) {
            return outcome;
        }

        me.weapon.ammo -= 1;
        me.weapon.last_shot_at = Some(ctx.now);
        let origin = me.body.position;
        intent.aim = self.aim_at(origin, &target);

        if let Some(ballistics) = weapon.projectile {
            outcome.projectiles.push(Projectile::launch(
                me.id.clone(),
                origin,
                intent.aim,
                &ballistics,
                weapon.damage,
                ctx.now,
            ));
            outcome.shots.push(ShotEvent {
                shooter: me.id.clone(),
                origin,
                end: origin + intent.aim * weapon.range,
                tracer_color: weapon.tracer_color,
                projectile_speed: Some(ballistics.speed),
                gravity: Some(ballistics.gravity),
            });
            return outcome;
        }

        let mut end = origin + intent.aim * weapon.range;
        if let Some(combat) = ctx.combat {
            let request = AttackRequest {
                kind: AttackKind::Shot,
                attacker: me.id.clone(),
                origin,
                direction: intent.aim,
                range: weapon.range,
                damage: weapon.damage,
                radius: 0.0,
            };
            let pierce = weapon.pierce;
            let stop = |hit: &HitRecord| !pierce || hit.lethal;
            outcome.hits = combat.resolve(&request, ctx.visible_targets, &stop);
            if let Some(last) = outcome.hits.last() {
                end = last.point;
            }
        }
        debug!(bot = %me.id, target = %target.id, hits = outcome.hits.len(), "Bot fired");
        outcome.shots.push(ShotEvent {
            shooter: me.id.clone(),
            origin,
            end,
            tracer_color: weapon.tracer_color,
            projectile_speed: None,
            gravity: None,
        });
        outcome
    }

    fn forget(&mut self, id: &ParticipantId) {
        self.bots.remove(id);
    }
}
