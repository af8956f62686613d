//! The per-frame step, for both roles

use glam::Vec3;
use std::collections::BTreeMap;
use tracing::{debug, info, trace, trace_span};

use super::collab::{AiContext, AttackKind, AttackRequest, HitRecord};
use super::combat::Projectile;
use super::hero::WeaponStats;
use super::participant::ParticipantKind;
use super::session::{Recipient, Role, Session};
use super::{InputIntent, ParticipantId};
use crate::ws::protocol::{MeleeEvent, ShotEvent, WireMsg};

/// Thickness of a melee sweep
const MELEE_RADIUS: f32 = 0.5;

impl Session {
    /// Advance the simulation to `now` (ms since session start).
    /// Does nothing once the session has ended.
    pub fn tick(&mut self, now: u64) {
        if self.is_ended() {
            return;
        }
        let dt = self.clock.advance(now);
        match self.role {
            Role::Authority => self.authority_tick(now, dt),
            Role::Client => self.client_tick(now, dt),
        }
    }

    fn authority_tick(&mut self, now: u64, dt: f32) {
        let _span = trace_span!("authority_tick", now).entered();

        self.respawn_due(now, false);
        let intents = self.move_players(dt);
        self.run_ai(now, dt);
        self.run_timers(now);
        if self.round.is_active() {
            self.resolve_attacks(&intents, now);
        }
        self.advance_projectiles(now, dt);

        trace!(
            participants = self.registry.len(),
            projectiles = self.projectiles.len(),
            "Tick resolved"
        );

        if self.snapshots.due(now) {
            let snapshot = self.build_snapshot(now);
            self.broadcast(WireMsg::Snapshot(snapshot));
        }

        let humans: Vec<ParticipantId> = self
            .registry
            .iter()
            .filter(|p| !p.is_ai())
            .map(|p| p.id.clone())
            .collect();
        for event in self.round.advance(now, &humans) {
            self.apply_round_event(event, now);
        }
    }

    /// Bring back participants whose respawn time has come
    fn respawn_due(&mut self, now: u64, ai: bool) {
        for id in self.registry.ids() {
            let Some(p) = self.registry.get(&id) else {
                continue;
            };
            if p.is_ai() != ai || p.alive || p.respawn_at.map_or(true, |at| now < at) {
                continue;
            }
            let stats = self.heroes.stats_or_default(&p.hero);
            let spawn = self.spawn_policy.spawn_point(&self.arena, p.team);
            if let Some(p) = self.registry.get_mut(&id) {
                p.respawn(spawn, &stats);
            }
            self.inputs.consume(&id);
            self.snapshots.force_next();
            info!(participant = %id, now, "Respawned");
        }
    }

    /// Movement for every non-AI participant. Returns the intents used, for
    /// the combat step.
    fn move_players(&mut self, dt: f32) -> BTreeMap<ParticipantId, InputIntent> {
        let active = self.round.is_active();
        let mut intents = BTreeMap::new();

        for id in self.registry.ids() {
            let Some(p) = self.registry.get(&id) else {
                continue;
            };
            let (kind, alive) = (p.kind, p.alive);
            let stats = self.heroes.stats_or_default(&p.hero);

            let intent = match kind {
                ParticipantKind::Ai => continue,
                ParticipantKind::Local => self
                    .controller
                    .as_mut()
                    .map(|controller| controller.poll().sanitized())
                    .unwrap_or_default(),
                ParticipantKind::Remote => {
                    let intent = self.inputs.resolve(&id);
                    self.inputs.consume(&id);
                    intent
                }
            };
            if !alive {
                continue;
            }
            let intent = if active { intent } else { intent.idle() };

            if let Some(p) = self.registry.get_mut(&id) {
                p.body = self
                    .movement
                    .advance(&p.body, &intent, &stats.movement(), &self.arena.world, dt);
                p.facing_yaw = intent.facing_yaw();
            }
            intents.insert(id, intent);
        }
        intents
    }

    fn run_ai(&mut self, now: u64, dt: f32) {
        let Some(mut ai) = self.ai.take() else {
            return;
        };
        self.respawn_due(now, true);
        let round_active = self.round.is_active();

        for id in self.registry.ids() {
            let Some(p) = self.registry.get(&id) else {
                continue;
            };
            if !p.is_ai() || !p.alive {
                continue;
            }
            let hero = self.heroes.stats_or_default(&p.hero);
            let targets = self.targets_for(&id);

            let outcome = {
                let ctx = AiContext {
                    dt,
                    now,
                    round_active,
                    visible_targets: &targets,
                    world: &self.arena.world,
                    movement: &*self.movement,
                    combat: self.combat.as_deref(),
                    hero: &hero,
                };
                let Some(me) = self.registry.get_mut(&id) else {
                    continue;
                };
                ai.tick(me, &ctx)
            };

            for shot in outcome.shots {
                self.broadcast(WireMsg::Shot(shot));
            }
            self.projectiles.extend(outcome.projectiles);
            for hit in &outcome.hits {
                self.apply_hit(hit, now);
            }
        }
        self.ai = Some(ai);
    }

    /// Reload completion and swing expiry
    fn run_timers(&mut self, now: u64) {
        for p in self.registry.iter_mut() {
            if p.weapon.finish_reload_if_due(now) {
                debug!(participant = %p.id, "Reload complete");
            }
            if p.weapon.swing_until != 0 && now >= p.weapon.swing_until {
                p.weapon.swing_until = 0;
            }
        }
    }

    fn resolve_attacks(&mut self, intents: &BTreeMap<ParticipantId, InputIntent>, now: u64) {
        for (id, intent) in intents {
            // A kill earlier in this loop may have ended the round
            if !self.round.is_active() {
                break;
            }
            let Some(p) = self.registry.get(id) else {
                continue;
            };
            if !p.alive || p.weapon.is_swinging(now) {
                continue;
            }
            let weapon = self.heroes.stats_or_default(&p.hero).weapon;
            let eye = p.body.position;

            let swung = intent.melee && p.weapon.can_melee(now, &weapon);
            if swung {
                self.melee(id, intent, eye, &weapon, now);
            }
            if intent.fire && !swung {
                self.fire(id, intent.aim, eye, &weapon, now);
            }
            if intent.reload {
                if let Some(p) = self.registry.get_mut(id) {
                    if p.weapon.start_reload(now, &weapon) {
                        debug!(participant = %id, "Reload started");
                    }
                }
            }
        }
    }

    fn melee(
        &mut self,
        id: &ParticipantId,
        intent: &InputIntent,
        eye: Vec3,
        weapon: &WeaponStats,
        now: u64,
    ) {
        if let Some(p) = self.registry.get_mut(id) {
            p.weapon.last_melee_at = Some(now);
            p.weapon.swing_until = now + weapon.melee_swing_ms;
        }
        self.broadcast(WireMsg::Melee(MeleeEvent {
            id: id.clone(),
            duration_ms: weapon.melee_swing_ms,
        }));

        let Some(combat) = self.combat.as_deref() else {
            return;
        };
        let request = AttackRequest {
            kind: AttackKind::Melee,
            attacker: id.clone(),
            origin: intent.melee_origin.unwrap_or(eye),
            direction: intent.melee_direction.unwrap_or(intent.aim),
            range: weapon.melee_range,
            damage: weapon.melee_damage,
            radius: MELEE_RADIUS,
        };
        let hits = combat.resolve(&request, &self.targets_for(id), &|_: &HitRecord| true);
        for hit in &hits {
            self.apply_hit(hit, now);
        }
    }

    fn fire(&mut self, id: &ParticipantId, aim: Vec3, eye: Vec3, weapon: &WeaponStats, now: u64) {
        let Some(p) = self.registry.get_mut(id) else {
            return;
        };
        if !p.weapon.can_fire(now, weapon) {
            if p.weapon.ammo == 0 {
                p.weapon.start_reload(now, weapon);
            }
            return;
        }
        p.weapon.ammo -= 1;
        p.weapon.last_shot_at = Some(now);
        if p.weapon.ammo == 0 {
            p.weapon.start_reload(now, weapon);
        }

        if let Some(ballistics) = weapon.projectile {
            self.projectiles.push(Projectile::launch(
                id.clone(),
                eye,
                aim,
                &ballistics,
                weapon.damage,
                now,
            ));
            self.broadcast(WireMsg::Shot(ShotEvent {
                shooter: id.clone(),
                origin: eye,
                end: eye + aim * weapon.range,
                tracer_color: weapon.tracer_color,
                projectile_speed: Some(ballistics.speed),
                gravity: Some(ballistics.gravity),
            }));
            return;
        }

        let mut hits = Vec::new();
        if let Some(combat) = self.combat.as_deref() {
            let request = AttackRequest {
                kind: AttackKind::Shot,
                attacker: id.clone(),
                origin: eye,
                direction: aim,
                range: weapon.range,
                damage: weapon.damage,
                radius: 0.0,
            };
            let pierce = weapon.pierce;
            let stop = |hit: &HitRecord| !pierce || hit.lethal;
            hits = combat.resolve(&request, &self.targets_for(id), &stop);
        }
        let end = hits.last().map_or(eye + aim * weapon.range, |hit| hit.point);
        self.broadcast(WireMsg::Shot(ShotEvent {
            shooter: id.clone(),
            origin: eye,
            end,
            tracer_color: weapon.tracer_color,
            projectile_speed: None,
            gravity: None,
        }));
        for hit in &hits {
            self.apply_hit(hit, now);
        }
    }

    fn advance_projectiles(&mut self, now: u64, dt: f32) {
        if self.projectiles.is_empty() {
            return;
        }
        let floor_y = self.arena.world.floor_y;
        let mut flying = std::mem::take(&mut self.projectiles);
        let mut hits = Vec::new();

        flying.retain_mut(|projectile| {
            let (from, to) = projectile.advance(dt);
            if let (Some(combat), Some(request)) =
                (self.combat.as_deref(), projectile.sweep_request(from, to))
            {
                let targets = self.targets_for(&projectile.owner);
                let mut struck = combat.resolve(&request, &targets, &|_: &HitRecord| true);
                if !struck.is_empty() {
                    hits.append(&mut struck);
                    return false;
                }
            }
            !projectile.expired(now, floor_y)
        });

        self.projectiles = flying;
        for hit in &hits {
            self.apply_hit(hit, now);
        }
    }

    /// The one damage path for players, bots and projectiles
    pub(super) fn apply_hit(&mut self, hit: &HitRecord, now: u64) {
        if !self.round.is_active() {
            return;
        }
        let mode = &self.config.mode;
        let respawn_at = mode.respawns().then(|| now + mode.respawn_delay_ms);
        let Some(target) = self.registry.get_mut(&hit.target) else {
            return;
        };
        if !target.alive {
            return;
        }
        if !target.apply_damage(hit.damage) {
            debug!(attacker = %hit.attacker, target = %hit.target, health = target.health, "Hit");
            return;
        }
        target.respawn_at = respawn_at;
        info!(killer = %hit.attacker, victim = %hit.target, "Kill");

        let killer = self.registry.contains(&hit.attacker).then_some(&hit.attacker);
        self.round.record_kill(killer, &hit.target);
        self.check_round_over(now);
    }

    fn client_tick(&mut self, now: u64, dt: f32) {
        self.round.mirror_advance(now);

        let mut intent = self
            .controller
            .as_mut()
            .map(|controller| controller.poll().sanitized())
            .unwrap_or_default();
        if !self.round.is_active() {
            intent = intent.idle();
        }
        self.local_seq += 1;
        intent.seq = self.local_seq;

        if let Some(me) = self.me.clone() {
            if let (Some(shadow), Some(p)) = (self.shadow.as_mut(), self.registry.get_mut(&me)) {
                if p.alive {
                    let stats = self.heroes.stats_or_default(&p.hero);
                    shadow.body = self.movement.advance(
                        &shadow.body,
                        &intent,
                        &stats.movement(),
                        &self.arena.world,
                        dt,
                    );
                    p.body = shadow.body;
                    p.facing_yaw = intent.facing_yaw();
                    if intent.melee {
                        intent.melee_origin = Some(p.body.position);
                        intent.melee_direction = Some(intent.aim);
                    }
                }
                p.weapon.finish_reload_if_due(now);
            }
        }

        let delay = self.config.interpolation_delay_ms;
        for (id, buffer) in &self.remotes {
            let (Some((position, feet_y)), Some(p)) =
                (buffer.sample(now, delay), self.registry.get_mut(id))
            else {
                continue;
            };
            p.body.position = position;
            p.body.feet_y = feet_y;
            p.body.sync_eye();
        }

        let floor_y = self.arena.world.floor_y;
        self.visuals.retain_mut(|visual| {
            visual.advance(dt);
            !visual.expired(now, floor_y)
        });

        self.send(Recipient::Host, WireMsg::Input(intent));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::arena::FlatArena;
    use crate::game::collab::{AiOutcome, AiSubsystem, ArenaBuilder, MapData};
    use crate::game::combat::RayCombat;
    use crate::game::hero::HeroCatalog;
    use crate::game::participant::{Kinematics, Participant};
    use crate::game::physics::KinematicMover;
    use crate::game::round::RoundPhase;
    use crate::game::rules::{GameMode, Side, TeamLayout, WinRule};
    use crate::game::session::{Collaborators, EndReason, SessionConfig, SessionStatus};
    use crate::ws::protocol::{ParticipantState, SnapshotMsg};

    /// Bots that never move or shoot
    struct StandStill;

    impl AiSubsystem for StandStill {
        fn tick(&mut self, _me: &mut Participant, _ctx: &AiContext<'_>) -> AiOutcome {
            AiOutcome::default()
        }
    }

    fn host_with(mode: GameMode) -> Session {
        let config = SessionConfig {
            mode,
            ..SessionConfig::default()
        };
        let arena = FlatArena.build(&MapData::courtyard(), &config.mode).unwrap();
        let collaborators = Collaborators::new(KinematicMover)
            .with_combat(RayCombat)
            .with_ai(StandStill);
        Session::host(config, arena, HeroCatalog::default(), collaborators)
    }

    fn client_of(me: &str, host: &str) -> Session {
        let config = SessionConfig::default();
        let arena = FlatArena.build(&MapData::courtyard(), &config.mode).unwrap();
        Session::client(
            me.into(),
            host.into(),
            config,
            arena,
            HeroCatalog::default(),
            Collaborators::new(KinematicMover),
        )
    }

    /// Start the match and tick through the countdown
    fn activate(session: &mut Session) -> u64 {
        session.start_match(0).unwrap();
        let mut now = 0;
        while !session.round().is_active() {
            session.tick(now);
            now += 16;
        }
        now
    }

    fn input(seq: u32) -> InputIntent {
        InputIntent {
            seq,
            ..InputIntent::default()
        }
    }

    fn lethal(attacker: &str, target: &str) -> HitRecord {
        HitRecord {
            attacker: attacker.into(),
            target: target.into(),
            point: Vec3::ZERO,
            distance: 1.0,
            damage: 1_000.0,
            lethal: true,
        }
    }

    fn state(id: &str, x: f32, health: f32) -> ParticipantState {
        ParticipantState {
            id: id.into(),
            ai: id.starts_with("ai-"),
            position: Vec3::new(x, 1.6, 0.0),
            feet_y: 0.0,
            grounded: true,
            health,
            alive: health > 0.0,
            facing_yaw: 0.0,
            ammo: 24,
            magazine_size: 24,
            reloading: false,
            reload_end_at: 0,
            team: 0,
            hero: "ranger".into(),
            kills: 0,
            deaths: 0,
        }
    }

    fn snapshot(timestamp: u64, participants: Vec<ParticipantState>) -> WireMsg {
        WireMsg::Snapshot(SnapshotMsg {
            timestamp,
            participants,
        })
    }

    #[test]
    fn two_jump_messages_apply_one_jump() {
        let mut session = host_with(GameMode::default());
        let p1 = ParticipantId::from("p1");
        session.peer_joined(p1.clone(), None, 0).unwrap();
        let mut now = activate(&mut session);

        for seq in [1, 2] {
            let msg = WireMsg::Input(InputIntent {
                jump: true,
                ..input(seq)
            });
            session.handle_message(&p1, msg, now).unwrap();
        }
        now += 16;
        session.tick(now);

        let body = session.participant(&p1).unwrap().body;
        assert!(!body.grounded);
        assert!(body.vertical_velocity > 0.0);
        assert!(!session.inputs.resolve(&p1).jump);

        now += 16;
        session.tick(now);
        let later = session.participant(&p1).unwrap().body.vertical_velocity;
        assert!(later < body.vertical_velocity, "no second impulse");
    }

    #[test]
    fn input_is_gated_during_countdown() {
        let mut session = host_with(GameMode::default());
        let p1 = ParticipantId::from("p1");
        session.peer_joined(p1.clone(), None, 0).unwrap();
        session.start_match(0).unwrap();
        session.tick(0);
        let start = session.participant(&p1).unwrap().body;

        let msg = WireMsg::Input(InputIntent {
            move_axis: glam::Vec2::new(0.0, 1.0),
            fire: true,
            ..input(1)
        });
        session.handle_message(&p1, msg, 0).unwrap();
        session.drain_outbox();
        session.tick(16);

        assert_eq!(session.participant(&p1).unwrap().body.feet(), start.feet());
        assert!(!session
            .drain_outbox()
            .iter()
            .any(|out| matches!(out.msg, WireMsg::Shot(_))));
    }

    #[test]
    fn respawn_waits_for_its_time_and_forces_a_snapshot() {
        let mut session = host_with(GameMode::default());
        session.peer_joined("p1".into(), None, 0).unwrap();
        session.peer_joined("p2".into(), None, 0).unwrap();
        let now = activate(&mut session);
        let p1 = ParticipantId::from("p1");

        session.apply_hit(&lethal("p2", "p1"), now);
        let respawn_at = session.participant(&p1).unwrap().respawn_at.unwrap();
        assert_eq!(respawn_at, now + 3_000);

        session.tick(respawn_at - 1);
        assert!(!session.participant(&p1).unwrap().alive);
        session.drain_outbox();

        session.tick(respawn_at);
        let p = session.participant(&p1).unwrap();
        assert!(p.alive);
        assert_eq!(p.health, p.max_health);
        assert_eq!(p.respawn_at, None);
        // 1 ms after the previous snapshot, so only a forced one goes out
        assert!(session.drain_outbox().iter().any(|out| matches!(
            &out.msg,
            WireMsg::Snapshot(snap) if snap.timestamp == respawn_at
        )));
    }

    #[test]
    fn elimination_ends_when_one_side_is_left() {
        let mode = GameMode {
            win: WinRule::Elimination,
            ..GameMode::default()
        };
        let mut session = host_with(mode);
        for id in ["a", "b", "c"] {
            session.peer_joined(id.into(), None, 0).unwrap();
        }
        let now = activate(&mut session);

        session.apply_hit(&lethal("c", "a"), now);
        assert!(session.round().is_active());
        assert_eq!(session.participant(&"a".into()).unwrap().respawn_at, None);

        session.apply_hit(&lethal("c", "b"), now);
        assert!(matches!(session.phase(), RoundPhase::RoundEnd { .. }));
        assert_eq!(session.round().round_wins[&Side::Solo("c".into())], 1);
    }

    #[test]
    fn leaving_can_decide_an_elimination_round() {
        let mode = GameMode {
            win: WinRule::Elimination,
            ..GameMode::default()
        };
        let mut session = host_with(mode);
        session.peer_joined("a".into(), None, 0).unwrap();
        session.peer_joined("b".into(), None, 0).unwrap();
        let now = activate(&mut session);
        session.peer_joined("c".into(), None, now).unwrap();

        session.peer_left(&"b".into(), now).unwrap();
        assert!(session.round().is_active());
        session.apply_hit(&lethal("c", "a"), now);
        assert!(matches!(session.phase(), RoundPhase::RoundEnd { .. }));
    }

    #[test]
    fn melee_suppresses_shooting_that_tick() {
        let mut session = host_with(GameMode::default());
        let p1 = ParticipantId::from("p1");
        session.peer_joined(p1.clone(), None, 0).unwrap();
        let mut now = activate(&mut session);
        session.drain_outbox();

        let msg = WireMsg::Input(InputIntent {
            melee: true,
            fire: true,
            ..input(1)
        });
        session.handle_message(&p1, msg, now).unwrap();
        now += 16;
        session.tick(now);

        let out = session.drain_outbox();
        assert!(out.iter().any(|o| matches!(o.msg, WireMsg::Melee(_))));
        assert!(!out.iter().any(|o| matches!(o.msg, WireMsg::Shot(_))));
        assert!(session.participant(&p1).unwrap().weapon.is_swinging(now));
    }

    #[test]
    fn melee_still_honours_a_reload_press() {
        let mut session = host_with(GameMode::default());
        let p1 = ParticipantId::from("p1");
        session.peer_joined(p1.clone(), None, 0).unwrap();
        let mut now = activate(&mut session);
        session.registry.get_mut(&p1).unwrap().weapon.ammo = 3;

        let msg = WireMsg::Input(InputIntent {
            melee: true,
            reload: true,
            ..input(1)
        });
        session.handle_message(&p1, msg, now).unwrap();
        for _ in 0..2 {
            now += 16;
            session.tick(now);
        }

        let weapon = session.participant(&p1).unwrap().weapon;
        assert!(weapon.last_melee_at.is_some());
        assert!(weapon.reloading);
        assert_eq!(weapon.ammo, 3);
    }

    #[test]
    fn teammates_are_neither_targets_nor_damaged() {
        let mode = GameMode {
            teams: TeamLayout::Teams(2),
            ..GameMode::default()
        };
        let mut session = host_with(mode);
        for id in ["a", "b", "c", "d"] {
            session.peer_joined(id.into(), None, 0).unwrap();
        }
        let shooter = ParticipantId::from("a");
        let team = session.participant(&shooter).unwrap().team;
        let (mates, enemies): (Vec<_>, Vec<_>) = session
            .registry()
            .iter()
            .filter(|p| p.id != shooter)
            .map(|p| (p.id.clone(), p.team))
            .partition(|(_, t)| *t == team);
        assert_eq!(mates.len(), 1);
        assert_eq!(enemies.len(), 2);
        let mate = mates[0].0.clone();

        let targets: Vec<ParticipantId> =
            session.targets_for(&shooter).into_iter().map(|t| t.id).collect();
        assert!(!targets.contains(&mate));
        for (enemy, _) in &enemies {
            assert!(targets.contains(enemy));
        }

        let mut now = activate(&mut session);
        // Teammate straight ahead, enemies well off the line of fire
        let placements = [
            (shooter.clone(), Vec3::new(0.0, 0.0, 20.0)),
            (mate.clone(), Vec3::new(0.0, 0.0, 14.0)),
            (enemies[0].0.clone(), Vec3::new(20.0, 0.0, -20.0)),
            (enemies[1].0.clone(), Vec3::new(-20.0, 0.0, -20.0)),
        ];
        for (id, feet) in placements {
            session.registry.get_mut(&id).unwrap().body = Kinematics::standing_at(feet);
        }
        let aim = {
            let me = session.participant(&shooter).unwrap();
            let target = session.participant(&mate).unwrap();
            (target.body.torso() - me.body.position).normalize()
        };
        let msg = WireMsg::Input(InputIntent {
            fire: true,
            aim,
            ..input(1)
        });
        session.handle_message(&shooter, msg, now).unwrap();
        session.drain_outbox();
        for _ in 0..40 {
            now += 16;
            session.tick(now);
        }

        let shots = session
            .drain_outbox()
            .into_iter()
            .filter(|o| matches!(o.msg, WireMsg::Shot(_)))
            .count();
        assert!(shots > 0);
        let mate = session.participant(&mate).unwrap();
        assert_eq!(mate.health, mate.max_health);
        assert!(mate.alive);
    }

    #[test]
    fn two_round_kill_limit_match_plays_out() {
        let mode = GameMode {
            win: WinRule::KillLimit(5),
            rounds_to_win: 2,
            ..GameMode::default()
        };
        let mut session = host_with(mode);
        let human = ParticipantId::from("p1");
        session.peer_joined(human.clone(), None, 0).unwrap();
        let bot = session.add_ai(None, 0).unwrap();
        let mut now = activate(&mut session);
        let mut seq = 0;
        let mut outbox = Vec::new();

        while session.round().is_active() && now < 60_000 {
            let target = session.participant(&bot).unwrap();
            let me = session.participant(&human).unwrap();
            let aim = (target.body.torso() - me.body.position).normalize();
            seq += 1;
            let msg = WireMsg::Input(InputIntent {
                fire: target.alive,
                aim,
                ..input(seq)
            });
            session.handle_message(&human, msg, now).unwrap();
            now += 16;
            session.tick(now);
            outbox.extend(session.drain_outbox());
        }

        assert!(matches!(session.phase(), RoundPhase::RoundEnd { .. }));
        let human_side = Side::Solo(human.clone());
        assert_eq!(session.round().round_wins[&human_side], 1);
        assert_eq!(session.round().scores[&human].kills, 5);
        assert_eq!(session.round().scores[&human].deaths, 0);
        assert!(outbox.iter().any(|o| matches!(
            &o.msg,
            WireMsg::RoundResult { round: 1, winner: Some(side), .. } if *side == human_side
        )));

        while !matches!(session.phase(), RoundPhase::HeroReselect { .. }) {
            now += 16;
            session.tick(now);
        }
        let opened_at = now;
        assert!(session
            .drain_outbox()
            .iter()
            .any(|o| o.msg == WireMsg::HeroReselect { seconds: 15 }));

        while !matches!(session.phase(), RoundPhase::Countdown { .. }) {
            now += 16;
            session.tick(now);
        }
        assert!(now - opened_at >= 15_000);
        assert_eq!(session.round().current_round, 2);

        let spawns = &session.arena.spawn_points;
        for id in [&human, &bot] {
            let p = session.participant(id).unwrap();
            assert_eq!(p.hero, "ranger");
            assert!(p.alive);
            assert_eq!(p.health, p.max_health);
            assert_eq!(p.weapon.ammo, p.weapon.magazine_size);
            assert!(!p.weapon.reloading);
            assert!(spawns.contains(&p.body.feet()));
        }
        assert!(session.round().scores.is_empty());
    }

    #[test]
    fn client_ignores_out_of_order_snapshots() {
        let mut client = client_of("p2", "p1");
        let host = ParticipantId::from("p1");
        let newer = snapshot(200, vec![state("p1", 5.0, 80.0), state("p2", 0.0, 100.0)]);
        let older = snapshot(100, vec![state("p1", -5.0, 100.0), state("p2", 0.0, 100.0)]);
        client.handle_message(&host, newer, 1_000).unwrap();
        client.handle_message(&host, older, 1_010).unwrap();

        assert_eq!(client.participant(&host).unwrap().health, 80.0);
        assert_eq!(client.remotes[&host].latest().unwrap().position.x, 5.0);
        assert_eq!(
            client.participant(&"p2".into()).unwrap().kind,
            ParticipantKind::Local
        );
    }

    #[test]
    fn client_sends_sequenced_input_to_host() {
        let mut client = client_of("p2", "p1");
        client.tick(0);
        client.tick(16);
        let seqs: Vec<u32> = client
            .drain_outbox()
            .into_iter()
            .filter(|o| o.to == Recipient::Host)
            .filter_map(|o| match o.msg {
                WireMsg::Input(intent) => Some(intent.seq),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, [1, 2]);
    }

    #[test]
    fn host_migration_keeps_the_registry() {
        let mut client = client_of("p2", "p1");
        let host = ParticipantId::from("p1");
        let participants = vec![
            state("ai-1", 3.0, 100.0),
            state("p1", 5.0, 100.0),
            state("p2", 0.0, 100.0),
        ];
        client.handle_message(&host, snapshot(100, participants), 500).unwrap();
        let transfer = WireMsg::HostTransfer {
            old_id: "p1".into(),
            new_id: "p2".into(),
        };
        client.handle_message(&host, transfer, 600).unwrap();

        client.host_left(700).unwrap();
        assert_eq!(client.role(), Role::Authority);
        assert!(!client.registry().contains(&host));
        assert_eq!(client.registry().len(), 2);
        assert_eq!(
            client.participant(&"ai-1".into()).unwrap().kind,
            ParticipantKind::Ai
        );

        client.drain_outbox();
        client.tick(716);
        assert!(client
            .drain_outbox()
            .iter()
            .any(|o| o.to == Recipient::All && matches!(o.msg, WireMsg::Snapshot(_))));
        assert_eq!(client.add_ai(None, 720).unwrap(), ParticipantId::ai(2));
    }

    #[test]
    fn follower_accepts_the_new_authority_clock() {
        let mut client = client_of("p3", "p1");
        let old_host = ParticipantId::from("p1");
        let new_host = ParticipantId::from("p2");
        let before = vec![
            state("p1", 5.0, 100.0),
            state("p2", 1.0, 100.0),
            state("p3", 0.0, 100.0),
        ];
        client.handle_message(&old_host, snapshot(100_000, before), 500).unwrap();
        let transfer = WireMsg::HostTransfer {
            old_id: old_host.clone(),
            new_id: new_host.clone(),
        };
        client.handle_message(&old_host, transfer, 600).unwrap();
        client.host_left(700).unwrap();

        assert_eq!(client.role(), Role::Client);
        assert_eq!(client.host_id(), Some(&new_host));
        assert!(!client.registry().contains(&old_host));

        // The new authority started its session later, so its clock is behind
        let after = vec![state("p2", 4.0, 90.0), state("p3", 0.0, 100.0)];
        client.handle_message(&new_host, snapshot(40_000, after), 800).unwrap();
        assert_eq!(client.remotes[&new_host].latest().unwrap().position.x, 4.0);
        assert_eq!(client.participant(&new_host).unwrap().health, 90.0);

        let stale = vec![state("p2", -4.0, 100.0), state("p3", 0.0, 100.0)];
        client.handle_message(&new_host, snapshot(39_000, stale), 810).unwrap();
        assert_eq!(client.participant(&new_host).unwrap().health, 90.0);
    }

    #[test]
    fn losing_the_host_without_handover_ends_the_session() {
        let mut client = client_of("p2", "p1");
        let first = snapshot(100, vec![state("p1", 5.0, 100.0)]);
        client.handle_message(&"p1".into(), first, 500).unwrap();
        client.host_left(600).unwrap();

        assert_eq!(client.status(), SessionStatus::Ended(EndReason::HostLost));
        assert!(client.registry().is_empty());
        client.tick(616);
        assert!(client.drain_outbox().is_empty());
    }

    #[test]
    fn teardown_is_idempotent() {
        let mut session = host_with(GameMode::default());
        session.peer_joined("p1".into(), None, 0).unwrap();
        session.add_ai(None, 0).unwrap();
        session.start_match(0).unwrap();

        session.teardown();
        session.teardown();
        assert_eq!(session.status(), SessionStatus::Ended(EndReason::TornDown));
        assert!(session.registry().is_empty());
        assert_eq!(session.phase(), &RoundPhase::Idle);

        session.tick(100);
        assert!(session.drain_outbox().is_empty());

        let mut fresh = host_with(GameMode::default());
        fresh.teardown();
        assert!(fresh.is_ended());
    }
}
