//! The session: one owned value holding everything a peer simulates.
//!
//! Network handlers call [`Session::handle_message`] and the lifecycle
//! methods; they only touch buffers the next [`Session::tick`] consumes.
//! Every outbound message lands in the outbox, which the runtime drains.

use glam::Vec3;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use super::collab::{
    AiSubsystem, Arena, CombatResolver, LocalController, MovementResolver, TargetView,
};
use super::combat::Projectile;
use super::error::SessionError;
use super::hero::{HeroCatalog, ProjectileStats, DEFAULT_HERO};
use super::input::InputRouter;
use super::participant::{Kinematics, Participant, ParticipantKind, ParticipantRegistry};
use super::prediction::{Correction, InterpolationBuffer, PredictionShadow};
use super::round::{MatchState, RoundEvent, RoundPhase, RoundTimings};
use super::rules::{GameMode, RoundVerdict, Score, SpawnPolicy, WinPolicy};
use super::snapshot::{SnapshotBuilder, SnapshotGuard};
use super::ParticipantId;
use crate::util::time::{FrameClock, MAX_FRAME_DT_MS, SNAPSHOT_INTERVAL_MS};
use crate::ws::protocol::{ParticipantState, ScoreLine, ShotEvent, SnapshotMsg, WireMsg};

/// Which side of the simulation this peer runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Authority,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    MatchOver,
    /// The authority disconnected and no migration was announced
    HostLost,
    TornDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "reason")]
pub enum SessionStatus {
    Active,
    Ended(EndReason),
}

/// Addressee of an outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    All,
    Peer(ParticipantId),
    /// The current authority (sent by clients)
    Host,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Recipient,
    pub msg: WireMsg,
}

/// Tuning of a session, independent of where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub mode: GameMode,
    pub timings: RoundTimings,
    pub snapshot_interval_ms: u64,
    /// How far behind the newest sample remote participants are drawn
    pub interpolation_delay_ms: u64,
    pub max_frame_dt_ms: u64,
    pub max_participants: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: GameMode::default(),
            timings: RoundTimings::default(),
            snapshot_interval_ms: SNAPSHOT_INTERVAL_MS,
            interpolation_delay_ms: SNAPSHOT_INTERVAL_MS,
            max_frame_dt_ms: MAX_FRAME_DT_MS,
            max_participants: 16,
        }
    }
}

/// Collaborators resolved once at construction
pub struct Collaborators {
    pub movement: Box<dyn MovementResolver>,
    pub combat: Option<Box<dyn CombatResolver>>,
    pub ai: Option<Box<dyn AiSubsystem>>,
    pub controller: Option<Box<dyn LocalController>>,
}

impl Collaborators {
    pub fn new(movement: impl MovementResolver + 'static) -> Self {
        Self {
            movement: Box::new(movement),
            combat: None,
            ai: None,
            controller: None,
        }
    }

    pub fn with_combat(mut self, combat: impl CombatResolver + 'static) -> Self {
        self.combat = Some(Box::new(combat));
        self
    }

    pub fn with_ai(mut self, ai: impl AiSubsystem + 'static) -> Self {
        self.ai = Some(Box::new(ai));
        self
    }

    pub fn with_controller(mut self, controller: impl LocalController + 'static) -> Self {
        self.controller = Some(Box::new(controller));
        self
    }
}

/// Public view of a session for the HTTP surface
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub phase: String,
    pub round: u32,
    pub participants: usize,
    pub ended: bool,
    pub scores: Vec<ScoreLine>,
}

pub struct Session {
    pub(super) role: Role,
    pub(super) status: SessionStatus,
    pub(super) config: SessionConfig,
    /// This peer's own participant id, if it plays
    pub(super) me: Option<ParticipantId>,
    /// Current authority as known by a client
    pub(super) host_id: Option<ParticipantId>,
    /// Announced `(old, new)` authority handover
    pub(super) pending_transfer: Option<(ParticipantId, ParticipantId)>,
    pub(super) arena: Arena,
    pub(super) heroes: HeroCatalog,
    pub(super) registry: ParticipantRegistry,
    pub(super) inputs: InputRouter,
    pub(super) round: MatchState,
    pub(super) win_policy: Box<dyn WinPolicy>,
    pub(super) spawn_policy: Box<dyn SpawnPolicy>,
    pub(super) snapshots: SnapshotBuilder,
    pub(super) guard: SnapshotGuard,
    pub(super) shadow: Option<PredictionShadow>,
    pub(super) remotes: HashMap<ParticipantId, InterpolationBuffer>,
    /// Authoritative in-flight projectiles
    pub(super) projectiles: Vec<Projectile>,
    /// Cosmetic projectiles replayed from shot events
    pub(super) visuals: Vec<Projectile>,
    pub(super) clock: FrameClock,
    pub(super) movement: Box<dyn MovementResolver>,
    pub(super) combat: Option<Box<dyn CombatResolver>>,
    pub(super) ai: Option<Box<dyn AiSubsystem>>,
    pub(super) controller: Option<Box<dyn LocalController>>,
    pub(super) next_ai: u32,
    pub(super) local_seq: u32,
    pub(super) outbox: Vec<Outbound>,
}

impl Session {
    fn new(
        role: Role,
        config: SessionConfig,
        arena: Arena,
        heroes: HeroCatalog,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            role,
            status: SessionStatus::Active,
            me: None,
            host_id: None,
            pending_transfer: None,
            arena,
            heroes,
            registry: ParticipantRegistry::new(),
            inputs: InputRouter::new(),
            round: MatchState::new(config.mode.rounds_to_win, config.timings),
            win_policy: config.mode.win_policy(),
            spawn_policy: config.mode.spawn_policy(),
            snapshots: SnapshotBuilder::new(config.snapshot_interval_ms),
            guard: SnapshotGuard::default(),
            shadow: None,
            remotes: HashMap::new(),
            projectiles: Vec::new(),
            visuals: Vec::new(),
            clock: FrameClock::new(config.max_frame_dt_ms),
            movement: collaborators.movement,
            combat: collaborators.combat,
            ai: collaborators.ai,
            controller: collaborators.controller,
            next_ai: 1,
            local_seq: 0,
            outbox: Vec::new(),
            config,
        }
    }

    /// Session run by the authority
    pub fn host(
        config: SessionConfig,
        arena: Arena,
        heroes: HeroCatalog,
        collaborators: Collaborators,
    ) -> Self {
        info!(mode = ?config.mode, "Hosting session");
        Self::new(Role::Authority, config, arena, heroes, collaborators)
    }

    /// Session of a non-authority peer. Its participant appears with the
    /// first snapshot that names `me`.
    pub fn client(
        me: ParticipantId,
        host_id: ParticipantId,
        config: SessionConfig,
        arena: Arena,
        heroes: HeroCatalog,
        collaborators: Collaborators,
    ) -> Self {
        info!(me = %me, host = %host_id, "Joining session");
        let mut session = Self::new(Role::Client, config, arena, heroes, collaborators);
        session.me = Some(me);
        session.host_id = Some(host_id);
        session
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_ended(&self) -> bool {
        matches!(self.status, SessionStatus::Ended(_))
    }

    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.registry.get(id)
    }

    pub fn round(&self) -> &MatchState {
        &self.round
    }

    pub fn phase(&self) -> &RoundPhase {
        &self.round.phase
    }

    pub fn local_id(&self) -> Option<&ParticipantId> {
        self.me.as_ref()
    }

    pub fn host_id(&self) -> Option<&ParticipantId> {
        self.host_id.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn shadow(&self) -> Option<&PredictionShadow> {
        self.shadow.as_ref()
    }

    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    /// Take every message queued since the last drain
    pub fn drain_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    pub(super) fn send(&mut self, to: Recipient, msg: WireMsg) {
        self.outbox.push(Outbound { to, msg });
    }

    pub(super) fn broadcast(&mut self, msg: WireMsg) {
        self.send(Recipient::All, msg);
    }

    fn require_authority(&self) -> Result<(), SessionError> {
        if self.is_ended() {
            return Err(SessionError::Ended);
        }
        if self.role != Role::Authority {
            return Err(SessionError::NotAuthority);
        }
        Ok(())
    }

    fn resolve_hero(&self, hero: Option<&str>) -> Result<String, SessionError> {
        match hero {
            Some(id) if self.heroes.contains(id) => Ok(id.to_string()),
            Some(id) => Err(SessionError::UnknownHero(id.to_string())),
            None => Ok(DEFAULT_HERO.to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle (authority)
    // ------------------------------------------------------------------

    fn admit(
        &mut self,
        id: ParticipantId,
        kind: ParticipantKind,
        hero: Option<&str>,
        now: u64,
    ) -> Result<(), SessionError> {
        self.require_authority()?;
        if self.registry.contains(&id) {
            return Err(SessionError::DuplicateParticipant(id));
        }
        if self.registry.len() >= self.config.max_participants {
            return Err(SessionError::RosterFull(self.config.max_participants));
        }
        let hero = self.resolve_hero(hero)?;
        let stats = self.heroes.stats_or_default(&hero);
        let team = self.spawn_policy.assign_team(&self.registry);
        let spawn = self.spawn_policy.spawn_point(&self.arena, team);

        let mut participant = Participant::new(id.clone(), kind, hero, &stats, team, spawn);
        if let Some(ends_at) = self.round.countdown_end() {
            participant.weapon.shots_blocked_until = ends_at + self.round.timings().shot_grace_ms;
        }
        self.registry.insert(participant);
        self.round.enroll(&id);
        if kind == ParticipantKind::Remote {
            self.inputs.register(id.clone());
        }
        info!(participant = %id, ?kind, team, now, "Participant joined");
        Ok(())
    }

    /// The authority's own playing participant
    pub fn add_local(
        &mut self,
        id: ParticipantId,
        hero: Option<&str>,
        now: u64,
    ) -> Result<(), SessionError> {
        if self.me.is_some() {
            return Err(SessionError::DuplicateParticipant(id));
        }
        self.admit(id.clone(), ParticipantKind::Local, hero, now)?;
        self.me = Some(id);
        Ok(())
    }

    /// A peer connected. It shows up in the next snapshot.
    pub fn peer_joined(
        &mut self,
        id: ParticipantId,
        hero: Option<&str>,
        now: u64,
    ) -> Result<(), SessionError> {
        self.admit(id.clone(), ParticipantKind::Remote, hero, now)?;
        self.broadcast(WireMsg::ClientJoined { id });
        Ok(())
    }

    /// Add a bot. Returns its synthetic id.
    pub fn add_ai(&mut self, hero: Option<&str>, now: u64) -> Result<ParticipantId, SessionError> {
        let id = ParticipantId::ai(self.next_ai);
        self.admit(id.clone(), ParticipantKind::Ai, hero, now)?;
        self.next_ai += 1;
        Ok(id)
    }

    /// A peer disconnected: drop it and everything buffered for it
    pub fn peer_left(&mut self, id: &ParticipantId, now: u64) -> Result<(), SessionError> {
        self.require_authority()?;
        if self.registry.remove(id).is_none() {
            return Err(SessionError::UnknownParticipant(id.clone()));
        }
        self.inputs.remove(id);
        self.round.remove_participant(id);
        if let Some(ai) = self.ai.as_mut() {
            ai.forget(id);
        }
        info!(participant = %id, "Participant left");
        self.broadcast(WireMsg::ClientLeft { id: id.clone() });
        self.check_round_over(now);
        Ok(())
    }

    /// Open the first countdown
    pub fn start_match(&mut self, now: u64) -> Result<(), SessionError> {
        self.require_authority()?;
        if self.round.phase != RoundPhase::Idle {
            debug!(phase = self.round.phase.name(), "Match already started");
            return Ok(());
        }
        self.reset_roster();
        let event = self.round.begin_countdown(now);
        self.apply_round_event(event, now);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Route one decoded message from peer `from`
    pub fn handle_message(
        &mut self,
        from: &ParticipantId,
        msg: WireMsg,
        now: u64,
    ) -> Result<(), SessionError> {
        if self.is_ended() {
            return Err(SessionError::Ended);
        }
        match self.role {
            Role::Authority => self.handle_as_authority(from, msg),
            Role::Client => {
                self.handle_as_client(msg, now);
                Ok(())
            }
        }
    }

    fn handle_as_authority(
        &mut self,
        from: &ParticipantId,
        msg: WireMsg,
    ) -> Result<(), SessionError> {
        match msg {
            WireMsg::Input(intent) => {
                self.inputs.receive(from, intent);
            }
            WireMsg::HeroSelect { id, hero_id } => {
                if &id != from {
                    debug!(from = %from, claimed = %id, "Ignoring hero choice for another participant");
                    return Ok(());
                }
                if !self.registry.contains(&id) {
                    return Err(SessionError::UnknownParticipant(id));
                }
                if !self.heroes.contains(&hero_id) {
                    return Err(SessionError::UnknownHero(hero_id));
                }
                if self.round.choose_hero(&id, &hero_id) {
                    info!(participant = %id, hero = %hero_id, "Hero confirmed");
                    self.broadcast(WireMsg::HeroSelect { id, hero_id });
                }
            }
            WireMsg::Ping { t } => self.send(Recipient::Peer(from.clone()), WireMsg::Pong { t }),
            other => debug!(from = %from, msg = ?other, "Ignoring message not meant for the authority"),
        }
        Ok(())
    }

    fn handle_as_client(&mut self, msg: WireMsg, now: u64) {
        match msg {
            WireMsg::Snapshot(snapshot) => self.apply_snapshot(snapshot, now),
            WireMsg::Shot(shot) => self.replay_shot(&shot, now),
            WireMsg::Melee(melee) => {
                debug!(participant = %melee.id, duration_ms = melee.duration_ms, "Melee swing")
            }
            WireMsg::StartRound { round, seconds } => {
                self.round.mirror_start_round(now, round, seconds)
            }
            WireMsg::RoundResult { round, winner, round_wins, .. } => {
                info!(round, ?winner, "Round result");
                self.round.mirror_round_result(round, winner, &round_wins);
            }
            WireMsg::HeroReselect { seconds } => self.round.mirror_reselect(now, seconds),
            WireMsg::MatchOver { winner, round_wins, .. } => {
                info!(?winner, "Match over");
                self.round.mirror_match_over(winner, &round_wins);
                self.status = SessionStatus::Ended(EndReason::MatchOver);
            }
            WireMsg::ClientLeft { id } => {
                self.registry.remove(&id);
                self.remotes.remove(&id);
            }
            WireMsg::HostTransfer { old_id, new_id } => {
                info!(old = %old_id, new = %new_id, "Authority handover announced");
                self.pending_transfer = Some((old_id, new_id));
            }
            WireMsg::Ping { t } => self.send(Recipient::Host, WireMsg::Pong { t }),
            WireMsg::ClientJoined { id } => debug!(participant = %id, "Peer joined"),
            other => debug!(msg = ?other, "Ignoring message not meant for a client"),
        }
    }

    /// Client: take in an authoritative snapshot
    pub(super) fn apply_snapshot(&mut self, snapshot: SnapshotMsg, now: u64) {
        if !self.guard.admit(snapshot.timestamp) {
            debug!(timestamp = snapshot.timestamp, "Discarding stale snapshot");
            return;
        }

        let mut seen = HashSet::new();
        for state in snapshot.participants {
            seen.insert(state.id.clone());
            let score = Score {
                kills: state.kills,
                deaths: state.deaths,
            };
            self.round.scores.insert(state.id.clone(), score);
            if self.me.as_ref() == Some(&state.id) {
                self.apply_local_state(&state);
            } else {
                self.apply_remote_state(&state, now);
            }
        }

        let gone: Vec<ParticipantId> = self
            .registry
            .ids()
            .into_iter()
            .filter(|id| !seen.contains(id))
            .collect();
        for id in gone {
            self.registry.remove(&id);
            self.remotes.remove(&id);
        }
    }

    fn participant_from_state(&self, state: &ParticipantState, kind: ParticipantKind) -> Participant {
        let stats = self.heroes.stats_or_default(&state.hero);
        let mut participant = Participant::new(
            state.id.clone(),
            kind,
            state.hero.clone(),
            &stats,
            state.team,
            Vec3::new(state.position.x, state.feet_y, state.position.z),
        );
        copy_vitals(&mut participant, state);
        participant
    }

    fn apply_local_state(&mut self, state: &ParticipantState) {
        let auth = Kinematics {
            position: state.position,
            feet_y: state.feet_y,
            vertical_velocity: 0.0,
            grounded: state.grounded,
        };

        if !self.registry.contains(&state.id) {
            let participant = self.participant_from_state(state, ParticipantKind::Local);
            self.shadow = Some(PredictionShadow::new(participant.body));
            self.registry.insert(participant);
            return;
        }

        let shadow = self.shadow.get_or_insert_with(|| PredictionShadow::new(auth));
        if shadow.reconcile(&auth) == Correction::Snapped {
            warn!(participant = %state.id, "Prediction diverged, snapping to authority");
        }
        let body = shadow.body;
        let max_health = self.heroes.stats_or_default(&state.hero).max_health;
        if let Some(me) = self.registry.get_mut(&state.id) {
            me.body = body;
            me.max_health = max_health;
            copy_vitals(me, state);
        }
    }

    fn apply_remote_state(&mut self, state: &ParticipantState, now: u64) {
        let kind = if state.ai {
            ParticipantKind::Ai
        } else {
            ParticipantKind::Remote
        };
        if !self.registry.contains(&state.id) {
            let participant = self.participant_from_state(state, kind);
            self.registry.insert(participant);
        }
        let max_health = self.heroes.stats_or_default(&state.hero).max_health;
        if let Some(p) = self.registry.get_mut(&state.id) {
            p.facing_yaw = state.facing_yaw;
            p.body.grounded = state.grounded;
            p.max_health = max_health;
            copy_vitals(p, state);
        }
        self.remotes
            .entry(state.id.clone())
            .or_default()
            .push(state.position, state.feet_y, now);
    }

    /// Cosmetic replay; never touches health
    fn replay_shot(&mut self, shot: &ShotEvent, now: u64) {
        let Some(speed) = shot.projectile_speed else {
            debug!(shooter = %shot.shooter, "Shot tracer");
            return;
        };
        let Some(direction) = (shot.end - shot.origin).try_normalize() else {
            return;
        };
        let ballistics = ProjectileStats {
            speed,
            gravity: shot.gravity.unwrap_or(0.0),
            radius: 0.2,
            lifetime_ms: 3_000,
        };
        self.visuals.push(Projectile::launch(
            shot.shooter.clone(),
            shot.origin,
            direction,
            &ballistics,
            0.0,
            now,
        ));
    }

    // ------------------------------------------------------------------
    // Host migration and teardown
    // ------------------------------------------------------------------

    /// Client: the authority's connection dropped
    pub fn host_left(&mut self, now: u64) -> Result<(), SessionError> {
        if self.role != Role::Client {
            return Err(SessionError::NotClient);
        }
        let Some((old_id, new_id)) = self.pending_transfer.take() else {
            warn!(host = ?self.host_id, "Authority lost without a handover");
            self.status = SessionStatus::Ended(EndReason::HostLost);
            self.teardown();
            return Ok(());
        };

        self.registry.remove(&old_id);
        self.remotes.remove(&old_id);
        self.host_id = Some(new_id.clone());
        if self.me.as_ref() == Some(&new_id) {
            self.promote(now);
        } else {
            // The new authority numbers snapshots from its own session start
            info!(host = %new_id, "Following new authority");
            self.guard.reset();
            self.remotes.clear();
        }
        Ok(())
    }

    /// Take over authority, keeping the registry as last seen
    fn promote(&mut self, now: u64) {
        info!(participants = self.registry.len(), "Promoted to authority");
        self.role = Role::Authority;
        self.host_id = self.me.clone();

        if let (Some(shadow), Some(me)) = (self.shadow.take(), self.me.clone()) {
            if let Some(local) = self.registry.get_mut(&me) {
                local.body = shadow.body;
            }
        }
        for id in self.registry.ids() {
            let Some(p) = self.registry.get(&id) else {
                continue;
            };
            if p.kind == ParticipantKind::Remote {
                self.inputs.register(id.clone());
            }
            if let Some(n) = id.as_str().strip_prefix("ai-").and_then(|n| n.parse::<u32>().ok()) {
                self.next_ai = self.next_ai.max(n + 1);
            }
            let score = self.round.scores.get(&id).copied().unwrap_or_default();
            self.round.totals.entry(id).or_insert(score);
        }
        self.remotes.clear();
        self.visuals.clear();
        self.guard.reset();
        self.snapshots.reset();
        self.snapshots.force_next();
        self.round.adopt_authority(now);
    }

    /// Stop simulating and clear all state. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if self.status == SessionStatus::Active {
            self.status = SessionStatus::Ended(EndReason::TornDown);
        }
        if !self.registry.is_empty() {
            info!(participants = self.registry.len(), "Session torn down");
        }
        self.registry.clear();
        self.inputs.clear();
        self.remotes.clear();
        self.projectiles.clear();
        self.visuals.clear();
        self.shadow = None;
        self.pending_transfer = None;
        self.guard.reset();
        self.snapshots.reset();
        self.round.reset();
        self.clock.reset();
        self.outbox.clear();
    }

    // ------------------------------------------------------------------
    // Shared helpers used by the tick
    // ------------------------------------------------------------------

    /// Alive participants `attacker` may hit: everyone else, minus teammates
    /// in team modes
    pub(super) fn targets_for(&self, attacker: &ParticipantId) -> Vec<TargetView> {
        let team = self.registry.get(attacker).map(|p| p.team).unwrap_or(0);
        let team_mode = self.config.mode.is_team_mode();
        self.registry
            .iter()
            .filter(|p| p.alive && &p.id != attacker)
            .filter(|p| !(team_mode && team != 0 && p.team == team))
            .map(|p| TargetView::of(p, &self.heroes.stats_or_default(&p.hero)))
            .collect()
    }

    /// End the active round if the win policy says so
    pub(super) fn check_round_over(&mut self, now: u64) {
        if !self.round.is_active() {
            return;
        }
        let Some(verdict) = self.win_policy.evaluate(&self.registry, &self.round.scores) else {
            return;
        };
        if let Some(event) = self.round.end_round(now, verdict) {
            self.apply_round_event(event, now);
        }
    }

    /// Put everyone back on a spawn point with full health and ammo
    pub(super) fn reset_roster(&mut self) {
        for id in self.registry.ids() {
            let Some(p) = self.registry.get(&id) else {
                continue;
            };
            let stats = self.heroes.stats_or_default(&p.hero);
            let spawn = self.spawn_policy.spawn_point(&self.arena, p.team);
            if let Some(p) = self.registry.get_mut(&id) {
                p.respawn(spawn, &stats);
                p.facing_yaw = 0.0;
            }
            self.inputs.consume(&id);
        }
        self.projectiles.clear();
        self.snapshots.force_next();
    }

    pub(super) fn score_lines(&self, scores: &HashMap<ParticipantId, Score>) -> Vec<ScoreLine> {
        self.registry
            .iter()
            .map(|p| {
                let score = scores.get(&p.id).copied().unwrap_or_default();
                ScoreLine::new(p.id.clone(), p.team, score)
            })
            .collect()
    }

    /// Current standings, match-wide totals on the authority
    pub fn scoreboard(&self) -> Vec<ScoreLine> {
        match self.role {
            Role::Authority => self.score_lines(&self.round.totals),
            Role::Client => self.score_lines(&self.round.scores),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            phase: self.round.phase.name().to_string(),
            round: self.round.current_round,
            participants: self.registry.len(),
            ended: self.is_ended(),
            scores: self.scoreboard(),
        }
    }

    /// Carry out one round transition and tell the peers
    pub(super) fn apply_round_event(&mut self, event: RoundEvent, now: u64) {
        match event {
            RoundEvent::CountdownStarted { round, seconds, ends_at } => {
                let blocked_until = ends_at + self.round.timings().shot_grace_ms;
                for p in self.registry.iter_mut() {
                    p.weapon.shots_blocked_until = blocked_until;
                }
                self.broadcast(WireMsg::StartRound { round, seconds });
            }
            RoundEvent::RoundStarted { round } => debug!(round, now, "Round live"),
            RoundEvent::RoundEnded { round, verdict } => {
                let winner = match verdict {
                    RoundVerdict::Winner(side) => Some(side),
                    RoundVerdict::Draw => None,
                };
                let msg = WireMsg::RoundResult {
                    round,
                    winner,
                    scores: self.score_lines(&self.round.scores),
                    round_wins: self.round.round_wins_list(),
                };
                self.broadcast(msg);
            }
            RoundEvent::ReselectOpened { seconds } => self.broadcast(WireMsg::HeroReselect { seconds }),
            RoundEvent::ReselectClosed { choices } => {
                for (id, hero) in choices {
                    if let Some(p) = self.registry.get_mut(&id) {
                        p.hero = hero;
                    }
                }
                self.reset_roster();
            }
            RoundEvent::MatchOver { winner } => {
                let msg = WireMsg::MatchOver {
                    winner,
                    scores: self.score_lines(&self.round.totals),
                    round_wins: self.round.round_wins_list(),
                };
                self.broadcast(msg);
                self.status = SessionStatus::Ended(EndReason::MatchOver);
            }
        }
    }

    /// Build the authoritative snapshot for `now`
    pub(super) fn build_snapshot(&mut self, now: u64) -> SnapshotMsg {
        self.snapshots.build(now, &self.registry, &self.round.scores)
    }
}

/// Health, ammo and reload state are taken as-is from the authority
fn copy_vitals(p: &mut Participant, state: &ParticipantState) {
    p.health = state.health;
    p.alive = state.alive;
    p.team = state.team;
    p.hero = state.hero.clone();
    p.weapon.ammo = state.ammo;
    p.weapon.magazine_size = state.magazine_size;
    p.weapon.reloading = state.reloading;
    p.weapon.reload_end_at = state.reload_end_at;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::arena::FlatArena;
    use crate::game::collab::{ArenaBuilder, MapData};
    use crate::game::physics::KinematicMover;

    fn host() -> Session {
        let config = SessionConfig::default();
        let arena = FlatArena
            .build(&MapData::courtyard(), &config.mode)
            .unwrap();
        Session::host(config, arena, HeroCatalog::default(), Collaborators::new(KinematicMover))
    }

    #[test]
    fn join_broadcasts_and_registers_input() {
        let mut session = host();
        session.peer_joined("p1".into(), None, 0).unwrap();
        assert!(session.inputs.contains(&"p1".into()));
        assert_eq!(session.participant(&"p1".into()).unwrap().hero, DEFAULT_HERO);
        assert_eq!(
            session.drain_outbox(),
            vec![Outbound {
                to: Recipient::All,
                msg: WireMsg::ClientJoined { id: "p1".into() }
            }]
        );
    }

    #[test]
    fn join_rejects_duplicates_unknown_heroes_and_full_rosters() {
        let mut session = host();
        session.config.max_participants = 2;
        session.peer_joined("p1".into(), None, 0).unwrap();
        assert!(matches!(
            session.peer_joined("p1".into(), None, 0),
            Err(SessionError::DuplicateParticipant(_))
        ));
        assert!(matches!(
            session.peer_joined("p2".into(), Some("wizard"), 0),
            Err(SessionError::UnknownHero(_))
        ));
        session.add_ai(None, 0).unwrap();
        assert!(matches!(
            session.peer_joined("p3".into(), None, 0),
            Err(SessionError::RosterFull(2))
        ));
    }

    #[test]
    fn leave_drops_participant_state() {
        let mut session = host();
        session.peer_joined("p1".into(), None, 0).unwrap();
        session.drain_outbox();
        session.peer_left(&"p1".into(), 10).unwrap();
        assert!(session.registry().is_empty());
        assert!(!session.inputs.contains(&"p1".into()));
        assert!(!session.round.totals.contains_key(&ParticipantId::from("p1")));
        assert!(matches!(
            session.peer_left(&"p1".into(), 10),
            Err(SessionError::UnknownParticipant(_))
        ));
    }

    #[test]
    fn joiner_during_countdown_cannot_fire_early() {
        let mut session = host();
        session.start_match(1_000).unwrap();
        session.peer_joined("p1".into(), None, 1_500).unwrap();
        let p = session.participant(&"p1".into()).unwrap();
        assert_eq!(p.weapon.shots_blocked_until, 4_000 + 250);
    }

    #[test]
    fn ping_is_answered_to_sender() {
        let mut session = host();
        session.peer_joined("p1".into(), None, 0).unwrap();
        session.drain_outbox();
        session
            .handle_message(&"p1".into(), WireMsg::Ping { t: 42 }, 0)
            .unwrap();
        assert_eq!(
            session.drain_outbox(),
            vec![Outbound {
                to: Recipient::Peer("p1".into()),
                msg: WireMsg::Pong { t: 42 }
            }]
        );
    }

    #[test]
    fn hero_choice_for_someone_else_is_ignored() {
        let mut session = host();
        session.peer_joined("p1".into(), None, 0).unwrap();
        session.drain_outbox();
        let msg = WireMsg::HeroSelect {
            id: "p2".into(),
            hero_id: "bruiser".into(),
        };
        session.handle_message(&"p1".into(), msg, 0).unwrap();
        assert!(session.drain_outbox().is_empty());
    }

    #[test]
    fn client_cannot_run_lifecycle_operations() {
        let config = SessionConfig::default();
        let arena = FlatArena.build(&MapData::courtyard(), &config.mode).unwrap();
        let mut client = Session::client(
            "me".into(),
            "host".into(),
            config,
            arena,
            HeroCatalog::default(),
            Collaborators::new(KinematicMover),
        );
        assert!(matches!(
            client.peer_joined("p1".into(), None, 0),
            Err(SessionError::NotAuthority)
        ));
        assert!(matches!(client.start_match(0), Err(SessionError::NotAuthority)));
    }
}
