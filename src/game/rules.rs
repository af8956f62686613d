//! Game mode description and the policy objects a mode plugs into the core

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use super::collab::Arena;
use super::participant::{Participant, ParticipantRegistry};
use super::ParticipantId;

/// How participants are grouped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamLayout {
    FreeForAll,
    /// Number of teams, ids 1..=n
    Teams(u8),
}

/// How a round is won
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinRule {
    /// First side to this many kills; participants respawn
    KillLimit(u32),
    /// Last side standing; no respawns
    Elimination,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameMode {
    pub teams: TeamLayout,
    pub win: WinRule,
    /// Round wins needed to take the match
    pub rounds_to_win: u32,
    pub respawn_delay_ms: u64,
}

impl GameMode {
    pub fn is_team_mode(&self) -> bool {
        matches!(self.teams, TeamLayout::Teams(_))
    }

    pub fn respawns(&self) -> bool {
        matches!(self.win, WinRule::KillLimit(_))
    }

    pub fn win_policy(&self) -> Box<dyn WinPolicy> {
        match self.win {
            WinRule::KillLimit(limit) => Box::new(KillLimit { limit }),
            WinRule::Elimination => Box::new(Elimination),
        }
    }

    pub fn spawn_policy(&self) -> Box<dyn SpawnPolicy> {
        match self.teams {
            TeamLayout::FreeForAll => Box::new(RoundRobinSpawns::default()),
            TeamLayout::Teams(count) => Box::new(TeamBalancedSpawns::new(count)),
        }
    }
}

impl Default for GameMode {
    fn default() -> Self {
        Self {
            teams: TeamLayout::FreeForAll,
            win: WinRule::KillLimit(10),
            rounds_to_win: 2,
            respawn_delay_ms: 3_000,
        }
    }
}

/// The unit that wins a round: a lone participant in FFA, a team otherwise
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Side {
    Solo(ParticipantId),
    Team(u8),
}

impl Side {
    pub fn of(participant: &Participant) -> Self {
        if participant.team == 0 {
            Side::Solo(participant.id.clone())
        } else {
            Side::Team(participant.team)
        }
    }
}

/// Per-participant kill/death tally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub kills: u32,
    pub deaths: u32,
}

/// Outcome of a finished round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundVerdict {
    Winner(Side),
    /// Nobody left standing
    Draw,
}

/// Decides whether the active round is over
pub trait WinPolicy: Send {
    fn evaluate(
        &self,
        registry: &ParticipantRegistry,
        scores: &HashMap<ParticipantId, Score>,
    ) -> Option<RoundVerdict>;
}

pub struct KillLimit {
    pub limit: u32,
}

impl WinPolicy for KillLimit {
    fn evaluate(
        &self,
        registry: &ParticipantRegistry,
        scores: &HashMap<ParticipantId, Score>,
    ) -> Option<RoundVerdict> {
        let mut per_side: HashMap<Side, u32> = HashMap::new();
        for p in registry.iter() {
            let kills = scores.get(&p.id).map(|s| s.kills).unwrap_or(0);
            *per_side.entry(Side::of(p)).or_default() += kills;
        }
        per_side
            .into_iter()
            .filter(|(_, kills)| *kills >= self.limit)
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(side, _)| RoundVerdict::Winner(side))
    }
}

pub struct Elimination;

impl WinPolicy for Elimination {
    fn evaluate(
        &self,
        registry: &ParticipantRegistry,
        _scores: &HashMap<ParticipantId, Score>,
    ) -> Option<RoundVerdict> {
        let sides: BTreeSet<Side> = registry.iter().map(Side::of).collect();
        if sides.len() < 2 {
            // A lone side cannot be eliminated down to a winner
            return None;
        }
        let mut alive: Vec<Side> = registry
            .iter()
            .filter(|p| p.alive)
            .map(Side::of)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        match alive.len() {
            0 => Some(RoundVerdict::Draw),
            1 => alive.pop().map(RoundVerdict::Winner),
            _ => None,
        }
    }
}

/// Picks teams and spawn points for joining and respawning participants
pub trait SpawnPolicy: Send {
    fn assign_team(&mut self, registry: &ParticipantRegistry) -> u8;
    fn spawn_point(&mut self, arena: &Arena, team: u8) -> Vec3;
}

/// Free-for-all: everyone on team 0, spawn points in rotation
#[derive(Debug, Default)]
pub struct RoundRobinSpawns {
    cursor: usize,
}

impl SpawnPolicy for RoundRobinSpawns {
    fn assign_team(&mut self, _registry: &ParticipantRegistry) -> u8 {
        0
    }

    fn spawn_point(&mut self, arena: &Arena, _team: u8) -> Vec3 {
        let point = pick(&arena.spawn_points, self.cursor);
        self.cursor = self.cursor.wrapping_add(1);
        point
    }
}

/// Teams mode: joiners go to the smallest team, spawn at their team's points
#[derive(Debug)]
pub struct TeamBalancedSpawns {
    team_count: u8,
    cursors: HashMap<u8, usize>,
}

impl TeamBalancedSpawns {
    pub fn new(team_count: u8) -> Self {
        Self {
            team_count: team_count.max(1),
            cursors: HashMap::new(),
        }
    }
}

impl SpawnPolicy for TeamBalancedSpawns {
    fn assign_team(&mut self, registry: &ParticipantRegistry) -> u8 {
        (1..=self.team_count)
            .min_by_key(|team| (registry.iter().filter(|p| p.team == *team).count(), *team))
            .unwrap_or(1)
    }

    fn spawn_point(&mut self, arena: &Arena, team: u8) -> Vec3 {
        let cursor = self.cursors.entry(team).or_default();
        let points = arena
            .team_spawns
            .get(&team)
            .filter(|points| !points.is_empty())
            .unwrap_or(&arena.spawn_points);
        let point = pick(points, *cursor);
        *cursor = cursor.wrapping_add(1);
        point
    }
}

fn pick(points: &[Vec3], cursor: usize) -> Vec3 {
    if points.is_empty() {
        Vec3::ZERO
    } else {
        points[cursor % points.len()]
    }
}
