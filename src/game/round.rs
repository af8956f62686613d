//! Round / match state machine.
//!
//! `Idle → Countdown → Active → RoundEnd → HeroReselect → Countdown …`
//! until a side reaches the round-win threshold, then `MatchOver`.
//! The authority drives every transition; clients mirror the phase from the
//! messages the authority sends.

use std::collections::HashMap;
use tracing::info;

use super::rules::{RoundVerdict, Score, Side};
use super::ParticipantId;
use crate::ws::protocol::SideWins;

/// Durations of the timed phases
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundTimings {
    pub countdown_secs: u32,
    /// Extra time after the countdown before anyone may fire
    pub shot_grace_ms: u64,
    /// How long the round outcome banner holds input frozen
    pub round_end_ms: u64,
    pub reselect_secs: u32,
}

impl Default for RoundTimings {
    fn default() -> Self {
        Self {
            countdown_secs: 3,
            shot_grace_ms: 250,
            round_end_ms: 3_000,
            reselect_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundPhase {
    /// Session created, no round started yet
    Idle,
    Countdown { ends_at: u64 },
    Active,
    RoundEnd { until: u64, verdict: RoundVerdict },
    HeroReselect { deadline: u64 },
    MatchOver { winner: Option<Side> },
}

impl RoundPhase {
    pub fn name(&self) -> &'static str {
        match self {
            RoundPhase::Idle => "idle",
            RoundPhase::Countdown { .. } => "countdown",
            RoundPhase::Active => "active",
            RoundPhase::RoundEnd { .. } => "roundEnd",
            RoundPhase::HeroReselect { .. } => "heroReselect",
            RoundPhase::MatchOver { .. } => "matchOver",
        }
    }
}

/// Transitions the session has to act on, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundEvent {
    CountdownStarted { round: u32, seconds: u32, ends_at: u64 },
    RoundStarted { round: u32 },
    RoundEnded { round: u32, verdict: RoundVerdict },
    ReselectOpened { seconds: u32 },
    /// Apply these hero choices and reset everyone to spawn
    ReselectClosed { choices: HashMap<ParticipantId, String> },
    MatchOver { winner: Option<Side> },
}

#[derive(Debug)]
pub struct MatchState {
    pub phase: RoundPhase,
    pub current_round: u32,
    pub rounds_to_win: u32,
    pub round_wins: HashMap<Side, u32>,
    /// Kills and deaths in the current round
    pub scores: HashMap<ParticipantId, Score>,
    /// Kills and deaths over the whole match
    pub totals: HashMap<ParticipantId, Score>,
    timings: RoundTimings,
    hero_choices: HashMap<ParticipantId, String>,
}

impl MatchState {
    pub fn new(rounds_to_win: u32, timings: RoundTimings) -> Self {
        Self {
            phase: RoundPhase::Idle,
            current_round: 0,
            rounds_to_win: rounds_to_win.max(1),
            round_wins: HashMap::new(),
            scores: HashMap::new(),
            totals: HashMap::new(),
            timings,
            hero_choices: HashMap::new(),
        }
    }

    pub fn timings(&self) -> &RoundTimings {
        &self.timings
    }

    /// Whether combat and input are live
    pub fn is_active(&self) -> bool {
        self.phase == RoundPhase::Active
    }

    pub fn is_over(&self) -> bool {
        matches!(self.phase, RoundPhase::MatchOver { .. })
    }

    /// End of the running countdown, if any
    pub fn countdown_end(&self) -> Option<u64> {
        match self.phase {
            RoundPhase::Countdown { ends_at } => Some(ends_at),
            _ => None,
        }
    }

    /// Open the countdown for the next round. Clears the per-round scores.
    pub fn begin_countdown(&mut self, now: u64) -> RoundEvent {
        self.current_round += 1;
        self.scores.clear();
        let seconds = self.timings.countdown_secs;
        let ends_at = now + u64::from(seconds) * 1_000;
        self.phase = RoundPhase::Countdown { ends_at };
        info!(round = self.current_round, seconds, "Round countdown");
        RoundEvent::CountdownStarted {
            round: self.current_round,
            seconds,
            ends_at,
        }
    }

    /// Make sure a (possibly new) participant has score rows
    pub fn enroll(&mut self, id: &ParticipantId) {
        self.scores.entry(id.clone()).or_default();
        self.totals.entry(id.clone()).or_default();
    }

    pub fn record_kill(&mut self, killer: Option<&ParticipantId>, victim: &ParticipantId) {
        for table in [&mut self.scores, &mut self.totals] {
            table.entry(victim.clone()).or_default().deaths += 1;
            if let Some(killer) = killer.filter(|k| *k != victim) {
                table.entry(killer.clone()).or_default().kills += 1;
            }
        }
    }

    /// Close the active round with `verdict`
    pub fn end_round(&mut self, now: u64, verdict: RoundVerdict) -> Option<RoundEvent> {
        if !self.is_active() {
            return None;
        }
        if let RoundVerdict::Winner(side) = &verdict {
            *self.round_wins.entry(side.clone()).or_default() += 1;
        }
        info!(round = self.current_round, ?verdict, "Round ended");
        self.phase = RoundPhase::RoundEnd {
            until: now + self.timings.round_end_ms,
            verdict: verdict.clone(),
        };
        Some(RoundEvent::RoundEnded {
            round: self.current_round,
            verdict,
        })
    }

    /// Record a hero choice. Only accepted while reselection is open.
    pub fn choose_hero(&mut self, id: &ParticipantId, hero: &str) -> bool {
        if !matches!(self.phase, RoundPhase::HeroReselect { .. }) {
            return false;
        }
        self.hero_choices.insert(id.clone(), hero.to_string());
        true
    }

    /// Run deadline-driven transitions. `humans` are the participants whose
    /// confirmation can close hero reselection early.
    pub fn advance(&mut self, now: u64, humans: &[ParticipantId]) -> Vec<RoundEvent> {
        let mut events = Vec::new();
        match self.phase.clone() {
            RoundPhase::Countdown { ends_at } if now >= ends_at => {
                self.phase = RoundPhase::Active;
                info!(round = self.current_round, "Round active");
                events.push(RoundEvent::RoundStarted {
                    round: self.current_round,
                });
            }
            RoundPhase::RoundEnd { until, .. } if now >= until => {
                match self.leader().filter(|(_, wins)| *wins >= self.rounds_to_win) {
                    Some((side, _)) => {
                        let winner = Some(side);
                        self.phase = RoundPhase::MatchOver {
                            winner: winner.clone(),
                        };
                        info!(?winner, "Match over");
                        events.push(RoundEvent::MatchOver { winner });
                    }
                    None => {
                        let seconds = self.timings.reselect_secs;
                        self.hero_choices.clear();
                        self.phase = RoundPhase::HeroReselect {
                            deadline: now + u64::from(seconds) * 1_000,
                        };
                        events.push(RoundEvent::ReselectOpened { seconds });
                    }
                }
            }
            RoundPhase::HeroReselect { deadline } => {
                let everyone_confirmed = humans.iter().all(|id| self.hero_choices.contains_key(id));
                if now >= deadline || everyone_confirmed {
                    let choices = std::mem::take(&mut self.hero_choices);
                    events.push(RoundEvent::ReselectClosed { choices });
                    events.push(self.begin_countdown(now));
                }
            }
            _ => {}
        }
        events
    }

    /// Side with the most round wins (ties broken by side order)
    fn leader(&self) -> Option<(Side, u32)> {
        self.round_wins
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(side, wins)| (side.clone(), *wins))
    }

    pub fn round_wins_list(&self) -> Vec<SideWins> {
        let mut list: Vec<SideWins> = self
            .round_wins
            .iter()
            .map(|(side, wins)| SideWins {
                side: side.clone(),
                wins: *wins,
            })
            .collect();
        list.sort_by(|a, b| a.side.cmp(&b.side));
        list
    }

    pub fn remove_participant(&mut self, id: &ParticipantId) {
        self.scores.remove(id);
        self.totals.remove(id);
        self.hero_choices.remove(id);
        self.round_wins.remove(&Side::Solo(id.clone()));
    }

    // ------------------------------------------------------------------
    // Client-side mirroring
    // ------------------------------------------------------------------

    pub fn mirror_start_round(&mut self, now: u64, round: u32, seconds: u32) {
        self.current_round = round;
        self.scores.clear();
        self.phase = RoundPhase::Countdown {
            ends_at: now + u64::from(seconds) * 1_000,
        };
    }

    /// Countdown expiry is the one transition a client derives locally
    pub fn mirror_advance(&mut self, now: u64) -> bool {
        if let RoundPhase::Countdown { ends_at } = self.phase {
            if now >= ends_at {
                self.phase = RoundPhase::Active;
                return true;
            }
        }
        false
    }

    pub fn mirror_round_result(&mut self, round: u32, winner: Option<Side>, wins: &[SideWins]) {
        self.current_round = round;
        self.round_wins = wins.iter().map(|w| (w.side.clone(), w.wins)).collect();
        let verdict = winner.map_or(RoundVerdict::Draw, RoundVerdict::Winner);
        // Held until the authority says what comes next
        self.phase = RoundPhase::RoundEnd {
            until: u64::MAX,
            verdict,
        };
    }

    pub fn mirror_reselect(&mut self, now: u64, seconds: u32) {
        self.hero_choices.clear();
        self.phase = RoundPhase::HeroReselect {
            deadline: now + u64::from(seconds) * 1_000,
        };
    }

    pub fn mirror_match_over(&mut self, winner: Option<Side>, wins: &[SideWins]) {
        self.round_wins = wins.iter().map(|w| (w.side.clone(), w.wins)).collect();
        self.phase = RoundPhase::MatchOver { winner };
    }

    /// Replace open-ended mirrored deadlines once this peer takes authority
    pub fn adopt_authority(&mut self, now: u64) {
        if let RoundPhase::RoundEnd { until, verdict } = &self.phase {
            if *until == u64::MAX {
                self.phase = RoundPhase::RoundEnd {
                    until: now + self.timings.round_end_ms,
                    verdict: verdict.clone(),
                };
            }
        }
    }

    /// Drop every deadline and tally
    pub fn reset(&mut self) {
        self.phase = RoundPhase::Idle;
        self.current_round = 0;
        self.round_wins.clear();
        self.scores.clear();
        self.totals.clear();
        self.hero_choices.clear();
    }
}
