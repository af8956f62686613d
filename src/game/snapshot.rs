//! Snapshot cadence, construction and the client-side ordering guard

use std::collections::HashMap;

use crate::ws::protocol::{ParticipantState, SnapshotMsg};

use super::participant::{Participant, ParticipantKind, ParticipantRegistry};
use super::rules::Score;
use super::ParticipantId;

/// Builds snapshots on a fixed cadence, with an out-of-band override
#[derive(Debug)]
pub struct SnapshotBuilder {
    interval_ms: u64,
    last_sent: Option<u64>,
    forced: bool,
}

impl SnapshotBuilder {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_sent: None,
            forced: false,
        }
    }

    /// Check if a snapshot should go out at `now`
    pub fn due(&self, now: u64) -> bool {
        self.forced
            || self
                .last_sent
                .map_or(true, |last| now.saturating_sub(last) >= self.interval_ms)
    }

    /// Send on the next check regardless of the cadence (used after respawns)
    pub fn force_next(&mut self) {
        self.forced = true;
    }

    /// Build a snapshot message and restart the cadence
    pub fn build(
        &mut self,
        now: u64,
        registry: &ParticipantRegistry,
        scores: &HashMap<ParticipantId, Score>,
    ) -> SnapshotMsg {
        self.last_sent = Some(now);
        self.forced = false;
        SnapshotMsg {
            timestamp: now,
            participants: registry
                .iter()
                .map(|p| participant_state(p, scores.get(&p.id).copied().unwrap_or_default()))
                .collect(),
        }
    }

    pub fn reset(&mut self) {
        self.last_sent = None;
        self.forced = false;
    }
}

fn participant_state(p: &Participant, score: Score) -> ParticipantState {
    ParticipantState {
        id: p.id.clone(),
        ai: p.kind == ParticipantKind::Ai,
        position: p.body.position,
        feet_y: p.body.feet_y,
        grounded: p.body.grounded,
        health: p.health,
        alive: p.alive,
        facing_yaw: p.facing_yaw,
        ammo: p.weapon.ammo,
        magazine_size: p.weapon.magazine_size,
        reloading: p.weapon.reloading,
        reload_end_at: p.weapon.reload_end_at,
        team: p.team,
        hero: p.hero.clone(),
        kills: score.kills,
        deaths: score.deaths,
    }
}

/// Accepts only snapshots strictly newer than the last one applied
#[derive(Debug, Default)]
pub struct SnapshotGuard {
    last_applied: Option<u64>,
}

impl SnapshotGuard {
    /// Returns true (and records the timestamp) if the snapshot should apply
    pub fn admit(&mut self, timestamp: u64) -> bool {
        if self.last_applied.is_some_and(|last| timestamp <= last) {
            return false;
        }
        self.last_applied = Some(timestamp);
        true
    }

    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }

    pub fn reset(&mut self) {
        self.last_applied = None;
    }
}

/// Snapshot traffic counters for debugging
#[derive(Debug, Default)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub total_bytes: u64,
    pub avg_participants_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, participant_count: usize, bytes: usize) {
        self.total_snapshots += 1;
        self.total_bytes += bytes as u64;

        // Running average
        let n = self.total_snapshots as f32;
        self.avg_participants_per_snapshot =
            self.avg_participants_per_snapshot * ((n - 1.0) / n) + (participant_count as f32 / n);
    }
}
