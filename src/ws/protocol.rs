//! Peer-to-peer wire protocol.
//!
//! Every message is a flat JSON object tagged by `"type"`. Receivers ignore
//! fields they do not know, so a newer peer can add fields without breaking
//! an older one.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::game::rules::{Score, Side};
use crate::game::{InputIntent, ParticipantId};

/// Messages exchanged between the authority and its peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WireMsg {
    /// Peer → authority, one per client tick
    Input(InputIntent),

    /// Authority → peers, on the snapshot cadence or forced
    Snapshot(SnapshotMsg),

    /// Cosmetic replay of a shot; never carries damage
    Shot(ShotEvent),

    /// Cosmetic replay of a melee swing
    Melee(MeleeEvent),

    /// Countdown for the next round begins
    StartRound { round: u32, seconds: u32 },

    /// A round finished; `winner` is null for a draw
    RoundResult {
        round: u32,
        winner: Option<Side>,
        scores: Vec<ScoreLine>,
        round_wins: Vec<SideWins>,
    },

    /// The match finished
    MatchOver {
        winner: Option<Side>,
        scores: Vec<ScoreLine>,
        round_wins: Vec<SideWins>,
    },

    /// Hero reselection window opened
    HeroReselect { seconds: u32 },

    /// A participant confirmed a hero
    HeroSelect { id: ParticipantId, hero_id: String },

    ClientJoined { id: ParticipantId },

    ClientLeft { id: ParticipantId },

    /// The lobby moved authority from `old_id` to `new_id`
    HostTransfer {
        old_id: ParticipantId,
        new_id: ParticipantId,
    },

    /// Host runtime → connecting socket: who you are and who hosts
    Welcome {
        id: ParticipantId,
        host_id: Option<ParticipantId>,
    },

    /// Host runtime → connecting socket: the session refused it; the socket closes next
    JoinRejected { reason: String },

    /// Latency probe
    Ping { t: u64 },

    /// Echo of a ping
    Pong { t: u64 },
}

/// Authoritative world state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMsg {
    /// Milliseconds since session start on the authority
    pub timestamp: u64,
    pub participants: Vec<ParticipantState>,
}

/// Synchronized fields of one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantState {
    pub id: ParticipantId,
    #[serde(default)]
    pub ai: bool,
    /// Eye position
    pub position: Vec3,
    pub feet_y: f32,
    pub grounded: bool,
    pub health: f32,
    pub alive: bool,
    pub facing_yaw: f32,
    pub ammo: u32,
    pub magazine_size: u32,
    pub reloading: bool,
    pub reload_end_at: u64,
    pub team: u8,
    pub hero: String,
    #[serde(default)]
    pub kills: u32,
    #[serde(default)]
    pub deaths: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShotEvent {
    pub shooter: ParticipantId,
    pub origin: Vec3,
    /// Impact point for hit-scan, aim point for projectiles
    pub end: Vec3,
    /// 0xRRGGBB
    pub tracer_color: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projectile_speed: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gravity: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeleeEvent {
    pub id: ParticipantId,
    pub duration_ms: u64,
}

/// Scoreboard row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreLine {
    pub id: ParticipantId,
    pub team: u8,
    pub kills: u32,
    pub deaths: u32,
}

impl ScoreLine {
    pub fn new(id: ParticipantId, team: u8, score: Score) -> Self {
        Self {
            id,
            team,
            kills: score.kills,
            deaths: score.deaths,
        }
    }
}

/// Round wins of one side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideWins {
    pub side: Side,
    pub wins: u32,
}

/// Wire decoding errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn encode(msg: &WireMsg) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(msg)?)
}

pub fn decode(text: &str) -> Result<WireMsg, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tags_are_camel_case() {
        let text = encode(&WireMsg::HostTransfer {
            old_id: "a".into(),
            new_id: "b".into(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"type": "hostTransfer", "oldId": "a", "newId": "b"}));

        let text = encode(&WireMsg::StartRound { round: 2, seconds: 3 }).unwrap();
        assert!(text.contains("\"type\":\"startRound\""));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let msg = decode(r#"{"type":"clientLeft","id":"p2","reason":"timeout","v":7}"#).unwrap();
        assert_eq!(msg, WireMsg::ClientLeft { id: "p2".into() });
    }

    #[test]
    fn input_fills_missing_fields_with_defaults() {
        let msg = decode(r#"{"type":"input","seq":4,"jump":true,"extra":1}"#).unwrap();
        let WireMsg::Input(intent) = msg else {
            panic!("expected input");
        };
        assert_eq!(intent.seq, 4);
        assert!(intent.jump);
        assert!(!intent.fire);
        assert_eq!(intent.aim, Vec3::NEG_Z);
    }

    #[test]
    fn draw_serializes_null_winner() {
        let text = encode(&WireMsg::RoundResult {
            round: 1,
            winner: None,
            scores: Vec::new(),
            round_wins: Vec::new(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(value["winner"].is_null());
        assert_eq!(value["roundWins"], json!([]));
    }

    #[test]
    fn shot_omits_absent_ballistics() {
        let text = encode(&WireMsg::Shot(ShotEvent {
            shooter: "p".into(),
            origin: Vec3::ZERO,
            end: Vec3::NEG_Z,
            tracer_color: 0xffffff,
            projectile_speed: None,
            gravity: None,
        }))
        .unwrap();
        assert!(!text.contains("projectileSpeed"));
        assert!(text.contains("tracerColor"));
    }

    #[test]
    fn rejection_carries_its_reason() {
        let text = encode(&WireMsg::JoinRejected {
            reason: "Roster is full (16 participants)".into(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "joinRejected");
        assert_eq!(value["reason"], "Roster is full (16 participants)");
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        assert!(matches!(decode("{not json"), Err(ProtocolError::Json(_))));
    }
}
