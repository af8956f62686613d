//! Error types for the simulation core

use super::ParticipantId;

/// Errors returned by [`Session`](super::Session) operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Operation requires the authority role")]
    NotAuthority,

    #[error("Operation requires the client role")]
    NotClient,

    #[error("Unknown participant: {0}")]
    UnknownParticipant(ParticipantId),

    #[error("Participant already present: {0}")]
    DuplicateParticipant(ParticipantId),

    #[error("Roster is full ({0} participants)")]
    RosterFull(usize),

    #[error("Unknown hero: {0}")]
    UnknownHero(String),

    #[error("Session has ended")]
    Ended,

    #[error(transparent)]
    Arena(#[from] ArenaError),
}

/// Errors from building an arena out of map data
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    #[error("Map has no spawn points")]
    NoSpawnPoints,

    #[error("Team {0} has no spawn points")]
    NoTeamSpawns(u8),

    #[error("Invalid arena size: {0}")]
    InvalidSize(f32),
}
