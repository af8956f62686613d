//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::game::round::RoundTimings;
use crate::game::rules::{GameMode, TeamLayout, WinRule};
use crate::game::SessionConfig;
use crate::util::rate_limit::INPUT_RATE_LIMIT;
use crate::util::time::{DEFAULT_FRAME_HZ, MAX_FRAME_DT_MS, SNAPSHOT_INTERVAL_MS};

/// Host configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS, comma-separated
    pub client_origin: String,

    pub game_mode: TeamLayout,
    pub win_rule: WinRule,
    pub rounds_to_win: u32,
    pub respawn_delay_ms: u64,
    pub countdown_secs: u32,
    pub reselect_secs: u32,

    /// Bots added when the host starts
    pub bot_count: u32,
    pub max_participants: usize,

    /// Host driver frequency
    pub frame_hz: u32,
    pub snapshot_interval_ms: u64,
    /// Inbound messages per second allowed per socket
    pub input_rate_limit: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT; fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let game_mode = match env::var("GAME_MODE").as_deref() {
            Err(_) | Ok("ffa") => TeamLayout::FreeForAll,
            Ok("teams") => TeamLayout::Teams(parse_or("TEAM_COUNT", 2u8)?.max(2)),
            Ok(other) => return Err(ConfigError::Invalid("GAME_MODE", other.to_string())),
        };
        let win_rule = match env::var("WIN_RULE").as_deref() {
            Err(_) | Ok("kills") => WinRule::KillLimit(parse_or("KILL_LIMIT", 10)?),
            Ok("elimination") => WinRule::Elimination,
            Ok(other) => return Err(ConfigError::Invalid("WIN_RULE", other.to_string())),
        };

        let frame_hz = parse_or("FRAME_HZ", DEFAULT_FRAME_HZ)?;
        if frame_hz == 0 {
            return Err(ConfigError::Invalid("FRAME_HZ", "0".to_string()));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),

            game_mode,
            win_rule,
            rounds_to_win: parse_or("ROUNDS_TO_WIN", 2)?,
            respawn_delay_ms: parse_or("RESPAWN_DELAY_MS", 3_000)?,
            countdown_secs: parse_or("COUNTDOWN_SECS", 3)?,
            reselect_secs: parse_or("RESELECT_SECS", 15)?,

            bot_count: parse_or("BOT_COUNT", 0)?,
            max_participants: parse_or("MAX_PARTICIPANTS", 16)?,

            frame_hz,
            snapshot_interval_ms: parse_or("SNAPSHOT_INTERVAL_MS", SNAPSHOT_INTERVAL_MS)?,
            input_rate_limit: parse_or("INPUT_RATE_LIMIT", INPUT_RATE_LIMIT)?,
        })
    }

    /// The simulation-facing part of the configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            mode: GameMode {
                teams: self.game_mode,
                win: self.win_rule,
                rounds_to_win: self.rounds_to_win,
                respawn_delay_ms: self.respawn_delay_ms,
            },
            timings: RoundTimings {
                countdown_secs: self.countdown_secs,
                reselect_secs: self.reselect_secs,
                ..RoundTimings::default()
            },
            snapshot_interval_ms: self.snapshot_interval_ms,
            interpolation_delay_ms: self.snapshot_interval_ms,
            max_frame_dt_ms: MAX_FRAME_DT_MS,
            max_participants: self.max_participants,
        }
    }
}

/// Read `key`, falling back to `default` when unset
fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(key, raw)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            server_addr: "127.0.0.1:8080".parse().unwrap(),
            log_level: "info".into(),
            client_origin: "http://localhost".into(),
            game_mode: TeamLayout::Teams(2),
            win_rule: WinRule::Elimination,
            rounds_to_win: 3,
            respawn_delay_ms: 1_000,
            countdown_secs: 5,
            reselect_secs: 10,
            bot_count: 2,
            max_participants: 8,
            frame_hz: 60,
            snapshot_interval_ms: 50,
            input_rate_limit: 90,
        }
    }

    #[test]
    fn session_config_carries_mode_and_timings() {
        let session = sample().session_config();
        assert_eq!(session.mode.teams, TeamLayout::Teams(2));
        assert_eq!(session.mode.win, WinRule::Elimination);
        assert_eq!(session.mode.rounds_to_win, 3);
        assert_eq!(session.timings.countdown_secs, 5);
        assert_eq!(session.timings.reselect_secs, 10);
        assert_eq!(session.timings.shot_grace_ms, 250);
        assert_eq!(session.snapshot_interval_ms, 50);
        assert_eq!(session.max_participants, 8);
    }

    #[test]
    fn unset_keys_fall_back() {
        assert_eq!(parse_or("ARENA_SYNC_TEST_UNSET_KEY", 7u32).unwrap(), 7);
    }
}
