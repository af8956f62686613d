//! Time utilities for the simulation clock

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Frame rate of the host driver (stands in for the animation frame)
pub const DEFAULT_FRAME_HZ: u32 = 60;
/// Minimum spacing between two scheduled snapshots (~30 Hz)
pub const SNAPSHOT_INTERVAL_MS: u64 = 33;
/// Upper bound for a single frame's dt
pub const MAX_FRAME_DT_MS: u64 = 50;

/// Millisecond clock relative to session start.
///
/// Every timestamp inside a [`Session`](crate::game::Session) (snapshot time,
/// respawn deadlines, reload ends) is expressed on this clock.
#[derive(Debug, Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes per-frame dt from successive timestamps.
///
/// The first frame has no predecessor and yields `0.0`. Long gaps (a
/// backgrounded tab, a stalled host) are clamped to `max_dt_ms` so the
/// movement integrator never sees a huge step.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Option<u64>,
    max_dt_ms: u64,
}

impl FrameClock {
    pub fn new(max_dt_ms: u64) -> Self {
        Self {
            last: None,
            max_dt_ms,
        }
    }

    /// Advance to `now_ms`, returning dt in seconds
    pub fn advance(&mut self, now_ms: u64) -> f32 {
        let dt_ms = match self.last {
            Some(prev) => now_ms.saturating_sub(prev).min(self.max_dt_ms),
            None => 0,
        };
        self.last = Some(now_ms);
        dt_ms as f32 / 1000.0
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new(MAX_FRAME_DT_MS)
    }
}
