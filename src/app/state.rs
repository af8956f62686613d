//! Application state shared across routes and sockets

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::app::driver::{DriverEvent, Envelope};
use crate::config::Config;
use crate::game::{ParticipantId, SessionSummary};

/// Buffered socket events before senders wait on the driver
const EVENT_CHANNEL_SIZE: usize = 1024;
/// Outbound messages a slow socket may fall behind before it skips
const OUTBOUND_CHANNEL_SIZE: usize = 256;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub events_tx: mpsc::Sender<DriverEvent>,
    pub outbound_tx: broadcast::Sender<Envelope>,
    /// Connected peers and when they connected
    pub peers: Arc<DashMap<ParticipantId, DateTime<Utc>>>,
    /// Latest view of the session, written by the driver every frame
    pub summary: Arc<RwLock<SessionSummary>>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Build the state together with the receiving end the driver consumes
    pub fn new(config: Config) -> (Self, mpsc::Receiver<DriverEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (outbound_tx, _) = broadcast::channel(OUTBOUND_CHANNEL_SIZE);

        let state = Self {
            config: Arc::new(config),
            events_tx,
            outbound_tx,
            peers: Arc::new(DashMap::new()),
            summary: Arc::new(RwLock::new(SessionSummary::default())),
            started_at: Utc::now(),
        };
        (state, events_rx)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}
