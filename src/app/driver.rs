//! Host frame loop: owns the session and bridges it to the sockets

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::game::snapshot::SnapshotStats;
use crate::game::{ParticipantId, Recipient, Session, SessionError, SessionSummary};
use crate::util::time::SessionClock;
use crate::ws::protocol::{encode, WireMsg};

/// Snapshots between two traffic log lines
const STATS_LOG_EVERY: u64 = 600;

/// What a socket task reports to the driver
#[derive(Debug)]
pub enum DriverEvent {
    Joined(ParticipantId),
    Message(ParticipantId, WireMsg),
    Left(ParticipantId),
}

/// One encoded outbound message and who should get it
#[derive(Debug, Clone)]
pub struct Envelope {
    pub to: Recipient,
    pub text: Arc<str>,
    /// Close the recipient's socket after delivering this
    pub close: bool,
}

impl Envelope {
    /// Sockets only carry peer traffic; host-bound messages never leave the process
    pub fn is_for(&self, peer: &ParticipantId) -> bool {
        match &self.to {
            Recipient::All => true,
            Recipient::Peer(id) => id == peer,
            Recipient::Host => false,
        }
    }
}

pub struct HostDriver {
    session: Session,
    clock: SessionClock,
    events_rx: mpsc::Receiver<DriverEvent>,
    outbound_tx: broadcast::Sender<Envelope>,
    summary: Arc<RwLock<SessionSummary>>,
    stats: SnapshotStats,
    frame: Duration,
}

impl HostDriver {
    pub fn new(
        session: Session,
        clock: SessionClock,
        events_rx: mpsc::Receiver<DriverEvent>,
        outbound_tx: broadcast::Sender<Envelope>,
        summary: Arc<RwLock<SessionSummary>>,
        frame_hz: u32,
    ) -> Self {
        Self {
            session,
            clock,
            events_rx,
            outbound_tx,
            summary,
            stats: SnapshotStats::default(),
            frame: Duration::from_micros(1_000_000 / u64::from(frame_hz.max(1))),
        }
    }

    /// Run until the match ends, every socket sender is gone, or shutdown fires
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(frame_ms = self.frame.as_millis() as u64, "Host driver started");

        let mut frames = interval(self.frame);
        frames.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = frames.tick() => {
                    if !self.step() {
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.session.teardown();
        *self.summary.write() = self.session.summary();
        info!(
            snapshots = self.stats.total_snapshots,
            bytes = self.stats.total_bytes,
            "Host driver stopped"
        );
    }

    /// One frame: apply socket events, tick, publish. Returns false once the
    /// session can no longer make progress.
    pub fn step(&mut self) -> bool {
        let mut connected = true;
        loop {
            match self.events_rx.try_recv() {
                Ok(event) => self.handle_event(event),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    connected = false;
                    break;
                }
            }
        }

        self.session.tick(self.clock.now_ms());
        self.publish();
        *self.summary.write() = self.session.summary();

        if self.session.is_ended() {
            info!(status = ?self.session.status(), "Session ended");
            return false;
        }
        if !connected {
            debug!("Event channel closed");
        }
        connected
    }

    fn handle_event(&mut self, event: DriverEvent) {
        let now = self.clock.now_ms();
        let result = match event {
            DriverEvent::Joined(id) => {
                if let Err(e) = self.session.peer_joined(id.clone(), None, now) {
                    warn!(participant = %id, error = %e, "Rejecting peer");
                    self.reject(id, e.to_string());
                }
                return;
            }
            DriverEvent::Message(from, msg) => self.session.handle_message(&from, msg, now),
            DriverEvent::Left(id) => self.session.peer_left(&id, now),
        };
        match result {
            // A rejected peer never made it into the roster
            Err(SessionError::UnknownParticipant(id)) => {
                debug!(participant = %id, "Event from a peer outside the roster")
            }
            Err(e) => warn!(error = %e, "Session rejected peer event"),
            Ok(()) => {}
        }
    }

    /// Tell a peer it was refused and have its socket closed
    fn reject(&mut self, id: ParticipantId, reason: String) {
        match encode(&WireMsg::JoinRejected { reason }) {
            Ok(text) => {
                let _ = self.outbound_tx.send(Envelope {
                    to: Recipient::Peer(id),
                    text: text.into(),
                    close: true,
                });
            }
            Err(e) => warn!(error = %e, "Failed to encode rejection"),
        }
    }

    fn publish(&mut self) {
        for outbound in self.session.drain_outbox() {
            let text = match encode(&outbound.msg) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode outbound message");
                    continue;
                }
            };
            if let WireMsg::Snapshot(snapshot) = &outbound.msg {
                self.stats.record(snapshot.participants.len(), text.len());
                if self.stats.total_snapshots % STATS_LOG_EVERY == 0 {
                    debug!(
                        snapshots = self.stats.total_snapshots,
                        bytes = self.stats.total_bytes,
                        avg_participants = self.stats.avg_participants_per_snapshot,
                        "Snapshot traffic"
                    );
                }
            }
            // No subscribers simply means nobody is connected yet
            let _ = self.outbound_tx.send(Envelope {
                to: outbound.to,
                text: text.into(),
                close: false,
            });
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::arena::FlatArena;
    use crate::game::collab::{ArenaBuilder, MapData};
    use crate::game::hero::HeroCatalog;
    use crate::game::physics::KinematicMover;
    use crate::game::{Collaborators, SessionConfig};
    use tokio_test::{assert_err, assert_ok};

    struct Harness {
        driver: HostDriver,
        events_tx: mpsc::Sender<DriverEvent>,
        outbound_rx: broadcast::Receiver<Envelope>,
        summary: Arc<RwLock<SessionSummary>>,
    }

    fn harness() -> Harness {
        let config = SessionConfig::default();
        let arena = FlatArena
            .build(&MapData::courtyard(), &config.mode)
            .unwrap();
        let mut session = Session::host(
            config,
            arena,
            HeroCatalog::default(),
            Collaborators::new(KinematicMover),
        );
        session.start_match(0).unwrap();

        let (events_tx, events_rx) = mpsc::channel(16);
        let (outbound_tx, outbound_rx) = broadcast::channel(64);
        let summary = Arc::new(RwLock::new(SessionSummary::default()));
        let driver = HostDriver::new(
            session,
            SessionClock::new(),
            events_rx,
            outbound_tx,
            summary.clone(),
            60,
        );
        Harness {
            driver,
            events_tx,
            outbound_rx,
            summary,
        }
    }

    #[test]
    fn envelopes_are_filtered_by_recipient() {
        let me = ParticipantId::from("me");
        let text: Arc<str> = Arc::from("{}");
        let to = |to| Envelope {
            to,
            text: text.clone(),
            close: false,
        };
        assert!(to(Recipient::All).is_for(&me));
        assert!(to(Recipient::Peer(me.clone())).is_for(&me));
        assert!(!to(Recipient::Peer("other".into())).is_for(&me));
        assert!(!to(Recipient::Host).is_for(&me));
    }

    #[tokio::test]
    async fn joined_peer_is_announced_and_counted() {
        let mut h = harness();
        assert_ok!(h.events_tx.send(DriverEvent::Joined("p1".into())).await);

        assert!(h.driver.step());
        assert_eq!(h.summary.read().participants, 1);
        assert_eq!(h.summary.read().phase, "countdown");

        let mut saw_join = false;
        while let Ok(envelope) = h.outbound_rx.try_recv() {
            let msg = crate::ws::protocol::decode(&envelope.text).unwrap();
            if msg == (WireMsg::ClientJoined { id: "p1".into() }) {
                saw_join = true;
            }
        }
        assert!(saw_join);
    }

    #[tokio::test]
    async fn ping_is_answered_to_the_sender_only() {
        let mut h = harness();
        assert_ok!(h.events_tx.send(DriverEvent::Joined("p1".into())).await);
        assert_ok!(
            h.events_tx
                .send(DriverEvent::Message("p1".into(), WireMsg::Ping { t: 42 }))
                .await
        );
        h.driver.step();

        let pong = std::iter::from_fn(|| h.outbound_rx.try_recv().ok())
            .find(|e| e.text.contains("pong"))
            .unwrap();
        assert!(pong.is_for(&"p1".into()));
        assert!(!pong.is_for(&"p2".into()));
    }

    #[tokio::test]
    async fn peer_beyond_roster_is_rejected_and_closed() {
        let mut h = harness();
        for n in 0..SessionConfig::default().max_participants {
            let id = ParticipantId::new(format!("p{n}"));
            assert_ok!(h.events_tx.send(DriverEvent::Joined(id)).await);
        }
        h.driver.step();
        while h.outbound_rx.try_recv().is_ok() {}

        let late = ParticipantId::from("late");
        assert_ok!(h.events_tx.send(DriverEvent::Joined(late.clone())).await);
        h.driver.step();

        let rejection = std::iter::from_fn(|| h.outbound_rx.try_recv().ok())
            .find(|e| e.close)
            .unwrap();
        assert!(rejection.is_for(&late));
        assert!(!rejection.is_for(&"p0".into()));
        let msg = crate::ws::protocol::decode(&rejection.text).unwrap();
        assert!(matches!(msg, WireMsg::JoinRejected { .. }));
        assert!(h.driver.session().participant(&late).is_none());

        // Its disconnect is a no-op for the session
        assert_ok!(h.events_tx.send(DriverEvent::Left(late)).await);
        assert!(h.driver.step());
        assert_eq!(h.summary.read().participants, SessionConfig::default().max_participants);
    }

    #[tokio::test]
    async fn leaving_peer_is_removed() {
        let mut h = harness();
        assert_ok!(h.events_tx.send(DriverEvent::Joined("p1".into())).await);
        h.driver.step();
        assert_ok!(h.events_tx.send(DriverEvent::Left("p1".into())).await);
        h.driver.step();
        assert_eq!(h.summary.read().participants, 0);
        assert!(h.driver.session().participant(&"p1".into()).is_none());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_and_tears_down() {
        let h = harness();
        let summary = h.summary.clone();
        let events_tx = h.events_tx.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(h.driver.run(shutdown_rx));

        assert_ok!(events_tx.send(DriverEvent::Joined("p1".into())).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(summary.read().participants, 1);

        assert_ok!(shutdown_tx.send(true));
        let joined = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert_ok!(assert_ok!(joined));

        assert!(summary.read().ended);
        assert_eq!(summary.read().participants, 0);
        // Driver dropped its receiver
        assert_err!(events_tx.send(DriverEvent::Left("p1".into())).await);
    }
}
