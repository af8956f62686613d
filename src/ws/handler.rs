//! WebSocket upgrade handler. Each socket is one peer of the hosted session.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::{AppState, DriverEvent, Envelope};
use crate::game::ParticipantId;
use crate::util::rate_limit::PeerRateLimiter;
use crate::ws::protocol::{self, WireMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let peer = ParticipantId::new(Uuid::new_v4().to_string());
    info!(participant = %peer, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    // Subscribe before joining so the join broadcast is not missed
    let outbound_rx = state.outbound_tx.subscribe();

    let welcome = WireMsg::Welcome {
        id: peer.clone(),
        host_id: None,
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(participant = %peer, error = %e, "Failed to send welcome");
        return;
    }

    if state
        .events_tx
        .send(DriverEvent::Joined(peer.clone()))
        .await
        .is_err()
    {
        warn!(participant = %peer, "Session is gone, closing socket");
        return;
    }
    state.peers.insert(peer.clone(), Utc::now());

    run_session(
        peer.clone(),
        ws_sink,
        ws_stream,
        state.events_tx.clone(),
        outbound_rx,
        PeerRateLimiter::new(state.config.input_rate_limit),
    )
    .await;

    state.peers.remove(&peer);
    info!(participant = %peer, "WebSocket connection closed");
}

/// Pump messages both ways until either side hangs up
async fn run_session(
    peer: ParticipantId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    events_tx: mpsc::Sender<DriverEvent>,
    mut outbound_rx: broadcast::Receiver<Envelope>,
    rate_limiter: PeerRateLimiter,
) {
    // Writer task: session outbox -> WebSocket
    let writer_peer = peer.clone();
    let mut writer_handle = tokio::spawn(async move {
        loop {
            match outbound_rx.recv().await {
                Ok(envelope) => {
                    if !envelope.is_for(&writer_peer) {
                        continue;
                    }
                    if let Err(e) = ws_sink.send(Message::Text(envelope.text.to_string())).await {
                        debug!(participant = %writer_peer, error = %e, "WebSocket send failed");
                        break;
                    }
                    if envelope.close {
                        info!(participant = %writer_peer, "Closing rejected peer");
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Snapshots are absolute, the next one catches the peer up
                    warn!(participant = %writer_peer, lagged_count = n, "Peer lagged, skipping messages");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(participant = %writer_peer, "Outbound channel closed");
                    break;
                }
            }
        }
    });

    // Reader loop: WebSocket -> driver
    let reader = async {
        while let Some(result) = ws_stream.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if !rate_limiter.check() {
                        warn!(participant = %peer, "Rate limited peer message");
                        continue;
                    }

                    match protocol::decode(&text) {
                        Ok(msg) => {
                            if events_tx
                                .send(DriverEvent::Message(peer.clone(), msg))
                                .await
                                .is_err()
                            {
                                debug!(participant = %peer, "Event channel closed");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(participant = %peer, error = %e, "Failed to parse peer message");
                        }
                    }
                }
                Ok(Message::Binary(_)) => {
                    warn!(participant = %peer, "Received binary message, ignoring");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => {
                    info!(participant = %peer, "Peer initiated close");
                    break;
                }
                Err(e) => {
                    error!(participant = %peer, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    };

    // Whichever side finishes first ends the connection
    tokio::select! {
        _ = reader => {}
        _ = &mut writer_handle => {
            debug!(participant = %peer, "Writer finished");
        }
    }

    let _ = events_tx.send(DriverEvent::Left(peer)).await;
    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &WireMsg) -> Result<(), String> {
    let json = protocol::encode(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
