//! Arena Host - runs an authoritative arena session behind a WebSocket endpoint
//!
//! Peers connect to `/ws`, receive a `welcome` with their participant id and
//! from then on exchange the session's wire messages. `/health` and
//! `/session` expose the session state over plain HTTP.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arena_sync::app::{AppState, HostDriver};
use arena_sync::config::Config;
use arena_sync::game::ai::BotBrains;
use arena_sync::game::arena::FlatArena;
use arena_sync::game::collab::{ArenaBuilder, MapData};
use arena_sync::game::combat::RayCombat;
use arena_sync::game::hero::HeroCatalog;
use arena_sync::game::physics::KinematicMover;
use arena_sync::game::{Collaborators, Session};
use arena_sync::http::build_router;
use arena_sync::util::time::{init_server_time, SessionClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Arena Host");
    info!("Server address: {}", config.server_addr);

    let session_config = config.session_config();
    let arena = FlatArena
        .build(&MapData::courtyard(), &session_config.mode)
        .context("building arena")?;
    let collaborators = Collaborators::new(KinematicMover)
        .with_combat(RayCombat)
        .with_ai(BotBrains::new(rand::random()));
    let mut session = Session::host(session_config, arena, HeroCatalog::default(), collaborators);

    let clock = SessionClock::new();
    for _ in 0..config.bot_count {
        let id = session.add_ai(None, clock.now_ms())?;
        info!(participant = %id, "Bot added");
    }
    session.start_match(clock.now_ms())?;

    // Create application state
    let (state, events_rx) = AppState::new(config.clone());

    // Spawn the session driver
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver = HostDriver::new(
        session,
        clock,
        events_rx,
        state.outbound_tx.clone(),
        state.summary.clone(),
        config.frame_hz,
    );
    let driver_handle = tokio::spawn(driver.run(shutdown_rx));

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the driver; it tears the session down on the way out
    let _ = shutdown_tx.send(true);
    if let Err(e) = driver_handle.await {
        error!(error = %e, "Driver task failed");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
