//! Arena Sync - host-authoritative netcode core for a multiplayer arena shooter
//!
//! The simulation lives in [`game`]: a [`game::Session`] runs either as the
//! authority or as a predicting client and talks to its peers through
//! [`ws::protocol::WireMsg`]. The remaining modules host an authority behind
//! an axum WebSocket endpoint.

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;
