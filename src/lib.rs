//! Snake Link - signaling relay and host-authoritative snake simulation
//!
//! - `signaling`: room registry and the websocket relay that forwards
//!   connection-setup messages
//! - `peer`: per-peer link negotiation, host and guest sessions
//! - `game`: the deterministic tick engine and its snapshots

pub mod app;
pub mod config;
pub mod error;
pub mod game;
pub mod http;
pub mod peer;
pub mod signaling;
pub mod util;
