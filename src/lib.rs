//! AdLands authoritative game server.
//!
//! A single game room simulates the planet at a fixed tick rate: territory
//! capture, projectiles, bots (on a dedicated worker thread), and the
//! crypto economy. Thin clients connect over WebTransport and receive
//! JSON-framed state broadcasts; an admin HTTP surface manages sponsors
//! and exposes metrics.

pub mod bots;
pub mod config;
pub mod game;
pub mod metrics;
pub mod net;
pub mod profile;
pub mod sponsor;
pub mod util;
pub mod worldgen;
