//! # Audio Module
//!
//! Playback coordination for every guild. Audio itself is rendered by an
//! external Lavalink node; this module decides *what* plays and tells the
//! node about it.
//!
//! ## Architecture
//!
//! ### [`player`] - Session
//! - One state machine per guild: Idle, Playing, Paused, Disconnected
//! - Track-end resolution (loop, queue, autoplay, idle)
//! - Replays the current track when the node link comes back
//!
//! ### [`manager`] - Session registry
//! - Lazily creates sessions and serialises their input through one task each
//! - Routes node events to the owning session
//!
//! ### [`queue`] / [`effects`] / [`autoplay`]
//! - Bounded FIFO with shuffle, move and paging
//! - Named filter presets merged into one node payload
//! - Follow-up track selection when the queue runs dry
//!
//! ### [`node`], [`lavalink_client`], [`lavalink_protocol`]
//! - The `NodeLink` seam, the Lavalink v4 client behind it and its wire types

pub mod autoplay;
pub mod effects;
pub mod lavalink_client;
pub mod lavalink_protocol;
pub mod manager;
pub mod node;
pub mod player;
pub mod queue;

#[cfg(test)]
pub mod testing;
