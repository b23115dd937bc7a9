//! # tunelink
//!
//! Per-guild playback coordination for Discord music bots that render audio on
//! an external Lavalink node.
//!
//! The crate is organised the same way the bot that embeds it is:
//!
//! - [`audio`] - session state machine, queue, filters, autoplay, node link and
//!   the session manager that routes node events to guilds
//! - [`sources`] - the [`sources::Track`] model and query resolution
//! - [`storage`] - JSON persistence for saved queues and guild settings
//! - [`cache`] - TTL cache used by the resolver
//! - [`ui`] - user-facing text for command outcomes and failures
//! - [`config`] - environment based configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serenity::model::id::GuildId;
//! use tunelink::audio::{manager::SessionManager, player::SessionCommand};
//!
//! # async fn example(manager: Arc<SessionManager>, track: tunelink::sources::Track) -> Result<(), tunelink::error::PlayerError> {
//! let guild_id = GuildId::new(123456789);
//! manager.execute(guild_id, SessionCommand::Enqueue(track)).await?;
//! manager.execute(guild_id, SessionCommand::Skip).await?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod sources;
pub mod storage;
pub mod ui;
