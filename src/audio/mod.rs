//! # Audio Module
//!
//! Per-guild playback for the bot.
//!
//! ## Architecture
//!
//! ### [`session`] - Playback Session
//! - One tokio task per guild owning the queue, the current track and the
//!   state machine (Idle, Playing, Paused, Terminated)
//! - Idle timeout, loop, volume and take-once completion handling
//!
//! ### [`registry`] - Session Registry
//! - Guild → session map with serialized creation per guild
//! - Sessions deregister themselves when they terminate
//!
//! ### [`player`] - Control Surface
//! - What slash commands call: resolve, then forward to the session
//!
//! ### [`sink`] / [`songbird_sink`] - Audio Output
//! - The [`sink::AudioSink`] seam and its songbird implementation
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use guildtune::audio::{player::AudioPlayer, session::SessionOptions, sink::AudioSink};
//! use guildtune::sources::{SmartResolver, YouTubeResolver};
//! use serenity::all::GuildId;
//! use std::sync::Arc;
//!
//! # async fn example(make_sink: impl Fn() -> Box<dyn AudioSink>) -> anyhow::Result<()> {
//! let youtube = Arc::new(YouTubeResolver::new("yt-dlp"));
//! let player = AudioPlayer::new(Arc::new(SmartResolver::new(youtube, None)), SessionOptions::default());
//! let guild_id = GuildId::new(123456789);
//!
//! // Play a track
//! player.play(guild_id, "never gonna give you up", make_sink).await?;
//!
//! // Control playback
//! player.pause(guild_id).await?;
//! player.resume(guild_id).await?;
//! player.skip(guild_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod player;
pub mod registry;
pub mod session;
pub mod sink;
pub mod songbird_sink;
pub mod track;

#[cfg(test)]
mod testing;
