//! Discord music bot: one playback session per guild, driven by slash
//! commands and streamed through songbird.

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod sources;
pub mod ui;
