//! Discord-facing rendering of player state.

pub mod embeds;
