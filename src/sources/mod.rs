//! # Sources Module
//!
//! Turns what a user typed after `/play` into a [`Track`] the sink can stream.
//!
//! - [`youtube`]: yt-dlp based search and link extraction
//! - [`spotify`]: Spotify track links, mapped to a YouTube search
//!
//! [`SmartResolver`] picks the right one for each query. Resolution always
//! happens before a session is touched, so a failed lookup leaves the queue
//! exactly as it was.

pub mod spotify;
pub mod youtube;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::{audio::track::Track, error::ResolveError};

pub use spotify::SpotifyResolver;
pub use youtube::YouTubeResolver;

/// Resuelve una búsqueda o enlace a una pista reproducible.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, query: &str) -> Result<Track, ResolveError>;
}

/// Qué tipo de consulta escribió el usuario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    SpotifyTrack(String),
    /// Spotify albums, playlists, artists: not playable as a single track.
    SpotifyOther,
    YouTube,
    OtherUrl,
    Search,
}

impl QueryKind {
    pub fn classify(query: &str) -> Self {
        let query = query.trim();

        if query.starts_with("spotify:") || query.contains("open.spotify.com") {
            return match spotify::parse_track_id(query) {
                Some(id) => Self::SpotifyTrack(id),
                None => Self::SpotifyOther,
            };
        }
        if youtube::is_youtube_url(query) {
            return Self::YouTube;
        }
        if url::Url::parse(query)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false)
        {
            return Self::OtherUrl;
        }
        Self::Search
    }
}

/// Enruta cada consulta al resolver que le corresponde.
pub struct SmartResolver {
    youtube: Arc<dyn Resolver>,
    spotify: Option<Arc<dyn Resolver>>,
}

impl SmartResolver {
    pub fn new(youtube: Arc<dyn Resolver>, spotify: Option<Arc<dyn Resolver>>) -> Self {
        Self { youtube, spotify }
    }
}

#[async_trait]
impl Resolver for SmartResolver {
    async fn resolve(&self, query: &str) -> Result<Track, ResolveError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResolveError::NoResults(String::new()));
        }

        let kind = QueryKind::classify(query);
        debug!("🔎 Consulta {:?}: {}", kind, query);

        match kind {
            QueryKind::SpotifyTrack(_) => match &self.spotify {
                Some(spotify) => spotify.resolve(query).await,
                None => Err(ResolveError::Unsupported(
                    "Spotify no está configurado en este bot".into(),
                )),
            },
            QueryKind::SpotifyOther => Err(ResolveError::Unsupported(
                "solo se admiten enlaces a canciones de Spotify".into(),
            )),
            QueryKind::YouTube | QueryKind::OtherUrl | QueryKind::Search => {
                self.youtube.resolve(query).await
            }
        }
    }
}
