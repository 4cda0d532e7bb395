use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::Resolver;
use crate::{audio::track::Track, error::ResolveError};

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_URL: &str = "https://api.spotify.com/v1";

/// Margen para renovar el token antes de que expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Cliente de Spotify (client credentials)
///
/// Spotify no entrega audio: la pista se busca en YouTube como
/// "nombre artista" con el resolver delegado.
pub struct SpotifyResolver {
    client_id: String,
    client_secret: String,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
    fallback: Arc<dyn Resolver>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    name: String,
    artists: Vec<SpotifyArtist>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

impl SpotifyTrack {
    fn search_query(&self) -> String {
        match self.artists.first() {
            Some(artist) => format!("{} {}", self.name, artist.name),
            None => self.name.clone(),
        }
    }
}

/// Extrae el ID de `open.spotify.com/track/<id>` o `spotify:track:<id>`.
pub fn parse_track_id(input: &str) -> Option<String> {
    let input = input.trim();

    let parsed_url;
    let id = if let Some(rest) = input.strip_prefix("spotify:track:") {
        rest
    } else {
        parsed_url = url::Url::parse(input).ok()?;
        let url = &parsed_url;
        if url.host_str() != Some("open.spotify.com") {
            return None;
        }
        let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
        // Los enlaces localizados llevan un prefijo tipo /intl-es/
        let mut kind = segments.next()?;
        if kind.starts_with("intl-") {
            kind = segments.next()?;
        }
        if kind != "track" {
            return None;
        }
        segments.next()?
    };

    let valid = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| id.to_string())
}

impl SpotifyResolver {
    pub fn new(client_id: String, client_secret: String, fallback: Arc<dyn Resolver>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client_id,
            client_secret,
            client,
            token: Mutex::new(None),
            fallback,
        }
    }

    async fn access_token(&self) -> Result<String, ResolveError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        debug!("🔑 Solicitando token de Spotify");
        let credentials = STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret));
        let response = self
            .client
            .post(TOKEN_URL)
            .header("Authorization", format!("Basic {}", credentials))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ResolveError::Network(format!(
                "Spotify rechazó las credenciales: {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ResolveError::InvalidResponse(e.to_string()))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn fetch_track(&self, id: &str) -> Result<SpotifyTrack, ResolveError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!("{}/tracks/{}", API_URL, id))
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| ResolveError::InvalidResponse(e.to_string())),
            reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::BAD_REQUEST => {
                Err(ResolveError::NoResults(id.to_string()))
            }
            status => Err(ResolveError::Network(format!("Spotify API: {}", status))),
        }
    }
}

#[async_trait]
impl Resolver for SpotifyResolver {
    async fn resolve(&self, query: &str) -> Result<Track, ResolveError> {
        let id = parse_track_id(query).ok_or_else(|| {
            ResolveError::Unsupported("solo se admiten enlaces a canciones de Spotify".into())
        })?;

        let track = self.fetch_track(&id).await?;
        let search = track.search_query();
        info!("🎵 Spotify {} → buscando \"{}\"", id, search);

        self.fallback.resolve(&search).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_track_id() {
        assert_eq!(
            parse_track_id("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=abc"),
            Some("4uLU6hMCjMI75M1A2tKUQC".to_string())
        );
        assert_eq!(
            parse_track_id("https://open.spotify.com/intl-es/track/4uLU6hMCjMI75M1A2tKUQC"),
            Some("4uLU6hMCjMI75M1A2tKUQC".to_string())
        );
        assert_eq!(
            parse_track_id("spotify:track:4uLU6hMCjMI75M1A2tKUQC"),
            Some("4uLU6hMCjMI75M1A2tKUQC".to_string())
        );
    }

    #[test]
    fn test_rejects_non_track_links() {
        assert_eq!(
            parse_track_id("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M"),
            None
        );
        assert_eq!(parse_track_id("https://example.com/track/abc"), None);
        assert_eq!(parse_track_id("https://open.spotify.com/track/"), None);
        assert_eq!(parse_track_id("spotify:track:../../me"), None);
    }

    #[test]
    fn test_search_query_uses_first_artist() {
        let track: SpotifyTrack = serde_json::from_str(
            r#"{"name":"One More Time","artists":[{"name":"Daft Punk"},{"name":"Romanthony"}]}"#,
        )
        .unwrap();
        assert_eq!(track.search_query(), "One More Time Daft Punk");

        let orphan = SpotifyTrack {
            name: "Untitled".into(),
            artists: vec![],
        };
        assert_eq!(orphan.search_query(), "Untitled");
    }

    #[tokio::test]
    async fn test_non_track_query_never_hits_network() {
        let mut fallback = crate::sources::MockResolver::new();
        fallback.expect_resolve().never();

        let resolver = SpotifyResolver::new("id".into(), "secret".into(), Arc::new(fallback));
        let result = resolver
            .resolve("https://open.spotify.com/album/1DFixLWuPkv3KT3TnV35m3")
            .await;
        assert!(matches!(result, Err(ResolveError::Unsupported(_))));
    }
}
