use anyhow::{Context, Result};
use std::time::Duration;

use crate::audio::session::{SessionOptions, DEFAULT_IDLE_TIMEOUT, DEFAULT_VOLUME};

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub default_volume: f32,
    pub idle_timeout: Duration,

    // Fuentes
    pub ytdlp_path: String,
    pub spotify: Option<SpotifyCredentials>,
}

#[derive(Clone)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for SpotifyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyCredentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key → value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            // Discord
            discord_token: var("DISCORD_TOKEN").context("DISCORD_TOKEN no está definido")?,
            application_id: var("APPLICATION_ID")
                .context("APPLICATION_ID no está definido")?
                .trim()
                .parse()
                .context("APPLICATION_ID debe ser numérico")?,
            guild_id: var("GUILD_ID")
                .map(|s| s.trim().parse())
                .transpose()
                .context("GUILD_ID debe ser numérico")?,

            // Audio
            default_volume: var("DEFAULT_VOLUME")
                .map(|s| s.trim().parse())
                .transpose()
                .context("DEFAULT_VOLUME debe ser un número entre 0.0 y 1.0")?
                .unwrap_or(DEFAULT_VOLUME),
            idle_timeout: var("IDLE_TIMEOUT")
                .map(|s| humantime::parse_duration(s.trim()))
                .transpose()
                .context("IDLE_TIMEOUT inválido (ejemplos: 5m, 90s)")?
                .unwrap_or(DEFAULT_IDLE_TIMEOUT),

            // Fuentes
            ytdlp_path: var("YTDLP_PATH").unwrap_or_else(|| "yt-dlp".to_string()),
            spotify: match (var("SPOTIFY_CLIENT_ID"), var("SPOTIFY_CLIENT_SECRET")) {
                (Some(client_id), Some(client_secret)) => Some(SpotifyCredentials {
                    client_id,
                    client_secret,
                }),
                _ => None,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Rejects values the bot cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.application_id == 0 {
            anyhow::bail!("APPLICATION_ID no puede ser 0");
        }
        if self.guild_id == Some(0) {
            anyhow::bail!("GUILD_ID no puede ser 0");
        }
        if !(0.0..=1.0).contains(&self.default_volume) {
            anyhow::bail!(
                "Default volume must be between 0.0 and 1.0, got: {}",
                self.default_volume
            );
        }
        if self.idle_timeout.is_zero() {
            anyhow::bail!("IDLE_TIMEOUT debe ser mayor que 0");
        }
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            idle_timeout: self.idle_timeout,
            default_volume: self.default_volume,
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Tokens and secrets are left out.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Audio: {}% vol, idle timeout {}\n  \
            Sources: yt-dlp at {}, Spotify {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            (self.default_volume * 100.0).round() as u32,
            humantime::format_duration(self.idle_timeout),
            self.ytdlp_path,
            if self.spotify.is_some() { "enabled" } else { "disabled" },
        )
    }
}
