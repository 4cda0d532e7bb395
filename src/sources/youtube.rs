use async_process::Command;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::{sync::OnceLock, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::Resolver;
use crate::{audio::track::Track, error::ResolveError};

/// Máximo de procesos yt-dlp simultáneos.
const MAX_CONCURRENT_LOOKUPS: usize = 3;

/// Cliente de yt-dlp para búsquedas y enlaces de YouTube
pub struct YouTubeResolver {
    ytdlp_path: String,
    rate_limiter: Semaphore,
}

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: String,
    /// URL del formato elegido con `-f`
    url: Option<String>,
    webpage_url: Option<String>,
    duration: Option<f64>,
    formats: Option<Vec<Format>>,
}

#[derive(Debug, Deserialize)]
struct Format {
    url: String,
    acodec: Option<String>,
    abr: Option<f64>,
}

pub fn is_youtube_url(url: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^(https?://)?((www|m|music)\.)?(youtube\.com|youtu\.be)/")
                .expect("static regex")
        })
        .is_match(url)
}

impl YouTubeResolver {
    pub fn new(ytdlp_path: impl Into<String>) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
            // Limitar requests concurrentes para evitar rate limiting
            rate_limiter: Semaphore::new(MAX_CONCURRENT_LOOKUPS),
        }
    }

    /// Checks that the configured yt-dlp binary runs at all.
    pub async fn verify(&self) -> Result<String, ResolveError> {
        let output = Command::new(&self.ytdlp_path)
            .arg("--version")
            .output()
            .await
            .map_err(|e| ResolveError::Extractor(format!("no se pudo ejecutar yt-dlp: {}", e)))?;

        if !output.status.success() {
            return Err(ResolveError::Extractor("yt-dlp --version falló".into()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn target_for(query: &str) -> String {
        if query.starts_with("http://") || query.starts_with("https://") {
            query.to_string()
        } else {
            format!("ytsearch1:{}", query)
        }
    }

    async fn dump_json(&self, target: &str) -> Result<String, ResolveError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| ResolveError::Extractor(e.to_string()))?;

        debug!("📊 Ejecutando yt-dlp para: {}", target);

        let output = Command::new(&self.ytdlp_path)
            .args([
                "--no-playlist",
                "--dump-json",
                "-f",
                "bestaudio/best",
                "--no-warnings",
                target,
            ])
            .output()
            .await
            .map_err(|e| ResolveError::Extractor(format!("no se pudo ejecutar yt-dlp: {}", e)))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            warn!("❌ yt-dlp falló para {}: {}", target, error.trim());
            return Err(ResolveError::Extractor(error.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parses yt-dlp's `--dump-json` output (one JSON object per line) into the
/// first playable track.
fn parse_dump(query: &str, stdout: &str) -> Result<Track, ResolveError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| ResolveError::NoResults(query.to_string()))?;

    let info: YtDlpInfo = serde_json::from_str(line)
        .map_err(|e| ResolveError::InvalidResponse(format!("JSON de yt-dlp: {}", e)))?;

    info_to_track(query, info)
}

fn info_to_track(query: &str, info: YtDlpInfo) -> Result<Track, ResolveError> {
    let locator = info
        .url
        .filter(|url| !url.is_empty())
        .or_else(|| best_audio_format(info.formats.as_deref().unwrap_or_default()))
        .ok_or_else(|| ResolveError::NoResults(query.to_string()))?;

    let mut track = Track::new(info.title, locator);
    if let Some(page) = info.webpage_url {
        track = track.with_page_url(page);
    }
    if let Some(secs) = info.duration.filter(|d| *d > 0.0) {
        track = track.with_duration(Duration::from_secs_f64(secs));
    }
    Ok(track)
}

/// Highest-bitrate format that carries audio.
fn best_audio_format(formats: &[Format]) -> Option<String> {
    formats
        .iter()
        .filter(|f| f.acodec.as_deref().is_some_and(|codec| codec != "none"))
        .max_by(|a, b| {
            a.abr
                .unwrap_or_default()
                .total_cmp(&b.abr.unwrap_or_default())
        })
        .map(|f| f.url.clone())
}

#[async_trait]
impl Resolver for YouTubeResolver {
    async fn resolve(&self, query: &str) -> Result<Track, ResolveError> {
        info!("🔍 Buscando en YouTube: {}", query);

        let stdout = self.dump_json(&Self::target_for(query)).await?;
        let track = parse_dump(query, &stdout)?;

        info!("✅ Resuelto: {}", track.title());
        Ok(track)
    }
}
