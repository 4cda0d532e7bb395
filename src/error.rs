//! Error types shared by the playback core and its collaborators.
//!
//! Glue code (bot handlers, startup) keeps using `anyhow`; everything that
//! crosses the session boundary is one of the typed errors below so callers
//! can tell a rejected command from a failed one.

use thiserror::Error;

/// Outcome of a control command that did not apply.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlayerError {
    /// The resolver could not turn the query into a playable track.
    #[error("no se pudo resolver la canción: {0}")]
    Resolution(#[from] ResolveError),

    /// An argument was out of range (volume, empty locator, ...).
    #[error("parámetro inválido: {0}")]
    InvalidParameter(String),

    /// The command does not apply in the current state. Not fatal.
    #[error("{0}")]
    IllegalTransition(&'static str),

    /// The audio backend failed in a way that ended the session.
    #[error("fallo de audio: {0}")]
    Sink(#[from] SinkError),

    /// The session loop is gone (stopped, timed out or disconnected).
    #[error("la sesión de reproducción ya terminó")]
    SessionClosed,
}

impl PlayerError {
    /// Notices are expected under normal use (double clicks, stale buttons).
    pub fn is_notice(&self) -> bool {
        matches!(self, Self::IllegalTransition(_))
    }
}

/// Failures produced while resolving a query.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolveError {
    #[error("no se encontraron resultados para \"{0}\"")]
    NoResults(String),

    #[error("enlace no soportado: {0}")]
    Unsupported(String),

    #[error("yt-dlp falló: {0}")]
    Extractor(String),

    #[error("error de red: {0}")]
    Network(String),

    #[error("respuesta inválida: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ResolveError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

/// Failures reported by an [`AudioSink`](crate::audio::sink::AudioSink).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SinkError {
    /// The current track could not be started or broke mid-stream.
    #[error("no se pudo reproducir la pista: {0}")]
    Track(String),

    /// The voice connection is unusable; nothing else can be played.
    #[error("conexión de voz perdida: {0}")]
    Disconnected(String),
}

impl SinkError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

pub type PlayerResult<T> = std::result::Result<T, PlayerError>;
