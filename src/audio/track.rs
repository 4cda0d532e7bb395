use std::{fmt, sync::Arc, time::Duration};

/// Representa una pista lista para reproducir.
///
/// Inmutable: el resolver la construye una vez y a partir de ahí se comparte
/// por valor (clonar es barato, los campos viven detrás de `Arc`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    title: Arc<str>,
    locator: Arc<str>,
    page_url: Option<Arc<str>>,
    duration: Option<Duration>,
}

impl Track {
    pub fn new(title: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            title: Arc::from(title.into()),
            locator: Arc::from(locator.into()),
            page_url: None,
            duration: None,
        }
    }

    // Getters
    pub fn title(&self) -> &str {
        &self.title
    }
    /// Direct stream URL handed to the audio sink.
    pub fn locator(&self) -> &str {
        &self.locator
    }
    pub fn page_url(&self) -> Option<&str> {
        self.page_url.as_deref()
    }
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// A track without a locator cannot be streamed.
    pub fn is_playable(&self) -> bool {
        !self.locator.trim().is_empty()
    }

    // Builders
    pub fn with_page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = Some(Arc::from(url.into()));
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.duration {
            Some(d) => {
                let secs = d.as_secs();
                write!(f, "{} ({}:{:02})", self.title, secs / 60, secs % 60)
            }
            None => f.write_str(&self.title),
        }
    }
}
