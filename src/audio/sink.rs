use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::error::SinkError;

/// How a started track came to an end.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEnd {
    /// Natural end of stream, or an early halt requested by the session.
    Finished,
    /// The backend gave up on the track (or on the whole connection).
    Failed(SinkError),
}

/// Señal de fin de pista de un solo uso.
///
/// El sink la recibe en [`AudioSink::begin`] y puede clonarla para varios
/// manejadores de eventos; solo la primera llamada a [`Completion::finish`]
/// llega a la sesión, las demás se descartan.
#[derive(Debug, Clone)]
pub struct Completion {
    slot: Arc<Mutex<Option<oneshot::Sender<PlaybackEnd>>>>,
}

impl Completion {
    pub fn channel() -> (Self, oneshot::Receiver<PlaybackEnd>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Delivers the end signal. Returns `false` if it had already fired or
    /// the session stopped listening for this track.
    pub fn finish(&self, end: PlaybackEnd) -> bool {
        match self.slot.lock().take() {
            Some(tx) => tx.send(end).is_ok(),
            None => false,
        }
    }

    pub fn is_spent(&self) -> bool {
        self.slot.lock().is_none()
    }
}

/// Salida de audio ligada a una conexión de voz.
///
/// Una instancia por sesión; la sesión es su único dueño y llama a
/// [`AudioSink::release`] exactamente una vez al terminar.
#[async_trait]
pub trait AudioSink: Send + Sync + 'static {
    /// Starts streaming `locator`. The sink must call `on_finished` once the
    /// track ends for any reason, including [`AudioSink::halt_early`].
    async fn begin(&self, locator: &str, on_finished: Completion) -> Result<(), SinkError>;

    async fn pause(&self) -> Result<(), SinkError>;

    async fn resume(&self) -> Result<(), SinkError>;

    /// Stops the current track before its natural end.
    async fn halt_early(&self) -> Result<(), SinkError>;

    /// `volume` is a fraction in `[0.0, 1.0]`.
    async fn set_volume(&self, volume: f32) -> Result<(), SinkError>;

    async fn is_playing(&self) -> bool;

    async fn is_paused(&self) -> bool;

    /// Tears down the voice connection.
    async fn release(&self);
}
