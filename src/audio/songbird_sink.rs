use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use songbird::{
    input::{HttpRequest, Input},
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, warn};

use super::sink::{AudioSink, Completion, PlaybackEnd};
use crate::error::SinkError;

/// [`AudioSink`] sobre una llamada de songbird.
pub struct SongbirdSink {
    guild_id: GuildId,
    call: Arc<tokio::sync::Mutex<Call>>,
    manager: Arc<Songbird>,
    http: reqwest::Client,
    current: Mutex<Option<TrackHandle>>,
}

impl SongbirdSink {
    pub fn new(guild_id: GuildId, call: Arc<tokio::sync::Mutex<Call>>, manager: Arc<Songbird>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            guild_id,
            call,
            manager,
            http,
            current: Mutex::new(None),
        }
    }

    fn track(&self) -> Option<TrackHandle> {
        self.current.lock().clone()
    }

    async fn play_mode(&self) -> Option<PlayMode> {
        let track = self.track()?;
        track.get_info().await.ok().map(|info| info.playing)
    }
}

/// Handler para fin o error de una pista
struct TrackEndNotifier {
    guild_id: GuildId,
    completion: Completion,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let mut end = PlaybackEnd::Finished;

        if let EventContext::Track(tracks) = ctx {
            for (state, _handle) in *tracks {
                if let PlayMode::Errored(e) = &state.playing {
                    error!("❌ Error en track para guild {}: {}", self.guild_id, e);
                    end = PlaybackEnd::Failed(SinkError::Track(e.to_string()));
                }
            }
        }

        if !self.completion.finish(end) {
            debug!("Fin de pista ignorado en guild {}", self.guild_id);
        }
        // Un solo disparo por pista
        Some(Event::Cancel)
    }
}

/// Registers the end and error hooks for a freshly started track. When a
/// hook cannot be registered the track is stopped, since nothing would ever
/// report its end.
fn hook_end_events<E>(
    mut hook: impl FnMut(TrackEvent) -> Result<(), E>,
    stop: impl FnOnce(),
) -> Result<(), E> {
    for event in [TrackEvent::End, TrackEvent::Error] {
        if let Err(e) = hook(event) {
            stop();
            return Err(e);
        }
    }
    Ok(())
}

#[async_trait]
impl AudioSink for SongbirdSink {
    async fn begin(&self, locator: &str, on_finished: Completion) -> Result<(), SinkError> {
        let mut call = self.call.lock().await;
        if call.current_connection().is_none() {
            return Err(SinkError::Disconnected(format!(
                "sin conexión de voz en guild {}",
                self.guild_id
            )));
        }

        call.stop();
        let input: Input = HttpRequest::new(self.http.clone(), locator.to_string()).into();
        let track = call.play_input(input);
        drop(call);

        hook_end_events(
            |event| {
                track
                    .add_event(
                        Event::Track(event),
                        TrackEndNotifier {
                            guild_id: self.guild_id,
                            completion: on_finished.clone(),
                        },
                    )
                    .map_err(|e| SinkError::Track(format!("no se pudo registrar el evento: {}", e)))
            },
            || {
                if let Err(e) = track.stop() {
                    warn!("No se pudo detener la pista sin eventos en guild {}: {}", self.guild_id, e);
                }
            },
        )?;

        *self.current.lock() = Some(track);
        Ok(())
    }

    async fn pause(&self) -> Result<(), SinkError> {
        if let Some(track) = self.track() {
            track.pause().map_err(|e| SinkError::Track(e.to_string()))?;
        }
        Ok(())
    }

    async fn resume(&self) -> Result<(), SinkError> {
        if let Some(track) = self.track() {
            track.play().map_err(|e| SinkError::Track(e.to_string()))?;
        }
        Ok(())
    }

    async fn halt_early(&self) -> Result<(), SinkError> {
        if let Some(track) = self.current.lock().take() {
            // Termina en TrackEvent::End, que dispara la señal
            track.stop().map_err(|e| SinkError::Track(e.to_string()))?;
        }
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> Result<(), SinkError> {
        if let Some(track) = self.track() {
            track
                .set_volume(volume)
                .map_err(|e| SinkError::Track(e.to_string()))?;
        }
        Ok(())
    }

    async fn is_playing(&self) -> bool {
        matches!(self.play_mode().await, Some(PlayMode::Play))
    }

    async fn is_paused(&self) -> bool {
        matches!(self.play_mode().await, Some(PlayMode::Pause))
    }

    async fn release(&self) {
        if let Some(track) = self.current.lock().take() {
            let _ = track.stop();
        }
        if let Err(e) = self.manager.remove(self.guild_id).await {
            warn!("⚠️ Error al salir del canal de voz en guild {}: {}", self.guild_id, e);
        }
    }
}
