//! Per-guild playback session.
//!
//! Each guild gets one [`PlaybackSession`] running as its own tokio task. The
//! task is the only writer of the queue, the current slot and the state; the
//! outside world talks to it through a cloneable [`SessionHandle`] that sends
//! commands over a channel and reads published [`SessionSnapshot`]s.
//!
//! The loop suspends in exactly two places:
//!
//! - **Idle**: waiting for an enqueue or the idle deadline.
//! - **Playing/Paused**: waiting for the sink's completion signal.
//!
//! Both waits also listen to the command channel and the shutdown token, so
//! `stop()` wakes the loop right away.
//!
//! Every started track gets a fresh [`Completion`] and a generation number.
//! Skip and stop drop the receiver before halting the sink, so a late natural
//! end for the same track has nowhere to go. Skip requests carry the track
//! epoch they were aimed at and are ignored once a different track took the
//! slot; a loop replay keeps the epoch, so the skip still lands on it.

use serenity::model::id::GuildId;
use std::{collections::VecDeque, fmt, future::pending, time::Duration};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    sink::{AudioSink, Completion, PlaybackEnd},
    track::Track,
};
use crate::error::{PlayerError, PlayerResult, SinkError};

/// Tiempo en Idle antes de desconectar.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_VOLUME: f32 = 0.5;

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Playing,
    Paused,
    Terminated,
}

impl SessionState {
    pub fn has_track(self) -> bool {
        matches!(self, Self::Playing | Self::Paused)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationReason {
    Stopped,
    IdleTimeout,
    ConnectionLost,
    SinkFailure(SinkError),
    Shutdown,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("detenida por un usuario"),
            Self::IdleTimeout => f.write_str("inactividad"),
            Self::ConnectionLost => f.write_str("conexión de voz perdida"),
            Self::SinkFailure(e) => write!(f, "{}", e),
            Self::Shutdown => f.write_str("apagado del bot"),
        }
    }
}

/// Notifications for whoever announces playback (the "Now playing" message).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    TrackStarted(Track),
    TrackFinished(Track),
    TrackFailed { track: Track, error: SinkError },
    Terminated(TerminationReason),
}

/// Result of a successful enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The track went straight into the sink.
    Started,
    /// The track waits at this 1-based position.
    Queued(usize),
}

/// Read-only view published after every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub current: Option<Track>,
    pub pending: Vec<Track>,
    pub loop_enabled: bool,
    pub volume: f32,
    /// Bumped every time a track is handed to the sink.
    pub generation: u64,
    /// Bumped only when the current slot moves to a different track.
    pub epoch: u64,
}

/// Knobs shared by every session a registry creates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOptions {
    pub idle_timeout: Duration,
    pub default_volume: f32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            default_volume: DEFAULT_VOLUME,
        }
    }
}

type Reply<T> = oneshot::Sender<PlayerResult<T>>;

/// Hook run once when the session terminates (registry self-removal).
pub type Deregister = Box<dyn FnOnce() + Send + Sync>;

enum Command {
    Enqueue(Track, Reply<EnqueueOutcome>),
    Skip { epoch: u64, reply: Reply<Track> },
    Pause(Reply<()>),
    Resume(Reply<()>),
    Stop(Reply<()>),
    SetVolume(f32, Reply<()>),
    ToggleLoop(Reply<bool>),
    Clear(Reply<usize>),
    Status(Reply<SessionSnapshot>),
    ConnectionLost,
}

impl Command {
    fn reject(self, error: PlayerError) {
        match self {
            Command::Enqueue(_, reply) => {
                let _ = reply.send(Err(error));
            }
            Command::Skip { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Command::Pause(reply) | Command::Resume(reply) | Command::SetVolume(_, reply) => {
                let _ = reply.send(Err(error));
            }
            // La sesión ya está terminada, que es lo que se pedía
            Command::Stop(reply) => {
                let _ = reply.send(Ok(()));
            }
            Command::ToggleLoop(reply) => {
                let _ = reply.send(Err(error));
            }
            Command::Clear(reply) => {
                let _ = reply.send(Err(error));
            }
            Command::Status(reply) => {
                let _ = reply.send(Err(error));
            }
            Command::ConnectionLost => {}
        }
    }
}

/// Converts a user-facing percentage into the sink's fraction.
pub fn volume_fraction(percent: i64) -> PlayerResult<f32> {
    if !(0..=100).contains(&percent) {
        return Err(PlayerError::InvalidParameter(format!(
            "el volumen debe estar entre 0 y 100, se recibió {}",
            percent
        )));
    }
    Ok(percent as f32 / 100.0)
}

/// Cheap, cloneable front door to one guild's session.
#[derive(Clone)]
pub struct SessionHandle {
    id: u64,
    guild_id: GuildId,
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("guild_id", &self.guild_id)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Agrega una pista; si la sesión está en Idle empieza a sonar de inmediato.
    pub async fn enqueue(&self, track: Track) -> PlayerResult<EnqueueOutcome> {
        if !track.is_playable() {
            return Err(PlayerError::InvalidParameter(format!(
                "\"{}\" no tiene una URL reproducible",
                track.title()
            )));
        }
        self.request(|reply| Command::Enqueue(track, reply)).await
    }

    /// Salta la pista actual aunque el loop esté activo. Devuelve la saltada.
    pub async fn skip(&self) -> PlayerResult<Track> {
        let epoch = self.snapshot.borrow().epoch;
        self.request(|reply| Command::Skip { epoch, reply }).await
    }

    pub async fn pause(&self) -> PlayerResult<()> {
        self.request(Command::Pause).await
    }

    pub async fn resume(&self) -> PlayerResult<()> {
        self.request(Command::Resume).await
    }

    /// Vacía la cola, detiene el audio y termina la sesión.
    pub async fn stop(&self) -> PlayerResult<()> {
        match self.request(Command::Stop).await {
            Err(PlayerError::SessionClosed) => Ok(()),
            other => other,
        }
    }

    /// `percent` in `0..=100`.
    pub async fn set_volume(&self, percent: i64) -> PlayerResult<()> {
        let volume = volume_fraction(percent)?;
        self.request(|reply| Command::SetVolume(volume, reply)).await
    }

    /// Returns whether looping is now enabled.
    pub async fn toggle_loop(&self) -> PlayerResult<bool> {
        self.request(Command::ToggleLoop).await
    }

    /// Empties the pending queue without touching the current track.
    pub async fn clear(&self) -> PlayerResult<usize> {
        self.request(Command::Clear).await
    }

    /// Snapshot taken by the loop itself, ordered after every earlier command.
    pub async fn status(&self) -> PlayerResult<SessionSnapshot> {
        self.request(Command::Status).await
    }

    /// The voice connection vanished underneath the session.
    pub fn connection_lost(&self) {
        let _ = self.commands.send(Command::ConnectionLost);
    }

    pub fn current_track(&self) -> Option<Track> {
        self.snapshot.borrow().current.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == SessionState::Terminated || self.commands.is_closed()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Resolves once the session has released its sink.
    pub async fn terminated(&self) {
        let mut rx = self.snapshot.clone();
        let _ = rx
            .wait_for(|snapshot| snapshot.state == SessionState::Terminated)
            .await;
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> PlayerResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| PlayerError::SessionClosed)?;
        rx.await.map_err(|_| PlayerError::SessionClosed)?
    }
}

/// Resultado de intentar arrancar la siguiente pista.
enum Advance {
    Started,
    Idle { last_error: Option<SinkError> },
    Terminate(TerminationReason),
}

/// The loop side of a session. Owned by its task; never shared.
pub struct PlaybackSession {
    guild_id: GuildId,
    sink: Box<dyn AudioSink>,
    released: bool,
    pending: VecDeque<Track>,
    current: Option<Track>,
    loop_enabled: bool,
    volume: f32,
    state: SessionState,
    generation: u64,
    epoch: u64,
    completion: Option<oneshot::Receiver<PlaybackEnd>>,
    idle_since: Instant,
    idle_timeout: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
    snapshot: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: CancellationToken,
    stop_replies: Vec<Reply<()>>,
    on_terminated: Option<Deregister>,
}

impl PlaybackSession {
    /// Builds the session and spawns its loop on the current runtime.
    pub fn spawn(
        id: u64,
        guild_id: GuildId,
        sink: Box<dyn AudioSink>,
        options: SessionOptions,
        shutdown: CancellationToken,
        on_terminated: Option<Deregister>,
    ) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let volume = options.default_volume.clamp(0.0, 1.0);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot {
            state: SessionState::Idle,
            current: None,
            pending: Vec::new(),
            loop_enabled: false,
            volume,
            generation: 0,
            epoch: 0,
        });
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let session = Self {
            guild_id,
            sink,
            released: false,
            pending: VecDeque::new(),
            current: None,
            loop_enabled: false,
            volume,
            state: SessionState::Idle,
            generation: 0,
            epoch: 0,
            completion: None,
            idle_since: Instant::now(),
            idle_timeout: options.idle_timeout,
            commands: commands_rx,
            snapshot: snapshot_tx,
            events: events_tx.clone(),
            shutdown,
            stop_replies: Vec::new(),
            on_terminated,
        };

        tokio::spawn(session.run());

        SessionHandle {
            id,
            guild_id,
            commands: commands_tx,
            snapshot: snapshot_rx,
            events: events_tx,
        }
    }

    async fn run(mut self) {
        info!("🎧 Sesión de reproducción iniciada en guild {}", self.guild_id);

        let reason = loop {
            let deadline = self.idle_since + self.idle_timeout;
            let idle = self.state == SessionState::Idle;

            let step = tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => Some(TerminationReason::Shutdown),
                end = wait_for_end(&mut self.completion) => self.on_track_end(end).await,
                _ = sleep_until(deadline), if idle => {
                    info!(
                        "⏰ {}s sin música en guild {}, desconectando",
                        self.idle_timeout.as_secs(),
                        self.guild_id
                    );
                    Some(TerminationReason::IdleTimeout)
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    // Todos los handles se soltaron, nadie puede volver a usarla
                    None => Some(TerminationReason::Shutdown),
                },
            };

            if let Some(reason) = step {
                break reason;
            }
        };

        self.terminate(reason).await;
    }

    async fn handle(&mut self, command: Command) -> Option<TerminationReason> {
        match command {
            Command::Enqueue(track, reply) => {
                debug!("➕ Encolando {} en guild {}", track.title(), self.guild_id);
                self.pending.push_back(track);

                if self.state != SessionState::Idle {
                    let _ = reply.send(Ok(EnqueueOutcome::Queued(self.pending.len())));
                    self.publish();
                    return None;
                }

                match self.play_next(None).await {
                    Advance::Started => {
                        let _ = reply.send(Ok(EnqueueOutcome::Started));
                        None
                    }
                    Advance::Idle { last_error } => {
                        let error = last_error
                            .unwrap_or_else(|| SinkError::Track("la pista no arrancó".into()));
                        let _ = reply.send(Err(PlayerError::Sink(error)));
                        None
                    }
                    Advance::Terminate(reason) => {
                        if let TerminationReason::SinkFailure(e) = &reason {
                            let _ = reply.send(Err(PlayerError::Sink(e.clone())));
                        }
                        Some(reason)
                    }
                }
            }

            Command::Skip { epoch, reply } => {
                if !self.state.has_track() {
                    let _ = reply.send(Err(PlayerError::IllegalTransition(
                        "No hay nada reproduciéndose",
                    )));
                    return None;
                }
                if epoch != self.epoch {
                    debug!(
                        "⏭️ Skip para la pista {} ignorado, ya va la {}",
                        epoch, self.epoch
                    );
                    let _ = reply.send(Err(PlayerError::IllegalTransition(
                        "Esa canción ya había terminado",
                    )));
                    return None;
                }

                // Soltar el receptor primero: el fin que dispare el sink ya no cuenta
                self.completion = None;
                if let Err(e) = self.sink.halt_early().await {
                    if e.is_fatal() {
                        let _ = reply.send(Err(PlayerError::Sink(e.clone())));
                        return Some(TerminationReason::SinkFailure(e));
                    }
                    warn!("No se pudo detener la pista en guild {}: {}", self.guild_id, e);
                }

                let Some(skipped) = self.finish_current() else {
                    let _ = reply.send(Err(PlayerError::IllegalTransition(
                        "No hay nada reproduciéndose",
                    )));
                    return None;
                };
                info!("⏭️ Saltada en guild {}: {}", self.guild_id, skipped.title());

                let outcome = self.play_next(None).await;
                let _ = reply.send(Ok(skipped));
                match outcome {
                    Advance::Terminate(reason) => Some(reason),
                    _ => None,
                }
            }

            Command::Pause(reply) => {
                let result = match self.state {
                    SessionState::Playing => match self.sink.pause().await {
                        Ok(()) => {
                            self.state = SessionState::Paused;
                            info!("⏸️ Reproducción pausada en guild {}", self.guild_id);
                            self.publish();
                            Ok(())
                        }
                        Err(e) if e.is_fatal() => {
                            let _ = reply.send(Err(PlayerError::Sink(e.clone())));
                            return Some(TerminationReason::SinkFailure(e));
                        }
                        Err(e) => Err(PlayerError::Sink(e)),
                    },
                    SessionState::Paused => {
                        Err(PlayerError::IllegalTransition("La música ya está en pausa"))
                    }
                    _ => Err(PlayerError::IllegalTransition("No hay nada reproduciéndose")),
                };
                let _ = reply.send(result);
                None
            }

            Command::Resume(reply) => {
                let result = match self.state {
                    SessionState::Paused => match self.sink.resume().await {
                        Ok(()) => {
                            self.state = SessionState::Playing;
                            info!("▶️ Reproducción reanudada en guild {}", self.guild_id);
                            self.publish();
                            Ok(())
                        }
                        Err(e) if e.is_fatal() => {
                            let _ = reply.send(Err(PlayerError::Sink(e.clone())));
                            return Some(TerminationReason::SinkFailure(e));
                        }
                        Err(e) => Err(PlayerError::Sink(e)),
                    },
                    SessionState::Playing => {
                        Err(PlayerError::IllegalTransition("La música no está en pausa"))
                    }
                    _ => Err(PlayerError::IllegalTransition("No hay nada reproduciéndose")),
                };
                let _ = reply.send(result);
                None
            }

            Command::Stop(reply) => {
                self.pending.clear();
                self.completion = None;
                if self.current.is_some() {
                    if let Err(e) = self.sink.halt_early().await {
                        warn!("Error al detener en guild {}: {}", self.guild_id, e);
                    }
                    self.finish_current();
                }
                self.stop_replies.push(reply);
                Some(TerminationReason::Stopped)
            }

            Command::SetVolume(volume, reply) => {
                self.volume = volume;
                if self.state.has_track() {
                    if let Err(e) = self.sink.set_volume(volume).await {
                        warn!("No se pudo aplicar el volumen en guild {}: {}", self.guild_id, e);
                    }
                }
                info!(
                    "🔊 Volumen ajustado a {}% en guild {}",
                    (volume * 100.0).round() as u8,
                    self.guild_id
                );
                self.publish();
                let _ = reply.send(Ok(()));
                None
            }

            Command::ToggleLoop(reply) => {
                self.loop_enabled = !self.loop_enabled;
                if self.loop_enabled {
                    info!("🔂 Repetir canción activado en guild {}", self.guild_id);
                } else {
                    info!("➡️ Repetición desactivada en guild {}", self.guild_id);
                }
                self.publish();
                let _ = reply.send(Ok(self.loop_enabled));
                None
            }

            Command::Clear(reply) => {
                let cleared = self.pending.len();
                self.pending.clear();
                info!("🗑️ Cola limpiada en guild {}: {} pistas", self.guild_id, cleared);
                self.publish();
                let _ = reply.send(Ok(cleared));
                None
            }

            Command::Status(reply) => {
                let _ = reply.send(Ok(self.build_snapshot()));
                None
            }

            Command::ConnectionLost => {
                warn!("🔌 Conexión de voz perdida en guild {}", self.guild_id);
                Some(TerminationReason::ConnectionLost)
            }
        }
    }

    async fn on_track_end(&mut self, end: PlaybackEnd) -> Option<TerminationReason> {
        self.completion = None;
        let Some(finished) = self.finish_current() else {
            return None;
        };

        let replay = match end {
            PlaybackEnd::Finished => {
                debug!("🎵 Terminó {} en guild {}", finished.title(), self.guild_id);
                self.loop_enabled.then_some(finished)
            }
            PlaybackEnd::Failed(e) if e.is_fatal() => {
                error!("❌ Fallo de audio en guild {}: {}", self.guild_id, e);
                return Some(TerminationReason::SinkFailure(e));
            }
            PlaybackEnd::Failed(e) => {
                // Una pista rota no se repite aunque haya loop
                warn!("❌ {} falló en guild {}: {}", finished.title(), self.guild_id, e);
                let _ = self.events.send(SessionEvent::TrackFailed {
                    track: finished,
                    error: e,
                });
                None
            }
        };

        match self.play_next(replay).await {
            Advance::Terminate(reason) => Some(reason),
            _ => None,
        }
    }

    /// Starts `replay` or the head of the queue, skipping tracks the sink
    /// refuses, and falls back to Idle when nothing is left.
    async fn play_next(&mut self, replay: Option<Track>) -> Advance {
        let mut replaying = replay.is_some();
        let mut next = replay.or_else(|| self.pending.pop_front());
        let mut last_error = None;

        while let Some(track) = next {
            match self.start(&track).await {
                Ok(()) => {
                    if !replaying {
                        self.epoch += 1;
                    }
                    self.current = Some(track.clone());
                    self.state = SessionState::Playing;
                    info!("🎵 Reproduciendo en guild {}: {}", self.guild_id, track.title());
                    self.publish();
                    let _ = self.events.send(SessionEvent::TrackStarted(track));
                    return Advance::Started;
                }
                Err(e) if e.is_fatal() => {
                    error!("❌ Fallo de audio en guild {}: {}", self.guild_id, e);
                    return Advance::Terminate(TerminationReason::SinkFailure(e));
                }
                Err(e) => {
                    warn!("❌ No se pudo reproducir {}: {}", track.title(), e);
                    let _ = self.events.send(SessionEvent::TrackFailed {
                        track,
                        error: e.clone(),
                    });
                    last_error = Some(e);
                    replaying = false;
                    next = self.pending.pop_front();
                }
            }
        }

        self.enter_idle();
        Advance::Idle { last_error }
    }

    async fn start(&mut self, track: &Track) -> Result<(), SinkError> {
        let (completion, rx) = Completion::channel();
        self.sink.begin(track.locator(), completion).await?;
        if let Err(e) = self.sink.set_volume(self.volume).await {
            if e.is_fatal() {
                return Err(e);
            }
            warn!("No se pudo aplicar el volumen inicial: {}", e);
        }

        self.generation += 1;
        self.completion = Some(rx);
        Ok(())
    }

    fn enter_idle(&mut self) {
        self.current = None;
        self.completion = None;
        self.state = SessionState::Idle;
        self.idle_since = Instant::now();
        debug!("💤 Guild {} en espera", self.guild_id);
        self.publish();
    }

    /// Empties the current slot and announces the end of that track.
    fn finish_current(&mut self) -> Option<Track> {
        let track = self.current.take()?;
        let _ = self.events.send(SessionEvent::TrackFinished(track.clone()));
        Some(track)
    }

    async fn terminate(&mut self, reason: TerminationReason) {
        self.state = SessionState::Terminated;
        self.pending.clear();
        self.completion = None;

        if !self.released {
            self.released = true;
            if self.current.is_some() {
                if let Err(e) = self.sink.halt_early().await {
                    debug!("Error al detener antes de liberar: {}", e);
                }
            }
            self.sink.release().await;
        }
        self.finish_current();

        self.publish();
        if let Some(deregister) = self.on_terminated.take() {
            deregister();
        }

        // Lo que llegó después del cierre recibe SessionClosed
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            command.reject(PlayerError::SessionClosed);
        }
        for reply in self.stop_replies.drain(..) {
            let _ = reply.send(Ok(()));
        }

        let _ = self.events.send(SessionEvent::Terminated(reason.clone()));
        info!("👋 Sesión terminada en guild {} ({})", self.guild_id, reason);
    }

    fn build_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            current: self.current.clone(),
            pending: self.pending.iter().cloned().collect(),
            loop_enabled: self.loop_enabled,
            volume: self.volume,
            generation: self.generation,
            epoch: self.epoch,
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.build_snapshot());
    }
}

async fn wait_for_end(completion: &mut Option<oneshot::Receiver<PlaybackEnd>>) -> PlaybackEnd {
    match completion {
        Some(rx) => rx.await.unwrap_or_else(|_| {
            PlaybackEnd::Failed(SinkError::Track("el sink soltó la señal de fin".into()))
        }),
        None => pending().await,
    }
}
