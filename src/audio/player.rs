use serenity::model::id::GuildId;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{
    registry::SessionRegistry,
    session::{
        volume_fraction, EnqueueOutcome, SessionEvent, SessionHandle, SessionOptions,
        SessionSnapshot,
    },
    sink::AudioSink,
    track::Track,
};
use crate::{
    error::{PlayerError, PlayerResult},
    sources::Resolver,
};

const NOTHING_PLAYING: PlayerError = PlayerError::IllegalTransition("no hay nada reproduciéndose");

/// Lo que devolvió `/play`.
#[derive(Debug)]
pub struct PlayOutcome {
    pub track: Track,
    pub queued: EnqueueOutcome,
    /// Present when this call created the session; subscribed before the
    /// first track started, so no `TrackStarted` is missed.
    pub events: Option<broadcast::Receiver<SessionEvent>>,
}

/// Superficie de control que usan los comandos del bot.
///
/// Resolves queries, finds or creates the guild's session and forwards each
/// command. Commands other than `play` never create a session.
#[derive(Clone)]
pub struct AudioPlayer {
    registry: SessionRegistry,
    resolver: Arc<dyn Resolver>,
}

impl AudioPlayer {
    pub fn new(resolver: Arc<dyn Resolver>, options: SessionOptions) -> Self {
        Self {
            registry: SessionRegistry::new(options),
            resolver,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Resolves `query` and enqueues it on the guild's session.
    ///
    /// `make_sink` is only called when a session has to be created.
    pub async fn play<F>(&self, guild_id: GuildId, query: &str, make_sink: F) -> PlayerResult<PlayOutcome>
    where
        F: Fn() -> Box<dyn AudioSink>,
    {
        let track = self.resolve(query).await?;
        self.enqueue(guild_id, track, make_sink).await
    }

    /// Turns a query into a playable track without touching any session.
    pub async fn resolve(&self, query: &str) -> PlayerResult<Track> {
        let track = self.resolver.resolve(query).await?;
        debug!("🎶 Resuelto \"{}\" → {}", query, track.title());
        Ok(track)
    }

    /// Enqueues an already resolved track. If the session terminated between
    /// lookup and enqueue, one fresh session is tried before giving up.
    pub async fn enqueue<F>(&self, guild_id: GuildId, track: Track, make_sink: F) -> PlayerResult<PlayOutcome>
    where
        F: Fn() -> Box<dyn AudioSink>,
    {
        let mut retried = false;
        loop {
            let (session, created) = self.registry.get_or_create_tracked(guild_id, &make_sink);
            let events = created.then(|| session.subscribe());

            match session.enqueue(track.clone()).await {
                Ok(queued) => {
                    info!("➕ Guild {}: \"{}\" {:?}", guild_id, track.title(), queued);
                    return Ok(PlayOutcome { track, queued, events });
                }
                Err(PlayerError::SessionClosed) if !retried => {
                    warn!("🔁 Guild {}: la sesión terminó durante /play, reintentando", guild_id);
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Whether the guild has a live session that will release its voice
    /// connection on its own.
    pub fn has_session(&self, guild_id: GuildId) -> bool {
        self.registry.get(guild_id).is_some()
    }

    pub async fn pause(&self, guild_id: GuildId) -> PlayerResult<()> {
        self.session(guild_id)?.pause().await
    }

    pub async fn resume(&self, guild_id: GuildId) -> PlayerResult<()> {
        self.session(guild_id)?.resume().await
    }

    /// Returns the skipped track.
    pub async fn skip(&self, guild_id: GuildId) -> PlayerResult<Track> {
        self.session(guild_id)?.skip().await
    }

    pub async fn stop(&self, guild_id: GuildId) -> PlayerResult<()> {
        self.session(guild_id)?.stop().await
    }

    /// `percent` in `0..=100`. Validated even when there is no session.
    pub async fn set_volume(&self, guild_id: GuildId, percent: i64) -> PlayerResult<()> {
        volume_fraction(percent)?;
        self.session(guild_id)?.set_volume(percent).await
    }

    /// Title of the current track, or `"none"`.
    pub fn now_playing(&self, guild_id: GuildId) -> String {
        self.registry
            .get(guild_id)
            .and_then(|session| session.current_track())
            .map(|track| track.title().to_string())
            .unwrap_or_else(|| "none".to_string())
    }

    pub async fn toggle_loop(&self, guild_id: GuildId) -> PlayerResult<bool> {
        self.session(guild_id)?.toggle_loop().await
    }

    /// Number of tracks removed from the pending queue.
    pub async fn clear(&self, guild_id: GuildId) -> PlayerResult<usize> {
        match self.registry.get(guild_id) {
            Some(session) => session.clear().await,
            None => Ok(0),
        }
    }

    pub async fn queue(&self, guild_id: GuildId) -> Option<SessionSnapshot> {
        self.registry.get(guild_id)?.status().await.ok()
    }

    /// El bot salió del canal de voz sin pasar por `/stop`.
    pub fn connection_lost(&self, guild_id: GuildId) {
        if let Some(session) = self.registry.get(guild_id) {
            info!("🔌 Guild {}: conexión de voz perdida", guild_id);
            session.connection_lost();
        }
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }

    fn session(&self, guild_id: GuildId) -> PlayerResult<SessionHandle> {
        self.registry.get(guild_id).ok_or(NOTHING_PLAYING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            session::SessionState,
            testing::{FakeSink, SinkCall},
        },
        error::ResolveError,
        sources::MockResolver,
    };
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;

    fn resolving(pairs: &'static [(&'static str, &'static str)]) -> Arc<dyn Resolver> {
        let mut resolver = MockResolver::new();
        resolver.expect_resolve().returning(move |query| {
            pairs
                .iter()
                .find(|(q, _)| *q == query)
                .map(|(_, title)| Track::new(*title, format!("https://cdn.example/{}", title)))
                .ok_or_else(|| ResolveError::NoResults(query.to_string()))
        });
        Arc::new(resolver)
    }

    fn player(resolver: Arc<dyn Resolver>) -> AudioPlayer {
        AudioPlayer::new(resolver, SessionOptions::default())
    }

    const GUILD: u64 = 7;

    #[tokio::test]
    async fn test_play_creates_session_and_queues() {
        let player = player(resolving(&[("uno", "Uno"), ("dos", "Dos")]));
        let sink = FakeSink::new();

        let first = player.play(GuildId::new(GUILD), "uno", || sink.boxed()).await.unwrap();
        assert_eq!(first.queued, EnqueueOutcome::Started);
        assert!(first.events.is_some());

        let second = player.play(GuildId::new(GUILD), "dos", || sink.boxed()).await.unwrap();
        assert_eq!(second.queued, EnqueueOutcome::Queued(1));
        assert!(second.events.is_none());

        assert_eq!(player.now_playing(GuildId::new(GUILD)), "Uno");
        assert_eq!(player.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_first_play_subscription_sees_track_start() {
        let player = player(resolving(&[("uno", "Uno")]));
        let sink = FakeSink::new();

        let outcome = player.play(GuildId::new(GUILD), "uno", || sink.boxed()).await.unwrap();
        let mut events = outcome.events.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::TrackStarted(outcome.track)
        );
    }

    #[tokio::test]
    async fn test_resolution_failure_leaves_no_session() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_resolve()
            .with(eq("???"))
            .times(1)
            .returning(|q| Err(ResolveError::NoResults(q.to_string())));
        let player = player(Arc::new(resolver));

        let result = player
            .play(GuildId::new(GUILD), "???", || panic!("no session should be created"))
            .await;
        assert!(matches!(result, Err(PlayerError::Resolution(_))));
        assert!(player.registry().is_empty());
    }

    #[tokio::test]
    async fn test_has_session_follows_lifecycle() {
        let player = player(resolving(&[("uno", "Uno")]));
        let sink = FakeSink::new();
        assert!(!player.has_session(GuildId::new(GUILD)));

        // Una búsqueda fallida no deja nada que libere la conexión
        assert!(player.resolve("nada").await.is_err());
        assert!(!player.has_session(GuildId::new(GUILD)));

        let track = player.resolve("uno").await.unwrap();
        player.enqueue(GuildId::new(GUILD), track, || sink.boxed()).await.unwrap();
        assert!(player.has_session(GuildId::new(GUILD)));

        player.stop(GuildId::new(GUILD)).await.unwrap();
        assert!(!player.has_session(GuildId::new(GUILD)));
    }

    #[tokio::test]
    async fn test_resolution_failure_keeps_existing_queue() {
        let player = player(resolving(&[("uno", "Uno")]));
        let sink = FakeSink::new();
        player.play(GuildId::new(GUILD), "uno", || sink.boxed()).await.unwrap();

        assert!(player.play(GuildId::new(GUILD), "nada", || sink.boxed()).await.is_err());
        let snapshot = player.queue(GuildId::new(GUILD)).await.unwrap();
        assert_eq!(snapshot.current.map(|t| t.title().to_string()), Some("Uno".into()));
        assert!(snapshot.pending.is_empty());
    }

    #[tokio::test]
    async fn test_commands_without_session_are_notices() {
        let player = player(resolving(&[]));

        for result in [
            player.pause(GuildId::new(GUILD)).await,
            player.resume(GuildId::new(GUILD)).await,
            player.stop(GuildId::new(GUILD)).await,
            player.set_volume(GuildId::new(GUILD), 50).await,
            player.skip(GuildId::new(GUILD)).await.map(|_| ()),
            player.toggle_loop(GuildId::new(GUILD)).await.map(|_| ()),
        ] {
            assert!(result.unwrap_err().is_notice());
        }
        assert_eq!(player.clear(GuildId::new(GUILD)).await, Ok(0));
        assert_eq!(player.now_playing(GuildId::new(GUILD)), "none");
        assert!(player.queue(GuildId::new(GUILD)).await.is_none());
        assert!(player.registry().is_empty());
    }

    #[tokio::test]
    async fn test_volume_is_validated_before_lookup() {
        let player = player(resolving(&[]));
        assert!(matches!(
            player.set_volume(GuildId::new(GUILD), 101).await,
            Err(PlayerError::InvalidParameter(_))
        ));
        assert!(matches!(
            player.set_volume(GuildId::new(GUILD), -1).await,
            Err(PlayerError::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_full_control_cycle() {
        let player = player(resolving(&[("uno", "Uno"), ("dos", "Dos")]));
        let sink = FakeSink::new();
        player.play(GuildId::new(GUILD), "uno", || sink.boxed()).await.unwrap();
        player.play(GuildId::new(GUILD), "dos", || sink.boxed()).await.unwrap();

        player.set_volume(GuildId::new(GUILD), 80).await.unwrap();
        player.pause(GuildId::new(GUILD)).await.unwrap();
        player.resume(GuildId::new(GUILD)).await.unwrap();
        assert!(player.toggle_loop(GuildId::new(GUILD)).await.unwrap());

        assert_eq!(player.skip(GuildId::new(GUILD)).await.unwrap().title(), "Uno");
        assert_eq!(player.now_playing(GuildId::new(GUILD)), "Dos");
        assert_eq!(player.clear(GuildId::new(GUILD)).await, Ok(0));

        player.stop(GuildId::new(GUILD)).await.unwrap();
        assert_eq!(player.now_playing(GuildId::new(GUILD)), "none");
        assert!(player.registry().is_empty());
        assert_eq!(sink.release_count(), 1);
        assert!(sink.calls().contains(&SinkCall::Volume(0.8)));
    }

    #[tokio::test]
    async fn test_play_after_stop_starts_fresh_session() {
        let player = player(resolving(&[("uno", "Uno")]));
        let old_sink = FakeSink::new();
        player.play(GuildId::new(GUILD), "uno", || old_sink.boxed()).await.unwrap();
        player.stop(GuildId::new(GUILD)).await.unwrap();

        let new_sink = FakeSink::new();
        let outcome = player.play(GuildId::new(GUILD), "uno", || new_sink.boxed()).await.unwrap();
        assert_eq!(outcome.queued, EnqueueOutcome::Started);
        assert!(outcome.events.is_some());
        assert_eq!(new_sink.began().len(), 1);
    }

    #[tokio::test]
    async fn test_connection_lost_terminates_session() {
        let player = player(resolving(&[("uno", "Uno")]));
        let sink = FakeSink::new();
        player.play(GuildId::new(GUILD), "uno", || sink.boxed()).await.unwrap();
        let session = player.registry().get(GuildId::new(GUILD)).unwrap();

        player.connection_lost(GuildId::new(GUILD));
        session.terminated().await;

        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(sink.release_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_ends_every_guild() {
        let player = player(resolving(&[("uno", "Uno")]));
        let sinks = [FakeSink::new(), FakeSink::new()];
        for (i, sink) in sinks.iter().enumerate() {
            player
                .play(GuildId::new(i as u64 + 1), "uno", || sink.boxed())
                .await
                .unwrap();
        }

        player.shutdown().await;
        assert!(sinks.iter().all(|sink| sink.release_count() == 1));
    }
}
