use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::GuildId;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    session::{PlaybackSession, SessionHandle, SessionOptions},
    sink::AudioSink,
};

/// Mapa guild → sesión de reproducción.
///
/// Creation for one guild happens while holding that key's entry, so a burst
/// of first-time `/play` commands yields exactly one session. Lookups for
/// other guilds only contend on the shard, never on a global lock. Sessions
/// remove themselves when they terminate; nothing else evicts them.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: DashMap<GuildId, SessionHandle>,
    next_id: AtomicU64,
    options: SessionOptions,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                next_id: AtomicU64::new(1),
                options,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Returns the live session for `guild_id`, creating one bound to the
    /// sink built by `make_sink` if there is none.
    pub fn get_or_create<F>(&self, guild_id: GuildId, make_sink: F) -> SessionHandle
    where
        F: FnOnce() -> Box<dyn AudioSink>,
    {
        self.get_or_create_tracked(guild_id, make_sink).0
    }

    /// Same as [`get_or_create`](Self::get_or_create), also telling whether
    /// the session was created by this call.
    pub fn get_or_create_tracked<F>(&self, guild_id: GuildId, make_sink: F) -> (SessionHandle, bool)
    where
        F: FnOnce() -> Box<dyn AudioSink>,
    {
        match self.inner.sessions.entry(guild_id) {
            Entry::Occupied(entry) if !entry.get().is_terminated() => (entry.get().clone(), false),
            Entry::Occupied(mut entry) => {
                // Terminó pero todavía no se desregistró
                let handle = self.spawn(guild_id, make_sink());
                entry.insert(handle.clone());
                (handle, true)
            }
            Entry::Vacant(entry) => {
                let handle = self.spawn(guild_id, make_sink());
                entry.insert(handle.clone());
                (handle, true)
            }
        }
    }

    /// Non-creating lookup; terminated sessions count as absent.
    pub fn get(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.inner
            .sessions
            .get(&guild_id)
            .map(|entry| entry.value().clone())
            .filter(|handle| !handle.is_terminated())
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Terminates every session and waits until all sinks are released.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let handles: Vec<SessionHandle> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        info!("⏹️ Cerrando {} sesiones de reproducción", handles.len());
        for handle in handles {
            handle.terminated().await;
        }
    }

    fn spawn(&self, guild_id: GuildId, sink: Box<dyn AudioSink>) -> SessionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::downgrade(&self.inner);

        debug!("🆕 Creando sesión {} para guild {}", id, guild_id);
        PlaybackSession::spawn(
            id,
            guild_id,
            sink,
            self.inner.options,
            self.inner.shutdown.child_token(),
            Some(Box::new(move || remove(&registry, guild_id, id))),
        )
    }
}

/// Self-deregistration. Only removes the entry if it still belongs to the
/// session that is terminating.
fn remove(registry: &Weak<RegistryInner>, guild_id: GuildId, session_id: u64) {
    if let Some(inner) = registry.upgrade() {
        if inner
            .sessions
            .remove_if(&guild_id, |_, handle| handle.id() == session_id)
            .is_some()
        {
            debug!("🗑️ Sesión {} desregistrada de guild {}", session_id, guild_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{session::SessionState, testing::FakeSink, track::Track};
    use std::sync::atomic::AtomicUsize;

    fn track(name: &str) -> Track {
        Track::new(name, format!("https://cdn.example/{}.webm", name))
    }

    #[tokio::test]
    async fn test_reuses_live_session() {
        let registry = SessionRegistry::new(SessionOptions::default());
        let guild = GuildId::new(1);

        let (first, created) = registry.get_or_create_tracked(guild, || FakeSink::new().boxed());
        let (second, created_again) =
            registry.get_or_create_tracked(guild, || FakeSink::new().boxed());

        assert!(created);
        assert!(!created_again);
        assert_eq!(first.id(), second.id());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_guilds_get_independent_sessions() {
        let registry = SessionRegistry::new(SessionOptions::default());
        let a = registry.get_or_create(GuildId::new(1), || FakeSink::new().boxed());
        let b = registry.get_or_create(GuildId::new(2), || FakeSink::new().boxed());

        a.enqueue(track("solo-a")).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.state(), SessionState::Playing);
        assert_eq!(b.status().await.unwrap().state, SessionState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_burst_creates_exactly_one_session() {
        let registry = SessionRegistry::new(SessionOptions::default());
        let built = Arc::new(AtomicUsize::new(0));
        let guild = GuildId::new(99);

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            let built = built.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .get_or_create(guild, || {
                        built.fetch_add(1, Ordering::SeqCst);
                        FakeSink::new().boxed()
                    })
                    .id()
            }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }
        ids.dedup();

        assert_eq!(ids.len(), 1);
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_terminated_session_deregisters_itself() {
        let registry = SessionRegistry::new(SessionOptions::default());
        let guild = GuildId::new(5);
        let sink = FakeSink::new();
        let session = registry.get_or_create(guild, || sink.boxed());

        session.stop().await.unwrap();
        assert!(registry.get(guild).is_none());
        assert!(registry.is_empty());

        let fresh = registry.get_or_create(guild, || FakeSink::new().boxed());
        assert_ne!(fresh.id(), session.id());
        assert_eq!(sink.release_count(), 1);
    }

    #[tokio::test]
    async fn test_removal_for_other_session_is_ignored() {
        let registry = SessionRegistry::new(SessionOptions::default());
        let guild = GuildId::new(6);
        let old = registry.get_or_create(guild, || FakeSink::new().boxed());
        let newer = registry.get_or_create(guild, || FakeSink::new().boxed());
        assert_eq!(old.id(), newer.id());

        remove(&Arc::downgrade(&registry.inner), guild, old.id() + 100);
        assert_eq!(registry.get(guild).map(|h| h.id()), Some(old.id()));
    }

    #[tokio::test]
    async fn test_shutdown_releases_every_sink() {
        let registry = SessionRegistry::new(SessionOptions::default());
        let sinks: Vec<FakeSink> = (0..3).map(|_| FakeSink::new()).collect();
        for (i, sink) in sinks.iter().enumerate() {
            let session = registry.get_or_create(GuildId::new(i as u64 + 1), || sink.boxed());
            session.enqueue(track("x")).await.unwrap();
        }

        registry.shutdown().await;
        for sink in &sinks {
            assert_eq!(sink.release_count(), 1);
        }
    }
}
