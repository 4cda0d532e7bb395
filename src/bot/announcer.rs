//! "Now playing" announcements.
//!
//! One task per session: posts a message on every `TrackStarted` in the text
//! channel where the session was created, and deletes it when the track ends.

use anyhow::Result;
use async_trait::async_trait;
use serenity::{
    http::Http,
    model::id::{ChannelId, MessageId},
};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::audio::session::SessionEvent;

/// Where announcements go.
#[async_trait]
pub trait AnnouncementChannel: Send + Sync + 'static {
    async fn post(&self, content: String) -> Result<MessageId>;
    async fn delete(&self, message: MessageId) -> Result<()>;
}

/// Canal de texto de Discord
pub struct TextChannel {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl TextChannel {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

#[async_trait]
impl AnnouncementChannel for TextChannel {
    async fn post(&self, content: String) -> Result<MessageId> {
        let message = self.channel_id.say(self.http.as_ref(), content).await?;
        Ok(message.id)
    }

    async fn delete(&self, message: MessageId) -> Result<()> {
        self.channel_id
            .delete_message(self.http.as_ref(), message)
            .await?;
        Ok(())
    }
}

pub fn spawn(events: broadcast::Receiver<SessionEvent>, channel: impl AnnouncementChannel) {
    tokio::spawn(run(events, channel));
}

/// Runs until the session terminates or its event stream closes.
pub async fn run(mut events: broadcast::Receiver<SessionEvent>, channel: impl AnnouncementChannel) {
    let mut posted: Option<MessageId> = None;

    loop {
        match events.recv().await {
            Ok(SessionEvent::TrackStarted(track)) => {
                retract(&channel, &mut posted).await;
                match channel
                    .post(format!("🎵 Reproduciendo ahora: **{}**", track.title()))
                    .await
                {
                    Ok(id) => posted = Some(id),
                    Err(e) => warn!("⚠️ No se pudo anunciar \"{}\": {:?}", track.title(), e),
                }
            }
            Ok(SessionEvent::TrackFinished(_)) | Ok(SessionEvent::TrackFailed { .. }) => {
                retract(&channel, &mut posted).await;
            }
            Ok(SessionEvent::Terminated(reason)) => {
                debug!("📭 Anuncios terminados: {}", reason);
                retract(&channel, &mut posted).await;
                break;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("⚠️ Se perdieron {} eventos de reproducción", skipped);
            }
            Err(RecvError::Closed) => {
                retract(&channel, &mut posted).await;
                break;
            }
        }
    }
}

async fn retract(channel: &impl AnnouncementChannel, posted: &mut Option<MessageId>) {
    if let Some(id) = posted.take() {
        if let Err(e) = channel.delete(id).await {
            debug!("No se pudo borrar el anuncio {}: {:?}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{session::TerminationReason, track::Track},
        error::SinkError,
    };
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Post(String),
        Delete(u64),
    }

    #[derive(Clone, Default)]
    struct RecordingChannel {
        ops: Arc<Mutex<Vec<Op>>>,
    }

    #[async_trait]
    impl AnnouncementChannel for RecordingChannel {
        async fn post(&self, content: String) -> Result<MessageId> {
            let mut ops = self.ops.lock();
            ops.push(Op::Post(content));
            Ok(MessageId::new(ops.len() as u64))
        }

        async fn delete(&self, message: MessageId) -> Result<()> {
            self.ops.lock().push(Op::Delete(message.get()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_posts_and_deletes_per_track() {
        let (tx, rx) = broadcast::channel(16);
        let channel = RecordingChannel::default();
        let a = Track::new("A", "ua");
        let b = Track::new("B", "ub");

        tx.send(SessionEvent::TrackStarted(a.clone())).unwrap();
        tx.send(SessionEvent::TrackFinished(a)).unwrap();
        tx.send(SessionEvent::TrackStarted(b.clone())).unwrap();
        tx.send(SessionEvent::TrackFailed {
            track: b,
            error: SinkError::Track("corte".into()),
        })
        .unwrap();
        tx.send(SessionEvent::Terminated(TerminationReason::IdleTimeout))
            .unwrap();

        run(rx, channel.clone()).await;

        assert_eq!(
            *channel.ops.lock(),
            vec![
                Op::Post("🎵 Reproduciendo ahora: **A**".into()),
                Op::Delete(1),
                Op::Post("🎵 Reproduciendo ahora: **B**".into()),
                Op::Delete(3),
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_mid_track_cleans_up() {
        let (tx, rx) = broadcast::channel(16);
        let channel = RecordingChannel::default();

        tx.send(SessionEvent::TrackStarted(Track::new("A", "ua")))
            .unwrap();
        drop(tx);

        run(rx, channel.clone()).await;
        assert_eq!(
            *channel.ops.lock(),
            vec![Op::Post("🎵 Reproduciendo ahora: **A**".into()), Op::Delete(1)]
        );
    }
}
