use serenity::model::id::{ChannelId, MessageId, UserId};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    messages,
    sink::{MessageError, MessageSink},
};
use crate::audio::{playback::PlaybackSnapshot, queue::Song};

/// Todo lo necesario para pintar el mensaje "sonando ahora"
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlayingView {
    pub headline: String,
    pub title: String,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub requested_by: UserId,
    pub status: String,
    pub playing: bool,
    pub can_skip: bool,
}

/// Estado de los controles en el momento de pintar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub playing: bool,
    pub can_skip: bool,
}

/// The "now playing" message of one channel.
///
/// The message belongs to one song: sending a snapshot for a different song
/// deletes the old message and posts a new one, while updates for the same
/// song edit it in place. A snapshot without a song removes the message.
pub struct SongMessage {
    channel_id: ChannelId,
    sink: Arc<dyn MessageSink>,
    message_id: Option<MessageId>,
    song: Option<Arc<Song>>,
    headline: String,
}

impl SongMessage {
    pub fn new(channel_id: ChannelId, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            channel_id,
            sink,
            message_id: None,
            song: None,
            headline: String::new(),
        }
    }

    pub fn message_id(&self) -> Option<MessageId> {
        self.message_id
    }

    pub fn shows(&self, song: &Arc<Song>) -> bool {
        self.song.as_ref().is_some_and(|current| Arc::ptr_eq(current, song))
    }

    fn reset_for(&mut self, song: Arc<Song>) {
        self.message_id = None;
        self.headline = messages::now_playing_headline(&song);
        self.song = Some(song);
    }

    pub async fn send(
        &mut self,
        snapshot: &PlaybackSnapshot,
        controls: Controls,
    ) -> Result<(), MessageError> {
        let Some(song) = snapshot.song.clone() else {
            return self.delete().await;
        };

        if !self.shows(&song) {
            if let Err(e) = self.delete().await {
                warn!("⚠️ No se pudo borrar el mensaje anterior: {}", e);
            }
            self.reset_for(song.clone());
        }

        let view = NowPlayingView {
            headline: self.headline.clone(),
            title: song.name.clone(),
            url: song.url.clone(),
            thumbnail_url: song.thumbnail_url.clone(),
            requested_by: song.author_id,
            status: snapshot.status_line(),
            playing: controls.playing,
            can_skip: controls.can_skip,
        };

        let message_id = self
            .sink
            .send_now_playing(self.channel_id, self.message_id, view)
            .await?;
        self.message_id = Some(message_id);
        Ok(())
    }

    pub async fn delete(&mut self) -> Result<(), MessageError> {
        self.song = None;
        if let Some(message_id) = self.message_id.take() {
            debug!("🗑️ Borrando mensaje {}", message_id);
            self.sink.delete_message(self.channel_id, message_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sources::SongMetadata, ui::sink::MockMessageSink};
    use mockall::{predicate::eq, Sequence};
    use std::time::Duration;

    const PLAYING: Controls = Controls {
        playing: true,
        can_skip: false,
    };

    fn song(name: &str) -> Arc<Song> {
        Arc::new(Song::new(
            format!("https://www.youtube.com/watch?v={name}"),
            SongMetadata {
                title: name.to_string(),
                duration: Duration::from_secs(90),
                thumbnail_url: Some("https://i.ytimg.com/x.jpg".to_string()),
            },
            UserId::new(42),
        ))
    }

    fn snapshot(song: Option<Arc<Song>>) -> PlaybackSnapshot {
        PlaybackSnapshot {
            remaining: song.as_ref().map(|s| s.duration).unwrap_or_default(),
            song,
            percent: 0,
            playing: true,
        }
    }

    #[tokio::test]
    async fn creates_then_edits_for_the_same_song() {
        let channel = ChannelId::new(5);
        let mut sink = MockMessageSink::new();
        let mut seq = Sequence::new();

        sink.expect_send_now_playing()
            .withf(|_, existing, view| existing.is_none() && view.title == "a")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(MessageId::new(1)));
        sink.expect_send_now_playing()
            .withf(|_, existing, view| {
                *existing == Some(MessageId::new(1)) && view.status.starts_with("01:30")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(MessageId::new(1)));

        let mut message = SongMessage::new(channel, Arc::new(sink));
        let a = song("a");

        message.send(&snapshot(Some(a.clone())), PLAYING).await.unwrap();
        message.send(&snapshot(Some(a)), PLAYING).await.unwrap();

        assert_eq!(message.message_id(), Some(MessageId::new(1)));
    }

    #[tokio::test]
    async fn replaces_the_message_when_the_song_changes() {
        let channel = ChannelId::new(5);
        let mut sink = MockMessageSink::new();
        let mut seq = Sequence::new();

        sink.expect_send_now_playing()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(MessageId::new(1)));
        sink.expect_delete_message()
            .with(eq(channel), eq(MessageId::new(1)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        sink.expect_send_now_playing()
            .withf(|_, existing, view| existing.is_none() && view.title == "b")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(MessageId::new(2)));

        let mut message = SongMessage::new(channel, Arc::new(sink));

        message.send(&snapshot(Some(song("a"))), PLAYING).await.unwrap();
        message.send(&snapshot(Some(song("b"))), PLAYING).await.unwrap();

        assert_eq!(message.message_id(), Some(MessageId::new(2)));
    }

    #[tokio::test]
    async fn snapshot_without_song_deletes() {
        let channel = ChannelId::new(5);
        let mut sink = MockMessageSink::new();
        sink.expect_send_now_playing()
            .times(1)
            .returning(|_, _, _| Ok(MessageId::new(9)));
        sink.expect_delete_message()
            .with(eq(channel), eq(MessageId::new(9)))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut message = SongMessage::new(channel, Arc::new(sink));
        message.send(&snapshot(Some(song("a"))), PLAYING).await.unwrap();
        message.send(&snapshot(None), PLAYING).await.unwrap();

        assert_eq!(message.message_id(), None);
    }

    #[tokio::test]
    async fn headline_links_the_song() {
        let mut sink = MockMessageSink::new();
        sink.expect_send_now_playing()
            .withf(|_, _, view| view.headline.contains("[a](https://www.youtube.com/watch?v=a)"))
            .times(1)
            .returning(|_, _, _| Ok(MessageId::new(1)));

        let mut message = SongMessage::new(ChannelId::new(5), Arc::new(sink));
        message.send(&snapshot(Some(song("a"))), PLAYING).await.unwrap();
    }
}
