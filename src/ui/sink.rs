use async_trait::async_trait;
use serenity::{
    builder::{CreateMessage, EditMessage},
    http::Http,
    model::id::{ChannelId, MessageId},
};
use std::sync::Arc;

use super::{
    buttons::create_player_controls, embeds::create_now_playing_embed,
    now_playing::NowPlayingView,
};

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("discord request failed: {0}")]
    Http(#[from] serenity::Error),
    #[error("message sink unavailable: {0}")]
    Unavailable(String),
}

/// Destino de los mensajes del reproductor
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Crea el mensaje, o lo edita si `existing` está presente
    async fn send_now_playing(
        &self,
        channel_id: ChannelId,
        existing: Option<MessageId>,
        view: NowPlayingView,
    ) -> Result<MessageId, MessageError>;

    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), MessageError>;

    async fn send_notice(&self, channel_id: ChannelId, content: String) -> Result<(), MessageError>;
}

/// Sink sobre el cliente HTTP de serenity
pub struct HttpMessageSink {
    http: Arc<Http>,
}

impl HttpMessageSink {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl MessageSink for HttpMessageSink {
    async fn send_now_playing(
        &self,
        channel_id: ChannelId,
        existing: Option<MessageId>,
        view: NowPlayingView,
    ) -> Result<MessageId, MessageError> {
        let embed = create_now_playing_embed(&view);
        let controls = create_player_controls(view.playing, view.can_skip);

        let message = match existing {
            Some(message_id) => {
                channel_id
                    .edit_message(
                        &self.http,
                        message_id,
                        EditMessage::new()
                            .content(&view.headline)
                            .embed(embed)
                            .components(controls),
                    )
                    .await?
            }
            None => {
                channel_id
                    .send_message(
                        &self.http,
                        CreateMessage::new()
                            .content(&view.headline)
                            .embed(embed)
                            .components(controls),
                    )
                    .await?
            }
        };

        Ok(message.id)
    }

    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), MessageError> {
        channel_id.delete_message(&self.http, message_id).await?;
        Ok(())
    }

    async fn send_notice(&self, channel_id: ChannelId, content: String) -> Result<(), MessageError> {
        channel_id.say(&self.http, content).await?;
        Ok(())
    }
}
