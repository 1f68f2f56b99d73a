//! # Voice Module
//!
//! Connection lifecycle for one voice channel at a time.
//!
//! ## Architecture
//!
//! - [`VoiceTransport`] joins channels and publishes the bot's own voice state
//!   changes. [`discord::SongbirdTransport`] is the production implementation.
//! - [`VoiceConnection`] is a joined channel: readiness, speaking flag, frame
//!   transmission and disconnect.
//! - [`manager::VoiceManager`] owns one connection per channel, rejoins when
//!   it is not ready, serializes playback and tears everything down once the
//!   bot leaves or is moved.
//! - [`Speaker`] decides what gets sent; [`speaker::FrameSpeaker`] pulls
//!   frames from an encode session.

use async_trait::async_trait;
use bytes::Bytes;
use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{audio::encoder::EncodeError, config::Config};

pub mod discord;
pub mod manager;
pub mod speaker;

pub use manager::VoiceManager;
pub use speaker::FrameSpeaker;

pub type VoiceResult<T> = Result<T, VoiceError>;

#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("failed to join voice channel {channel_id}: {reason}")]
    Connection { channel_id: ChannelId, reason: String },
    #[error("voice connection was not ready after {0:?}")]
    Timeout(Duration),
    #[error("voice transport failed: {0}")]
    Transport(String),
    #[error("audio frame could not be produced: {0}")]
    Frame(#[from] EncodeError),
    #[error("voice manager has been disposed")]
    Disposed,
}

/// A change in the bot's own voice state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceStateChange {
    pub guild_id: GuildId,
    pub previous_channel: Option<ChannelId>,
    pub channel: Option<ChannelId>,
}

/// How the bot left a channel it was connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    Disconnected,
    Moved(ChannelId),
}

impl VoiceStateChange {
    /// Whether this change took the bot out of `channel_id`.
    ///
    /// The bot holds a single voice connection per guild, so any state in the
    /// same guild that does not point at `channel_id` means it is gone from
    /// there, even when the previous channel is unknown.
    pub fn departure_from(&self, guild_id: GuildId, channel_id: ChannelId) -> Option<Departure> {
        if self.guild_id != guild_id {
            return None;
        }
        match self.channel {
            None => Some(Departure::Disconnected),
            Some(channel) if channel != channel_id => Some(Departure::Moved(channel)),
            Some(_) => None,
        }
    }
}

/// Conexión de voz ya establecida en un canal
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    fn is_ready(&self) -> bool;

    async fn set_speaking(&self, speaking: bool) -> VoiceResult<()>;

    /// Envía un frame Opus; bloquea mientras el transporte aplica back-pressure
    async fn send_frame(&self, frame: Bytes) -> VoiceResult<()>;

    async fn disconnect(&self) -> VoiceResult<()>;
}

#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> VoiceResult<Arc<dyn VoiceConnection>>;

    /// Suscripción a los cambios de estado de voz del propio bot
    fn voice_state_updates(&self) -> broadcast::Receiver<VoiceStateChange>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// The source reached its end.
    Finished,
    /// The scope was cancelled (pause, skip or disposal).
    Cancelled,
}

/// Pushes audio onto a connection until the source ends or `cancel` fires.
#[async_trait]
pub trait Speaker: Send + Sync {
    async fn speak(
        &self,
        cancel: &CancellationToken,
        connection: Arc<dyn VoiceConnection>,
    ) -> VoiceResult<SpeakOutcome>;
}

#[derive(Debug, Clone, Copy)]
pub struct VoiceSettings {
    pub ready_timeout: Duration,
    pub ready_poll_interval: Duration,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(60),
            ready_poll_interval: Duration::from_millis(100),
        }
    }
}

impl From<&Config> for VoiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            ready_timeout: config.voice_ready_timeout,
            ready_poll_interval: config.voice_ready_poll,
        }
    }
}
