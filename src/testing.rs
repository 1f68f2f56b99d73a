//! Fakes de transporte, resolver, codificador y mensajes para los tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, MessageId};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::broadcast;

use crate::{
    audio::encoder::{EncodeError, EncodeSession, Encoder, FRAME_DURATION},
    sources::{MediaResolver, SongMetadata, SourceError},
    ui::{
        now_playing::NowPlayingView,
        presence::PresenceSink,
        sink::{MessageError, MessageSink},
    },
    voice::{VoiceConnection, VoiceError, VoiceResult, VoiceStateChange, VoiceTransport},
};

/// Espera hasta que `condition` se cumpla o falla a los 3 segundos
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub struct FakeConnection {
    ready: AtomicBool,
    speaking: AtomicBool,
    failing: AtomicBool,
    frames: AtomicU64,
    disconnects: AtomicUsize,
    frame_delay: Duration,
}

impl FakeConnection {
    pub fn new(ready: bool) -> Arc<Self> {
        Self::build(ready, Duration::ZERO)
    }

    pub fn with_frame_delay(frame_delay: Duration) -> Arc<Self> {
        Self::build(true, frame_delay)
    }

    fn build(ready: bool, frame_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(ready),
            speaking: AtomicBool::new(false),
            failing: AtomicBool::new(false),
            frames: AtomicU64::new(0),
            disconnects: AtomicUsize::new(0),
            frame_delay,
        })
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn fail_sends(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn set_speaking(&self, speaking: bool) -> VoiceResult<()> {
        self.speaking.store(speaking, Ordering::SeqCst);
        Ok(())
    }

    async fn send_frame(&self, _frame: Bytes) -> VoiceResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(VoiceError::Transport("socket closed".to_string()));
        }
        if self.frame_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.frame_delay).await;
        }
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> VoiceResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeTransport {
    updates: broadcast::Sender<VoiceStateChange>,
    joins: AtomicUsize,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    ready_on_join: AtomicBool,
    fail_joins: AtomicBool,
    join_delay: Mutex<Duration>,
    frame_delay: Duration,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Self::with_frame_delay(Duration::ZERO)
    }

    pub fn with_frame_delay(frame_delay: Duration) -> Arc<Self> {
        let (updates, _) = broadcast::channel(16);
        Arc::new(Self {
            updates,
            joins: AtomicUsize::new(0),
            connections: Mutex::new(Vec::new()),
            ready_on_join: AtomicBool::new(true),
            fail_joins: AtomicBool::new(false),
            join_delay: Mutex::new(Duration::ZERO),
            frame_delay,
        })
    }

    pub fn set_ready_on_join(&self, ready: bool) {
        self.ready_on_join.store(ready, Ordering::SeqCst);
    }

    pub fn set_fail_joins(&self, fail: bool) {
        self.fail_joins.store(fail, Ordering::SeqCst);
    }

    /// Retraso del handshake de voz en cada `join`
    pub fn set_join_delay(&self, delay: Duration) {
        *self.join_delay.lock() = delay;
    }

    pub fn joins(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn last_connection(&self) -> Option<Arc<FakeConnection>> {
        self.connections.lock().last().cloned()
    }

    pub fn emit(&self, change: VoiceStateChange) {
        let _ = self.updates.send(change);
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn join(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
    ) -> VoiceResult<Arc<dyn VoiceConnection>> {
        let delay = *self.join_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_joins.load(Ordering::SeqCst) {
            return Err(VoiceError::Connection {
                channel_id,
                reason: "missing permissions".to_string(),
            });
        }
        self.joins.fetch_add(1, Ordering::SeqCst);

        let connection = FakeConnection::build(
            self.ready_on_join.load(Ordering::SeqCst),
            self.frame_delay,
        );
        self.connections.lock().push(connection.clone());
        Ok(connection)
    }

    fn voice_state_updates(&self) -> broadcast::Receiver<VoiceStateChange> {
        self.updates.subscribe()
    }
}

/// Sesión que produce `frames` frames y luego termina
pub struct FakeSession {
    remaining: u64,
    fail: bool,
}

impl FakeSession {
    pub fn new(frames: u64) -> Self {
        Self {
            remaining: frames,
            fail: false,
        }
    }

    pub fn failing_after(frames: u64) -> Self {
        Self {
            remaining: frames,
            fail: true,
        }
    }
}

impl EncodeSession for FakeSession {
    fn next_frame(&mut self) -> Result<Option<Bytes>, EncodeError> {
        if self.remaining == 0 {
            return if self.fail {
                Err(EncodeError::Resample("corrupted stream".to_string()))
            } else {
                Ok(None)
            };
        }
        self.remaining -= 1;
        Ok(Some(Bytes::from_static(&[0xF8, 0xFF, 0xFE])))
    }

    fn frame_duration(&self) -> Duration {
        FRAME_DURATION
    }
}

/// El "audio" descargado es el número de frames en texto
pub struct FakeEncoder;

impl Encoder for FakeEncoder {
    fn encode(&self, audio: Bytes) -> Result<Box<dyn EncodeSession>, EncodeError> {
        let frames = std::str::from_utf8(&audio)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or(EncodeError::NoAudioTrack)?;
        Ok(Box::new(FakeSession::new(frames)))
    }
}

/// Resolver en memoria: URL → (título, duración, frames)
#[derive(Default)]
pub struct StubResolver {
    songs: Mutex<HashMap<String, (SongMetadata, u64)>>,
    downloads: Mutex<Vec<String>>,
    metadata_delay: Mutex<Duration>,
    download_delays: Mutex<HashMap<String, Duration>>,
}

impl StubResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registra una canción; a 20ms por frame dura `frames × 20ms`
    pub fn add(&self, url: &str, title: &str, frames: u64) {
        let metadata = SongMetadata {
            title: title.to_string(),
            duration: FRAME_DURATION * frames as u32,
            thumbnail_url: None,
        };
        self.songs.lock().insert(url.to_string(), (metadata, frames));
    }

    pub fn set_metadata_delay(&self, delay: Duration) {
        *self.metadata_delay.lock() = delay;
    }

    /// Retrasa la descarga de `url`; la descarga cuenta como iniciada al
    /// empezar la espera
    pub fn set_download_delay(&self, url: &str, delay: Duration) {
        self.download_delays.lock().insert(url.to_string(), delay);
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().clone()
    }
}

#[async_trait]
impl MediaResolver for StubResolver {
    async fn metadata(&self, url: &str) -> Result<SongMetadata, SourceError> {
        let delay = *self.metadata_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.songs
            .lock()
            .get(url)
            .map(|(metadata, _)| metadata.clone())
            .ok_or_else(|| SourceError::InvalidUrl(url.to_string()))
    }

    async fn download_opus(&self, url: &str) -> Result<Bytes, SourceError> {
        self.downloads.lock().push(url.to_string());
        let delay = self.download_delays.lock().get(url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.songs
            .lock()
            .get(url)
            .map(|(_, frames)| Bytes::from(frames.to_string()))
            .ok_or_else(|| SourceError::InvalidUrl(url.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    NowPlaying {
        existing: Option<MessageId>,
        view: NowPlayingView,
    },
    Deleted(MessageId),
    Notice(String),
}

/// Sink que registra todo lo que se le envía
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    next_id: AtomicU64,
    notice_delay: Mutex<Duration>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1_000),
            notice_delay: Mutex::new(Duration::ZERO),
        })
    }

    /// Simula una API de Discord lenta al enviar avisos
    pub fn set_notice_delay(&self, delay: Duration) {
        *self.notice_delay.lock() = delay;
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    pub fn notices(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Notice(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn last_view(&self) -> Option<NowPlayingView> {
        self.events().into_iter().rev().find_map(|event| match event {
            SinkEvent::NowPlaying { view, .. } => Some(view),
            _ => None,
        })
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send_now_playing(
        &self,
        _channel_id: ChannelId,
        existing: Option<MessageId>,
        view: NowPlayingView,
    ) -> Result<MessageId, MessageError> {
        let id = existing
            .unwrap_or_else(|| MessageId::new(self.next_id.fetch_add(1, Ordering::SeqCst)));
        self.events
            .lock()
            .push(SinkEvent::NowPlaying { existing, view });
        Ok(id)
    }

    async fn delete_message(
        &self,
        _channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), MessageError> {
        self.events.lock().push(SinkEvent::Deleted(message_id));
        Ok(())
    }

    async fn send_notice(&self, _channel_id: ChannelId, content: String) -> Result<(), MessageError> {
        let delay = *self.notice_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.events.lock().push(SinkEvent::Notice(content));
        Ok(())
    }
}

/// Presencia que guarda cada cambio de estado
#[derive(Default)]
pub struct RecordingPresence {
    history: Mutex<Vec<Option<String>>>,
}

impl RecordingPresence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn current(&self) -> Option<String> {
        self.history.lock().last().cloned().flatten()
    }

    pub fn history(&self) -> Vec<Option<String>> {
        self.history.lock().clone()
    }
}

impl PresenceSink for RecordingPresence {
    fn set_listening(&self, title: Option<String>) {
        self.history.lock().push(title);
    }
}
