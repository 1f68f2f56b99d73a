use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::watch,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    encoder::{EncodeError, Encoder},
    playback::{PlaybackSnapshot, PlaybackState, Progress},
    queue::{QueuePosition, Song, SongQueue},
};
use crate::{
    config::Config,
    sources::{MediaResolver, SourceError},
    ui::{messages::messages, Controls, MessageSink, PresenceSink, SongMessage},
    voice::{FrameSpeaker, SpeakOutcome, VoiceError, VoiceManager, VoiceSettings, VoiceTransport},
};

static NEXT_PLAYER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("failed to resolve song metadata: {0}")]
    Metadata(#[source] SourceError),
    #[error("failed to download audio: {0}")]
    Download(#[source] SourceError),
    #[error("failed to prepare audio stream: {0}")]
    Encode(#[from] EncodeError),
    #[error("the queue is empty")]
    EmptyQueue,
    #[error("the player has been disposed")]
    Disposed,
    #[error(transparent)]
    Voice(#[from] VoiceError),
}

impl PlayerError {
    /// Texto para el usuario
    pub fn user_message(&self) -> String {
        let catalogue = messages();
        match self {
            Self::Metadata(_) => catalogue.player.failed_to_queue.clone(),
            Self::EmptyQueue => catalogue.player.no_more_songs.clone(),
            _ => catalogue.unknown_error.clone(),
        }
    }
}

/// Colaboradores externos del reproductor
#[derive(Clone)]
pub struct PlayerDeps {
    pub transport: Arc<dyn VoiceTransport>,
    pub resolver: Arc<dyn MediaResolver>,
    pub encoder: Arc<dyn Encoder>,
    pub sink: Arc<dyn MessageSink>,
    pub presence: Arc<dyn PresenceSink>,
}

#[derive(Debug, Clone, Copy)]
pub struct PlayerSettings {
    pub metadata_timeout: Duration,
    pub progress_interval: Duration,
    pub voice: VoiceSettings,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            metadata_timeout: Duration::from_secs(30),
            progress_interval: Duration::from_secs(1),
            voice: VoiceSettings::default(),
        }
    }
}

impl From<&Config> for PlayerSettings {
    fn from(config: &Config) -> Self {
        Self {
            metadata_timeout: config.metadata_timeout,
            progress_interval: config.progress_interval,
            voice: VoiceSettings::from(config),
        }
    }
}

/// Canción preparada junto con su flujo de frames
#[derive(Clone)]
struct ActiveStream {
    song: Arc<Song>,
    speaker: FrameSpeaker,
}

/// Estado compartido con el callback de limpieza del VoiceManager
struct PlayerShared {
    queue: SongQueue,
    playback: PlaybackState,
    stream: Mutex<Option<ActiveStream>>,
    message: tokio::sync::Mutex<SongMessage>,
    /// Bucles de reproducción pendientes o en curso
    active_loops: AtomicUsize,
    /// Última canción programada; una descarga más antigua no la pisa
    generation: AtomicU64,
    disposed: AtomicBool,
}

impl PlayerShared {
    fn teardown(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.stream.lock().take();
        self.queue.clear();
        self.playback.clear();
    }
}

struct LoopGuard(Arc<PlayerShared>);

impl LoopGuard {
    fn enter(shared: &Arc<PlayerShared>) -> Self {
        shared.active_loops.fetch_add(1, Ordering::SeqCst);
        Self(shared.clone())
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.0.active_loops.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Muestra "escuchando <canción>" mientras vive; al soltarse lo borra salvo
/// que otra canción haya empezado ya
struct ListeningStatus<'a> {
    player: &'a ChannelPlayer,
    song: Arc<Song>,
}

impl<'a> ListeningStatus<'a> {
    fn show(player: &'a ChannelPlayer, song: Arc<Song>) -> Self {
        player.deps.presence.set_listening(Some(song.name.clone()));
        Self { player, song }
    }
}

impl Drop for ListeningStatus<'_> {
    fn drop(&mut self) {
        let replaced = self
            .player
            .current_song()
            .is_some_and(|current| !Arc::ptr_eq(&current, &self.song));
        if !replaced {
            self.player.deps.presence.set_listening(None);
        }
    }
}

/// Señales "avisar si alguien escucha": solo las ven los bucles suscritos
/// en el momento del aviso.
struct Signals {
    skip: watch::Sender<u64>,
    pause: watch::Sender<u64>,
}

impl Signals {
    fn new() -> Self {
        Self {
            skip: watch::channel(0).0,
            pause: watch::channel(0).0,
        }
    }

    fn fire(signal: &watch::Sender<u64>) {
        signal.send_modify(|n| *n = n.wrapping_add(1));
    }
}

/// Queue-driven player bound to one voice channel.
///
/// ## State machine
///
/// - **Idle**: no play loop pending or running. [`ChannelPlayer::add_to_queue`]
///   starts the queue head right away.
/// - **Playing**: one loop owns the voice connection and streams the active
///   song. Skip and pause cancel it at the next frame boundary.
/// - **Paused**: the active stream is kept with its position;
///   [`ChannelPlayer::play`] resumes it without downloading again.
/// - **Disposed**: terminal. Reached when the voice manager is disposed
///   (the bot left or was moved, or [`ChannelPlayer::dispose`]).
///
/// Downloads never happen while holding the transition lock, so queueing
/// only waits for metadata.
pub struct ChannelPlayer {
    id: u64,
    guild_id: GuildId,
    channel_id: ChannelId,
    voice: Arc<VoiceManager>,
    shared: Arc<PlayerShared>,
    deps: PlayerDeps,
    settings: PlayerSettings,
    signals: Signals,
    transition: tokio::sync::Mutex<()>,
}

impl ChannelPlayer {
    /// Se une al canal de voz. `on_disposed` se ejecuta antes que la propia
    /// limpieza del reproductor.
    pub async fn new(
        deps: PlayerDeps,
        settings: PlayerSettings,
        guild_id: GuildId,
        channel_id: ChannelId,
        on_disposed: impl FnOnce() + Send + 'static,
    ) -> Result<Arc<Self>, PlayerError> {
        let voice = VoiceManager::new(
            deps.transport.clone(),
            guild_id,
            channel_id,
            settings.voice,
            on_disposed,
        )
        .await?;

        let speaking = Arc::downgrade(&voice);
        let shared = Arc::new(PlayerShared {
            queue: SongQueue::new(),
            playback: PlaybackState::new(move || {
                speaking.upgrade().is_some_and(|voice| voice.is_speaking())
            }),
            stream: Mutex::new(None),
            message: tokio::sync::Mutex::new(SongMessage::new(channel_id, deps.sink.clone())),
            active_loops: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        });

        {
            let shared = shared.clone();
            voice.on_dispose(move || shared.teardown());
        }

        let id = NEXT_PLAYER_ID.fetch_add(1, Ordering::Relaxed);
        info!("🎛️ Reproductor #{} creado para el canal {}", id, channel_id);

        Ok(Arc::new(Self {
            id,
            guild_id,
            channel_id,
            voice,
            shared,
            deps,
            settings,
            signals: Signals::new(),
            transition: tokio::sync::Mutex::new(()),
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst) || self.voice.is_disposed()
    }

    /// Hay un bucle de reproducción pendiente o en curso
    pub fn is_busy(&self) -> bool {
        self.shared.active_loops.load(Ordering::SeqCst) > 0 || self.voice.is_speaking()
    }

    pub fn is_speaking(&self) -> bool {
        self.voice.is_speaking()
    }

    pub fn queue(&self) -> Vec<Arc<Song>> {
        self.shared.queue.list()
    }

    pub fn current_song(&self) -> Option<Arc<Song>> {
        self.shared.playback.current_song()
    }

    pub fn playback(&self) -> PlaybackSnapshot {
        self.shared.playback.snapshot()
    }

    /// Lista numerada en markdown
    pub fn list_for_display(&self) -> String {
        self.queue()
            .iter()
            .enumerate()
            .map(|(i, song)| {
                format!(
                    "{}. {} (añadida por <@{}>)",
                    i + 1,
                    song.markdown_link(),
                    song.author_id
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Resolves metadata and queues the song.
    ///
    /// Starts playback when the player is idle. Only the metadata lookup is
    /// awaited, never the audio download.
    pub async fn add_to_queue(
        self: &Arc<Self>,
        url: &str,
        requester: UserId,
    ) -> Result<QueuePosition, PlayerError> {
        let limit = self.settings.metadata_timeout;
        let metadata = tokio::time::timeout(limit, self.deps.resolver.metadata(url))
            .await
            .map_err(|_| PlayerError::Metadata(SourceError::Timeout(limit)))?
            .map_err(PlayerError::Metadata)?;
        let song = Arc::new(Song::new(url, metadata, requester));

        let _transition = self.transition.lock().await;
        if self.is_disposed() {
            return Err(PlayerError::Disposed);
        }

        let ahead = self.shared.queue.len();
        self.shared.queue.enqueue(song.clone());
        info!(
            "➕ '{}' añadida a la cola del canal {} por {}",
            song.name, self.channel_id, requester
        );

        if self.is_busy() {
            return Ok(QueuePosition::QueuedAt(ahead + 1));
        }

        let started = self.advance_locked()?;
        if Arc::ptr_eq(&started, &song) {
            Ok(QueuePosition::PlayingNow)
        } else {
            Ok(QueuePosition::QueuedAt(ahead))
        }
    }

    /// Reanuda la canción activa si está en pausa
    pub async fn play(self: &Arc<Self>) -> Result<(), PlayerError> {
        let (guard, stream) = {
            let _transition = self.transition.lock().await;
            if self.is_busy() {
                debug!("Reproductor #{} ya está sonando", self.id);
                return Ok(());
            }
            let Some(stream) = self.shared.stream.lock().clone() else {
                debug!("Reproductor #{} no tiene nada que reanudar", self.id);
                return Ok(());
            };
            (LoopGuard::enter(&self.shared), stream)
        };

        self.voice.ready_voice().await?;
        info!("▶️ Reanudando '{}' en el canal {}", stream.song.name, self.channel_id);

        let player = self.clone();
        tokio::spawn(async move { player.play_loop(stream, guard).await });
        Ok(())
    }

    pub fn pause(&self) {
        debug!("⏸️ Pausa solicitada en el canal {}", self.channel_id);
        Signals::fire(&self.signals.pause);
    }

    /// Salta a la siguiente canción de la cola
    pub async fn next(self: &Arc<Self>) -> Result<(), PlayerError> {
        let _transition = self.transition.lock().await;
        let song = self.advance_locked()?;
        info!("⏭️ Siguiente en el canal {}: '{}'", self.channel_id, song.name);
        Ok(())
    }

    pub fn clear_queue(&self) {
        self.shared.queue.clear();
        info!("🧹 Cola del canal {} vaciada", self.channel_id);
    }

    /// Libera el flujo, vacía la cola y desconecta
    pub async fn dispose(&self) {
        self.shared.teardown();
        self.voice.dispose().await;
    }

    /// Requires the transition lock.
    fn advance_locked(self: &Arc<Self>) -> Result<Arc<Song>, PlayerError> {
        let song = self.shared.queue.dequeue().ok_or(PlayerError::EmptyQueue)?;
        Signals::fire(&self.signals.skip);

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = LoopGuard::enter(&self.shared);
        let next = song.clone();
        let player = self.clone();
        tokio::spawn(async move { player.play_song(next, generation, guard).await });

        Ok(song)
    }

    /// Ends a loop under the transition lock.
    ///
    /// The loop stops counting as busy in the same critical section that
    /// looks at the queue, so a song queued meanwhile is either started here
    /// or by `add_to_queue`. Returns `true` when playback goes on.
    async fn finish_loop(self: &Arc<Self>, guard: LoopGuard) -> bool {
        let _transition = self.transition.lock().await;
        drop(guard);
        if self.is_disposed() {
            return false;
        }
        if self.is_busy() {
            return true;
        }
        match self.advance_locked() {
            Ok(song) => {
                info!("⏭️ Siguiente en el canal {}: '{}'", self.channel_id, song.name);
                true
            }
            Err(_) => false,
        }
    }

    async fn prepare(&self, song: &Arc<Song>) -> Result<ActiveStream, PlayerError> {
        let audio = self
            .deps
            .resolver
            .download_opus(&song.url)
            .await
            .map_err(PlayerError::Download)?;
        let session = self.deps.encoder.encode(audio)?;
        Ok(ActiveStream {
            song: song.clone(),
            speaker: FrameSpeaker::new(session),
        })
    }

    async fn play_song(self: &Arc<Self>, song: Arc<Song>, generation: u64, guard: LoopGuard) {
        info!("⬇️ Preparando '{}'", song.name);
        let stream = match self.prepare(&song).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("❌ No se pudo reproducir '{}': {}", song.name, e);
                self.finish_loop(guard).await;
                return;
            }
        };

        let installed = {
            let _transition = self.transition.lock().await;
            if self.is_disposed() {
                return;
            }
            let current = self.shared.generation.load(Ordering::SeqCst) == generation;
            if current {
                *self.shared.stream.lock() = Some(stream.clone());
                self.shared.playback.start(song.clone());
            }
            current
        };

        if !installed {
            debug!("'{}' fue reemplazada antes de empezar", song.name);
            self.finish_loop(guard).await;
            return;
        }
        self.play_loop(stream, guard).await;
    }

    async fn play_loop(self: &Arc<Self>, stream: ActiveStream, guard: LoopGuard) {
        let scope = CancellationToken::new();
        let _scope_guard = scope.clone().drop_guard();
        self.watch_signals(&scope);

        self.render(true).await;
        let _listening = ListeningStatus::show(self, stream.song.clone());
        tokio::spawn(self.clone().track_progress(stream.clone(), scope.clone()));

        info!("🎵 Reproduciendo '{}' en el canal {}", stream.song.name, self.channel_id);
        let outcome = self.voice.speak_with(&scope, &stream.speaker).await;
        scope.cancel();

        match outcome {
            Ok(SpeakOutcome::Finished) => {
                info!("🏁 Terminó '{}'", stream.song.name);
                self.release_stream(&stream);
                if self.finish_loop(guard).await || self.is_disposed() {
                    return;
                }
                if self.render_stopped(&stream.song).await {
                    self.notice(messages().player.no_more_songs.clone()).await;
                }
            }
            Ok(SpeakOutcome::Cancelled) => {
                debug!("Transmisión de '{}' cancelada", stream.song.name);
                if self.is_current(&stream) && !self.is_disposed() {
                    self.render(false).await;
                }
            }
            Err(e) => {
                error!(
                    "❌ Error de transmisión en el canal {} ('{}'): {}",
                    self.channel_id, stream.song.name, e
                );
                if self.finish_loop(guard).await || self.is_disposed() {
                    return;
                }
                self.render_stopped(&stream.song).await;
            }
        }
    }

    /// Cancela el scope con la primera señal de salto o pausa
    fn watch_signals(&self, scope: &CancellationToken) {
        let mut skip = self.signals.skip.subscribe();
        let mut pause = self.signals.pause.subscribe();
        let scope = scope.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = skip.changed() => debug!("⏭️ Salto recibido"),
                _ = pause.changed() => debug!("⏸️ Pausa recibida"),
                _ = scope.cancelled() => return,
            }
            scope.cancel();
        });
    }

    async fn track_progress(self: Arc<Self>, stream: ActiveStream, scope: CancellationToken) {
        let mut frames = stream.speaker.subscribe();
        let mut ticker = interval(self.settings.progress_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut fresh = false;
        loop {
            tokio::select! {
                _ = scope.cancelled() => return,
                changed = frames.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    fresh = true;
                }
                _ = ticker.tick() => {
                    if !fresh {
                        continue;
                    }
                    fresh = false;

                    let sent = *frames.borrow_and_update();
                    let progress = Progress::from_frames(
                        sent,
                        stream.speaker.frame_duration(),
                        stream.song.duration,
                    );
                    if !self.is_current(&stream) {
                        return;
                    }
                    self.shared.playback.update(progress);
                    self.render(true).await;
                }
            }
        }
    }

    fn is_current(&self, stream: &ActiveStream) -> bool {
        self.shared
            .stream
            .lock()
            .as_ref()
            .is_some_and(|current| current.speaker.same_stream(&stream.speaker))
    }

    fn release_stream(&self, stream: &ActiveStream) {
        let mut current = self.shared.stream.lock();
        if current
            .as_ref()
            .is_some_and(|active| active.speaker.same_stream(&stream.speaker))
        {
            *current = None;
        }
    }

    async fn render(&self, playing: bool) {
        let snapshot = self.shared.playback.snapshot();
        let controls = Controls {
            playing,
            can_skip: !self.shared.queue.is_empty(),
        };
        let mut message = self.shared.message.lock().await;
        if let Err(e) = message.send(&snapshot, controls).await {
            warn!("⚠️ No se pudo actualizar el mensaje del canal {}: {}", self.channel_id, e);
        }
    }

    /// Shows `song` as stopped unless another song has replaced it.
    /// Returns whether it rendered.
    async fn render_stopped(&self, song: &Arc<Song>) -> bool {
        let mut message = self.shared.message.lock().await;
        let snapshot = self.shared.playback.snapshot();
        if !snapshot
            .song
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, song))
        {
            return false;
        }
        let controls = Controls {
            playing: false,
            can_skip: !self.shared.queue.is_empty(),
        };
        if let Err(e) = message.send(&snapshot, controls).await {
            warn!("⚠️ No se pudo actualizar el mensaje del canal {}: {}", self.channel_id, e);
        }
        true
    }

    async fn notice(&self, text: String) {
        if let Err(e) = self.deps.sink.send_notice(self.channel_id, text).await {
            warn!("⚠️ No se pudo enviar aviso al canal {}: {}", self.channel_id, e);
        }
    }
}
