use parking_lot::{Mutex, RwLock};
use serenity::model::id::{ChannelId, GuildId};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::{interval, sleep, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    Departure, SpeakOutcome, Speaker, VoiceConnection, VoiceError, VoiceResult, VoiceSettings,
    VoiceStateChange, VoiceTransport,
};

type Disposer = Box<dyn FnOnce() + Send + 'static>;

/// Owns the voice connection of one channel.
///
/// ## Lifecycle
///
/// `join → ready → (leave | move | dispose) → disposed`. Once disposed the
/// manager is terminal: the connection handle is gone, every registered
/// disposer has run exactly once (in registration order) and any ongoing
/// [`VoiceManager::speak`] has been cancelled.
///
/// ## Playback
///
/// Only one speaker can hold the connection at a time. [`VoiceManager::is_speaking`]
/// reports whether that lock is currently taken by an active speaker.
pub struct VoiceManager {
    guild_id: GuildId,
    channel_id: ChannelId,
    transport: Arc<dyn VoiceTransport>,
    settings: VoiceSettings,
    connection: RwLock<Option<Arc<dyn VoiceConnection>>>,
    speak_lock: tokio::sync::Mutex<()>,
    /// Una sola reconexión a la vez
    rejoin_lock: tokio::sync::Mutex<()>,
    speaking: AtomicBool,
    disposed: CancellationToken,
    /// `None` una vez descartado
    disposers: Mutex<Option<Vec<Disposer>>>,
}

impl VoiceManager {
    /// Se une al canal y empieza a vigilar el estado de voz del bot.
    /// `on_disposed` es el primer callback de limpieza.
    pub async fn new(
        transport: Arc<dyn VoiceTransport>,
        guild_id: GuildId,
        channel_id: ChannelId,
        settings: VoiceSettings,
        on_disposed: impl FnOnce() + Send + 'static,
    ) -> VoiceResult<Arc<Self>> {
        // Suscribirse antes de unirse para no perder una salida temprana
        let updates = transport.voice_state_updates();
        let connection = transport.join(guild_id, channel_id).await?;
        info!("🔊 Conectado al canal de voz {} (guild {})", channel_id, guild_id);

        let manager = Arc::new(Self {
            guild_id,
            channel_id,
            transport,
            settings,
            connection: RwLock::new(Some(connection)),
            speak_lock: tokio::sync::Mutex::new(()),
            rejoin_lock: tokio::sync::Mutex::new(()),
            speaking: AtomicBool::new(false),
            disposed: CancellationToken::new(),
            disposers: Mutex::new(Some(vec![Box::new(on_disposed)])),
        });

        tokio::spawn(watch_voice_state(
            Arc::downgrade(&manager),
            updates,
            manager.disposed.clone(),
        ));

        Ok(manager)
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.is_cancelled()
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    fn current_connection(&self) -> Option<Arc<dyn VoiceConnection>> {
        self.connection.read().clone()
    }

    /// Ensures the connection is usable, rejoining when needed.
    ///
    /// Waits until the connection reports ready, the manager is disposed
    /// (returns `Ok`), or `ready_timeout` elapses ([`VoiceError::Timeout`]).
    pub async fn ready_voice(&self) -> VoiceResult<()> {
        if self.is_disposed() {
            return Ok(());
        }
        if self.current_connection().is_some_and(|c| c.is_ready()) {
            return Ok(());
        }

        // Quien espere aquí reutiliza la conexión que haya dejado el anterior
        let _rejoin = self.rejoin_lock.lock().await;
        if self.is_disposed() || self.current_connection().is_some_and(|c| c.is_ready()) {
            return Ok(());
        }

        warn!("🔄 Conexión de voz no lista, reconectando al canal {}", self.channel_id);
        let connection = self.transport.join(self.guild_id, self.channel_id).await?;

        let installed = {
            let mut slot = self.connection.write();
            if self.is_disposed() {
                false
            } else {
                *slot = Some(connection.clone());
                true
            }
        };
        if !installed {
            if let Err(e) = connection.disconnect().await {
                warn!("⚠️ Error al cerrar una reconexión tardía: {}", e);
            }
            return Ok(());
        }

        let deadline = sleep(self.settings.ready_timeout);
        tokio::pin!(deadline);
        let mut poll = interval(self.settings.ready_poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.disposed.cancelled() => {
                    debug!("Espera de conexión interrumpida por descarte");
                    return Ok(());
                }
                _ = &mut deadline => {
                    error!(
                        "❌ La conexión al canal {} no estuvo lista tras {:?}",
                        self.channel_id, self.settings.ready_timeout
                    );
                    return Err(VoiceError::Timeout(self.settings.ready_timeout));
                }
                _ = poll.tick() => {
                    if connection.is_ready() {
                        info!("✅ Conexión de voz lista en el canal {}", self.channel_id);
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Devuelve la conexión lista para usar
    pub async fn voice_connection(&self) -> VoiceResult<Arc<dyn VoiceConnection>> {
        self.ready_voice().await?;
        self.current_connection().ok_or(VoiceError::Disposed)
    }

    pub async fn speak<S: Speaker + ?Sized>(&self, speaker: &S) -> VoiceResult<SpeakOutcome> {
        self.speak_with(&CancellationToken::new(), speaker).await
    }

    /// Runs `speaker` with exclusive use of the connection.
    ///
    /// The speaker's scope is cancelled when `cancel` fires or the manager is
    /// disposed, whichever comes first.
    pub async fn speak_with<S: Speaker + ?Sized>(
        &self,
        cancel: &CancellationToken,
        speaker: &S,
    ) -> VoiceResult<SpeakOutcome> {
        let _playback = self.speak_lock.lock().await;
        let connection = self.voice_connection().await?;

        let scope = self.speaker_scope(cancel);
        let _scope_guard = scope.clone().drop_guard();
        if scope.is_cancelled() {
            return Ok(SpeakOutcome::Cancelled);
        }

        let _speaking = SpeakingFlag::raise(&self.speaking);
        speaker.speak(&scope, connection).await
    }

    fn speaker_scope(&self, parent: &CancellationToken) -> CancellationToken {
        let scope = parent.child_token();
        let disposed = self.disposed.clone();
        let bridge = scope.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = disposed.cancelled() => bridge.cancel(),
                _ = bridge.cancelled() => {}
            }
        });
        scope
    }

    /// Registra un callback de limpieza. Si ya se descartó, se ejecuta ahora.
    pub fn on_dispose(&self, disposer: impl FnOnce() + Send + 'static) {
        let mut disposers = self.disposers.lock();
        if let Some(list) = disposers.as_mut() {
            list.push(Box::new(disposer));
            return;
        }
        drop(disposers);
        disposer();
    }

    /// Disconnects and runs every disposer once. Safe to call repeatedly.
    pub async fn dispose(&self) {
        let Some(disposers) = self.disposers.lock().take() else {
            debug!("VoiceManager del canal {} ya descartado", self.channel_id);
            return;
        };

        info!("🧹 Liberando la conexión de voz del canal {}", self.channel_id);
        self.disposed.cancel();

        let connection = self.connection.write().take();
        if let Some(connection) = connection {
            if let Err(e) = connection.disconnect().await {
                error!("❌ Error al desconectar del canal {}: {}", self.channel_id, e);
            }
        }

        for disposer in disposers {
            disposer();
        }
    }
}

struct SpeakingFlag<'a>(&'a AtomicBool);

impl<'a> SpeakingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for SpeakingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn watch_voice_state(
    manager: Weak<VoiceManager>,
    mut updates: broadcast::Receiver<VoiceStateChange>,
    disposed: CancellationToken,
) {
    loop {
        let update = tokio::select! {
            _ = disposed.cancelled() => return,
            update = updates.recv() => update,
        };

        let change = match update {
            Ok(change) => change,
            Err(RecvError::Lagged(skipped)) => {
                warn!("⚠️ Se omitieron {} eventos de estado de voz", skipped);
                continue;
            }
            Err(RecvError::Closed) => return,
        };

        let Some(manager) = manager.upgrade() else {
            return;
        };

        match change.departure_from(manager.guild_id, manager.channel_id) {
            Some(Departure::Disconnected) => {
                info!("👋 El bot fue desconectado del canal {}", manager.channel_id);
            }
            Some(Departure::Moved(to)) => {
                info!("🔀 El bot fue movido del canal {} a {}", manager.channel_id, to);
            }
            None => continue,
        }

        manager.dispose().await;
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{eventually, FakeTransport};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn guild() -> GuildId {
        GuildId::new(1)
    }

    fn channel() -> ChannelId {
        ChannelId::new(10)
    }

    fn settings() -> VoiceSettings {
        VoiceSettings {
            ready_timeout: Duration::from_millis(200),
            ready_poll_interval: Duration::from_millis(10),
        }
    }

    async fn manager(transport: &Arc<FakeTransport>) -> Arc<VoiceManager> {
        VoiceManager::new(transport.clone(), guild(), channel(), settings(), || {})
            .await
            .unwrap()
    }

    /// Habla hasta que el scope se cancela
    struct UntilCancelled;

    #[async_trait]
    impl Speaker for UntilCancelled {
        async fn speak(
            &self,
            cancel: &CancellationToken,
            _connection: Arc<dyn VoiceConnection>,
        ) -> VoiceResult<SpeakOutcome> {
            cancel.cancelled().await;
            Ok(SpeakOutcome::Cancelled)
        }
    }

    #[tokio::test]
    async fn join_failure_is_a_connection_error() {
        let transport = FakeTransport::new();
        transport.set_fail_joins(true);

        let result = VoiceManager::new(transport.clone(), guild(), channel(), settings(), || {}).await;

        assert!(matches!(result, Err(VoiceError::Connection { .. })));
    }

    #[tokio::test]
    async fn ready_voice_rejoins_a_connection_that_is_not_ready() {
        let transport = FakeTransport::new();
        let manager = manager(&transport).await;
        transport.last_connection().unwrap().set_ready(false);

        manager.ready_voice().await.unwrap();

        assert_eq!(transport.joins(), 2);
        assert!(manager.voice_connection().await.unwrap().is_ready());
    }

    #[tokio::test]
    async fn concurrent_ready_voice_rejoins_once() {
        let transport = FakeTransport::new();
        let manager = manager(&transport).await;
        transport.set_join_delay(Duration::from_millis(50));
        let stale = transport.last_connection().unwrap();
        stale.set_ready(false);

        let (first, second) = tokio::join!(manager.ready_voice(), manager.ready_voice());

        assert!(first.is_ok() && second.is_ok());
        assert_eq!(transport.joins(), 2);
        assert!(!Arc::ptr_eq(&transport.last_connection().unwrap(), &stale));
    }

    #[tokio::test]
    async fn ready_voice_times_out() {
        let transport = FakeTransport::new();
        let manager = manager(&transport).await;
        transport.set_ready_on_join(false);
        transport.last_connection().unwrap().set_ready(false);

        let started = tokio::time::Instant::now();
        let result = manager.ready_voice().await;

        assert!(matches!(result, Err(VoiceError::Timeout(_))));
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn disposal_interrupts_ready_wait() {
        let transport = FakeTransport::new();
        let manager = manager(&transport).await;
        transport.set_ready_on_join(false);
        transport.last_connection().unwrap().set_ready(false);

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ready_voice().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        manager.dispose().await;

        let result = tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn dispose_runs_disposers_once_in_order() {
        let transport = FakeTransport::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let manager = {
            let order = order.clone();
            VoiceManager::new(transport.clone(), guild(), channel(), settings(), move || {
                order.lock().push("registry")
            })
            .await
            .unwrap()
        };
        {
            let order = order.clone();
            manager.on_dispose(move || order.lock().push("player"));
        }

        manager.dispose().await;
        manager.dispose().await;

        assert_eq!(*order.lock(), vec!["registry", "player"]);
        assert_eq!(transport.last_connection().unwrap().disconnects(), 1);
        assert!(matches!(
            manager.voice_connection().await,
            Err(VoiceError::Disposed)
        ));
    }

    #[tokio::test]
    async fn late_disposer_runs_immediately() {
        let transport = FakeTransport::new();
        let manager = manager(&transport).await;
        manager.dispose().await;

        let ran = Arc::new(AtomicBool::new(false));
        {
            let ran = ran.clone();
            manager.on_dispose(move || ran.store(true, Ordering::SeqCst));
        }

        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn leaving_the_channel_disposes() {
        let transport = FakeTransport::new();
        let manager = manager(&transport).await;

        transport.emit(VoiceStateChange {
            guild_id: guild(),
            previous_channel: Some(channel()),
            channel: None,
        });

        eventually("manager disposed", || manager.is_disposed()).await;
    }

    #[tokio::test]
    async fn being_moved_disposes_but_rejoining_does_not() {
        let transport = FakeTransport::new();
        let manager = manager(&transport).await;

        transport.emit(VoiceStateChange {
            guild_id: guild(),
            previous_channel: None,
            channel: Some(channel()),
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!manager.is_disposed());

        transport.emit(VoiceStateChange {
            guild_id: guild(),
            previous_channel: Some(channel()),
            channel: Some(ChannelId::new(99)),
        });
        eventually("manager disposed", || manager.is_disposed()).await;
    }

    #[tokio::test]
    async fn speak_is_exclusive_and_cancelled_by_disposal() {
        let transport = FakeTransport::new();
        let manager = manager(&transport).await;

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.speak(&UntilCancelled).await })
        };
        eventually("speaking", || manager.is_speaking()).await;

        let second = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.speak(&UntilCancelled).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!second.is_finished());

        manager.dispose().await;

        let first = tokio::time::timeout(Duration::from_secs(1), first)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.unwrap(), SpeakOutcome::Cancelled);

        let second = tokio::time::timeout(Duration::from_secs(1), second)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(second, Err(VoiceError::Disposed)));
        assert!(!manager.is_speaking());
    }

    #[tokio::test]
    async fn caller_cancellation_stops_the_speaker() {
        let transport = FakeTransport::new();
        let manager = manager(&transport).await;
        let cancel = CancellationToken::new();

        let task = {
            let manager = manager.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { manager.speak_with(&cancel, &UntilCancelled).await })
        };
        eventually("speaking", || manager.is_speaking()).await;
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, SpeakOutcome::Cancelled);
        assert!(!manager.is_disposed());
    }
}
