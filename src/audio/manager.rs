use dashmap::DashMap;
use futures::future::join_all;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tracing::{debug, info};

use super::player::{ChannelPlayer, PlayerDeps, PlayerError, PlayerSettings};

type Players = DashMap<ChannelId, Arc<ChannelPlayer>>;

/// Registry of live players, keyed by voice channel.
///
/// A player is inserted when first requested and removed by its own
/// disposal callback, so a later request for the same channel joins again
/// with a fresh player.
pub struct ChannelPlayerManager {
    players: Arc<Players>,
    /// Un candado de creación por canal
    creating: DashMap<ChannelId, Arc<tokio::sync::Mutex<()>>>,
    deps: PlayerDeps,
    settings: PlayerSettings,
}

impl ChannelPlayerManager {
    pub fn new(deps: PlayerDeps, settings: PlayerSettings) -> Self {
        Self {
            players: Arc::new(DashMap::new()),
            creating: DashMap::new(),
            deps,
            settings,
        }
    }

    pub fn get(&self, channel_id: ChannelId) -> Option<Arc<ChannelPlayer>> {
        self.players
            .get(&channel_id)
            .map(|entry| entry.value().clone())
    }

    pub fn contains(&self, channel_id: ChannelId) -> bool {
        self.players.contains_key(&channel_id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Devuelve el reproductor del canal, creándolo (y uniéndose) si no existe
    pub async fn get_or_create(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<ChannelPlayer>, PlayerError> {
        if let Some(player) = self.get(channel_id) {
            return Ok(player);
        }

        let creating = self.creating.entry(channel_id).or_default().clone();
        let _creating = creating.lock().await;
        if let Some(player) = self.get(channel_id) {
            return Ok(player);
        }

        let registry = Arc::downgrade(&self.players);
        let player_id = Arc::new(std::sync::OnceLock::new());
        let on_disposed = {
            let player_id = player_id.clone();
            move || {
                let (Some(players), Some(&id)) = (registry.upgrade(), player_id.get()) else {
                    return;
                };
                if players
                    .remove_if(&channel_id, |_, player| player.id() == id)
                    .is_some()
                {
                    info!("👋 Reproductor del canal {} retirado", channel_id);
                }
            }
        };

        let player = ChannelPlayer::new(
            self.deps.clone(),
            self.settings,
            guild_id,
            channel_id,
            on_disposed,
        )
        .await?;
        let _ = player_id.set(player.id());

        self.register(channel_id, player.clone());
        Ok(player)
    }

    /// Inserta y vuelve a comprobar: una desconexión que llegue durante la
    /// inserción no puede dejar un reproductor muerto registrado
    fn register(&self, channel_id: ChannelId, player: Arc<ChannelPlayer>) {
        let id = player.id();
        let disposed = player.is_disposed();
        self.players.insert(channel_id, player.clone());
        if disposed || player.is_disposed() {
            self.players.remove_if(&channel_id, |_, current| current.id() == id);
            debug!("El reproductor del canal {} se descartó al crearse", channel_id);
        }
    }

    /// Descarta todos los reproductores
    pub async fn shutdown(&self) {
        let players: Vec<_> = self
            .players
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        info!("🛑 Descartando {} reproductores", players.len());
        join_all(players.iter().map(|player| player.dispose())).await;
        self.players.clear();
    }
}
