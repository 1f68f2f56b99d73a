//! # Bot Module
//!
//! Discord surface of the jukebox: slash command registration, interaction
//! dispatch and forwarding of the bot's own voice state to the voice
//! transport.
//!
//! Commands are issued from the text chat of a voice channel and act on
//! that channel's player, which is created (joining the channel) by the
//! first `/play`.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{
    audio::ChannelPlayerManager,
    config::Config,
    ui::ShardPresence,
    voice::{discord::SongbirdTransport, VoiceStateChange},
};

pub struct JukeboxBot {
    config: Arc<Config>,
    players: Arc<ChannelPlayerManager>,
    transport: Arc<SongbirdTransport>,
    presence: Arc<ShardPresence>,
}

impl JukeboxBot {
    pub fn new(
        config: Arc<Config>,
        players: Arc<ChannelPlayerManager>,
        transport: Arc<SongbirdTransport>,
        presence: Arc<ShardPresence>,
    ) -> Self {
        Self {
            config,
            players,
            transport,
            presence,
        }
    }

    pub fn players(&self) -> &ChannelPlayerManager {
        &self.players
    }

    /// Registra los comandos en la guild configurada, o globalmente
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }
                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica el permiso 'applications.commands'.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica el permiso 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

/// Cambio de voz del propio bot, si `new` es suyo y tiene guild
fn own_voice_change(
    bot_user: serenity::model::id::UserId,
    old: Option<&VoiceState>,
    new: &VoiceState,
) -> Option<VoiceStateChange> {
    if new.user_id != bot_user {
        return None;
    }
    Some(VoiceStateChange {
        guild_id: new.guild_id?,
        previous_channel: old.and_then(|state| state.channel_id),
        channel: new.channel_id,
    })
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        // Estado "escuchando" de los reproductores
        self.presence.attach(ctx.shard.clone());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command) => {
                if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                    error!("Error manejando comando: {:?}", e);
                }
            }
            Interaction::Component(component) => {
                if let Err(e) = handlers::handle_component(&ctx, component, self).await {
                    error!("Error manejando componente: {:?}", e);
                }
            }
            _ => {}
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let bot_user = ctx.cache.current_user().id;
        if let Some(change) = own_voice_change(bot_user, old.as_ref(), &new) {
            if change.channel.is_none() {
                info!("🔌 Bot desconectado en guild {}", change.guild_id);
            }
            self.transport.publish(change);
        }
    }
}
