use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::{CommandInteraction, ComponentInteraction},
        channel::ChannelType,
        id::{ChannelId, GuildId},
    },
    prelude::Context,
};
use tracing::{error, info, warn};

use super::{commands, JukeboxBot};
use crate::ui::{
    buttons::{create_player_controls, PlayerAction},
    embeds::create_queue_embed,
    messages::{self, messages},
};

/// Guild y canal de la interacción, solo si viene del chat de un canal de voz
fn voice_channel(
    guild_id: Option<GuildId>,
    channel_id: ChannelId,
    kind: Option<ChannelType>,
) -> Option<(GuildId, ChannelId)> {
    match (guild_id, kind) {
        (Some(guild_id), Some(ChannelType::Voice)) => Some((guild_id, channel_id)),
        _ => None,
    }
}

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    info!(
        "📝 Comando /{} usado por {} en el canal {}",
        command.data.name, command.user.name, command.channel_id
    );

    let Some((guild_id, channel_id)) = voice_channel(
        command.guild_id,
        command.channel_id,
        command.channel.as_ref().map(|channel| channel.kind),
    ) else {
        return respond(ctx, &command, messages().must_be_in_voice_channel.clone()).await;
    };

    match command.data.name.as_str() {
        commands::PLAY => {
            // Los metadatos pueden tardar más que el plazo de respuesta
            command.defer(&ctx.http).await?;
            let content = handle_play(&command, bot, guild_id, channel_id).await;
            command
                .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
                .await?;
        }
        commands::PLAYER => handle_player(ctx, &command, bot, channel_id).await?,
        name => {
            let content = match name {
                commands::RESUME => handle_resume(bot, channel_id).await,
                commands::PAUSE => handle_pause(bot, channel_id),
                commands::NEXT => handle_next(bot, channel_id).await,
                commands::QUEUE => handle_queue(bot, channel_id),
                commands::CLEAR => handle_clear(bot, channel_id),
                _ => "❌ Comando no reconocido".to_string(),
            };
            respond(ctx, &command, content).await?;
        }
    }

    Ok(())
}

/// Maneja los botones del mensaje "sonando ahora"
pub async fn handle_component(
    ctx: &Context,
    component: ComponentInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    info!(
        "🔘 Botón {} presionado por {} en el canal {}",
        component.data.custom_id, component.user.name, component.channel_id
    );

    let Some(action) = PlayerAction::from_custom_id(&component.data.custom_id) else {
        return reply_ephemeral(ctx, &component, "❌ Acción no reconocida".to_string()).await;
    };
    let Some(player) = bot.players().get(component.channel_id) else {
        return reply_ephemeral(ctx, &component, messages().player.empty_queue.clone()).await;
    };

    let outcome = match action {
        PlayerAction::Play => player.play().await,
        PlayerAction::Pause => {
            player.pause();
            Ok(())
        }
        PlayerAction::Next => player.next().await,
    };

    match outcome {
        Ok(()) => {
            component
                .create_response(&ctx.http, CreateInteractionResponse::Acknowledge)
                .await?;
        }
        Err(e) => {
            warn!("⚠️ Acción {:?} fallida: {}", action, e);
            reply_ephemeral(ctx, &component, e.user_message()).await?;
        }
    }

    Ok(())
}

async fn handle_play(
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
    channel_id: ChannelId,
) -> String {
    let Some(url) = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == commands::URL_OPTION)
        .and_then(|opt| opt.value.as_str())
    else {
        return messages().player.failed_to_queue.clone();
    };

    let player = match bot.players().get_or_create(guild_id, channel_id).await {
        Ok(player) => player,
        Err(e) => {
            error!("❌ No se pudo preparar el reproductor del canal {}: {}", channel_id, e);
            return e.user_message();
        }
    };

    match player.add_to_queue(url, command.user.id).await {
        Ok(position) => messages::added_to_queue(position),
        Err(e) => {
            warn!("⚠️ No se pudo encolar {}: {}", url, e);
            e.user_message()
        }
    }
}

async fn handle_resume(bot: &JukeboxBot, channel_id: ChannelId) -> String {
    let Some(player) = bot.players().get(channel_id) else {
        return messages().player.empty_queue.clone();
    };
    match player.play().await {
        Ok(()) => messages().player.resumed.clone(),
        Err(e) => {
            warn!("⚠️ No se pudo reanudar en el canal {}: {}", channel_id, e);
            e.user_message()
        }
    }
}

fn handle_pause(bot: &JukeboxBot, channel_id: ChannelId) -> String {
    match bot.players().get(channel_id) {
        Some(player) => {
            player.pause();
            messages().player.paused.clone()
        }
        None => messages().player.empty_queue.clone(),
    }
}

async fn handle_next(bot: &JukeboxBot, channel_id: ChannelId) -> String {
    let Some(player) = bot.players().get(channel_id) else {
        return messages().player.empty_queue.clone();
    };
    match player.next().await {
        Ok(()) => messages().player.skipped.clone(),
        Err(e) => e.user_message(),
    }
}

fn handle_queue(bot: &JukeboxBot, channel_id: ChannelId) -> String {
    match bot.players().get(channel_id) {
        Some(player) if !player.queue().is_empty() => messages::fill(
            &messages().player.queue_listing,
            &[("QUEUE", &player.list_for_display())],
        ),
        _ => messages().player.empty_queue.clone(),
    }
}

fn handle_clear(bot: &JukeboxBot, channel_id: ChannelId) -> String {
    if let Some(player) = bot.players().get(channel_id) {
        player.clear_queue();
    }
    messages().player.cleared_queue.clone()
}

async fn handle_player(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    channel_id: ChannelId,
) -> Result<()> {
    let Some(player) = bot.players().get(channel_id) else {
        return respond(ctx, command, messages().player.empty_queue.clone()).await;
    };

    let current = player.current_song();
    let queue = player.queue();
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .embed(create_queue_embed(current.as_ref(), &queue))
                    .components(create_player_controls(
                        player.is_speaking(),
                        !queue.is_empty(),
                    )),
            ),
        )
        .await?;
    Ok(())
}

async fn respond(ctx: &Context, command: &CommandInteraction, content: String) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(content),
            ),
        )
        .await?;
    Ok(())
}

async fn reply_ephemeral(
    ctx: &Context,
    component: &ComponentInteraction,
    content: String,
) -> Result<()> {
    component
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}
