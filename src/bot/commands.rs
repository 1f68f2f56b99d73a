use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

pub const PLAY: &str = "play";
pub const RESUME: &str = "resume";
pub const PAUSE: &str = "pause";
pub const NEXT: &str = "next";
pub const QUEUE: &str = "queue";
pub const CLEAR: &str = "clear";
pub const PLAYER: &str = "player";

/// Opción de `/play`
pub const URL_OPTION: &str = "url";

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        resume_command(),
        pause_command(),
        next_command(),
        queue_command(),
        clear_command(),
        player_command(),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }
    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;
    Ok(())
}

fn play_command() -> CreateCommand {
    CreateCommand::new(PLAY)
        .description("Añade un video de YouTube a la cola del canal")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, URL_OPTION, "Enlace de YouTube")
                .required(true),
        )
}

fn resume_command() -> CreateCommand {
    CreateCommand::new(RESUME).description("Reanuda la reproducción pausada")
}

fn pause_command() -> CreateCommand {
    CreateCommand::new(PAUSE).description("Pausa la reproducción actual")
}

fn next_command() -> CreateCommand {
    CreateCommand::new(NEXT).description("Salta a la siguiente canción")
}

fn queue_command() -> CreateCommand {
    CreateCommand::new(QUEUE).description("Muestra las canciones en cola")
}

fn clear_command() -> CreateCommand {
    CreateCommand::new(CLEAR).description("Vacía la cola sin detener la canción actual")
}

fn player_command() -> CreateCommand {
    CreateCommand::new(PLAYER).description("Muestra el reproductor con sus controles")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn every_command_is_registered_once() {
        let names: Vec<String> = all_commands()
            .iter()
            .map(|command| serde_json::to_value(command).unwrap()["name"].to_string())
            .collect();

        assert_eq!(
            names,
            vec![
                "\"play\"", "\"resume\"", "\"pause\"", "\"next\"", "\"queue\"", "\"clear\"",
                "\"player\""
            ]
        );
    }

    #[test]
    fn play_requires_a_url() {
        let play = serde_json::to_value(play_command()).unwrap();
        assert_eq!(play["options"][0]["name"], URL_OPTION);
        assert_eq!(play["options"][0]["required"], true);
    }
}
