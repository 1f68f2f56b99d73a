use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::sync::Arc;

use super::now_playing::NowPlayingView;
use crate::audio::{playback::format_min_sec, queue::Song};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Voice Jukebox";

/// Máximo de canciones listadas en el embed de la cola
const QUEUE_PREVIEW: usize = 10;

/// Crea el embed de la canción actual
pub fn create_now_playing_embed(view: &NowPlayingView) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title(&view.title)
        .url(&view.url)
        .color(if view.playing {
            colors::SUCCESS_GREEN
        } else {
            colors::NEUTRAL_GRAY
        })
        .field("👤 Añadida por", format!("<@{}>", view.requested_by), true)
        .field("⏱️ Progreso", &view.status, false);

    if let Some(thumbnail) = &view.thumbnail_url {
        embed = embed.thumbnail(thumbnail);
    }

    embed.footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar la cola de reproducción
pub fn create_queue_embed(current: Option<&Arc<Song>>, queue: &[Arc<Song>]) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    if let Some(song) = current {
        embed = embed.field(
            "▶️ Sonando",
            format!("{} `{}`", song.markdown_link(), format_min_sec(song.duration)),
            false,
        );
    }

    if queue.is_empty() {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <url>` para agregar música")
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    let mut listing = queue
        .iter()
        .take(QUEUE_PREVIEW)
        .enumerate()
        .map(|(i, song)| {
            format!(
                "`{}.` {} `{}` • <@{}>",
                i + 1,
                song.markdown_link(),
                format_min_sec(song.duration),
                song.author_id
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    if queue.len() > QUEUE_PREVIEW {
        listing.push_str(&format!("\n… y {} más", queue.len() - QUEUE_PREVIEW));
    }

    embed
        .description(listing)
        .footer(CreateEmbedFooter::new(format!(
            "{} canciones en cola • {}",
            queue.len(),
            STANDARD_FOOTER
        )))
        .timestamp(Timestamp::now())
}
