use rand::seq::SliceRandom;
use serde::Deserialize;
use std::sync::LazyLock;

use crate::audio::queue::{QueuePosition, Song};

static MESSAGES: LazyLock<Messages> = LazyLock::new(|| {
    serde_json::from_str(include_str!("messages.json")).expect("messages.json embebido inválido")
});

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Messages {
    pub player: PlayerMessages,
    pub must_be_in_voice_channel: String,
    pub unknown_error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerMessages {
    pub no_more_songs: String,
    pub cleared_queue: String,
    pub empty_queue: String,
    pub paused: String,
    pub resumed: String,
    pub skipped: String,
    pub added_to_queue_as_next: String,
    pub added_to_queue: Vec<String>,
    pub now_playing: Vec<String>,
    pub failed_to_queue: String,
    pub queue_listing: String,
}

/// Catálogo de textos embebido en el binario
pub fn messages() -> &'static Messages {
    &MESSAGES
}

/// Elige una variante al azar
pub fn pick(options: &[String]) -> &str {
    options
        .choose(&mut rand::thread_rng())
        .map(String::as_str)
        .unwrap_or_default()
}

/// Sustituye cada `{TOKEN}` por su valor
pub fn fill(template: &str, tokens: &[(&str, &str)]) -> String {
    tokens
        .iter()
        .fold(template.to_string(), |text, (token, value)| {
            text.replace(&format!("{{{}}}", token), value)
        })
}

pub fn now_playing_headline(song: &Song) -> String {
    fill(
        pick(&messages().player.now_playing),
        &[("SONG_NAME", &song.markdown_link())],
    )
}

pub fn added_to_queue(position: QueuePosition) -> String {
    match position {
        QueuePosition::PlayingNow => messages().player.added_to_queue_as_next.clone(),
        QueuePosition::QueuedAt(n) => fill(
            pick(&messages().player.added_to_queue),
            &[("INDEX", &n.to_string())],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn embedded_catalogue_parses() {
        let player = &messages().player;
        assert!(!player.now_playing.is_empty());
        assert!(!player.added_to_queue.is_empty());
        assert!(player.now_playing.iter().all(|t| t.contains("{SONG_NAME}")));
        assert!(player.added_to_queue.iter().all(|t| t.contains("{INDEX}")));
    }

    #[test]
    fn fill_replaces_every_token() {
        assert_eq!(
            fill("{A} y {B} y {A}", &[("A", "uno"), ("B", "dos")]),
            "uno y dos y uno"
        );
    }

    #[test]
    fn queued_position_is_rendered() {
        let text = added_to_queue(QueuePosition::QueuedAt(3));
        assert!(text.contains('3'), "{text}");
        assert!(!text.contains("{INDEX}"));
    }

    #[test]
    fn pick_on_empty_list_is_empty() {
        assert_eq!(pick(&[]), "");
    }
}
