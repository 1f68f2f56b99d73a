use serenity::{
    all::ButtonStyle,
    builder::{CreateActionRow, CreateButton},
};

/// IDs personalizados para los botones
pub mod button_ids {
    pub const PLAY: &str = "player_play";
    pub const PAUSE: &str = "player_pause";
    pub const NEXT: &str = "player_next";
}

/// Acción asociada a un botón del reproductor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerAction {
    Play,
    Pause,
    Next,
}

impl PlayerAction {
    pub fn from_custom_id(custom_id: &str) -> Option<Self> {
        match custom_id {
            button_ids::PLAY => Some(Self::Play),
            button_ids::PAUSE => Some(Self::Pause),
            button_ids::NEXT => Some(Self::Next),
            _ => None,
        }
    }

    pub fn custom_id(self) -> &'static str {
        match self {
            Self::Play => button_ids::PLAY,
            Self::Pause => button_ids::PAUSE,
            Self::Next => button_ids::NEXT,
        }
    }
}

/// Play o pausa según el estado, y siguiente (deshabilitado sin cola)
pub fn player_buttons(playing: bool, can_skip: bool) -> Vec<(PlayerAction, char, bool)> {
    let toggle = if playing {
        (PlayerAction::Pause, '⏸', false)
    } else {
        (PlayerAction::Play, '▶', false)
    };
    vec![toggle, (PlayerAction::Next, '⏭', !can_skip)]
}

/// Crea los controles del reproductor
pub fn create_player_controls(playing: bool, can_skip: bool) -> Vec<CreateActionRow> {
    let buttons = player_buttons(playing, can_skip)
        .into_iter()
        .map(|(action, emoji, disabled)| {
            CreateButton::new(action.custom_id())
                .emoji(emoji)
                .style(if action == PlayerAction::Next {
                    ButtonStyle::Secondary
                } else {
                    ButtonStyle::Primary
                })
                .disabled(disabled)
        })
        .collect();

    vec![CreateActionRow::Buttons(buttons)]
}
