use parking_lot::RwLock;
use serenity::gateway::{ActivityData, ShardMessenger};
use tracing::debug;

/// Estado "escuchando <canción>" del bot
#[cfg_attr(test, mockall::automock)]
pub trait PresenceSink: Send + Sync {
    /// `None` borra el estado
    fn set_listening(&self, title: Option<String>);
}

/// Presencia sobre el shard del gateway, disponible tras `ready`
#[derive(Default)]
pub struct ShardPresence {
    shard: RwLock<Option<ShardMessenger>>,
}

impl ShardPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, shard: ShardMessenger) {
        *self.shard.write() = Some(shard);
    }
}

impl PresenceSink for ShardPresence {
    fn set_listening(&self, title: Option<String>) {
        let shard = self.shard.read();
        let Some(shard) = shard.as_ref() else {
            debug!("Sin shard todavía, estado no actualizado");
            return;
        };
        shard.set_activity(title.map(ActivityData::listening));
    }
}
