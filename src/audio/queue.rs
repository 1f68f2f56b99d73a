use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serenity::model::id::UserId;
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tracing::debug;

use crate::sources::SongMetadata;

/// Canción en cola. Inmutable una vez encolada.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    pub url: String,
    pub name: String,
    pub author_id: UserId,
    pub duration: Duration,
    pub thumbnail_url: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl Song {
    pub fn new(url: impl Into<String>, metadata: SongMetadata, author_id: UserId) -> Self {
        Self {
            url: url.into(),
            name: metadata.title,
            author_id,
            duration: metadata.duration,
            thumbnail_url: metadata.thumbnail_url,
            added_at: Utc::now(),
        }
    }

    /// Enlace markdown `[name](url)`
    pub fn markdown_link(&self) -> String {
        format!("[{}]({})", self.name, self.url)
    }
}

/// Where a newly queued song landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePosition {
    /// Playback of this song started right away.
    PlayingNow,
    /// 1-based place in line: the number of songs ahead of it plus one.
    QueuedAt(usize),
}

/// FIFO de canciones pendientes. Toda mutación pasa por un único lock.
#[derive(Debug, Default)]
pub struct SongQueue {
    items: Mutex<VecDeque<Arc<Song>>>,
}

impl SongQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, song: Arc<Song>) {
        let mut items = self.items.lock();
        items.push_back(song);
        debug!("📝 Canción encolada, {} en cola", items.len());
    }

    pub fn dequeue(&self) -> Option<Arc<Song>> {
        self.items.lock().pop_front()
    }

    /// Copia de la cola; mutarla no afecta a la cola real
    pub fn list(&self) -> Vec<Arc<Song>> {
        self.items.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
