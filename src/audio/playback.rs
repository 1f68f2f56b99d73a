use parking_lot::RwLock;
use std::{sync::Arc, time::Duration};

use super::queue::Song;

const PROGRESS_BAR_WIDTH: usize = 20;

/// Progreso calculado a partir de los frames enviados.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub elapsed: Duration,
    pub remaining: Duration,
    pub percent: u8,
}

impl Progress {
    /// `elapsed = frames × frame_duration`; percent is clamped to `0..=100` and
    /// is 0 when the total duration is unknown (zero).
    pub fn from_frames(frames_sent: u64, frame_duration: Duration, total: Duration) -> Self {
        let elapsed_ms = frames_sent.saturating_mul(frame_duration.as_millis() as u64);
        let elapsed = Duration::from_millis(elapsed_ms);
        let total_ms = total.as_millis() as u64;

        let percent = if total_ms == 0 {
            0
        } else {
            (elapsed_ms as f64 / total_ms as f64 * 100.0).clamp(0.0, 100.0) as u8
        };

        Self {
            elapsed,
            remaining: total.saturating_sub(elapsed),
            percent,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlaybackSnapshot {
    pub song: Option<Arc<Song>>,
    pub remaining: Duration,
    pub percent: u8,
    pub playing: bool,
}

impl PlaybackSnapshot {
    /// `MM:SS ████░░░░` con el tiempo restante
    pub fn status_line(&self) -> String {
        format!("{} {}", format_min_sec(self.remaining), progress_bar(self.percent))
    }
}

#[derive(Debug, Default)]
struct PlaybackInner {
    song: Option<Arc<Song>>,
    remaining: Duration,
    percent: u8,
}

/// Current song and its progress.
///
/// The percentage never goes backwards while the same song is playing;
/// [`PlaybackState::start`] resets it for the next one. Whether audio is
/// actually flowing is answered by a predicate supplied by the owner, so the
/// state never has to be told about pauses.
pub struct PlaybackState {
    inner: RwLock<PlaybackInner>,
    is_playing: Box<dyn Fn() -> bool + Send + Sync>,
}

impl PlaybackState {
    pub fn new(is_playing: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            inner: RwLock::new(PlaybackInner::default()),
            is_playing: Box::new(is_playing),
        }
    }

    pub fn start(&self, song: Arc<Song>) {
        let mut inner = self.inner.write();
        inner.remaining = song.duration;
        inner.percent = 0;
        inner.song = Some(song);
    }

    pub fn update(&self, progress: Progress) {
        let mut inner = self.inner.write();
        if inner.song.is_none() {
            return;
        }
        if progress.percent >= inner.percent {
            inner.percent = progress.percent;
            inner.remaining = progress.remaining;
        }
    }

    pub fn clear(&self) {
        *self.inner.write() = PlaybackInner::default();
    }

    pub fn current_song(&self) -> Option<Arc<Song>> {
        self.inner.read().song.clone()
    }

    pub fn remaining(&self) -> Duration {
        self.inner.read().remaining
    }

    pub fn percent(&self) -> u8 {
        self.inner.read().percent
    }

    pub fn is_playing(&self) -> bool {
        (self.is_playing)()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let inner = self.inner.read();
        PlaybackSnapshot {
            song: inner.song.clone(),
            remaining: inner.remaining,
            percent: inner.percent,
            playing: self.is_playing(),
        }
    }
}

/// Formatea una duración como `MM:SS`
pub fn format_min_sec(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

pub fn progress_bar(percent: u8) -> String {
    let filled = (percent.min(100) as usize * PROGRESS_BAR_WIDTH) / 100;
    format!(
        "{}{}",
        "█".repeat(filled),
        "░".repeat(PROGRESS_BAR_WIDTH - filled)
    )
}
