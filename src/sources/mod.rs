pub mod ytdlp;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

pub use ytdlp::YtDlpResolver;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("unsupported or malformed url: {0}")]
    InvalidUrl(String),
    #[error("failed to launch yt-dlp: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("yt-dlp exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("unexpected yt-dlp output: {0}")]
    Parse(String),
    #[error("source did not answer within {0:?}")]
    Timeout(Duration),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadatos mínimos para encolar una canción
#[derive(Debug, Clone, PartialEq)]
pub struct SongMetadata {
    pub title: String,
    pub duration: Duration,
    pub thumbnail_url: Option<String>,
}

/// Trait común para resolver metadatos y descargar audio
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Obtiene título, duración y miniatura de una URL
    async fn metadata(&self, url: &str) -> Result<SongMetadata, SourceError>;

    /// Descarga el audio completo de la URL
    async fn download_opus(&self, url: &str) -> Result<Bytes, SourceError>;
}
