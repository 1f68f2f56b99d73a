use async_trait::async_trait;
use bytes::Bytes;
use std::{
    path::{Path, PathBuf},
    process::Output,
    time::Duration,
};
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

use super::{MediaResolver, SongMetadata, SourceError};
use crate::config::Config;

const YOUTUBE_WATCH_URL: &str = "https://www.youtube.com/watch";

/// Resolver basado en yt-dlp: metadatos con `--print` y descarga a un
/// directorio temporal.
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    binary: String,
    cookies_path: Option<PathBuf>,
    download_timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(config: &Config) -> Self {
        Self {
            binary: config.ytdlp_path.clone(),
            cookies_path: config.cookies_path.clone(),
            download_timeout: config.download_timeout,
        }
    }

    /// Verifica que yt-dlp esté disponible
    pub async fn verify(&self) -> Result<String, SourceError> {
        let output = self.run(vec!["--version".to_string()], self.download_timeout).await?;
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("✅ yt-dlp versión: {}", version);
        Ok(version)
    }

    /// Argumentos de cookies, solo si el archivo existe
    async fn cookies_args(&self) -> Vec<String> {
        let Some(path) = &self.cookies_path else {
            return Vec::new();
        };

        match tokio::fs::metadata(path).await {
            Ok(_) => {
                debug!("🍪 Usando cookies de: {}", path.display());
                vec!["--cookies".to_string(), path.display().to_string()]
            }
            Err(e) => {
                warn!("🍪 No se pudo leer el archivo de cookies {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    async fn run(&self, args: Vec<String>, limit: Duration) -> Result<Output, SourceError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&args).kill_on_drop(true);

        let output = tokio::time::timeout(limit, cmd.output())
            .await
            .map_err(|_| SourceError::Timeout(limit))?
            .map_err(SourceError::Spawn)?;

        if !output.status.success() {
            return Err(SourceError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output)
    }

    async fn download_into(&self, url: &str, dir: &Path) -> Result<Bytes, SourceError> {
        let target = dir.join("track.audio");

        let mut args = self.cookies_args().await;
        args.extend(
            [
                "--no-playlist",
                "--quiet",
                "--no-warnings",
                "--format",
                "bestaudio[ext=m4a]/bestaudio/best",
                "-o",
            ]
            .map(String::from),
        );
        args.push(target.display().to_string());
        args.push(url.to_string());

        self.run(args, self.download_timeout).await?;

        let audio = tokio::fs::read(&target).await?;
        Ok(Bytes::from(audio))
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn metadata(&self, url: &str) -> Result<SongMetadata, SourceError> {
        let url = sanitize_video_url(url)?;

        let mut args = self.cookies_args().await;
        args.extend(
            ["--no-playlist", "--no-warnings", "--print", "duration,title,thumbnail"]
                .map(String::from),
        );
        args.push(url.clone());

        let output = self.run(args, self.download_timeout).await?;
        let metadata = parse_metadata_output(&String::from_utf8_lossy(&output.stdout))?;

        info!("🔍 Metadatos obtenidos: {} ({:?})", metadata.title, metadata.duration);
        Ok(metadata)
    }

    async fn download_opus(&self, url: &str) -> Result<Bytes, SourceError> {
        let url = sanitize_video_url(url)?;
        // El directorio se elimina al salir de este scope
        let dir = tempfile::tempdir()?;

        info!("⬇️ Descargando audio: {}", url);
        let audio = self.download_into(&url, dir.path()).await?;
        info!("✅ Descarga completada: {} bytes", audio.len());

        Ok(audio)
    }
}

/// Normaliza un enlace de YouTube a `https://www.youtube.com/watch?v=<id>`.
///
/// Accepts `youtube.com/watch?v=<id>` (any subdomain, extra parameters are
/// dropped) and `youtu.be/<id>`.
pub fn sanitize_video_url(raw: &str) -> Result<String, SourceError> {
    let parsed = Url::parse(raw.trim()).map_err(|_| SourceError::InvalidUrl(raw.to_string()))?;
    let host = parsed.host_str().unwrap_or_default();

    let video_id = if host == "youtu.be" {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    } else if host == "youtube.com" || host.ends_with(".youtube.com") {
        parsed
            .query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned())
            .filter(|id| !id.is_empty())
    } else {
        None
    };

    let video_id = video_id.ok_or_else(|| SourceError::InvalidUrl(raw.to_string()))?;

    let mut sanitized = Url::parse(YOUTUBE_WATCH_URL).map_err(|_| SourceError::InvalidUrl(raw.to_string()))?;
    sanitized.query_pairs_mut().append_pair("v", &video_id);
    Ok(sanitized.to_string())
}

/// Interpreta la salida de `--print duration,title,thumbnail` (una línea por campo)
pub fn parse_metadata_output(stdout: &str) -> Result<SongMetadata, SourceError> {
    let lines: Vec<&str> = stdout.lines().map(str::trim).collect();
    if lines.len() < 3 {
        return Err(SourceError::Parse(format!(
            "expected 3 lines, got {}",
            lines.len()
        )));
    }

    let duration = match lines[0] {
        "NA" | "" => Duration::ZERO,
        value => value
            .parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
            .ok_or_else(|| SourceError::Parse(format!("invalid duration '{}'", value)))?,
    };

    let title = lines[1].to_string();
    if title.is_empty() {
        return Err(SourceError::Parse("empty title".to_string()));
    }

    let thumbnail_url = match lines[2] {
        "NA" | "" => None,
        value => Some(value.to_string()),
    };

    Ok(SongMetadata {
        title,
        duration,
        thumbnail_url,
    })
}
