use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub opus_bitrate: u32,
    pub ytdlp_path: String,
    pub cookies_path: Option<PathBuf>,

    // Tiempos límite
    pub metadata_timeout: Duration,
    pub download_timeout: Duration,
    pub voice_ready_timeout: Duration,
    pub voice_ready_poll: Duration,
    pub progress_interval: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Audio
            opus_bitrate: std::env::var("OPUS_BITRATE")
                .unwrap_or_else(|_| "96000".to_string()) // 96kbps (Discord default)
                .parse()?,
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),
            cookies_path: std::env::var("COOKIES_TXT_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),

            // Tiempos límite
            metadata_timeout: Duration::from_secs(
                std::env::var("METADATA_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()?,
            ),
            download_timeout: Duration::from_secs(
                std::env::var("DOWNLOAD_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()?,
            ),
            voice_ready_timeout: Duration::from_secs(
                std::env::var("VOICE_READY_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()?,
            ),
            voice_ready_poll: Duration::from_millis(
                std::env::var("VOICE_READY_POLL_MS")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()?,
            ),
            progress_interval: Duration::from_millis(
                std::env::var("PROGRESS_INTERVAL_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()?,
            ),
        };

        // Validar antes de devolver
        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Opus bitrate must be between 8kbps and 510kbps
    /// - The cookies file, when given, must be an absolute path
    /// - Every timeout and interval must be non-zero
    /// - The readiness poll interval must be shorter than the readiness deadline
    pub fn validate(&self) -> Result<()> {
        if self.opus_bitrate > 510_000 {
            anyhow::bail!("Opus bitrate cannot exceed 510kbps, got: {}", self.opus_bitrate);
        }

        if self.opus_bitrate < 8_000 {
            anyhow::bail!("Opus bitrate too low, minimum 8kbps, got: {}", self.opus_bitrate);
        }

        if self.ytdlp_path.trim().is_empty() {
            anyhow::bail!("yt-dlp path must not be empty");
        }

        if let Some(path) = &self.cookies_path {
            if !path.is_absolute() {
                anyhow::bail!("COOKIES_TXT_PATH must be an absolute path, got: {}", path.display());
            }
        }

        for (name, value) in [
            ("metadata timeout", self.metadata_timeout),
            ("download timeout", self.download_timeout),
            ("voice ready timeout", self.voice_ready_timeout),
            ("voice ready poll", self.voice_ready_poll),
            ("progress interval", self.progress_interval),
        ] {
            if value.is_zero() {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        if self.voice_ready_poll >= self.voice_ready_timeout {
            anyhow::bail!(
                "Voice ready poll ({:?}) must be shorter than the ready timeout ({:?})",
                self.voice_ready_poll,
                self.voice_ready_timeout
            );
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Audio: {}kbps, yt-dlp at '{}', cookies: {}\n  \
            Timeouts: metadata {}, download {}, voice ready {} (poll {})\n  \
            Progress updates every {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.opus_bitrate / 1000,
            self.ytdlp_path,
            self.cookies_path
                .as_ref()
                .map_or("none".to_string(), |p| p.display().to_string()),
            humantime::format_duration(self.metadata_timeout),
            humantime::format_duration(self.download_timeout),
            humantime::format_duration(self.voice_ready_timeout),
            humantime::format_duration(self.voice_ready_poll),
            humantime::format_duration(self.progress_interval),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,
            opus_bitrate: 96_000,
            ytdlp_path: "yt-dlp".to_string(),
            cookies_path: None,
            metadata_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(300),
            voice_ready_timeout: Duration::from_secs(60),
            voice_ready_poll: Duration::from_millis(100),
            progress_interval: Duration::from_secs(1),
        }
    }
}
