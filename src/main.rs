use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info, warn};

use voice_jukebox::{
    audio::{encoder::OpusFrameEncoder, ChannelPlayerManager, PlayerDeps, PlayerSettings},
    bot::JukeboxBot,
    config::Config,
    sources::YtDlpResolver,
    ui::{HttpMessageSink, ShardPresence},
    voice::discord::SongbirdTransport,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("voice_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Voice Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("⚙️ Configuración:\n{}", config.summary());

    let resolver = Arc::new(YtDlpResolver::new(&config));
    if let Err(e) = resolver.verify().await {
        warn!("⚠️ yt-dlp no disponible, las canciones no podrán descargarse: {}", e);
    }

    let songbird = Songbird::serenity();
    let transport = Arc::new(SongbirdTransport::new(songbird.clone()));
    let http = Arc::new(Http::new(&config.discord_token));
    let presence = Arc::new(ShardPresence::new());

    let deps = PlayerDeps {
        transport: transport.clone(),
        resolver,
        encoder: Arc::new(OpusFrameEncoder::new(config.opus_bitrate)),
        sink: Arc::new(HttpMessageSink::new(http)),
        presence: presence.clone(),
    };
    let players = Arc::new(ChannelPlayerManager::new(deps, PlayerSettings::from(&config)));

    // Intents mínimos: guilds para los comandos y estados de voz para songbird
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let config = Arc::new(config);
    let handler = JukeboxBot::new(config.clone(), players.clone(), transport, presence);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Shutdown ordenado: salir de los canales antes de cerrar los shards
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        players.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    let yt_dlp = async_process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    if yt_dlp.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("yt-dlp no está disponible en '{}'", config.ytdlp_path);
    }
}
