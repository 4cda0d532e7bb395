use anyhow::{Context as _, Result};
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tracing::{error, info, warn};

use guildtune::{
    audio::player::AudioPlayer,
    bot::MusicBot,
    config::Config,
    sources::{Resolver, SmartResolver, SpotifyResolver, YouTubeResolver},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guildtune=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando guildtune v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load().context("Configuración inválida")?;
    info!("{}", config.summary());

    let youtube = Arc::new(YouTubeResolver::new(config.ytdlp_path.clone()));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&youtube).await;
    }

    let spotify = config.spotify.clone().map(|credentials| {
        info!("🟢 Spotify habilitado");
        Arc::new(SpotifyResolver::new(
            credentials.client_id,
            credentials.client_secret,
            youtube.clone(),
        )) as Arc<dyn Resolver>
    });
    let resolver = Arc::new(SmartResolver::new(youtube, spotify));
    let player = AudioPlayer::new(resolver, config.session_options());

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = MusicBot::new(config.clone(), player.clone());
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await
        .context("Error al crear el cliente de Discord")?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        player.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(youtube: &YouTubeResolver) -> Result<()> {
    // Verificar dependencias críticas
    let version = youtube.verify().await.context("yt-dlp no disponible")?;
    println!("OK (yt-dlp {})", version);
    Ok(())
}
