use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod cache;
mod config;
mod error;
mod sources;
mod storage;
mod ui;

use crate::audio::pipeline::{FetchLimits, RequestPipeline};
use crate::audio::player::PlaybackEngine;
use crate::audio::session::SessionRegistry;
use crate::audio::Notifier;
use crate::bot::events::SongbirdTransport;
use crate::bot::{BaldyBot, ShardManagerContainer};
use crate::cache::SearchCache;
use crate::config::Config;
use crate::sources::{ytdlp::YtDlpFetcher, Resolver, ResolverChain, YouTubeAPIv3Client, YouTubeClient};
use crate::storage::{MediaFolder, TrackCatalog};
use crate::ui::ChannelNotifier;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("baldy=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Starting Baldy v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    let ytdlp = Arc::new(YouTubeClient::new(config.ytdlp_path.clone()));
    match ytdlp.verify().await {
        Ok(version) => info!("✅ yt-dlp {} available", version),
        Err(e) => warn!("⚠️ yt-dlp is not usable, searches and downloads will fail: {}", e),
    }

    // Library
    let catalog = Arc::new(TrackCatalog::new(config.library_path.clone()));
    let media = MediaFolder::new(config.download_folder.clone());

    if config.scan_on_startup {
        match storage::scan_and_index(&catalog, &media, ytdlp.as_ref()).await {
            Ok(added) => info!("📂 Startup scan indexed {} new files", added),
            Err(e) => warn!("Startup scan failed: {}", e),
        }
    }

    // Search
    let primary: Option<Arc<dyn Resolver>> = match &config.youtube_api_key {
        Some(key) => match YouTubeAPIv3Client::new(key.clone(), config.search_timeout()) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!("YouTube API client unavailable, using yt-dlp search only: {}", e);
                None
            }
        },
        None => {
            info!("🔍 No YOUTUBE_API_KEY set, using yt-dlp search only");
            None
        }
    };
    let search_cache = config.search_cache_ttl().map(SearchCache::new);
    let mut resolvers = ResolverChain::new(primary, ytdlp.clone(), config.search_timeout());
    if let Some(cache) = &search_cache {
        resolvers = resolvers.with_cache(cache.clone());
    }

    let fetcher = Arc::new(YtDlpFetcher::new(ytdlp.clone(), media.clone(), catalog.clone()));

    // Playback
    let songbird = Songbird::serenity();
    let notifier: Arc<dyn Notifier> = Arc::new(ChannelNotifier::new(Arc::new(Http::new(
        &config.discord_token,
    ))));
    let engine = PlaybackEngine::start(
        Arc::new(SessionRegistry::new()),
        Arc::new(SongbirdTransport::new(songbird.clone())),
        notifier.clone(),
        media.clone(),
    );

    let pipeline = Arc::new(RequestPipeline::new(
        catalog,
        media,
        resolvers,
        fetcher,
        engine.clone(),
        notifier,
        FetchLimits {
            max_song_time: config.max_song_time,
            download_timeout: config.download_timeout(),
        },
    ));

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;
    let handler = BaldyBot::new(config.clone(), pipeline, search_cache);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    {
        let mut data = client.data.write().await;
        data.insert::<ShardManagerContainer>(client.shard_manager.clone());
    }

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Shutdown signal received, stopping sessions...");
        engine.shutdown_all().await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    let yt_dlp = YouTubeClient::new(config.ytdlp_path.clone()).verify().await;

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.is_ok() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Missing dependencies (yt-dlp or ffmpeg)");
    }
}
