use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub bot_owner: u64,
    pub guild_id: Option<u64>, // For development commands

    // Search
    pub youtube_api_key: Option<String>,
    pub search_timeout_secs: u64,
    pub search_cache_ttl_secs: u64, // 0 disables the cache

    // Downloads
    pub max_song_time: u64, // In seconds
    pub download_folder: PathBuf,
    pub library_path: PathBuf,
    pub download_timeout_secs: u64,
    pub ytdlp_path: String,

    // Features
    pub scan_on_startup: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let download_folder: PathBuf = std::env::var("DOWNLOAD_FOLDER")
            .unwrap_or_else(|_| "downloads".to_string())
            .into();

        let config = Self {
            // Discord
            discord_token: std::env::var("BOT_TOKEN")
                .or_else(|_| std::env::var("DISCORD_TOKEN"))
                .context("Set BOT_TOKEN (or DISCORD_TOKEN) in the environment")?,
            bot_owner: std::env::var("BOT_OWNER")
                .context("Set BOT_OWNER to the operator's numeric user id")?
                .parse()
                .context("BOT_OWNER must be a numeric Discord user ID")?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Search
            youtube_api_key: std::env::var("YOUTUBE_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            search_timeout_secs: std::env::var("SEARCH_TIMEOUT")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .context("SEARCH_TIMEOUT must be an integer (seconds)")?,
            search_cache_ttl_secs: std::env::var("SEARCH_CACHE_TTL")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("SEARCH_CACHE_TTL must be an integer (seconds)")?,

            // Downloads
            max_song_time: std::env::var("MAX_SONG_TIME")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .context("MAX_SONG_TIME must be an integer (seconds)")?,
            library_path: std::env::var("LIBRARY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| download_folder.join("library.json")),
            download_folder,
            download_timeout_secs: std::env::var("DOWNLOAD_TIMEOUT")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("DOWNLOAD_TIMEOUT must be an integer (seconds)")?,
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),

            // Features
            scan_on_startup: std::env::var("SCAN_ON_STARTUP")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .context("SCAN_ON_STARTUP must be true or false")?,
        };

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.download_folder)?;
        if let Some(parent) = config.library_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        config.validate()?;

        // The secrets live on in `Config`; nothing else should read them from the environment.
        for key in ["BOT_TOKEN", "DISCORD_TOKEN", "YOUTUBE_API_KEY"] {
            std::env::remove_var(key);
        }

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The song duration cap must be greater than zero
    /// - Search and download timeouts must be greater than zero
    /// - The operator id must be a real user id (non-zero)
    pub fn validate(&self) -> Result<()> {
        if self.max_song_time == 0 {
            anyhow::bail!("MAX_SONG_TIME must be greater than 0, got: {}", self.max_song_time);
        }

        if self.search_timeout_secs == 0 {
            anyhow::bail!("SEARCH_TIMEOUT must be greater than 0");
        }

        if self.download_timeout_secs == 0 {
            anyhow::bail!("DOWNLOAD_TIMEOUT must be greater than 0");
        }

        if self.bot_owner == 0 {
            anyhow::bail!("BOT_OWNER must be a non-zero user id");
        }

        Ok(())
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn search_cache_ttl(&self) -> Option<Duration> {
        (self.search_cache_ttl_secs > 0).then(|| Duration::from_secs(self.search_cache_ttl_secs))
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Tokens and API keys are never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: owner {} (Guild: {})\n  \
            Search: API key {}, {}s timeout, {}s cache\n  \
            Downloads: {} (library {}), {}s max duration, {}s timeout\n  \
            Features: scan on startup={}",
            self.bot_owner,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            if self.youtube_api_key.is_some() { "set" } else { "unset" },
            self.search_timeout_secs,
            self.search_cache_ttl_secs,
            self.download_folder.display(),
            self.library_path.display(),
            self.max_song_time,
            self.download_timeout_secs,
            self.scan_on_startup
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            bot_owner: 0,
            guild_id: None,

            youtube_api_key: None,
            search_timeout_secs: 15,
            search_cache_ttl_secs: 300,

            max_song_time: 600, // 10 minutes
            download_folder: "downloads".into(),
            library_path: "downloads/library.json".into(),
            download_timeout_secs: 300,
            ytdlp_path: "yt-dlp".to_string(),

            scan_on_startup: true,
        }
    }
}
