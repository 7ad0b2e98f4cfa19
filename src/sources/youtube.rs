use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{MediaTool, Resolver, SearchHit, VideoMetadata};
use crate::error::{MusicError, MusicResult};

/// Concurrent yt-dlp processes allowed at once.
const MAX_CONCURRENT_PROCESSES: usize = 3;

/// Client that drives the yt-dlp binary.
pub struct YouTubeClient {
    binary: String,
    rate_limiter: Semaphore,
}

/// Information extracted from yt-dlp's `--dump-json`.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: String,
    #[serde(default)]
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    channel: Option<String>,
    upload_date: Option<String>,
}

impl From<YtDlpInfo> for VideoMetadata {
    fn from(info: YtDlpInfo) -> Self {
        Self {
            title: info.title.unwrap_or_else(|| "Unknown Title".to_string()),
            uploader: info.uploader.or(info.channel),
            duration: info.duration.map(|d| d.max(0.0).round() as u64),
            upload_date: info.upload_date,
            id: info.id,
        }
    }
}

impl YouTubeClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            rate_limiter: Semaphore::new(MAX_CONCURRENT_PROCESSES),
        }
    }

    /// Runs yt-dlp and returns its stdout. The child is killed if the future
    /// is dropped, so callers can bound it with a timeout.
    async fn run(&self, args: &[&str]) -> MusicResult<String> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| MusicError::Fetch(e.to_string()))?;

        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| MusicError::Fetch(format!("could not run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp failed ({}): {}", output.status, error.trim());
            return Err(MusicError::Fetch(format!("yt-dlp error: {}", error.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse_lines(stdout: &str) -> Vec<VideoMetadata> {
        stdout
            .lines()
            .filter_map(|line| serde_json::from_str::<YtDlpInfo>(line).ok())
            .map(VideoMetadata::from)
            .collect()
    }

    /// Checks that the binary can be executed at all.
    pub async fn verify(&self) -> MusicResult<String> {
        let version = self.run(&["--version"]).await?;
        Ok(version.trim().to_string())
    }
}

#[async_trait]
impl MediaTool for YouTubeClient {
    async fn probe(&self, url: &str) -> MusicResult<VideoMetadata> {
        debug!("📊 Fetching info for: {}", url);

        let stdout = self
            .run(&["--no-playlist", "--dump-json", "--skip-download", "--no-warnings", url])
            .await?;

        Self::parse_lines(&stdout)
            .into_iter()
            .next()
            .ok_or_else(|| MusicError::Fetch(format!("no metadata returned for {}", url)))
    }

    async fn download(&self, url: &str, folder: &Path) -> MusicResult<()> {
        let template = folder.join("%(id)s.%(ext)s").to_string_lossy().into_owned();

        info!("⬇️ Downloading {}", url);
        self.run(&[
            "-f",
            "bestaudio/best",
            "--no-playlist",
            "--quiet",
            "--no-warnings",
            "-o",
            &template,
            url,
        ])
        .await?;
        Ok(())
    }

    async fn search(&self, query: &str, limit: usize) -> MusicResult<Vec<VideoMetadata>> {
        info!("🔍 Searching with yt-dlp: {}", query);

        let search_query = format!("ytsearch{}:{}", limit.max(1), query);
        let stdout = self
            .run(&[
                "--no-playlist",
                "--dump-json",
                "--flat-playlist",
                "--skip-download",
                "--no-warnings",
                &search_query,
            ])
            .await?;

        Ok(Self::parse_lines(&stdout))
    }
}

#[async_trait]
impl Resolver for YouTubeClient {
    async fn search(&self, query: &str) -> MusicResult<Vec<SearchHit>> {
        let results = MediaTool::search(self, query, 1).await?;
        Ok(results
            .into_iter()
            .map(|meta| SearchHit {
                title: meta.title,
                external_id: meta.id,
                author: meta.uploader.unwrap_or_else(|| "Unknown Uploader".to_string()),
            })
            .collect())
    }

    fn source_name(&self) -> &'static str {
        "yt-dlp"
    }
}
