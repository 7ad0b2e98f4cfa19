//! # Sources Module
//!
//! Everything that talks to the outside world to find or materialize audio.
//!
//! - [`Resolver`]: text query → candidate videos. Implemented by
//!   [`YouTubeAPIv3Client`] (primary) and [`YouTubeClient`] (yt-dlp search,
//!   fallback). [`ResolverChain`] combines them with a timeout.
//! - [`Fetcher`]: video id → local audio file, enforcing the duration cap.
//!   Implemented by [`ytdlp::YtDlpFetcher`].
//! - [`MediaTool`]: the raw yt-dlp operations (probe, download, search) the
//!   fetcher, the fallback resolver and the startup scan are built on.
//!
//! All of these run as ordinary tokio tasks; blocking work happens in child
//! processes or on the HTTP client, never on the command handling path.

pub mod youtube;
pub mod youtube_api_v3;
pub mod ytdlp;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::SearchCache;
use crate::error::{MusicError, MusicResult};

pub use youtube::YouTubeClient;
pub use youtube_api_v3::YouTubeAPIv3Client;

/// A search candidate, best match first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub external_id: String,
    pub author: String,
}

impl SearchHit {
    pub fn url(&self) -> String {
        crate::storage::watch_url(&self.external_id)
    }
}

/// Video metadata as reported by the downloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    pub uploader: Option<String>,
    pub duration: Option<u64>,
    pub upload_date: Option<String>,
}

/// Common trait for search backends.
///
/// Must be safe to call concurrently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn search(&self, query: &str) -> MusicResult<Vec<SearchHit>>;

    fn source_name(&self) -> &'static str;
}

/// Materializes a playable local file for a video.
///
/// Idempotent: an existing file is success and is returned without another
/// download. A successful fetch records the track in the catalog.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn ensure_local(&self, external_id: &str, duration_cap: u64) -> MusicResult<PathBuf>;
}

/// Raw downloader operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Reads metadata for a single video without downloading it.
    async fn probe(&self, url: &str) -> MusicResult<VideoMetadata>;

    /// Downloads the best audio stream into `folder` as `<id>.<ext>`.
    async fn download(&self, url: &str, folder: &Path) -> MusicResult<()>;

    /// Free-text search through the downloader's own search extractor.
    async fn search(&self, query: &str, limit: usize) -> MusicResult<Vec<VideoMetadata>>;
}

/// Primary resolver with a best-effort fallback, both bounded by a timeout.
///
/// A primary that errors or times out counts as "no results" so the fallback
/// still gets its turn. Non-empty results are remembered in the optional
/// [`SearchCache`].
#[derive(Clone)]
pub struct ResolverChain {
    primary: Option<Arc<dyn Resolver>>,
    fallback: Arc<dyn Resolver>,
    timeout: Duration,
    cache: Option<SearchCache>,
}

impl ResolverChain {
    pub fn new(
        primary: Option<Arc<dyn Resolver>>,
        fallback: Arc<dyn Resolver>,
        timeout: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            timeout,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: SearchCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Resolves a query to its best candidate.
    pub async fn resolve(&self, query: &str) -> MusicResult<SearchHit> {
        self.search_all(query)
            .await?
            .into_iter()
            .next()
            .ok_or(MusicError::NoResults)
    }

    /// All candidates from the first resolver that yields any.
    pub async fn search_all(&self, query: &str) -> MusicResult<Vec<SearchHit>> {
        if let Some(hits) = self.cache.as_ref().and_then(|cache| cache.get(query)) {
            debug!("💾 Search cache hit for '{}'", query);
            return Ok(hits);
        }

        let hits = self.search_uncached(query).await?;
        if let Some(cache) = &self.cache {
            cache.put(query, &hits);
        }
        Ok(hits)
    }

    async fn search_uncached(&self, query: &str) -> MusicResult<Vec<SearchHit>> {
        if let Some(primary) = &self.primary {
            let hits = self.bounded(primary.as_ref(), query).await;
            if !hits.is_empty() {
                return Ok(hits);
            }
            info!("🔄 No {} result for '{}', trying {}", primary.source_name(), query, self.fallback.source_name());
        }

        let hits = self.bounded(self.fallback.as_ref(), query).await;
        if hits.is_empty() {
            Err(MusicError::NoResults)
        } else {
            Ok(hits)
        }
    }

    async fn bounded(&self, resolver: &dyn Resolver, query: &str) -> Vec<SearchHit> {
        match tokio::time::timeout(self.timeout, resolver.search(query)).await {
            Ok(Ok(hits)) => {
                debug!("🔍 {} returned {} results for '{}'", resolver.source_name(), hits.len(), query);
                hits
            }
            Ok(Err(e)) => {
                warn!("❌ {} search failed for '{}': {}", resolver.source_name(), query, e);
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "⏱️ {} search timed out after {}s for '{}'",
                    resolver.source_name(),
                    self.timeout.as_secs(),
                    query
                );
                Vec::new()
            }
        }
    }
}
