use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{Fetcher, MediaTool};
use crate::error::{MusicError, MusicResult};
use crate::storage::{watch_url, CatalogRecord, MediaFolder, TrackCatalog};

/// Downloads tracks into the media folder and records them in the catalog.
///
/// Concurrent requests for the same id wait on a per-id gate, so a track is
/// downloaded at most once and later callers find the file already present.
pub struct YtDlpFetcher {
    tool: Arc<dyn MediaTool>,
    media: MediaFolder,
    catalog: Arc<TrackCatalog>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl YtDlpFetcher {
    pub fn new(tool: Arc<dyn MediaTool>, media: MediaFolder, catalog: Arc<TrackCatalog>) -> Self {
        Self {
            tool,
            media,
            catalog,
            in_flight: DashMap::new(),
        }
    }

    async fn fetch(&self, external_id: &str, duration_cap: u64) -> MusicResult<PathBuf> {
        if let Some(path) = self.media.locate(external_id).await {
            self.backfill_record(external_id, &path).await;
            return Ok(path);
        }

        let url = watch_url(external_id);
        let info = self.tool.probe(&url).await?;

        if let Some(duration) = info.duration {
            if duration > duration_cap {
                info!(
                    "⛔ {} is {}s long, over the {}s limit",
                    external_id, duration, duration_cap
                );
                return Err(MusicError::TrackTooLong {
                    duration,
                    max: duration_cap,
                });
            }
        }

        self.tool.download(&url, self.media.root()).await?;

        let path = self
            .media
            .locate(external_id)
            .await
            .ok_or_else(|| MusicError::Fetch("downloaded file not found on disk".to_string()))?;

        let mut record = CatalogRecord::from_metadata(&info, &path);
        record.download_date = chrono::Utc::now().format("%Y%m%d").to_string();
        self.catalog.upsert(external_id, record).await?;

        info!("✅ Downloaded {} to {}", info.title, path.display());
        Ok(path)
    }

    /// Files that predate the catalog still get a record, best effort.
    async fn backfill_record(&self, external_id: &str, path: &std::path::Path) {
        match self.catalog.get(external_id).await {
            Ok(Some(_)) => {}
            Ok(None) => match self.tool.probe(&watch_url(external_id)).await {
                Ok(info) => {
                    if let Err(e) = self
                        .catalog
                        .upsert(external_id, CatalogRecord::from_metadata(&info, path))
                        .await
                    {
                        warn!("Could not record {} in the library: {}", external_id, e);
                    }
                }
                Err(e) => warn!("Could not read metadata for {}: {}", external_id, e),
            },
            Err(e) => warn!("Could not read the library: {}", e),
        }
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    async fn ensure_local(&self, external_id: &str, duration_cap: u64) -> MusicResult<PathBuf> {
        let in_flight = InFlight::enter(&self.in_flight, external_id);
        let _guard = in_flight.gate.lock().await;
        self.fetch(external_id, duration_cap).await
    }
}

/// One caller's hold on an id's download gate. Dropping it, including when
/// the caller's future is cancelled by a timeout, removes the gate from the
/// map once no other caller holds it.
struct InFlight<'a> {
    map: &'a DashMap<String, Arc<Mutex<()>>>,
    id: &'a str,
    gate: Arc<Mutex<()>>,
}

impl<'a> InFlight<'a> {
    fn enter(map: &'a DashMap<String, Arc<Mutex<()>>>, id: &'a str) -> Self {
        let gate = map.entry(id.to_string()).or_default().clone();
        Self { map, id, gate }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        // The map and this hold are the only owners: nobody else is waiting.
        self.map
            .remove_if(self.id, |_, g| Arc::strong_count(g) <= 2);
    }
}
