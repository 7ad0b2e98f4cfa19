use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{MusicError, MusicResult};
use crate::sources::{MediaTool, VideoMetadata};

/// Extensions yt-dlp may leave behind for a downloaded track, in lookup order.
pub const AUDIO_EXTENSIONS: [&str; 5] = ["webm", "m4a", "mp3", "opus", "mp4"];

pub fn watch_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", id)
}

/// One entry of the persisted library file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    #[serde(default = "unknown_title")]
    pub title: String,
    #[serde(default, deserialize_with = "seconds")]
    pub duration: u64,
    #[serde(default = "unknown_uploader")]
    pub uploader: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub download_date: String,
}

fn unknown_title() -> String {
    "Unknown Title".to_string()
}

fn unknown_uploader() -> String {
    "Unknown Uploader".to_string()
}

// Older library files were written with float durations (e.g. `213.0`).
fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value
        .as_u64()
        .or_else(|| value.as_f64().map(|f| f.max(0.0).round() as u64))
        .unwrap_or(0))
}

impl CatalogRecord {
    pub fn from_metadata(meta: &VideoMetadata, file: &Path) -> Self {
        Self {
            title: meta.title.clone(),
            duration: meta.duration.unwrap_or(0),
            uploader: meta.uploader.clone().unwrap_or_else(unknown_uploader),
            filename: file.to_string_lossy().into_owned(),
            url: watch_url(&meta.id),
            download_date: meta.upload_date.clone().unwrap_or_default(),
        }
    }
}

/// A playable track known to the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub uploader: String,
    pub duration: u64,
    pub url: String,
    pub file: PathBuf,
}

impl Track {
    fn from_record(id: &str, record: &CatalogRecord) -> Self {
        Self {
            id: id.to_string(),
            title: record.title.clone(),
            uploader: record.uploader.clone(),
            duration: record.duration,
            url: if record.url.is_empty() {
                watch_url(id)
            } else {
                record.url.clone()
            },
            file: PathBuf::from(&record.filename),
        }
    }
}

/// Disk-backed mapping from track id to metadata.
///
/// Every read loads the whole file and every mutation rewrites the whole file
/// through a temporary file in the same directory followed by a rename, so a
/// reader never sees a half-written library. Mutations from this process are
/// serialized by `write_lock`; writers in other processes race with last
/// writer wins.
pub struct TrackCatalog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TrackCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Loads the whole library. A missing file is an empty library; a corrupt
    /// one is logged and treated as empty.
    pub async fn load(&self) -> MusicResult<BTreeMap<String, CatalogRecord>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&content) {
            Ok(library) => Ok(library),
            Err(e) => {
                error!("Failed to read library file {}: {}", self.path.display(), e);
                Ok(BTreeMap::new())
            }
        }
    }

    pub async fn get(&self, id: &str) -> MusicResult<Option<Track>> {
        let library = self.load().await?;
        Ok(library.get(id).map(|record| Track::from_record(id, record)))
    }

    pub async fn upsert(&self, id: &str, record: CatalogRecord) -> MusicResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut library = self.load().await?;
        library.insert(id.to_string(), record);
        self.save(&library).await?;
        debug!("💾 Library record stored for {}", id);
        Ok(())
    }

    /// Removes a record, returning it if it existed.
    pub async fn remove(&self, id: &str) -> MusicResult<Option<CatalogRecord>> {
        let _guard = self.write_lock.lock().await;
        let mut library = self.load().await?;
        let removed = library.remove(id);
        if removed.is_some() {
            self.save(&library).await?;
        }
        Ok(removed)
    }

    /// Case-insensitive substring search over titles.
    pub async fn search_title(&self, query: &str) -> MusicResult<Vec<Track>> {
        let needle = query.to_lowercase();
        let library = self.load().await?;
        Ok(library
            .iter()
            .filter(|(_, record)| record.title.to_lowercase().contains(&needle))
            .map(|(id, record)| Track::from_record(id, record))
            .collect())
    }

    pub async fn list(&self, limit: usize) -> MusicResult<Vec<Track>> {
        let library = self.load().await?;
        Ok(library
            .iter()
            .take(limit)
            .map(|(id, record)| Track::from_record(id, record))
            .collect())
    }

    /// Uniformly samples up to `count` distinct tracks.
    pub async fn sample(&self, count: usize) -> MusicResult<Vec<Track>> {
        use rand::seq::SliceRandom;

        let library = self.load().await?;
        let all: Vec<Track> = library
            .iter()
            .map(|(id, record)| Track::from_record(id, record))
            .collect();
        let mut rng = rand::thread_rng();
        Ok(all.choose_multiple(&mut rng, count).cloned().collect())
    }

    async fn save(&self, library: &BTreeMap<String, CatalogRecord>) -> MusicResult<()> {
        let content = serde_json::to_vec_pretty(library)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || -> MusicResult<()> {
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
            temp.write_all(&content)?;
            temp.as_file().sync_all()?;
            temp.persist(&path).map_err(|e| MusicError::Catalog(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| MusicError::Catalog(format!("library writer task failed: {}", e)))?
    }
}

/// The shared folder downloaded audio files live in.
#[derive(Debug, Clone)]
pub struct MediaFolder {
    root: PathBuf,
}

impl MediaFolder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Finds the file for a track id, trying each known extension in order.
    pub async fn locate(&self, id: &str) -> Option<PathBuf> {
        for ext in AUDIO_EXTENSIONS {
            let candidate = self.root.join(format!("{}.{}", id, ext));
            if fs::try_exists(&candidate).await.unwrap_or(false) {
                return Some(candidate);
            }
        }
        None
    }

    /// Deletes every file stored for a track id. Returns how many were removed.
    pub async fn remove_files(&self, id: &str) -> usize {
        let mut removed = 0;
        for ext in AUDIO_EXTENSIONS {
            let candidate = self.root.join(format!("{}.{}", id, ext));
            match fs::remove_file(&candidate).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not delete {}: {}", candidate.display(), e),
            }
        }
        removed
    }

    /// Track ids that have an audio file in the folder.
    pub async fn list_ids(&self) -> MusicResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_audio = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext));
            if !is_audio {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !ids.iter().any(|id: &String| id == stem) {
                    ids.push(stem.to_string());
                }
            }
        }

        ids.sort();
        Ok(ids)
    }
}

/// Indexes audio files that are on disk but missing from the catalog.
///
/// Metadata is probed per file; a failed probe is logged and the file skipped.
pub async fn scan_and_index(
    catalog: &TrackCatalog,
    media: &MediaFolder,
    tool: &dyn MediaTool,
) -> MusicResult<usize> {
    let known = catalog.load().await?;
    let mut added = 0;

    for id in media.list_ids().await? {
        if known.contains_key(&id) {
            continue;
        }

        let Some(file) = media.locate(&id).await else {
            continue;
        };

        match tool.probe(&watch_url(&id)).await {
            Ok(meta) => {
                let mut record = CatalogRecord::from_metadata(&meta, &file);
                record.download_date.clear();
                catalog.upsert(&id, record).await?;
                added += 1;
            }
            Err(e) => warn!("Error processing song {}: {}", id, e),
        }
    }

    info!("📂 Library scan complete. Added {} new songs.", added);
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MockMediaTool;
    use pretty_assertions::assert_eq;

    fn record(title: &str) -> CatalogRecord {
        CatalogRecord {
            title: title.to_string(),
            duration: 200,
            uploader: "Uploader".to_string(),
            filename: String::new(),
            url: String::new(),
            download_date: String::new(),
        }
    }

    #[tokio::test]
    async fn test_missing_library_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = TrackCatalog::new(dir.path().join("library.json"));
        assert!(catalog.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_library_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.json");
        std::fs::write(&path, "{ not json").unwrap();
        let catalog = TrackCatalog::new(&path);
        assert!(catalog.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_get_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = TrackCatalog::new(dir.path().join("library.json"));

        catalog.upsert("abc", record("Never Gonna")).await.unwrap();
        let track = catalog.get("abc").await.unwrap().unwrap();
        assert_eq!(track.title, "Never Gonna");
        assert_eq!(track.url, watch_url("abc"));

        catalog.upsert("abc", record("Replaced")).await.unwrap();
        assert_eq!(catalog.get("abc").await.unwrap().unwrap().title, "Replaced");

        let removed = catalog.remove("abc").await.unwrap();
        assert_eq!(removed.map(|r| r.title), Some("Replaced".to_string()));
        assert!(catalog.get("abc").await.unwrap().is_none());
        assert!(catalog.remove("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = TrackCatalog::new(dir.path().join("library.json"));
        catalog.upsert("a", record("One")).await.unwrap();
        catalog.upsert("b", record("Two")).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["library.json".to_string()]);
    }

    #[tokio::test]
    async fn test_reads_legacy_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.json");
        std::fs::write(
            &path,
            r#"{"xyz": {"title": "Old Song", "duration": 213.0, "uploader": "Someone",
                "filename": "downloads/xyz.webm",
                "url": "https://www.youtube.com/watch?v=xyz", "download_date": ""}}"#,
        )
        .unwrap();

        let track = TrackCatalog::new(&path).get("xyz").await.unwrap().unwrap();
        assert_eq!(track.duration, 213);
        assert_eq!(track.file, PathBuf::from("downloads/xyz.webm"));
    }

    #[tokio::test]
    async fn test_title_search_is_case_insensitive_substring() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = TrackCatalog::new(dir.path().join("library.json"));
        catalog.upsert("a", record("Bohemian Rhapsody")).await.unwrap();
        catalog.upsert("b", record("Radio Ga Ga")).await.unwrap();
        catalog.upsert("c", record("Under Pressure")).await.unwrap();

        let hits: Vec<String> = catalog
            .search_title("RHAP")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(hits, vec!["a".to_string()]);
        assert!(catalog.search_title("nothing like it").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sample_is_distinct_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = TrackCatalog::new(dir.path().join("library.json"));
        for id in ["a", "b", "c"] {
            catalog.upsert(id, record(id)).await.unwrap();
        }

        let mut ids: Vec<String> = catalog.sample(10).await.unwrap().into_iter().map(|t| t.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(catalog.sample(2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_locate_tries_extensions_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let media = MediaFolder::new(dir.path());
        std::fs::write(dir.path().join("abc.mp3"), b"x").unwrap();
        std::fs::write(dir.path().join("abc.webm"), b"x").unwrap();

        assert_eq!(media.locate("abc").await, Some(dir.path().join("abc.webm")));
        assert_eq!(media.locate("missing").await, None);

        assert_eq!(media.remove_files("abc").await, 2);
        assert_eq!(media.locate("abc").await, None);
    }

    #[tokio::test]
    async fn test_scan_indexes_only_unknown_files() {
        let dir = tempfile::tempdir().unwrap();
        let media = MediaFolder::new(dir.path());
        let catalog = TrackCatalog::new(dir.path().join("library.json"));
        std::fs::write(dir.path().join("known.webm"), b"x").unwrap();
        std::fs::write(dir.path().join("fresh.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        catalog.upsert("known", record("Known")).await.unwrap();

        let mut tool = MockMediaTool::new();
        tool.expect_probe()
            .withf(|url: &str| url.ends_with("v=fresh"))
            .times(1)
            .returning(|_| {
                Ok(VideoMetadata {
                    id: "fresh".into(),
                    title: "Fresh Track".into(),
                    uploader: Some("Band".into()),
                    duration: Some(180),
                    upload_date: Some("20240101".into()),
                })
            });

        let added = scan_and_index(&catalog, &media, &tool).await.unwrap();
        assert_eq!(added, 1);

        let track = catalog.get("fresh").await.unwrap().unwrap();
        assert_eq!(track.title, "Fresh Track");
        assert_eq!(track.file, dir.path().join("fresh.mp4"));
    }
}
