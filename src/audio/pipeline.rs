use rand::seq::SliceRandom;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    player::{ConnectOutcome, PlaybackEngine},
    queue::QueueEntry,
    session::{PlaybackState, SessionState},
    Notice, Notifier,
};
use crate::error::{MusicError, MusicResult};
use crate::sources::{Fetcher, ResolverChain, SearchHit};
use crate::storage::{MediaFolder, Track, TrackCatalog};

/// Tracks added by one shuffle request, at most.
pub const SHUFFLE_SAMPLE_SIZE: usize = 10;

pub const LIBRARY_PAGE_SIZE: usize = 20;

/// Who asked, and where they are.
#[derive(Debug, Clone, Copy)]
pub struct Requester {
    pub user_id: UserId,
    pub voice_channel: Option<ChannelId>,
    pub text_channel: ChannelId,
}

/// Limits applied to downloads started by a request.
#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    pub max_song_time: u64,
    pub download_timeout: Duration,
}

#[derive(Debug)]
pub struct Enqueued {
    pub entry: QueueEntry,
    /// 1-based position in the pending queue at commit time.
    pub position: usize,
    /// Whether the request also started the guild. The entry stays queued
    /// even when this is an error.
    pub playback: MusicResult<ConnectOutcome>,
    pub from_library: bool,
}

#[derive(Debug)]
pub struct Shuffled {
    pub added: Vec<QueueEntry>,
    pub queue_len: usize,
    pub playback: MusicResult<ConnectOutcome>,
}

#[derive(Debug, PartialEq)]
pub struct Removed {
    pub title: String,
    pub files_deleted: usize,
    pub purged_from_queues: usize,
}

/// Turns user requests into queue commits.
///
/// Lookups, searches and downloads run without the guild lock, so concurrent
/// requests for the same guild proceed in parallel and commit in the order
/// they reach the lock.
pub struct RequestPipeline {
    catalog: Arc<TrackCatalog>,
    media: MediaFolder,
    resolvers: ResolverChain,
    fetcher: Arc<dyn Fetcher>,
    engine: Arc<PlaybackEngine>,
    notifier: Arc<dyn Notifier>,
    limits: FetchLimits,
}

impl RequestPipeline {
    pub fn new(
        catalog: Arc<TrackCatalog>,
        media: MediaFolder,
        resolvers: ResolverChain,
        fetcher: Arc<dyn Fetcher>,
        engine: Arc<PlaybackEngine>,
        notifier: Arc<dyn Notifier>,
        limits: FetchLimits,
    ) -> Self {
        Self {
            catalog,
            media,
            resolvers,
            fetcher,
            engine,
            notifier,
            limits,
        }
    }

    pub fn engine(&self) -> &Arc<PlaybackEngine> {
        &self.engine
    }

    pub fn catalog(&self) -> &Arc<TrackCatalog> {
        &self.catalog
    }

    /// Library first, then the resolvers; downloads when needed, commits,
    /// then starts the guild if it is idle.
    pub async fn enqueue_by_text(
        &self,
        guild_id: GuildId,
        requester: &Requester,
        query: &str,
    ) -> MusicResult<Enqueued> {
        let query = query.trim();
        if query.is_empty() {
            return Err(MusicError::NoResults);
        }
        self.require_voice(guild_id, requester).await?;

        let (entry, from_library) = match self.library_match(query).await? {
            Some(track) => {
                debug!("📂 '{}' found in the library as {}", query, track.id);
                (QueueEntry::from(&track), true)
            }
            None => {
                let hit = self.resolvers.resolve(query).await?;
                self.materialize(&hit, requester.text_channel).await?;
                let entry = QueueEntry {
                    url: hit.url(),
                    title: hit.title,
                    id: hit.external_id,
                };
                (entry, false)
            }
        };

        let position = self
            .engine
            .registry()
            .with_lock(guild_id, |s| -> MusicResult<usize> {
                commit_allowed(s, requester)?;
                s.queue.push_back(entry.clone());
                Ok(s.queue.len())
            })
            .await?;
        info!(
            "➕ {} queued {} at position {} in guild {}",
            requester.user_id, entry.title, position, guild_id
        );

        let playback = self.start_guild(guild_id, requester).await;
        Ok(Enqueued {
            entry,
            position,
            playback,
            from_library,
        })
    }

    /// Adds up to [`SHUFFLE_SAMPLE_SIZE`] random library tracks, then
    /// reshuffles the whole pending queue, all under one lock.
    pub async fn enqueue_shuffle(&self, guild_id: GuildId, requester: &Requester) -> MusicResult<Shuffled> {
        self.require_voice(guild_id, requester).await?;

        let sample = self.catalog.sample(SHUFFLE_SAMPLE_SIZE).await?;
        if sample.is_empty() {
            return Err(MusicError::EmptyCatalog);
        }
        let added: Vec<QueueEntry> = sample.iter().map(QueueEntry::from).collect();

        let queue_len = self
            .engine
            .registry()
            .with_lock(guild_id, |s| -> MusicResult<usize> {
                commit_allowed(s, requester)?;
                s.queue.extend(added.iter().cloned());
                s.queue.make_contiguous().shuffle(&mut rand::thread_rng());
                Ok(s.queue.len())
            })
            .await?;
        info!(
            "🔀 {} shuffled {} library tracks into guild {} ({} queued)",
            requester.user_id,
            added.len(),
            guild_id,
            queue_len
        );

        let playback = self.start_guild(guild_id, requester).await;
        Ok(Shuffled {
            added,
            queue_len,
            playback,
        })
    }

    /// Candidates for a query without queueing anything.
    pub async fn search(&self, query: &str) -> MusicResult<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(MusicError::NoResults);
        }
        self.resolvers.search_all(query).await
    }

    /// Library listing: the first [`LIBRARY_PAGE_SIZE`] tracks, or every
    /// title match when a query is given.
    pub async fn library(&self, query: Option<&str>) -> MusicResult<Vec<Track>> {
        match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(query) => self.catalog.search_title(query).await,
            None => self.catalog.list(LIBRARY_PAGE_SIZE).await,
        }
    }

    /// Deletes a track from the library and disk and drops it from every
    /// queue. `None` when the id is unknown.
    pub async fn remove_track(&self, id: &str) -> MusicResult<Option<Removed>> {
        let Some(record) = self.catalog.remove(id).await? else {
            return Ok(None);
        };
        let files_deleted = self.media.remove_files(id).await;
        let purged_from_queues = self.engine.purge(id).await;

        info!(
            "🗑️ Removed {} ({}) from the library, {} file(s) deleted",
            record.title, id, files_deleted
        );
        Ok(Some(Removed {
            title: record.title,
            files_deleted,
            purged_from_queues,
        }))
    }

    /// An idle guild can only be started from a voice channel. Rejecting up
    /// front saves a pointless download; [`commit_allowed`] repeats the check
    /// under the lock.
    async fn require_voice(&self, guild_id: GuildId, requester: &Requester) -> MusicResult<()> {
        if requester.voice_channel.is_none()
            && self.engine.state(guild_id).await == PlaybackState::Idle
        {
            return Err(MusicError::NotInVoice);
        }
        Ok(())
    }

    /// A library title match whose audio file is still on disk.
    async fn library_match(&self, query: &str) -> MusicResult<Option<Track>> {
        for track in self.catalog.search_title(query).await? {
            if self.media.locate(&track.id).await.is_some() {
                return Ok(Some(track));
            }
            debug!("Library match {} has no file on disk", track.id);
        }
        Ok(None)
    }

    /// Makes sure the hit has a local file, downloading within the limits.
    async fn materialize(&self, hit: &SearchHit, text_channel: ChannelId) -> MusicResult<()> {
        if self.media.locate(&hit.external_id).await.is_some() {
            return Ok(());
        }

        self.notifier.send(
            text_channel,
            Notice::Downloading {
                title: hit.title.clone(),
            },
        );

        let limit = self.limits.download_timeout;
        match tokio::time::timeout(
            limit,
            self.fetcher.ensure_local(&hit.external_id, self.limits.max_song_time),
        )
        .await
        {
            Ok(Ok(path)) => {
                debug!("📁 {} is at {}", hit.external_id, path.display());
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("❌ Could not fetch {}: {}", hit.external_id, e);
                Err(e)
            }
            Err(_) => {
                warn!("⏱️ Download of {} timed out after {}s", hit.external_id, limit.as_secs());
                Err(MusicError::Timeout {
                    operation: "download",
                    secs: limit.as_secs(),
                })
            }
        }
    }

    async fn start_guild(&self, guild_id: GuildId, requester: &Requester) -> MusicResult<ConnectOutcome> {
        self.engine
            .ensure_connected(guild_id, requester.voice_channel, requester.text_channel)
            .await
    }
}

/// Keeps an idle guild from holding entries nobody will play. The guild may
/// have gone idle while the request was downloading.
fn commit_allowed(s: &SessionState, requester: &Requester) -> MusicResult<()> {
    if requester.voice_channel.is_none() && s.state == PlaybackState::Idle {
        return Err(MusicError::NotInVoice);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::session::SessionRegistry;
    use crate::audio::testing::{FakeTransport, RecordingNotifier};
    use crate::audio::testing::wait_until;
    use crate::sources::{MockFetcher, MockResolver, Resolver};
    use async_trait::async_trait;
    use tokio::sync::Semaphore;
    use crate::storage::CatalogRecord;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::path::PathBuf;

    const GUILD: GuildId = GuildId::new(42);

    fn requester() -> Requester {
        Requester {
            user_id: UserId::new(1),
            voice_channel: Some(ChannelId::new(7)),
            text_channel: ChannelId::new(8),
        }
    }

    fn hit(id: &str) -> SearchHit {
        SearchHit {
            title: format!("Song {}", id),
            external_id: id.to_string(),
            author: "Band".to_string(),
        }
    }

    fn resolver_returning(hits: Vec<SearchHit>) -> Arc<dyn Resolver> {
        let mut mock = MockResolver::new();
        mock.expect_source_name().return_const("mock");
        mock.expect_search().returning(move |_| Ok(hits.clone()));
        Arc::new(mock)
    }

    /// Resolves any query `song-<id>` to video `<id>`.
    fn echo_resolver() -> Arc<dyn Resolver> {
        let mut mock = MockResolver::new();
        mock.expect_source_name().return_const("mock");
        mock.expect_search()
            .returning(|q| Ok(vec![hit(q.trim_start_matches("song-"))]));
        Arc::new(mock)
    }

    /// Fetcher that writes `<id>.webm` into the media folder.
    fn writing_fetcher(folder: PathBuf) -> MockFetcher {
        let mut fetcher = MockFetcher::new();
        fetcher.expect_ensure_local().returning(move |id, _| {
            let path = folder.join(format!("{}.webm", id));
            std::fs::write(&path, b"audio").unwrap();
            Ok(path)
        });
        fetcher
    }

    /// Fetcher that holds every download until the test adds a permit.
    struct GatedFetcher {
        folder: PathBuf,
        gate: Semaphore,
    }

    #[async_trait]
    impl Fetcher for GatedFetcher {
        async fn ensure_local(&self, external_id: &str, _duration_cap: u64) -> MusicResult<PathBuf> {
            let _permit = self.gate.acquire().await;
            let path = self.folder.join(format!("{}.webm", external_id));
            std::fs::write(&path, b"audio").unwrap();
            Ok(path)
        }
    }

    struct Harness {
        pipeline: RequestPipeline,
        transport: Arc<FakeTransport>,
        notifier: Arc<RecordingNotifier>,
        dir: tempfile::TempDir,
    }

    impl Harness {
        fn new(resolver: Arc<dyn Resolver>, fetcher: impl FnOnce(PathBuf) -> MockFetcher) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let fetcher = Arc::new(fetcher(dir.path().to_path_buf()));
            Self::with_fetcher(dir, resolver, fetcher)
        }

        fn with_fetcher(dir: tempfile::TempDir, resolver: Arc<dyn Resolver>, fetcher: Arc<dyn Fetcher>) -> Self {
            let media = MediaFolder::new(dir.path());
            let catalog = Arc::new(TrackCatalog::new(dir.path().join("library.json")));
            let transport = Arc::new(FakeTransport::default());
            let notifier = Arc::new(RecordingNotifier::default());
            let engine = PlaybackEngine::start(
                Arc::new(SessionRegistry::new()),
                transport.clone(),
                notifier.clone(),
                media.clone(),
            );
            let pipeline = RequestPipeline::new(
                catalog,
                media,
                ResolverChain::new(None, resolver, Duration::from_secs(1)),
                fetcher,
                engine,
                notifier.clone(),
                FetchLimits {
                    max_song_time: 600,
                    download_timeout: Duration::from_secs(5),
                },
            );
            Self {
                pipeline,
                transport,
                notifier,
                dir,
            }
        }

        async fn add_to_library(&self, id: &str, title: &str) {
            let file = self.dir.path().join(format!("{}.webm", id));
            std::fs::write(&file, b"audio").unwrap();
            let record = CatalogRecord {
                title: title.to_string(),
                duration: 200,
                uploader: "Band".to_string(),
                filename: file.to_string_lossy().into_owned(),
                url: crate::storage::watch_url(id),
                download_date: String::new(),
            };
            self.pipeline.catalog().upsert(id, record).await.unwrap();
        }

        async fn queued_ids(&self) -> Vec<String> {
            let info = self.pipeline.engine().queue_info(GUILD).await;
            info.current.into_iter().chain(info.items).map(|e| e.id).collect()
        }
    }

    #[tokio::test]
    async fn test_library_hit_skips_search_and_download() {
        let mut resolver = MockResolver::new();
        resolver.expect_source_name().return_const("mock");
        resolver.expect_search().never();
        let h = Harness::new(Arc::new(resolver), |_| {
            let mut fetcher = MockFetcher::new();
            fetcher.expect_ensure_local().never();
            fetcher
        });
        h.add_to_library("abc", "Bohemian Rhapsody").await;

        let queued = h.pipeline.enqueue_by_text(GUILD, &requester(), "rhapsody").await.unwrap();

        assert!(queued.from_library);
        assert_eq!(queued.entry.id, "abc");
        assert_eq!(queued.position, 1);
        assert_eq!(queued.playback, Ok(ConnectOutcome::Started));
        assert_eq!(h.transport.streamed(), vec![h.dir.path().join("abc.webm")]);
    }

    #[tokio::test]
    async fn test_resolved_track_is_downloaded_then_queued() {
        let h = Harness::new(resolver_returning(vec![hit("xyz")]), writing_fetcher);

        let queued = h.pipeline.enqueue_by_text(GUILD, &requester(), "something new").await.unwrap();

        assert!(!queued.from_library);
        assert_eq!(queued.entry.url, "https://www.youtube.com/watch?v=xyz");
        assert!(h.notifier.contains(&Notice::Downloading {
            title: "Song xyz".into()
        }));
        assert_eq!(h.queued_ids().await, vec!["xyz"]);
    }

    #[tokio::test]
    async fn test_no_results_leaves_queue_untouched() {
        let h = Harness::new(resolver_returning(vec![]), |_| MockFetcher::new());

        let result = h.pipeline.enqueue_by_text(GUILD, &requester(), "asdfghjkl").await;
        assert!(matches!(result, Err(MusicError::NoResults)));
        assert!(h.queued_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_too_long_track_is_never_queued() {
        let h = Harness::new(resolver_returning(vec![hit("long")]), |_| {
            let mut fetcher = MockFetcher::new();
            fetcher
                .expect_ensure_local()
                .withf(|id, cap| id == "long" && *cap == 600)
                .returning(|_, cap| Err(MusicError::TrackTooLong { duration: 7200, max: cap }));
            fetcher
        });

        let result = h.pipeline.enqueue_by_text(GUILD, &requester(), "a whole concert").await;

        assert!(matches!(
            result,
            Err(MusicError::TrackTooLong { duration: 7200, max: 600 })
        ));
        assert!(h.queued_ids().await.is_empty());
        assert!(!h.dir.path().join("long.webm").exists());
        assert!(h.transport.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_idle_guild_requires_voice_channel() {
        let mut resolver = MockResolver::new();
        resolver.expect_source_name().return_const("mock");
        resolver.expect_search().never();
        let h = Harness::new(Arc::new(resolver), |_| MockFetcher::new());

        let outside = Requester {
            voice_channel: None,
            ..requester()
        };
        let result = h.pipeline.enqueue_by_text(GUILD, &outside, "anything").await;
        assert!(matches!(result, Err(MusicError::NotInVoice)));
        assert!(h.queued_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_guild_going_idle_during_download_rejects_commit() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(GatedFetcher {
            folder: dir.path().to_path_buf(),
            gate: Semaphore::new(0),
        });
        let h = Arc::new(Harness::with_fetcher(
            dir,
            resolver_returning(vec![hit("late")]),
            fetcher.clone(),
        ));
        let set_state = |state: PlaybackState| {
            let h = h.clone();
            async move {
                h.pipeline
                    .engine()
                    .registry()
                    .with_lock(GUILD, |s| s.state = state)
                    .await
            }
        };

        // Something is playing, so a listener outside voice may queue.
        set_state(PlaybackState::Playing).await;
        let outside = Requester {
            voice_channel: None,
            ..requester()
        };
        let request = {
            let h = h.clone();
            tokio::spawn(async move { h.pipeline.enqueue_by_text(GUILD, &outside, "late song").await })
        };
        wait_until(|| {
            h.notifier.contains(&Notice::Downloading {
                title: "Song late".into(),
            })
        })
        .await;

        // The guild drains to Idle before the download lands.
        set_state(PlaybackState::Idle).await;
        fetcher.gate.add_permits(1);

        let result = request.await.unwrap();
        assert!(matches!(result, Err(MusicError::NotInVoice)));
        assert!(h.queued_ids().await.is_empty());
        assert!(h.transport.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_requests_commit_in_order() {
        let h = Harness::new(echo_resolver(), writing_fetcher);

        for id in ["a", "b", "c"] {
            h.pipeline
                .enqueue_by_text(GUILD, &requester(), &format!("song-{}", id))
                .await
                .unwrap();
        }

        // "a" is playing, the rest wait in commit order.
        assert_eq!(h.queued_ids().await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_concurrent_requests_both_commit() {
        let h = Arc::new(Harness::new(echo_resolver(), writing_fetcher));

        let first = {
            let h = h.clone();
            tokio::spawn(async move { h.pipeline.enqueue_by_text(GUILD, &requester(), "song-one").await })
        };
        let second = {
            let h = h.clone();
            tokio::spawn(async move { h.pipeline.enqueue_by_text(GUILD, &requester(), "song-two").await })
        };
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        let mut positions = vec![first.position, second.position];
        positions.sort();
        assert_eq!(positions, vec![1, 2]);

        let ids: HashSet<String> = h.queued_ids().await.into_iter().collect();
        assert_eq!(ids, HashSet::from(["one".to_string(), "two".to_string()]));
        assert_eq!(h.transport.count(&crate::audio::testing::Call::Join(ChannelId::new(7))), 1);
    }

    #[tokio::test]
    async fn test_shuffle_adds_whole_small_library() {
        let h = Harness::new(resolver_returning(vec![]), |_| MockFetcher::new());
        for (id, title) in [("a", "One"), ("b", "Two"), ("c", "Three")] {
            h.add_to_library(id, title).await;
        }

        let shuffled = h.pipeline.enqueue_shuffle(GUILD, &requester()).await.unwrap();

        assert_eq!(shuffled.added.len(), 3);
        assert_eq!(shuffled.queue_len, 3);
        let mut ids = h.queued_ids().await;
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_shuffle_reorders_the_whole_queue() {
        let h = Harness::new(resolver_returning(vec![]), |_| MockFetcher::new());
        h.add_to_library("x", "Only").await;

        // Twenty pending entries behind a track that is already playing.
        let pending: Vec<QueueEntry> = (0..20)
            .map(|i| QueueEntry {
                title: format!("p{}", i),
                url: String::new(),
                id: format!("p{}", i),
            })
            .collect();
        h.pipeline
            .engine()
            .registry()
            .with_lock(GUILD, |s| {
                s.queue.extend(pending.iter().cloned());
                s.state = PlaybackState::Playing;
            })
            .await;

        let shuffled = h.pipeline.enqueue_shuffle(GUILD, &requester()).await.unwrap();
        assert_eq!(shuffled.queue_len, 21);
        assert_eq!(shuffled.playback, Ok(ConnectOutcome::AlreadyActive));

        let after: Vec<String> = h
            .pipeline
            .engine()
            .queue_info(GUILD)
            .await
            .items
            .into_iter()
            .map(|e| e.id)
            .collect();
        let before: Vec<String> = pending.into_iter().map(|e| e.id).chain(["x".to_string()]).collect();
        assert_ne!(after, before, "pending entries were not reshuffled");

        let mut sorted = after.clone();
        sorted.sort();
        let mut expected = before.clone();
        expected.sort();
        assert_eq!(sorted, expected);
    }

    #[tokio::test]
    async fn test_shuffle_on_idle_guild_requires_voice() {
        let h = Harness::new(resolver_returning(vec![]), |_| MockFetcher::new());
        h.add_to_library("x", "Only").await;

        let outside = Requester {
            voice_channel: None,
            ..requester()
        };
        let result = h.pipeline.enqueue_shuffle(GUILD, &outside).await;
        assert!(matches!(result, Err(MusicError::NotInVoice)));
        assert!(h.queued_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_library_lists_or_filters() {
        let h = Harness::new(resolver_returning(vec![]), |_| MockFetcher::new());
        h.add_to_library("a", "Blue Monday").await;
        h.add_to_library("b", "Blue Velvet").await;
        h.add_to_library("c", "Red Red Wine").await;

        assert_eq!(h.pipeline.library(None).await.unwrap().len(), 3);
        let blue: Vec<String> = h
            .pipeline
            .library(Some("blue"))
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(blue, vec!["a", "b"]);
        assert_eq!(h.pipeline.library(Some("  ")).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_shuffle_on_empty_library() {
        let h = Harness::new(resolver_returning(vec![]), |_| MockFetcher::new());
        let result = h.pipeline.enqueue_shuffle(GUILD, &requester()).await;
        assert!(matches!(result, Err(MusicError::EmptyCatalog)));
    }

    #[tokio::test]
    async fn test_remove_track_everywhere() {
        let h = Harness::new(resolver_returning(vec![]), |_| MockFetcher::new());
        h.add_to_library("abc", "Doomed").await;
        let entry = QueueEntry {
            title: "Doomed".into(),
            url: String::new(),
            id: "abc".into(),
        };
        h.pipeline
            .engine()
            .registry()
            .with_lock(GUILD, |s| s.queue.push_back(entry))
            .await;

        let removed = h.pipeline.remove_track("abc").await.unwrap();
        assert_eq!(
            removed,
            Some(Removed {
                title: "Doomed".into(),
                files_deleted: 1,
                purged_from_queues: 1,
            })
        );
        assert!(h.pipeline.catalog().get("abc").await.unwrap().is_none());
        assert!(!h.dir.path().join("abc.webm").exists());
        assert!(h.queued_ids().await.is_empty());

        assert_eq!(h.pipeline.remove_track("abc").await.unwrap(), None);
    }
}
