use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{queue::QueueEntry, ConnectionHandle};

/// Where a guild is in its playback lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Connecting,
    Playing,
    Draining,
    Disconnecting,
}

/// Everything guarded by a guild's mutex.
#[derive(Debug, Default)]
pub struct SessionState {
    pub queue: VecDeque<QueueEntry>,
    pub connection: Option<ConnectionHandle>,
    pub state: PlaybackState,
    pub now_playing: Option<QueueEntry>,
    /// Id of the stream currently owned by this guild. Completions carrying
    /// any other id are stale.
    pub stream_id: Option<u64>,
    /// Bumped by every stop. Connects and drains started under an older
    /// generation give up instead of touching the session.
    pub generation: u64,
    /// Where notices for this session go.
    pub text_channel: Option<ChannelId>,
}

pub struct GuildSession {
    pub guild_id: GuildId,
    state: Mutex<SessionState>,
}

impl GuildSession {
    fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Locks this guild's state. Keep the guard only for the critical section,
    /// never across a network call or a download.
    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }
}

/// Process-wide map of guild sessions, populated lazily.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<GuildSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for a guild, creating it on first use. Repeated
    /// calls return the same instance.
    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<GuildSession> {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| {
                debug!("🆕 New session for guild {}", guild_id);
                Arc::new(GuildSession::new(guild_id))
            })
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildSession>> {
        self.sessions.get(&guild_id).map(|s| s.clone())
    }

    /// Runs `f` while holding the guild's mutex.
    pub async fn with_lock<R>(&self, guild_id: GuildId, f: impl FnOnce(&mut SessionState) -> R) -> R {
        // Clone the Arc first so no map shard stays locked across the await.
        let session = self.get_or_create(guild_id);
        let mut state = session.lock().await;
        f(&mut state)
    }

    pub fn guild_ids(&self) -> Vec<GuildId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
