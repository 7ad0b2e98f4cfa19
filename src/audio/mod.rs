//! # Audio Module
//!
//! Per-guild queueing and playback for Baldy.
//!
//! ## Architecture
//!
//! ### [`session`] - Guild Session Registry
//! - One [`session::GuildSession`] per guild, created lazily and kept for the
//!   process lifetime
//! - Each session owns its queue, its voice connection handle and one mutex;
//!   different guilds never contend
//!
//! ### [`player`] - Playback Engine
//! - The per-guild state machine: Idle, Connecting, Playing, Draining,
//!   Disconnecting
//! - The only place that decides what plays next. Enqueueing only ever asks
//!   whether a connection should be started
//! - Stream completions arrive from the voice driver and are handed back to
//!   the engine through a channel before any session state is touched
//!
//! ### [`pipeline`] - Request Pipeline
//! - Turns `play`, `shuffle` and `remove` requests into catalog lookups,
//!   resolver and fetcher calls and queue commits
//! - Searching and downloading run without the guild lock; only the commit
//!   is serialized
//!
//! ### [`queue`] - Queue entries and paging helpers
//!
//! The engine talks to the outside world through two narrow traits defined
//! here: [`Transport`] (voice connection and streaming) and [`Notifier`]
//! (fire-and-forget text output).

pub mod pipeline;
pub mod player;
pub mod queue;
pub mod session;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::fmt;
use std::path::Path;

use crate::error::MusicResult;
use queue::QueueEntry;

/// A live voice connection as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

/// Invoked once when a stream ends, with the error if it ended abnormally.
pub type CompletionCallback = Box<dyn FnOnce(Option<String>) + Send + 'static>;

/// Voice connection and audio streaming.
///
/// `stream` hands `on_complete` to the transport, which must call it exactly
/// once: on natural end, after a stop, or on a playback error. If `stream`
/// itself returns an error the callback is dropped without being called.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> MusicResult<ConnectionHandle>;

    async fn stream(
        &self,
        conn: ConnectionHandle,
        stream_id: u64,
        file: &Path,
        on_complete: CompletionCallback,
    ) -> MusicResult<()>;

    /// Stops one stream. A stream that already ended is left alone, so
    /// whatever replaced it keeps playing.
    async fn stop_stream(&self, conn: ConnectionHandle, stream_id: u64);

    /// Stops everything playing on the connection.
    async fn stop(&self, conn: ConnectionHandle);

    async fn leave(&self, conn: ConnectionHandle);

    /// Whether the voice layer still holds a live channel for the guild.
    async fn is_connected(&self, guild_id: GuildId) -> bool;
}

/// Fire-and-forget user facing output. Never blocks on delivery.
pub trait Notifier: Send + Sync {
    fn send(&self, channel: ChannelId, notice: Notice);
}

/// Messages the core sends to a guild's text channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    NowPlaying(QueueEntry),
    Downloading { title: String },
    MissingFile { title: String },
    PlaybackFailed { title: String, reason: String },
    QueueFinished,
    ConnectionLost,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::NowPlaying(entry) => write!(f, "🎵 Now playing: {}", entry.title),
            Notice::Downloading { title } => write!(f, "⬇️ Downloading {}...", title),
            Notice::MissingFile { title } => {
                write!(f, "⚠️ Audio file not found for {}, skipping.", title)
            }
            Notice::PlaybackFailed { title, reason } => {
                write!(f, "❌ Could not play {} ({}), skipping.", title, reason)
            }
            Notice::QueueFinished => write!(f, "📭 Queue finished, disconnecting."),
            Notice::ConnectionLost => {
                write!(f, "🔌 Lost the voice connection. Use /play to start again.")
            }
        }
    }
}
