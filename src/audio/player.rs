use serenity::model::id::{ChannelId, GuildId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    queue::{QueueEntry, QueueInfo},
    session::{GuildSession, PlaybackState, SessionRegistry},
    CompletionCallback, ConnectionHandle, Notice, Notifier, Transport,
};
use crate::error::{MusicError, MusicResult};
use crate::storage::MediaFolder;

/// Result of asking the engine to start a guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Joined voice and started the head of the queue.
    Started,
    /// Already connecting, playing or draining; the new entry will be picked
    /// up by the running session.
    AlreadyActive,
    NothingQueued,
    /// A stop arrived while joining.
    Cancelled,
}

#[derive(Debug)]
enum EngineEvent {
    StreamEnded {
        guild_id: GuildId,
        stream_id: u64,
        error: Option<String>,
    },
}

/// What the drain loop decided under the lock.
enum Step {
    Play {
        entry: QueueEntry,
        conn: ConnectionHandle,
    },
    Finish(Option<ConnectionHandle>),
    Lost,
}

/// Per-guild playback state machine.
///
/// Deciding what plays next happens in exactly one place, [`Self::advance`],
/// which runs only in the Draining state. Enqueueing never starts a track:
/// it calls [`Self::ensure_connected`], which connects an idle guild and then
/// drains. Completion callbacks from the voice driver are forwarded through
/// an unbounded channel to a driver task owned by the engine, so session state
/// is only ever touched from tokio tasks.
pub struct PlaybackEngine {
    registry: Arc<SessionRegistry>,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
    media: MediaFolder,
    events: mpsc::UnboundedSender<EngineEvent>,
    next_stream_id: AtomicU64,
}

impl PlaybackEngine {
    /// Builds the engine and spawns its completion driver. Must be called
    /// inside a tokio runtime.
    pub fn start(
        registry: Arc<SessionRegistry>,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
        media: MediaFolder,
    ) -> Arc<Self> {
        let (events, receiver) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            registry,
            transport,
            notifier,
            media,
            events,
            next_stream_id: AtomicU64::new(1),
        });

        tokio::spawn(drive(Arc::downgrade(&engine), receiver));
        engine
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Idle → Connecting → Draining for a guild with pending entries.
    ///
    /// A failed join returns the guild to Idle with its queue intact so a
    /// later request can retry.
    pub async fn ensure_connected(
        &self,
        guild_id: GuildId,
        voice_channel: Option<ChannelId>,
        text_channel: ChannelId,
    ) -> MusicResult<ConnectOutcome> {
        let session = self.registry.get_or_create(guild_id);

        let (channel_id, generation) = {
            let mut s = session.lock().await;
            if s.state != PlaybackState::Idle {
                return Ok(ConnectOutcome::AlreadyActive);
            }
            if s.queue.is_empty() {
                return Ok(ConnectOutcome::NothingQueued);
            }
            let Some(channel_id) = voice_channel else {
                return Err(MusicError::NotInVoice);
            };
            s.state = PlaybackState::Connecting;
            s.text_channel = Some(text_channel);
            (channel_id, s.generation)
        };
        debug!("[{}] Idle -> Connecting to {}", guild_id, channel_id);

        if !self.connect(&session, channel_id, generation).await? {
            return Ok(ConnectOutcome::Cancelled);
        }

        info!("🔊 Connected to voice channel {} in guild {}", channel_id, guild_id);
        self.advance(guild_id).await;
        Ok(ConnectOutcome::Started)
    }

    /// Joins for a session already marked Connecting. Returns `false` when a
    /// stop superseded the connect, in which case the new connection is left.
    async fn connect(
        &self,
        session: &GuildSession,
        channel_id: ChannelId,
        generation: u64,
    ) -> MusicResult<bool> {
        let guild_id = session.guild_id;
        let joined = self.transport.join(guild_id, channel_id).await;

        let mut s = session.lock().await;
        let current = s.generation == generation && s.state == PlaybackState::Connecting;

        match joined {
            Ok(conn) if current => {
                s.connection = Some(conn);
                s.state = PlaybackState::Draining;
                debug!("[{}] Connecting -> Draining", guild_id);
                Ok(true)
            }
            Ok(conn) => {
                drop(s);
                debug!("[{}] Stopped while connecting, leaving again", guild_id);
                self.transport.leave(conn).await;
                Ok(false)
            }
            Err(e) => {
                if current {
                    s.state = PlaybackState::Idle;
                }
                warn!(
                    "❌ Could not join voice channel {} in guild {}: {}",
                    channel_id, guild_id, e
                );
                Err(match e {
                    MusicError::Connect(_) => e,
                    other => MusicError::Connect(other.to_string()),
                })
            }
        }
    }

    /// The Draining transition: start the next playable entry, or disconnect
    /// when the queue is empty.
    ///
    /// Missing files are reported and skipped in a loop, one popped entry per
    /// iteration, so the work is bounded by the queue length.
    async fn advance(&self, guild_id: GuildId) {
        let Some(session) = self.registry.get(guild_id) else {
            return;
        };
        let generation = session.lock().await.generation;

        loop {
            let (step, text) = {
                let mut s = session.lock().await;
                if s.generation != generation || s.state != PlaybackState::Draining {
                    return;
                }
                let text = s.text_channel;
                let step = match (s.queue.pop_front(), s.connection) {
                    (Some(entry), Some(conn)) => Step::Play { entry, conn },
                    (Some(entry), None) => {
                        s.queue.push_front(entry);
                        s.state = PlaybackState::Idle;
                        Step::Lost
                    }
                    (None, conn) => {
                        s.state = PlaybackState::Disconnecting;
                        s.now_playing = None;
                        s.connection = None;
                        debug!("[{}] Draining -> Disconnecting", guild_id);
                        Step::Finish(conn)
                    }
                };
                (step, text)
            };

            match step {
                Step::Lost => {
                    warn!("🔌 No voice connection while draining guild {}", guild_id);
                    self.notify(text, Notice::ConnectionLost);
                    return;
                }
                Step::Finish(conn) => {
                    if let Some(conn) = conn {
                        self.transport.leave(conn).await;
                    }

                    let reconnect = {
                        let mut s = session.lock().await;
                        if s.generation != generation || s.state != PlaybackState::Disconnecting {
                            return;
                        }
                        if s.queue.is_empty() {
                            s.state = PlaybackState::Idle;
                            None
                        } else if let Some(conn) = conn {
                            // Entries were committed while we were leaving.
                            s.state = PlaybackState::Connecting;
                            Some(conn.channel_id)
                        } else {
                            s.state = PlaybackState::Idle;
                            drop(s);
                            self.notify(text, Notice::ConnectionLost);
                            return;
                        }
                    };

                    let Some(channel_id) = reconnect else {
                        info!("📭 Queue finished in guild {}, disconnected", guild_id);
                        self.notify(text, Notice::QueueFinished);
                        return;
                    };

                    debug!("[{}] Disconnecting -> Connecting, queue refilled", guild_id);
                    match self.connect(&session, channel_id, generation).await {
                        Ok(true) => continue,
                        Ok(false) => return,
                        Err(_) => {
                            self.notify(text, Notice::ConnectionLost);
                            return;
                        }
                    }
                }
                Step::Play { entry, conn } => {
                    let Some(file) = self.media.locate(&entry.id).await else {
                        warn!(
                            "⚠️ Audio file not found for {} ({}) in guild {}, skipping",
                            entry.title, entry.id, guild_id
                        );
                        self.notify(text, Notice::MissingFile { title: entry.title });
                        continue;
                    };

                    let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
                    {
                        let mut s = session.lock().await;
                        if s.generation != generation || s.state != PlaybackState::Draining {
                            return;
                        }
                        s.state = PlaybackState::Playing;
                        s.stream_id = Some(stream_id);
                        s.now_playing = Some(entry.clone());
                    }
                    debug!("[{}] Draining -> Playing stream {}", guild_id, stream_id);

                    let events = self.events.clone();
                    let on_complete: CompletionCallback = Box::new(move |error| {
                        // Only fails once the engine is gone.
                        let _ = events.send(EngineEvent::StreamEnded {
                            guild_id,
                            stream_id,
                            error,
                        });
                    });

                    match self.transport.stream(conn, stream_id, &file, on_complete).await {
                        Ok(()) => {
                            info!("🎵 Now playing {} in guild {}", entry.title, guild_id);
                            self.notify(text, Notice::NowPlaying(entry));
                            return;
                        }
                        Err(e) => {
                            warn!(
                                "❌ Could not start {} in guild {}: {}",
                                entry.title, guild_id, e
                            );
                            self.notify(
                                text,
                                Notice::PlaybackFailed {
                                    title: entry.title,
                                    reason: e.to_string(),
                                },
                            );

                            let mut s = session.lock().await;
                            if s.stream_id != Some(stream_id) {
                                return;
                            }
                            s.stream_id = None;
                            s.now_playing = None;
                            s.state = PlaybackState::Draining;
                        }
                    }
                }
            }
        }
    }

    /// Playing → Draining, driven by the transport's completion callback.
    async fn on_stream_end(&self, guild_id: GuildId, stream_id: u64, error: Option<String>) {
        let Some(session) = self.registry.get(guild_id) else {
            return;
        };

        {
            let mut s = session.lock().await;
            if s.stream_id != Some(stream_id) || s.state != PlaybackState::Playing {
                debug!("[{}] Ignoring stale completion of stream {}", guild_id, stream_id);
                return;
            }
            let finished = s.now_playing.take();
            s.stream_id = None;
            s.state = PlaybackState::Draining;

            let title = finished.map(|e| e.title).unwrap_or_default();
            match error {
                Some(e) => warn!("❌ Playback error on {} in guild {}: {}", title, guild_id, e),
                None => debug!("[{}] Playing -> Draining after {}", guild_id, title),
            }
        }

        self.advance(guild_id).await;
    }

    /// Stops the current stream only. The completion drives what plays next.
    /// Returns the entry that was playing.
    ///
    /// The stop targets the stream seen under the lock. If that stream ends
    /// on its own before the stop lands, its successor keeps playing.
    pub async fn skip(&self, guild_id: GuildId) -> Option<QueueEntry> {
        let session = self.registry.get(guild_id)?;
        let (conn, stream_id, current) = {
            let s = session.lock().await;
            if s.state != PlaybackState::Playing {
                return None;
            }
            (s.connection?, s.stream_id?, s.now_playing.clone())
        };

        info!("⏭️ Skipping stream {} in guild {}", stream_id, guild_id);
        self.transport.stop_stream(conn, stream_id).await;
        current
    }

    /// Any state → Idle: clears the queue, stops the stream and leaves voice.
    /// Returns how many pending entries were dropped.
    pub async fn stop(&self, guild_id: GuildId) -> usize {
        let session = self.registry.get_or_create(guild_id);
        let (cleared, conn, previous) = {
            let mut s = session.lock().await;
            let cleared = s.queue.len();
            let previous = s.state;
            s.queue.clear();
            s.now_playing = None;
            s.stream_id = None;
            s.generation += 1;
            s.state = PlaybackState::Idle;
            (cleared, s.connection.take(), previous)
        };

        if let Some(conn) = conn {
            self.transport.stop(conn).await;
            self.transport.leave(conn).await;
        }

        info!(
            "⏹️ Stopped guild {} from {:?}, {} queued entries dropped",
            guild_id, previous, cleared
        );
        cleared
    }

    /// Called when a voice update says the bot has no channel. Returns
    /// whether an active session was torn down.
    ///
    /// Updates caused by our own leaves can arrive after a rejoin; those are
    /// recognised by the transport still reporting a live channel.
    pub async fn handle_external_disconnect(&self, guild_id: GuildId) -> bool {
        let Some(session) = self.registry.get(guild_id) else {
            return false;
        };
        let text = {
            let s = session.lock().await;
            if s.connection.is_none() {
                return false;
            }
            s.text_channel
        };
        if self.transport.is_connected(guild_id).await {
            debug!("[{}] Stale disconnect update, still connected", guild_id);
            return false;
        }

        warn!("🔌 Disconnected from voice in guild {} externally", guild_id);
        self.stop(guild_id).await;
        self.notify(text, Notice::ConnectionLost);
        true
    }

    /// Drops every pending entry with this id from every guild.
    pub async fn purge(&self, id: &str) -> usize {
        let mut removed = 0;
        for guild_id in self.registry.guild_ids() {
            removed += self
                .registry
                .with_lock(guild_id, |s| {
                    let before = s.queue.len();
                    s.queue.retain(|entry| entry.id != id);
                    before - s.queue.len()
                })
                .await;
        }
        if removed > 0 {
            info!("🗑️ Purged {} queued entries of {}", removed, id);
        }
        removed
    }

    /// Stops every known guild concurrently.
    pub async fn shutdown_all(&self) {
        let guilds = self.registry.guild_ids();
        let count = guilds.len();
        futures::future::join_all(guilds.into_iter().map(|guild_id| self.stop(guild_id))).await;
        info!("⏹️ Stopped {} guild sessions", count);
    }

    pub async fn queue_info(&self, guild_id: GuildId) -> QueueInfo {
        self.registry
            .with_lock(guild_id, |s| QueueInfo {
                current: s.now_playing.clone(),
                items: s.queue.iter().cloned().collect(),
            })
            .await
    }

    pub async fn now_playing(&self, guild_id: GuildId) -> Option<QueueEntry> {
        self.registry.with_lock(guild_id, |s| s.now_playing.clone()).await
    }

    pub async fn state(&self, guild_id: GuildId) -> PlaybackState {
        self.registry.with_lock(guild_id, |s| s.state).await
    }

    fn notify(&self, channel: Option<ChannelId>, notice: Notice) {
        if let Some(channel) = channel {
            self.notifier.send(channel, notice);
        }
    }
}

/// Receives completions and runs each one as its own task on the runtime.
async fn drive(engine: Weak<PlaybackEngine>, mut events: mpsc::UnboundedReceiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        let Some(engine) = engine.upgrade() else {
            break;
        };
        match event {
            EngineEvent::StreamEnded {
                guild_id,
                stream_id,
                error,
            } => {
                tokio::spawn(async move {
                    engine.on_stream_end(guild_id, stream_id, error).await;
                });
            }
        }
    }
    debug!("Playback driver stopped");
}
