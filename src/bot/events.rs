use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::{
    async_trait,
    model::id::{ChannelId, GuildId},
};
use songbird::{
    input::File as FileInput,
    tracks::{PlayMode, TrackHandle},
    Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::audio::{CompletionCallback, ConnectionHandle, Transport};
use crate::error::{MusicError, MusicResult};

/// [`Transport`] backed by the songbird voice manager.
///
/// Live tracks are kept by stream id so a skip can stop exactly the track
/// it was aimed at.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    tracks: Arc<DashMap<u64, (GuildId, TrackHandle)>>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            tracks: Arc::new(DashMap::new()),
        }
    }

    fn forget_guild(&self, guild_id: GuildId) {
        self.tracks.retain(|_, (guild, _)| *guild != guild_id);
    }
}

#[async_trait]
impl Transport for SongbirdTransport {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> MusicResult<ConnectionHandle> {
        match self.manager.join(guild_id, channel_id).await {
            Ok(_call) => {
                info!("🔊 Joined voice channel {} in guild {}", channel_id, guild_id);
                Ok(ConnectionHandle {
                    guild_id,
                    channel_id,
                })
            }
            Err(e) => {
                error!("Voice join failed in guild {}: {:?}", guild_id, e);
                // A half-open call would make the next join a no-op.
                let _ = self.manager.remove(guild_id).await;
                Err(MusicError::Connect(e.to_string()))
            }
        }
    }

    async fn stream(
        &self,
        conn: ConnectionHandle,
        stream_id: u64,
        file: &Path,
        on_complete: CompletionCallback,
    ) -> MusicResult<()> {
        let call = self
            .manager
            .get(conn.guild_id)
            .ok_or_else(|| MusicError::Playback("no voice connection".into()))?;

        let input = FileInput::new(file.to_path_buf());
        let handle = call.lock().await.play_input(input.into());

        let completion = StreamCompletion {
            guild_id: conn.guild_id,
            stream_id,
            tracks: self.tracks.clone(),
            callback: Arc::new(Mutex::new(Some(on_complete))),
        };
        self.tracks.insert(stream_id, (conn.guild_id, handle.clone()));
        for event in [TrackEvent::End, TrackEvent::Error] {
            if let Err(e) = handle.add_event(VoiceEvent::Track(event), completion.clone()) {
                self.tracks.remove(&stream_id);
                let _ = handle.stop();
                return Err(MusicError::Playback(format!("could not watch track: {}", e)));
            }
        }

        debug!("▶️ Streaming {} as {} in guild {}", file.display(), stream_id, conn.guild_id);
        Ok(())
    }

    async fn stop_stream(&self, conn: ConnectionHandle, stream_id: u64) {
        match self.tracks.remove(&stream_id) {
            Some((_, (_, handle))) => {
                if let Err(e) = handle.stop() {
                    debug!("Stream {} in guild {} was already gone: {:?}", stream_id, conn.guild_id, e);
                }
            }
            None => debug!("Stream {} in guild {} already ended", stream_id, conn.guild_id),
        }
    }

    async fn stop(&self, conn: ConnectionHandle) {
        if let Some(call) = self.manager.get(conn.guild_id) {
            call.lock().await.stop();
        }
        self.forget_guild(conn.guild_id);
    }

    async fn leave(&self, conn: ConnectionHandle) {
        self.forget_guild(conn.guild_id);
        match self.manager.remove(conn.guild_id).await {
            Ok(()) => info!("👋 Left voice channel in guild {}", conn.guild_id),
            Err(e) => warn!("Leaving voice in guild {} failed: {:?}", conn.guild_id, e),
        }
    }

    async fn is_connected(&self, guild_id: GuildId) -> bool {
        match self.manager.get(guild_id) {
            Some(call) => call.lock().await.current_channel().is_some(),
            None => false,
        }
    }
}

/// Fires the engine's completion callback the first time the track ends or
/// errors. Registered for both events, so the callback sits behind a shared
/// `Option`.
#[derive(Clone)]
struct StreamCompletion {
    guild_id: GuildId,
    stream_id: u64,
    tracks: Arc<DashMap<u64, (GuildId, TrackHandle)>>,
    callback: Arc<Mutex<Option<CompletionCallback>>>,
}

#[async_trait]
impl VoiceEventHandler for StreamCompletion {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        let mut error = None;
        if let EventContext::Track(track_list) = ctx {
            for (state, _handle) in *track_list {
                if let PlayMode::Errored(e) = &state.playing {
                    error!("❌ Track error in guild {}: {:?}", self.guild_id, e);
                    error = Some(format!("{:?}", e));
                }
            }
        }

        self.tracks.remove(&self.stream_id);
        if let Some(callback) = self.callback.lock().take() {
            callback(error);
        }

        Some(VoiceEvent::Cancel)
    }
}
