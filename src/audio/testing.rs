//! Recording fakes for the engine's collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

use super::player::PlaybackEngine;
use super::session::PlaybackState;
use super::{CompletionCallback, ConnectionHandle, Notice, Notifier, Transport};
use crate::error::{MusicError, MusicResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Join(ChannelId),
    Stream(PathBuf),
    StopStream(u64),
    Stop,
    Leave,
}

/// Transport operations a test can hold back until it opens the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Join,
    StopStream,
    Leave,
}

/// Transport that records every call and holds completion callbacks until
/// the test finishes a stream or stops it.
pub struct FakeTransport {
    pub calls: Mutex<Vec<Call>>,
    pending: Mutex<Vec<(u64, CompletionCallback)>>,
    connected: Mutex<HashSet<GuildId>>,
    pub fail_join: AtomicBool,
    pub fail_stream: AtomicBool,
    join_gate: Semaphore,
    stop_gate: Semaphore,
    leave_gate: Semaphore,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            connected: Mutex::new(HashSet::new()),
            fail_join: AtomicBool::new(false),
            fail_stream: AtomicBool::new(false),
            join_gate: Semaphore::new(Semaphore::MAX_PERMITS),
            stop_gate: Semaphore::new(Semaphore::MAX_PERMITS),
            leave_gate: Semaphore::new(Semaphore::MAX_PERMITS),
        }
    }
}

impl FakeTransport {
    /// A transport where `gate` blocks until [`FakeTransport::open`]. The
    /// call is recorded before it blocks.
    pub fn gated(gate: Gate) -> Self {
        let mut transport = Self::default();
        *transport.gate_mut(gate) = Semaphore::new(0);
        transport
    }

    pub fn open(&self, gate: Gate) {
        match gate {
            Gate::Join => &self.join_gate,
            Gate::StopStream => &self.stop_gate,
            Gate::Leave => &self.leave_gate,
        }
        .add_permits(1);
    }

    fn gate_mut(&mut self, gate: Gate) -> &mut Semaphore {
        match gate {
            Gate::Join => &mut self.join_gate,
            Gate::StopStream => &mut self.stop_gate,
            Gate::Leave => &mut self.leave_gate,
        }
    }

    /// Ends the oldest active stream naturally, or with `error`.
    pub fn finish(&self, error: Option<&str>) {
        let callback = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                None
            } else {
                Some(pending.remove(0).1)
            }
        };
        let callback = callback.expect("no active stream to finish");
        callback(error.map(str::to_string));
    }

    /// Drops the voice channel as if someone else disconnected the bot.
    pub fn kick(&self, guild_id: GuildId) {
        self.connected.lock().remove(&guild_id);
    }

    pub fn active_streams(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn streamed(&self) -> Vec<PathBuf> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Stream(path) => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Call) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| std::mem::discriminant(*call) == std::mem::discriminant(wanted))
            .count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> MusicResult<ConnectionHandle> {
        self.calls.lock().push(Call::Join(channel_id));
        let _permit = self.join_gate.acquire().await;
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(MusicError::Connect("missing permissions".into()));
        }
        self.connected.lock().insert(guild_id);
        Ok(ConnectionHandle {
            guild_id,
            channel_id,
        })
    }

    async fn stream(
        &self,
        _conn: ConnectionHandle,
        stream_id: u64,
        file: &Path,
        on_complete: CompletionCallback,
    ) -> MusicResult<()> {
        self.calls.lock().push(Call::Stream(file.to_path_buf()));
        if self.fail_stream.load(Ordering::SeqCst) {
            return Err(MusicError::Playback("unsupported codec".into()));
        }
        self.pending.lock().push((stream_id, on_complete));
        Ok(())
    }

    async fn stop_stream(&self, _conn: ConnectionHandle, stream_id: u64) {
        self.calls.lock().push(Call::StopStream(stream_id));
        let _permit = self.stop_gate.acquire().await;
        let stopped = {
            let mut pending = self.pending.lock();
            pending
                .iter()
                .position(|(id, _)| *id == stream_id)
                .map(|index| pending.remove(index).1)
        };
        if let Some(callback) = stopped {
            callback(None);
        }
    }

    async fn stop(&self, _conn: ConnectionHandle) {
        self.calls.lock().push(Call::Stop);
        let stopped: Vec<_> = self.pending.lock().drain(..).collect();
        for (_, callback) in stopped {
            callback(None);
        }
    }

    async fn leave(&self, conn: ConnectionHandle) {
        self.calls.lock().push(Call::Leave);
        let _permit = self.leave_gate.acquire().await;
        self.connected.lock().remove(&conn.guild_id);
    }

    async fn is_connected(&self, guild_id: GuildId) -> bool {
        self.connected.lock().contains(&guild_id)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(ChannelId, Notice)>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.sent.lock().iter().map(|(_, n)| n.clone()).collect()
    }

    pub fn contains(&self, notice: &Notice) -> bool {
        self.sent.lock().iter().any(|(_, n)| n == notice)
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, channel: ChannelId, notice: Notice) {
        self.sent.lock().push((channel, notice));
    }
}

/// Polls `check` until it holds, failing the test after two seconds.
pub async fn wait_until(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

/// Waits until the engine reports `state` for `guild_id`.
pub async fn wait_for_state(engine: &PlaybackEngine, guild_id: GuildId, state: PlaybackState) {
    for _ in 0..200 {
        if engine.state(guild_id).await == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "guild {} never reached {:?}, still {:?}",
        guild_id,
        state,
        engine.state(guild_id).await
    );
}
