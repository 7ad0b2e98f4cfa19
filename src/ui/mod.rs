//! Discord-facing presentation: embeds, player buttons and the channel
//! [`Notifier`].

pub mod buttons;
pub mod embeds;

use serenity::{builder::CreateMessage, http::Http, model::id::ChannelId};
use std::sync::Arc;
use tracing::warn;

use crate::audio::{Notice, Notifier};

/// Posts engine notices to text channels. Each send runs on its own task so
/// the engine never waits on Discord.
pub struct ChannelNotifier {
    http: Arc<Http>,
}

impl ChannelNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

impl Notifier for ChannelNotifier {
    fn send(&self, channel: ChannelId, notice: Notice) {
        let http = self.http.clone();
        tokio::spawn(async move {
            let message = match &notice {
                Notice::NowPlaying(entry) => CreateMessage::new()
                    .embed(embeds::create_now_playing_embed(entry))
                    .components(buttons::create_player_buttons()),
                other => CreateMessage::new().content(other.to_string()),
            };

            if let Err(e) = channel.send_message(&http, message).await {
                warn!("Could not post notice to channel {}: {:?}", channel, e);
            }
        });
    }
}
