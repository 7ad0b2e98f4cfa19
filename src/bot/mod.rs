//! # Bot Module
//!
//! The Discord side of Baldy.
//!
//! - [`commands`]: slash command definitions and registration
//! - [`handlers`]: command and button dispatch, reply formatting
//! - [`events`]: the songbird [`crate::audio::Transport`]
//!
//! [`BaldyBot`] implements serenity's [`EventHandler`]. It owns nothing but
//! shared handles; all queue and playback state lives in the
//! [`RequestPipeline`] and the engine behind it.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, ShardManager, UserId, VoiceState},
    async_trait,
    prelude::TypeMapKey,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub mod commands;
pub mod events;
pub mod handlers;

use crate::{audio::pipeline::RequestPipeline, cache::SearchCache, config::Config};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

/// Lets the `shutdown` command reach the client's shard manager.
pub struct ShardManagerContainer;

impl TypeMapKey for ShardManagerContainer {
    type Value = Arc<ShardManager>;
}

pub struct BaldyBot {
    config: Arc<Config>,
    pub pipeline: Arc<RequestPipeline>,
    search_cache: Option<SearchCache>,
    maintenance_started: AtomicBool,
}

impl BaldyBot {
    pub fn new(config: Arc<Config>, pipeline: Arc<RequestPipeline>, search_cache: Option<SearchCache>) -> Self {
        Self {
            config,
            pipeline,
            search_cache,
            maintenance_started: AtomicBool::new(false),
        }
    }

    pub fn is_owner(&self, user_id: UserId) -> bool {
        user_id.get() == self.config.bot_owner
    }

    /// Global registration takes up to an hour to propagate; `GUILD_ID`
    /// registers for one guild instantly instead.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registering slash commands...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Guild command registration failed: {:?}", e);
                    anyhow::anyhow!(
                        "Could not register guild commands. Check that the bot has the 'applications.commands' scope in that guild."
                    )
                })?;
                info!("✅ Guild commands registered for {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Global command registration failed: {:?}", e);
                    anyhow::anyhow!("Could not register global commands.")
                })?;
                info!("✅ Global commands registered");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for BaldyBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} servers", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Command registration failed: {:?}", e);
        }

        // Ready fires again after every gateway reconnect.
        if !self.maintenance_started.swap(true, Ordering::SeqCst) {
            if let Some(cache) = self.search_cache.clone() {
                tokio::spawn(maintenance_tasks(cache));
            }
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command_interaction) => {
                if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                    error!("Command handling failed: {:?}", e);
                }
            }
            Interaction::Component(component_interaction) => {
                if let Err(e) = handlers::handle_component(&ctx, component_interaction, self).await {
                    error!("Button handling failed: {:?}", e);
                }
            }
            _ => {}
        }
    }

    /// Resets the guild session when someone else disconnects the bot.
    /// Our own leaves arrive here too and are no-ops for the engine.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }
        let Some(guild_id) = new.guild_id else {
            return;
        };

        if self.pipeline.engine().handle_external_disconnect(guild_id).await {
            warn!("🔌 Bot was disconnected from voice in guild {}, session reset", guild_id);
        }
    }
}

/// Hourly housekeeping.
async fn maintenance_tasks(cache: SearchCache) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;
        cache.cleanup_old_entries();
        info!("🧹 Maintenance tasks completed");
    }
}
