use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::{CommandInteraction, ComponentInteraction},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use crate::{
    audio::pipeline::Requester,
    bot::{BaldyBot, ShardManagerContainer},
    error::MusicError,
    ui::{
        buttons::{self, ButtonAction},
        embeds,
    },
};

/// Results shown by `/search`.
const SEARCH_RESULTS_SHOWN: usize = 10;

/// Dispatches slash commands.
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &BaldyBot) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        reply_ephemeral(ctx, &command, "❌ Commands only work inside a server").await?;
        return Ok(());
    };

    info!(
        "📝 /{} used by {} in guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await?,
        "search" => handle_search(ctx, &command, bot).await?,
        "queue" => handle_queue(ctx, &command, bot, guild_id).await?,
        "nowplaying" => handle_nowplaying(ctx, &command, bot, guild_id).await?,
        "skip" => handle_skip(ctx, &command, bot, guild_id).await?,
        "stop" => handle_stop(ctx, &command, bot, guild_id).await?,
        "shuffle" => handle_shuffle(ctx, &command, bot, guild_id).await?,
        "library" => handle_library(ctx, &command, bot).await?,
        "help" => reply_embed(ctx, &command, embeds::create_help_embed()).await?,
        "remove" => handle_remove(ctx, &command, bot).await?,
        "shutdown" => handle_shutdown(ctx, &command, bot).await?,
        _ => reply_ephemeral(ctx, &command, "❌ Unknown command").await?,
    }

    Ok(())
}

/// Handles presses of the player buttons.
pub async fn handle_component(ctx: &Context, component: ComponentInteraction, bot: &BaldyBot) -> Result<()> {
    let Some(guild_id) = component.guild_id else {
        return Ok(());
    };
    let Some(action) = ButtonAction::from_custom_id(&component.data.custom_id) else {
        warn!("Unknown button {}", component.data.custom_id);
        return Ok(());
    };

    info!(
        "🔘 {:?} pressed by {} in guild {}",
        action, component.user.name, guild_id
    );

    let engine = bot.pipeline.engine();
    let message = match action {
        ButtonAction::Skip => match engine.skip(guild_id).await {
            Some(entry) => CreateInteractionResponseMessage::new()
                .content(format!("⏭️ {} skipped **{}**", component.user.name, entry.title)),
            None => CreateInteractionResponseMessage::new()
                .content("❌ Nothing is playing")
                .ephemeral(true),
        },
        ButtonAction::Stop => {
            engine.stop(guild_id).await;
            CreateInteractionResponseMessage::new()
                .content(format!("⏹️ {} stopped playback", component.user.name))
        }
        ButtonAction::Shuffle => {
            let requester = requester(ctx, guild_id, component.user.id, component.channel_id);
            match bot.pipeline.enqueue_shuffle(guild_id, &requester).await {
                Ok(shuffled) => CreateInteractionResponseMessage::new()
                    .embed(embeds::create_shuffle_embed(&shuffled.added, shuffled.queue_len)),
                Err(e) => CreateInteractionResponseMessage::new()
                    .embed(error_embed(&e))
                    .ephemeral(true),
            }
        }
        ButtonAction::Queue => {
            let info = engine.queue_info(guild_id).await;
            CreateInteractionResponseMessage::new()
                .embed(embeds::create_queue_embed(&info, 1))
                .ephemeral(true)
        }
    };

    component
        .create_response(&ctx.http, CreateInteractionResponse::Message(message))
        .await?;

    Ok(())
}

async fn handle_play(ctx: &Context, command: &CommandInteraction, bot: &BaldyBot, guild_id: GuildId) -> Result<()> {
    let query = option_str(command, "query").unwrap_or_default().to_string();

    // Searching and downloading can take longer than the interaction window.
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let requester = requester(ctx, guild_id, command.user.id, command.channel_id);
    let embed = match bot.pipeline.enqueue_by_text(guild_id, &requester, &query).await {
        Ok(queued) => match queued.playback {
            Ok(_) => embeds::create_track_added_embed(&queued.entry, queued.position, queued.from_library),
            Err(e) => embeds::create_warning_embed(
                "Queued, but not playing",
                &format!("Added **{}** to the queue.\n{}", queued.entry.title, e),
            ),
        },
        Err(e) => {
            warn!("❌ /play '{}' failed in guild {}: {}", query, guild_id, e);
            error_embed(&e)
        }
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;

    Ok(())
}

async fn handle_search(ctx: &Context, command: &CommandInteraction, bot: &BaldyBot) -> Result<()> {
    let query = option_str(command, "query").unwrap_or_default().to_string();

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let embed = match bot.pipeline.search(&query).await {
        Ok(mut hits) => {
            hits.truncate(SEARCH_RESULTS_SHOWN);
            embeds::create_search_embed(query.trim(), &hits)
        }
        Err(e) => error_embed(&e),
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;

    Ok(())
}

async fn handle_queue(ctx: &Context, command: &CommandInteraction, bot: &BaldyBot, guild_id: GuildId) -> Result<()> {
    let page = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "page")
        .and_then(|opt| opt.value.as_i64())
        .unwrap_or(1)
        .max(1) as usize;

    let queue_info = bot.pipeline.engine().queue_info(guild_id).await;
    reply_embed(ctx, command, embeds::create_queue_embed(&queue_info, page)).await
}

async fn handle_nowplaying(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &BaldyBot,
    guild_id: GuildId,
) -> Result<()> {
    match bot.pipeline.engine().now_playing(guild_id).await {
        Some(current) => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .embed(embeds::create_now_playing_embed(&current))
                            .components(buttons::create_player_buttons()),
                    ),
                )
                .await?;
            Ok(())
        }
        None => reply_ephemeral(ctx, command, "❌ Nothing is playing right now").await,
    }
}

async fn handle_skip(ctx: &Context, command: &CommandInteraction, bot: &BaldyBot, guild_id: GuildId) -> Result<()> {
    match bot.pipeline.engine().skip(guild_id).await {
        Some(entry) => reply(ctx, command, &format!("⏭️ Skipped **{}**", entry.title)).await,
        None => reply_ephemeral(ctx, command, "❌ Nothing is playing right now").await,
    }
}

async fn handle_stop(ctx: &Context, command: &CommandInteraction, bot: &BaldyBot, guild_id: GuildId) -> Result<()> {
    let cleared = bot.pipeline.engine().stop(guild_id).await;
    reply(
        ctx,
        command,
        &format!("⏹️ Stopped playback and cleared {} queued songs", cleared),
    )
    .await
}

async fn handle_shuffle(ctx: &Context, command: &CommandInteraction, bot: &BaldyBot, guild_id: GuildId) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let requester = requester(ctx, guild_id, command.user.id, command.channel_id);
    let embed = match bot.pipeline.enqueue_shuffle(guild_id, &requester).await {
        Ok(shuffled) => match shuffled.playback {
            Ok(_) => embeds::create_shuffle_embed(&shuffled.added, shuffled.queue_len),
            Err(e) => embeds::create_warning_embed("Shuffled, but not playing", &e.to_string()),
        },
        Err(e) => error_embed(&e),
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;

    Ok(())
}

async fn handle_library(ctx: &Context, command: &CommandInteraction, bot: &BaldyBot) -> Result<()> {
    let query = option_str(command, "query");

    let embed = match bot.pipeline.library(query).await {
        Ok(tracks) => embeds::create_library_embed(&tracks, query.map(str::trim).filter(|q| !q.is_empty())),
        Err(e) => error_embed(&e),
    };
    reply_embed(ctx, command, embed).await
}

async fn handle_remove(ctx: &Context, command: &CommandInteraction, bot: &BaldyBot) -> Result<()> {
    if !bot.is_owner(command.user.id) {
        return reply_ephemeral(ctx, command, "🔒 Only the bot owner can remove songs").await;
    }

    let id = option_str(command, "id").unwrap_or_default().trim().to_string();
    let embed = match bot.pipeline.remove_track(&id).await {
        Ok(Some(removed)) => embeds::create_success_embed(
            "Removed",
            &format!(
                "Deleted **{}** (`{}`) from the library.\n{} file(s) deleted, {} queued entries dropped.",
                removed.title, id, removed.files_deleted, removed.purged_from_queues
            ),
        ),
        Ok(None) => embeds::create_error_embed("Not found", &format!("No library song has the id `{}`.", id)),
        Err(e) => error_embed(&e),
    };
    reply_embed(ctx, command, embed).await
}

async fn handle_shutdown(ctx: &Context, command: &CommandInteraction, bot: &BaldyBot) -> Result<()> {
    if !bot.is_owner(command.user.id) {
        return reply_ephemeral(ctx, command, "🔒 Only the bot owner can shut the bot down").await;
    }

    reply(ctx, command, "👋 Shutting down...").await?;
    info!("⚠️ Shutdown requested by {}", command.user.name);

    bot.pipeline.engine().shutdown_all().await;

    let shard_manager = ctx.data.read().await.get::<ShardManagerContainer>().cloned();
    match shard_manager {
        Some(manager) => manager.shutdown_all().await,
        None => warn!("Shard manager not registered, cannot close the gateway"),
    }

    Ok(())
}

/// Builds the requester from the cached voice state of `user_id`.
fn requester(ctx: &Context, guild_id: GuildId, user_id: UserId, text_channel: ChannelId) -> Requester {
    let voice_channel = guild_id.to_guild_cached(&ctx.cache).and_then(|guild| {
        guild
            .voice_states
            .get(&user_id)
            .and_then(|voice_state| voice_state.channel_id)
    });

    Requester {
        user_id,
        voice_channel,
        text_channel,
    }
}

fn option_str<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn error_title(error: &MusicError) -> &'static str {
    match error {
        MusicError::NoResults => "No results",
        MusicError::TrackTooLong { .. } => "Song too long",
        MusicError::Fetch(_) => "Download failed",
        MusicError::Connect(_) => "Could not join voice",
        MusicError::EmptyCatalog => "Empty library",
        MusicError::NotInVoice => "Not in a voice channel",
        MusicError::Timeout { .. } => "Timed out",
        MusicError::MissingFile { .. } | MusicError::Playback(_) | MusicError::Catalog(_) => "Error",
    }
}

fn error_embed(error: &MusicError) -> CreateEmbed {
    if error.is_user_visible() {
        embeds::create_error_embed(error_title(error), &error.to_string())
    } else {
        embeds::create_error_embed("Error", "Something went wrong. Please try again.")
    }
}

async fn reply(ctx: &Context, command: &CommandInteraction, content: &str) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().content(content)),
        )
        .await?;
    Ok(())
}

async fn reply_ephemeral(ctx: &Context, command: &CommandInteraction, content: &str) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}

async fn reply_embed(ctx: &Context, command: &CommandInteraction, embed: CreateEmbed) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_cap_error_keeps_its_message() {
        let err = MusicError::TrackTooLong {
            duration: 7200,
            max: 600,
        };
        assert_eq!(error_title(&err), "Song too long");
        assert!(err.is_user_visible());
    }

    #[test]
    fn test_not_in_voice_title() {
        assert_eq!(error_title(&MusicError::NotInVoice), "Not in a voice channel");
    }
}
