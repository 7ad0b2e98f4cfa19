use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

/// Every slash command the bot answers.
pub fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        search_command(),
        queue_command(),
        nowplaying_command(),
        skip_command(),
        stop_command(),
        shuffle_command(),
        library_command(),
        help_command(),
        remove_command(),
        shutdown_command(),
    ]
}

pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Guild commands propagate immediately, which is what development wants.
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

// Playback

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Play a song from the library or YouTube")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "Song title or search terms")
                .required(true),
        )
}

fn search_command() -> CreateCommand {
    CreateCommand::new("search")
        .description("Show search results without queueing")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "Search terms")
                .required(true),
        )
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Skip the current song")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Stop playback, clear the queue and leave voice")
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Show the song that is playing")
}

// Queue

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue")
        .description("Show the queue")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "page", "Page number")
                .min_int_value(1),
        )
}

fn shuffle_command() -> CreateCommand {
    CreateCommand::new("shuffle").description("Add random library songs and shuffle the queue")
}

// Library

fn library_command() -> CreateCommand {
    CreateCommand::new("library")
        .description("List library songs")
        .add_option(CreateCommandOption::new(
            CommandOptionType::String,
            "query",
            "Only titles containing this text",
        ))
}

fn help_command() -> CreateCommand {
    CreateCommand::new("help").description("Show the available commands")
}

// Owner only

fn remove_command() -> CreateCommand {
    CreateCommand::new("remove")
        .description("Delete a song from the library (owner only)")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "id", "Song id as shown by /library")
                .required(true),
        )
}

fn shutdown_command() -> CreateCommand {
    CreateCommand::new("shutdown").description("Stop every session and shut down (owner only)")
}
