use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    audio::queue::{QueueEntry, QueueInfo, QueuePage},
    sources::SearchHit,
    storage::Track,
};

/// Standard colour palette for the bot.
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 Baldy";

/// Entries shown per `/queue` page.
pub const QUEUE_PAGE_SIZE: usize = 10;

// Discord rejects embed field values longer than this.
const FIELD_LIMIT: usize = 1024;

pub fn create_now_playing_embed(entry: &QueueEntry) -> CreateEmbed {
    CreateEmbed::default()
        .title("🎵 Now Playing")
        .description(format!("**{}**", entry.title))
        .color(colors::SUCCESS_GREEN)
        .url(&entry.url)
        .field("🔗 Source", "YouTube", true)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_track_added_embed(entry: &QueueEntry, position: usize, from_library: bool) -> CreateEmbed {
    let source = if from_library { "📂 Library" } else { "🔍 YouTube" };

    CreateEmbed::default()
        .title("✅ Added to the queue")
        .description(format!("Added **{}** to the queue.", entry.title))
        .color(colors::SUCCESS_GREEN)
        .url(&entry.url)
        .field("📍 Position", position.to_string(), true)
        .field("🔗 Source", source, true)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(
            "🎵 Plays automatically when its turn comes",
        ))
}

pub fn create_shuffle_embed(added: &[QueueEntry], queue_len: usize) -> CreateEmbed {
    let titles: Vec<String> = added.iter().map(|e| format!("• {}", e.title)).collect();

    CreateEmbed::default()
        .title("🔀 Shuffled")
        .description(format!(
            "Added **{}** random songs from the library and shuffled the queue.",
            added.len()
        ))
        .color(colors::MUSIC_PURPLE)
        .field("Added", fit_field(&titles.join("\n")), false)
        .field("📊 Songs queued", queue_len.to_string(), true)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_queue_embed(queue_info: &QueueInfo, page: usize) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Queue")
        .color(colors::INFO_BLUE);

    if queue_info.is_empty() {
        return embed
            .description("😴 **The queue is empty**\n\n💡 Use `/play <song>` to add music")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    if let Some(current) = &queue_info.current {
        embed = embed.field("▶️ Playing", format!("**{}**", current.title), false);
    }

    let queue_page = queue_info.get_page(page, QUEUE_PAGE_SIZE);
    if !queue_page.items.is_empty() {
        embed = embed.field("Up next", fit_field(&queue_lines(&queue_page)), false);
    }

    embed = embed.field(
        "Info",
        format!("**Total:** {} songs waiting", queue_info.total_items()),
        false,
    );

    if queue_page.total_pages > 1 {
        embed = embed.footer(CreateEmbedFooter::new(format!(
            "Page {} of {} • Baldy",
            queue_page.current_page, queue_page.total_pages
        )));
    } else {
        embed = embed.footer(CreateEmbedFooter::new(STANDARD_FOOTER));
    }

    embed.timestamp(Timestamp::now())
}

pub fn create_search_embed(query: &str, hits: &[SearchHit]) -> CreateEmbed {
    let lines: Vec<String> = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| format!("**{}**. [{}]({}) - {}", i + 1, hit.title, hit.url(), hit.author))
        .collect();

    CreateEmbed::default()
        .title(format!("🔍 Results for \"{}\"", query))
        .description(fit_description(&lines.join("\n")))
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new("Use /play with a title to queue one"))
        .timestamp(Timestamp::now())
}

pub fn create_library_embed(tracks: &[Track], query: Option<&str>) -> CreateEmbed {
    let title = match query {
        Some(q) => format!("📂 Library matches for \"{}\"", q),
        None => "📂 Library".to_string(),
    };

    if tracks.is_empty() {
        return CreateEmbed::default()
            .title(title)
            .description("No songs found.")
            .color(colors::NEUTRAL_GRAY)
            .timestamp(Timestamp::now());
    }

    let lines: Vec<String> = tracks
        .iter()
        .map(|t| format!("`{}` {} `[{}]`", t.id, t.title, format_duration(t.duration)))
        .collect();
    let total: u64 = tracks.iter().map(|t| t.duration).sum();

    CreateEmbed::default()
        .title(title)
        .description(fit_description(&lines.join("\n")))
        .color(colors::MUSIC_PURPLE)
        .field("📊 Songs", tracks.len().to_string(), true)
        .field(
            "⏱️ Total length",
            humantime::format_duration(Duration::from_secs(total)).to_string(),
            true,
        )
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

pub fn create_help_embed() -> CreateEmbed {
    CreateEmbed::default()
        .title("🎵 Baldy - Commands")
        .color(colors::INFO_BLUE)
        .description("Plays music from the local library, downloading from YouTube when needed")
        .field(
            "🎵 Playback",
            "• `/play <song>` - Plays a song or adds it to the queue\n\
            • `/skip` - Skips the current song\n\
            • `/stop` - Stops playback and clears the queue\n\
            • `/nowplaying` - Shows the current song",
            false,
        )
        .field(
            "📜 Queue",
            "• `/queue [page]` - Shows the queue\n\
            • `/shuffle` - Adds random library songs and shuffles the queue",
            false,
        )
        .field(
            "📂 Library",
            "• `/search <query>` - Shows search results without queueing\n\
            • `/library [query]` - Lists library songs with their ids",
            false,
        )
        .field(
            "🔒 Owner",
            "• `/remove <id>` - Deletes a song from the library\n\
            • `/shutdown` - Stops every session and shuts the bot down",
            false,
        )
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_warning_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("⚠️ {}", title))
        .description(description)
        .color(colors::WARNING_ORANGE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Numbered lines for one queue page, numbered from the page offset.
fn queue_lines(page: &QueuePage) -> String {
    page.items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("**{}**. {}", page.offset + i + 1, item.title))
        .collect::<Vec<_>>()
        .join("\n")
}

fn fit_field(text: &str) -> String {
    truncate(text, FIELD_LIMIT)
}

fn fit_description(text: &str) -> String {
    truncate(text, 4096)
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(limit.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// Formats seconds as `m:ss` or `h:mm:ss`.
fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(n: usize) -> QueueInfo {
        QueueInfo {
            current: None,
            items: (0..n)
                .map(|i| QueueEntry {
                    title: format!("Song {}", i),
                    url: String::new(),
                    id: format!("id{}", i),
                })
                .collect(),
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(59), "0:59");
        assert_eq!(format_duration(213), "3:33");
        assert_eq!(format_duration(3725), "1:02:05");
    }

    #[test]
    fn test_queue_lines_continue_numbering_across_pages() {
        let page = info(15).get_page(2, QUEUE_PAGE_SIZE);
        let lines = queue_lines(&page);
        assert!(lines.starts_with("**11**. Song 10"));
        assert!(lines.ends_with("**15**. Song 14"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "ñ".repeat(10);
        let cut = truncate(&text, 5);
        assert_eq!(cut.chars().count(), 5);
        assert!(cut.ends_with('…'));
        assert_eq!(truncate("short", 5), "short");
    }
}
