use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info};

use super::{Resolver, SearchHit};
use crate::error::{MusicError, MusicResult};

const SEARCH_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3/search";

#[derive(Debug, Deserialize)]
struct YouTubeAPIResponse {
    #[serde(default)]
    items: Vec<YouTubeVideo>,
}

#[derive(Debug, Deserialize)]
struct YouTubeVideo {
    id: VideoId,
    snippet: VideoSnippet,
}

#[derive(Debug, Deserialize)]
struct VideoId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoSnippet {
    title: String,
    #[serde(rename = "channelTitle", default)]
    channel_title: String,
}

/// Search through the YouTube Data API v3.
pub struct YouTubeAPIv3Client {
    api_key: String,
    client: reqwest::Client,
    max_results: usize,
}

impl YouTubeAPIv3Client {
    pub fn new(api_key: String, timeout: Duration) -> MusicResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MusicError::Fetch(format!("could not build HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            client,
            max_results: 1,
        })
    }

    fn hits_from(response: YouTubeAPIResponse) -> Vec<SearchHit> {
        response
            .items
            .into_iter()
            .filter_map(|video| {
                // Channels and playlists come back without a videoId.
                let external_id = video.id.video_id?;
                Some(SearchHit {
                    title: html_unescape(&video.snippet.title),
                    external_id,
                    author: video.snippet.channel_title,
                })
            })
            .collect()
    }
}

/// The API returns titles HTML-escaped ("Rock &amp; Roll").
fn html_unescape(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[async_trait]
impl Resolver for YouTubeAPIv3Client {
    async fn search(&self, query: &str) -> MusicResult<Vec<SearchHit>> {
        debug!("🔍 YouTube API v3 search: {}", query);

        let response = self
            .client
            .get(SEARCH_ENDPOINT)
            .query(&[
                ("part", "snippet"),
                ("q", query),
                ("type", "video"),
                ("maxResults", &self.max_results.to_string()),
                ("key", &self.api_key),
            ])
            .send()
            .await
            .map_err(|e| MusicError::Fetch(format!("YouTube API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("❌ YouTube API error: {} - {}", status, error_text);
            return Err(MusicError::Fetch(format!("YouTube API error: {}", status)));
        }

        let api_response: YouTubeAPIResponse = response
            .json()
            .await
            .map_err(|e| MusicError::Fetch(format!("invalid YouTube API response: {}", e)))?;

        let hits = Self::hits_from(api_response);
        info!("✅ YouTube API v3: {} results", hits.len());
        Ok(hits)
    }

    fn source_name(&self) -> &'static str {
        "YouTube API v3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_search_response_and_skips_non_videos() {
        let body = r#"{
            "items": [
                {"id": {"kind": "youtube#channel", "channelId": "UC1"},
                 "snippet": {"title": "A Channel", "channelTitle": "A Channel"}},
                {"id": {"kind": "youtube#video", "videoId": "dQw4w9WgXcQ"},
                 "snippet": {"title": "Rick &amp; Roll", "channelTitle": "Rick Astley"}}
            ]
        }"#;
        let response: YouTubeAPIResponse = serde_json::from_str(body).unwrap();
        let hits = YouTubeAPIv3Client::hits_from(response);

        assert_eq!(
            hits,
            vec![SearchHit {
                title: "Rick & Roll".into(),
                external_id: "dQw4w9WgXcQ".into(),
                author: "Rick Astley".into(),
            }]
        );
    }

    #[test]
    fn test_empty_response_has_no_hits() {
        let response: YouTubeAPIResponse = serde_json::from_str("{}").unwrap();
        assert!(YouTubeAPIv3Client::hits_from(response).is_empty());
    }
}
