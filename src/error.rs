use thiserror::Error;

/// Failures that can surface while resolving, fetching or playing a track.
///
/// None of these are fatal to the process. Handlers use
/// [`MusicError::is_user_visible`] to decide whether the requester gets a reply
/// or the condition is only logged.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MusicError {
    #[error("No results found. Try a different query.")]
    NoResults,

    #[error("Song duration ({duration}s) exceeds the maximum allowed duration of {max}s.")]
    TrackTooLong { duration: u64, max: u64 },

    #[error("Download error: {0}")]
    Fetch(String),

    #[error("Audio file not found for {title}")]
    MissingFile { title: String },

    #[error("Failed to connect to your voice channel: {0}")]
    Connect(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("The song library is empty!")]
    EmptyCatalog,

    #[error("You must be in a voice channel for me to join and play music.")]
    NotInVoice,

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    #[error("Library error: {0}")]
    Catalog(String),
}

impl MusicError {
    /// Whether the requester should be told about this failure.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, MusicError::MissingFile { .. } | MusicError::Playback(_))
    }
}

impl From<std::io::Error> for MusicError {
    fn from(e: std::io::Error) -> Self {
        MusicError::Catalog(e.to_string())
    }
}

impl From<serde_json::Error> for MusicError {
    fn from(e: serde_json::Error) -> Self {
        MusicError::Catalog(e.to_string())
    }
}

pub type MusicResult<T> = std::result::Result<T, MusicError>;
