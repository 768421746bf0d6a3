//! External Collaborators
//!
//! The pipeline talks to the outside world through four narrow traits so the
//! timing and compositing core can be exercised with mocks:
//!
//! - [`PostSource`]: source text (a Reddit post)
//! - [`AudioSynthesizer`]: text to narration audio
//! - [`Transcriber`]: narration audio to word-timed segments
//! - [`Notifier`]: best-effort failure reports
//!
//! Concrete implementations live in the submodules.

mod library;
mod notify;
mod reddit;
mod retry;
mod transcribe;
mod tts;

pub use library::{
    download_with_ytdlp, MediaLibrary, MediaSelection, CREDITS_FILE, CREDITS_MASK_FILE,
};
pub use notify::{split_message, DiscordNotifier, DISCORD_MESSAGE_LIMIT, DISCORD_WEBHOOK_ENV};
pub use reddit::{parse_listing, parse_post_page, RedditPostSource};
pub use retry::RetryPolicy;
pub use transcribe::{TranscriptFile, WhisperTranscriber};
pub use tts::{split_tts_text, TikTokTts, TtsEndpoint, TTS_CHUNK_CHARS};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::captions::RawSpeechSegment;
use crate::core::CoreResult;

/// A fetched post
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub subreddit: String,
    #[serde(default)]
    pub author: String,
}

impl Post {
    /// Title and body as one narration text: `"<title>.\n<body>\n"`
    pub fn text(&self) -> String {
        let title = self.title.trim();
        let body = self.body.trim();
        if body.is_empty() {
            format!("{}.\n", title)
        } else {
            format!("{}.\n{}\n", title, body)
        }
    }
}

/// Supplies source text
pub trait PostSource: Send {
    /// A specific post when `url` is given, otherwise any unseen post.
    ///
    /// Fails with `NotFound` when the source is empty or the URL is invalid.
    fn get_post(&mut self, url: Option<&str>) -> CoreResult<Post>;
}

/// Turns text into a narration audio file
pub trait AudioSynthesizer: Send {
    /// Writes audio for `text` at `output` and returns the written path
    fn synthesize(&mut self, text: &str, output: &Path) -> CoreResult<PathBuf>;
}

/// Produces word-timed segments for an audio file
pub trait Transcriber: Send {
    fn align(&mut self, audio: &Path) -> CoreResult<Vec<RawSpeechSegment>>;
}

/// Delivers human-readable failure reports
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str) -> CoreResult<()>;
}

/// Notifier that drops every message
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, message: &str) -> CoreResult<()> {
        tracing::debug!("Notification suppressed: {}", message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_text_joins_title_and_body() {
        let post = Post {
            id: "abc".into(),
            title: " AITA for leaving ".into(),
            body: "So this happened.".into(),
            url: String::new(),
            subreddit: "AmItheAsshole".into(),
            author: String::new(),
        };
        assert_eq!(post.text(), "AITA for leaving.\nSo this happened.\n");

        let title_only = Post {
            body: "  ".into(),
            ..post
        };
        assert_eq!(title_only.text(), "AITA for leaving.\n");
    }
}
