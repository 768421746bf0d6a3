//! Configuration
//!
//! Loads `setup.yml` into a typed [`AppConfig`]:
//! - every section and field has a default, so partial files are fine
//! - everything is validated at load; all problems are reported together
//! - `DISCORD_WEBHOOK_URL` overrides `discord.webhook_url`
//!
//! Relative file names in the `audio` and `video` sections resolve against
//! `cache_dir`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::captions::{CaptionStyle, ChunkOptions, TimingOptions};
use crate::core::render::CompositionOptions;
use crate::core::sources::{RetryPolicy, TtsEndpoint, DISCORD_WEBHOOK_ENV};
use crate::core::{CoreError, CoreResult};

/// Default configuration file name
pub const CONFIG_FILE: &str = "setup.yml";

/// Accepted `logging.level` values
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Accepted `reddit.time_filter` values
pub const TIME_FILTERS: &[&str] = &["hour", "day", "week", "month", "year", "all"];

// =============================================================================
// Root
// =============================================================================

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Working directory for downloads, narration, transcripts and output
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Directory holding background media, fonts and credits
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,

    /// Directory containing ffmpeg/ffprobe; searched on PATH when unset
    #[serde(default)]
    pub ffmpeg_dir: Option<PathBuf>,

    /// Seed for every random choice (post, voice, media, colors, windows)
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub reddit: RedditSettings,

    #[serde(default)]
    pub audio: AudioSettings,

    #[serde(default)]
    pub video: VideoSettings,

    #[serde(default)]
    pub discord: DiscordSettings,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from("assets")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            assets_dir: default_assets_dir(),
            ffmpeg_dir: None,
            seed: None,
            logging: LoggingConfig::default(),
            retry: RetryPolicy::default(),
            reddit: RedditSettings::default(),
            audio: AudioSettings::default(),
            video: VideoSettings::default(),
            discord: DiscordSettings::default(),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// `logging` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// When false only errors are logged
    #[serde(default = "default_true")]
    pub enable: bool,

    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file name inside `cache_dir`
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enable: true,
            level: default_log_level(),
            log_file: default_log_file(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "shorts_maker.log".to_string()
}

/// `reddit` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedditSettings {
    #[serde(default = "default_subreddit")]
    pub subreddit_name: String,

    /// Listing window for `top`: hour, day, week, month, year or all
    #[serde(default = "default_time_filter")]
    pub time_filter: String,

    /// Posts fetched per listing request (1-100)
    #[serde(default = "default_listing_limit")]
    pub limit: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Chosen post as JSON, inside `cache_dir`
    #[serde(default = "default_record_json")]
    pub record_file_json: String,

    /// Chosen post as plain text, inside `cache_dir`
    #[serde(default = "default_record_txt")]
    pub record_file_txt: String,

    #[serde(default = "default_reddit_timeout")]
    pub timeout_secs: u64,
}

impl Default for RedditSettings {
    fn default() -> Self {
        Self {
            subreddit_name: default_subreddit(),
            time_filter: default_time_filter(),
            limit: default_listing_limit(),
            user_agent: default_user_agent(),
            record_file_json: default_record_json(),
            record_file_txt: default_record_txt(),
            timeout_secs: default_reddit_timeout(),
        }
    }
}

fn default_subreddit() -> String {
    "AmItheAsshole".to_string()
}

fn default_time_filter() -> String {
    "month".to_string()
}

fn default_listing_limit() -> u32 {
    25
}

fn default_user_agent() -> String {
    format!("shortsmaker/{}", env!("CARGO_PKG_VERSION"))
}

fn default_record_json() -> String {
    "reddit_post.json".to_string()
}

fn default_record_txt() -> String {
    "reddit_post.txt".to_string()
}

fn default_reddit_timeout() -> u64 {
    30
}

/// Inference device for local transcription
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
}

/// `audio` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioSettings {
    #[serde(default = "default_audio_file")]
    pub output_audio_file: String,

    /// Prepared narration script
    #[serde(default = "default_script_file")]
    pub output_script_file: String,

    /// Word-level transcript (JSON or YAML by extension)
    #[serde(default = "default_transcript_file")]
    pub transcript_json: String,

    #[serde(default)]
    pub device: Device,

    /// Whisper model size or path to a ggml `.bin` file
    #[serde(default = "default_model")]
    pub model: String,

    /// Where model files are looked up; platform data dir when unset
    #[serde(default)]
    pub models_dir: Option<PathBuf>,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default)]
    pub tts: TtsSettings,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            output_audio_file: default_audio_file(),
            output_script_file: default_script_file(),
            transcript_json: default_transcript_file(),
            device: Device::default(),
            model: default_model(),
            models_dir: None,
            language: default_language(),
            tts: TtsSettings::default(),
        }
    }
}

fn default_audio_file() -> String {
    "narration.wav".to_string()
}

fn default_script_file() -> String {
    "narration_script.txt".to_string()
}

fn default_transcript_file() -> String {
    "transcript.json".to_string()
}

fn default_model() -> String {
    "base".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

/// `audio.tts` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TtsSettings {
    /// Fixed voice; a random one from `voices` when unset
    #[serde(default)]
    pub voice: Option<String>,

    #[serde(default = "default_voices")]
    pub voices: Vec<String>,

    /// Tried in order
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<TtsEndpoint>,

    #[serde(default = "default_tts_timeout")]
    pub timeout_secs: u64,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            voice: None,
            voices: default_voices(),
            endpoints: default_endpoints(),
            timeout_secs: default_tts_timeout(),
        }
    }
}

fn default_voices() -> Vec<String> {
    [
        "en_us_001",
        "en_us_002",
        "en_au_002",
        "en_uk_001",
        "en_uk_003",
        "en_us_006",
        "en_us_010",
        "en_female_emotional",
    ]
    .iter()
    .map(|v| v.to_string())
    .collect()
}

fn default_endpoints() -> Vec<TtsEndpoint> {
    vec![
        TtsEndpoint {
            url: "https://tiktok-tts.weilnet.workers.dev/api/generation".to_string(),
            response: "data".to_string(),
        },
        TtsEndpoint {
            url: "https://countik.com/api/text/speech".to_string(),
            response: "v_data".to_string(),
        },
        TtsEndpoint {
            url: "https://gesserit.co/api/tiktok-tts".to_string(),
            response: "base64".to_string(),
        },
    ]
}

fn default_tts_timeout() -> u64 {
    60
}

/// `video` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoSettings {
    /// Downloaded when `assets_dir/background_videos` is empty
    #[serde(default)]
    pub background_videos_urls: Vec<String>,

    /// Downloaded when `assets_dir/background_music` is empty
    #[serde(default)]
    pub background_music_urls: Vec<String>,

    #[serde(default = "default_output_file")]
    pub output_file: String,

    #[serde(default = "default_true")]
    pub add_credits: bool,

    #[serde(default)]
    pub captions: CaptionStyle,

    #[serde(default)]
    pub chunk: ChunkOptions,

    #[serde(default)]
    pub timing: TimingOptions,

    #[serde(default)]
    pub composition: CompositionOptions,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            background_videos_urls: Vec::new(),
            background_music_urls: Vec::new(),
            output_file: default_output_file(),
            add_credits: true,
            captions: CaptionStyle::default(),
            chunk: ChunkOptions::default(),
            timing: TimingOptions::default(),
            composition: CompositionOptions::default(),
        }
    }
}

fn default_output_file() -> String {
    "short.mp4".to_string()
}

/// `discord` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiscordSettings {
    #[serde(default)]
    pub webhook_url: Option<String>,
}

// =============================================================================
// Loading
// =============================================================================

impl AppConfig {
    /// Reads, overrides from the environment and validates a `.yml` file
    pub fn load(path: &Path) -> CoreResult<Self> {
        let is_yaml = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|e| e == "yml" || e == "yaml");
        if !is_yaml {
            return Err(CoreError::Config(format!(
                "Config file {} is not a yaml file",
                path.display()
            )));
        }
        if !path.is_file() {
            return Err(CoreError::Config(format!(
                "Config file {} not found",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parses YAML without environment overrides
    pub fn from_yaml_str(content: &str) -> CoreResult<Self> {
        let config = Self::parse(content)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str) -> CoreResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_webhook_override(std::env::var(DISCORD_WEBHOOK_ENV).ok());
    }

    fn apply_webhook_override(&mut self, value: Option<String>) {
        if let Some(url) = value.filter(|v| !v.trim().is_empty()) {
            self.discord.webhook_url = Some(url.trim().to_string());
        }
    }

    /// Every problem in the configuration, empty when usable
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.cache_dir.as_os_str().is_empty() {
            problems.push("cache_dir must not be empty".to_string());
        }
        if self.assets_dir.as_os_str().is_empty() {
            problems.push("assets_dir must not be empty".to_string());
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            problems.push(format!(
                "logging.level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.logging.level
            ));
        }
        if self.logging.log_file.trim().is_empty() {
            problems.push("logging.log_file must not be empty".to_string());
        }

        problems.extend(self.retry.problems());

        let reddit = &self.reddit;
        if reddit.subreddit_name.trim().is_empty() {
            problems.push("reddit.subreddit_name must not be empty".to_string());
        }
        if !TIME_FILTERS.contains(&reddit.time_filter.as_str()) {
            problems.push(format!(
                "reddit.time_filter must be one of {}, got '{}'",
                TIME_FILTERS.join(", "),
                reddit.time_filter
            ));
        }
        if !(1..=100).contains(&reddit.limit) {
            problems.push(format!("reddit.limit must be within 1-100, got {}", reddit.limit));
        }
        if reddit.timeout_secs == 0 {
            problems.push("reddit.timeout_secs must be > 0".to_string());
        }

        let audio = &self.audio;
        for (name, value) in [
            ("audio.output_audio_file", &audio.output_audio_file),
            ("audio.output_script_file", &audio.output_script_file),
            ("audio.transcript_json", &audio.transcript_json),
            ("audio.model", &audio.model),
            ("audio.language", &audio.language),
        ] {
            if value.trim().is_empty() {
                problems.push(format!("{} must not be empty", name));
            }
        }
        let tts = &audio.tts;
        if tts.voices.is_empty() {
            problems.push("audio.tts.voices must not be empty".to_string());
        }
        if let Some(voice) = &tts.voice {
            if !tts.voices.contains(voice) {
                problems.push(format!("audio.tts.voice '{}' is not in audio.tts.voices", voice));
            }
        }
        if tts.endpoints.is_empty() {
            problems.push("audio.tts.endpoints must not be empty".to_string());
        }
        for endpoint in &tts.endpoints {
            if !endpoint.url.starts_with("http://") && !endpoint.url.starts_with("https://") {
                problems.push(format!("audio.tts endpoint '{}' is not an http(s) URL", endpoint.url));
            }
        }
        if tts.timeout_secs == 0 {
            problems.push("audio.tts.timeout_secs must be > 0".to_string());
        }

        let video = &self.video;
        if video.output_file.trim().is_empty() {
            problems.push("video.output_file must not be empty".to_string());
        }
        problems.extend(video.captions.problems().into_iter().map(|p| format!("video.captions: {}", p)));
        problems.extend(
            video
                .composition
                .problems()
                .into_iter()
                .map(|p| format!("video.composition: {}", p)),
        );

        let chunk = &video.chunk;
        if chunk.max_chars == 0 {
            problems.push("video.chunk.max_chars must be > 0".to_string());
        }
        if !(chunk.max_duration.is_finite() && chunk.max_duration > 0.0) {
            problems.push(format!(
                "video.chunk.max_duration must be > 0, got {}",
                chunk.max_duration
            ));
        }
        if !(chunk.min_duration.is_finite() && chunk.min_duration >= 0.0) {
            problems.push(format!(
                "video.chunk.min_duration must be >= 0, got {}",
                chunk.min_duration
            ));
        }

        let timing = &video.timing;
        if !(timing.overlap_tolerance.is_finite() && timing.overlap_tolerance >= 0.0) {
            problems.push(format!(
                "video.timing.overlap_tolerance must be >= 0, got {}",
                timing.overlap_tolerance
            ));
        }
        if !(timing.fallback_chars_per_second.is_finite() && timing.fallback_chars_per_second > 0.0) {
            problems.push(format!(
                "video.timing.fallback_chars_per_second must be > 0, got {}",
                timing.fallback_chars_per_second
            ));
        }

        if let Some(url) = &self.discord.webhook_url {
            if !url.starts_with("https://") {
                problems.push("discord.webhook_url must start with https://".to_string());
            }
        }

        problems
    }

    pub fn validate(&self) -> CoreResult<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Config(format!(
                "{} problem(s):\n  - {}",
                problems.len(),
                problems.join("\n  - ")
            )))
        }
    }

    // =========================================================================
    // Paths
    // =========================================================================

    fn in_cache(&self, name: &str) -> PathBuf {
        self.cache_dir.join(name)
    }

    pub fn audio_path(&self) -> PathBuf {
        self.in_cache(&self.audio.output_audio_file)
    }

    pub fn script_path(&self) -> PathBuf {
        self.in_cache(&self.audio.output_script_file)
    }

    pub fn transcript_path(&self) -> PathBuf {
        self.in_cache(&self.audio.transcript_json)
    }

    pub fn output_path(&self) -> PathBuf {
        self.in_cache(&self.video.output_file)
    }

    pub fn log_path(&self) -> PathBuf {
        self.in_cache(&self.logging.log_file)
    }

    /// Per-job scratch directories live here
    pub fn scratch_root(&self) -> PathBuf {
        self.cache_dir.join("tmp")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.audio
            .models_dir
            .clone()
            .unwrap_or_else(crate::core::captions::whisper::default_models_dir)
    }

    /// Composition options with the root seed applied when none is set
    pub fn composition_options(&self) -> CompositionOptions {
        let mut options = self.video.composition.clone();
        options.seed = options.seed.or(self.seed);
        options
    }
}
