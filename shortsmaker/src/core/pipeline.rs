//! Shorts Pipeline
//!
//! Drives one job start to finish in strict stage order:
//!
//! ```text
//! fetch_post -> prepare_script -> synthesize -> transcribe
//!   -> normalize -> chunk -> select_media -> compose -> release
//! ```
//!
//! Network-backed stages go through the [`RetryPolicy`]. Every failure is
//! tagged with the stage it happened in. The interrupt flag is checked
//! before each stage and during encoding; resources registered by the
//! compose stage are released whatever the outcome.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::captions::{
    CaptionCard, CaptionChunker, CaptionStyle, ChunkReport, NormalizeReport, RawSpeechSegment,
    WordTimingIndex,
};
use crate::core::render::{CompositionReport, RenderJob, VideoCompositor};
use crate::core::resources::ResourceLifecycleManager;
use crate::core::script::{prepare_script, save_script};
use crate::core::settings::AppConfig;
use crate::core::sources::{
    AudioSynthesizer, MediaLibrary, MediaSelection, Notifier, Post, PostSource, RetryPolicy,
    Transcriber,
};
use crate::core::types::InterruptFlag;
use crate::core::{CoreError, CoreResult, ErrorKind};

// =============================================================================
// Stages and Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    FetchPost,
    PrepareScript,
    Synthesize,
    Transcribe,
    Normalize,
    Chunk,
    SelectMedia,
    Compose,
    Release,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::FetchPost => "fetch_post",
            PipelineStage::PrepareScript => "prepare_script",
            PipelineStage::Synthesize => "synthesize",
            PipelineStage::Transcribe => "transcribe",
            PipelineStage::Normalize => "normalize",
            PipelineStage::Chunk => "chunk",
            PipelineStage::SelectMedia => "select_media",
            PipelineStage::Compose => "compose",
            PipelineStage::Release => "release",
        };
        f.write_str(name)
    }
}

/// A job failure and the stage it happened in
#[derive(Debug, Error)]
#[error("{kind} during {stage}: {source}", kind = .source.kind())]
pub struct PipelineError {
    pub stage: PipelineStage,
    pub source: CoreError,
}

impl PipelineError {
    pub fn new(stage: PipelineStage, source: CoreError) -> Self {
        Self { stage, source }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

trait AtStage<T> {
    fn at(self, stage: PipelineStage) -> PipelineResult<T>;
}

impl<T> AtStage<T> for CoreResult<T> {
    fn at(self, stage: PipelineStage) -> PipelineResult<T> {
        self.map_err(|e| PipelineError::new(stage, e))
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Cards plus what the timing and chunking stages repaired
#[derive(Debug, Clone, Serialize)]
pub struct CaptionTrack {
    pub cards: Vec<CaptionCard>,
    pub normalize: NormalizeReport,
    pub chunk: ChunkReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderReport {
    pub captions: CaptionTrack,
    pub media: MediaSelection,
    pub composition: CompositionReport,
}

/// Outcome of a full run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub post: Post,
    pub script_path: PathBuf,
    pub audio_path: PathBuf,
    pub render: RenderReport,
}

// =============================================================================
// Pipeline
// =============================================================================

/// External collaborators and media the pipeline drives
pub struct PipelineParts {
    pub post_source: Box<dyn PostSource>,
    pub synthesizer: Box<dyn AudioSynthesizer>,
    pub transcriber: Box<dyn Transcriber>,
    pub notifier: Box<dyn Notifier>,
    pub library: MediaLibrary,
    pub compositor: VideoCompositor,
}

/// Orchestrates one short from post to video
pub struct ShortsPipeline {
    parts: PipelineParts,
    retry: RetryPolicy,
    timing: WordTimingIndex,
    chunker: CaptionChunker,
    caption_style: CaptionStyle,
    video_urls: Vec<String>,
    music_urls: Vec<String>,
    add_credits: bool,
    script_path: PathBuf,
    audio_path: PathBuf,
    output_path: PathBuf,
    interrupt: InterruptFlag,
}

impl ShortsPipeline {
    pub fn new(config: &AppConfig, parts: PipelineParts, interrupt: InterruptFlag) -> Self {
        Self {
            parts,
            retry: config.retry.clone(),
            timing: WordTimingIndex::new(config.video.timing.clone()),
            chunker: CaptionChunker::new(config.video.chunk.clone()),
            caption_style: config.video.captions.clone(),
            video_urls: config.video.background_videos_urls.clone(),
            music_urls: config.video.background_music_urls.clone(),
            add_credits: config.video.add_credits,
            script_path: config.script_path(),
            audio_path: config.audio_path(),
            output_path: config.output_path(),
            interrupt,
        }
    }

    /// Overrides the output file of the next render
    pub fn set_output_path(&mut self, path: impl Into<PathBuf>) {
        self.output_path = path.into();
    }

    fn enter(&self, stage: PipelineStage) -> PipelineResult<()> {
        info!("Stage {}", stage);
        self.interrupt.check().at(stage)
    }

    /// Full job: a post (the given URL or any unseen one) to a finished video
    pub fn run(&mut self, post_url: Option<&str>) -> PipelineResult<PipelineReport> {
        let post = self.fetch_post(post_url)?;
        let script = self.prepare(&post)?;
        let audio_path = self.synthesize(&script)?;
        let segments = self.transcribe(&audio_path)?;
        let render = self.render(&audio_path, &segments)?;

        Ok(PipelineReport {
            post,
            script_path: self.script_path.clone(),
            audio_path,
            render,
        })
    }

    pub fn fetch_post(&mut self, url: Option<&str>) -> PipelineResult<Post> {
        self.enter(PipelineStage::FetchPost)?;
        let source = &mut self.parts.post_source;
        self.retry
            .run("get_post", self.parts.notifier.as_ref(), &self.interrupt, |_| {
                source.get_post(url)
            })
            .at(PipelineStage::FetchPost)
    }

    /// Cleans the post text and saves it beside the narration
    pub fn prepare(&mut self, post: &Post) -> PipelineResult<String> {
        self.enter(PipelineStage::PrepareScript)?;
        let script = prepare_script(&post.text());
        if script.is_empty() {
            return Err(PipelineError::new(
                PipelineStage::PrepareScript,
                CoreError::Input(format!("post {} has no text", post.id)),
            ));
        }
        save_script(&self.script_path, &script).at(PipelineStage::PrepareScript)?;
        Ok(script)
    }

    pub fn synthesize(&mut self, script: &str) -> PipelineResult<PathBuf> {
        self.enter(PipelineStage::Synthesize)?;
        let synthesizer = &mut self.parts.synthesizer;
        let output = &self.audio_path;
        self.retry
            .run("synthesize", self.parts.notifier.as_ref(), &self.interrupt, |_| {
                synthesizer.synthesize(script, output)
            })
            .at(PipelineStage::Synthesize)
    }

    pub fn transcribe(&mut self, audio: &Path) -> PipelineResult<Vec<RawSpeechSegment>> {
        self.enter(PipelineStage::Transcribe)?;
        let transcriber = &mut self.parts.transcriber;
        self.retry
            .run("transcribe", self.parts.notifier.as_ref(), &self.interrupt, |_| {
                transcriber.align(audio)
            })
            .at(PipelineStage::Transcribe)
    }

    /// Timing index then chunker
    pub fn caption_track(&self, segments: &[RawSpeechSegment]) -> PipelineResult<CaptionTrack> {
        self.enter(PipelineStage::Normalize)?;
        let (words, normalize) = self
            .timing
            .normalize_with_report(segments)
            .at(PipelineStage::Normalize)?;
        if normalize.has_anomalies() {
            warn!("Transcript repaired: {:?}", normalize);
        }

        self.enter(PipelineStage::Chunk)?;
        if words.is_empty() {
            return Err(PipelineError::new(
                PipelineStage::Chunk,
                CoreError::Input("transcript contains no words".to_string()),
            ));
        }
        let (cards, chunk) = self.chunker.chunk_with_report(&words);
        info!("{} word(s) in {} caption card(s)", words.len(), cards.len());

        Ok(CaptionTrack {
            cards,
            normalize,
            chunk,
        })
    }

    /// Captions, media selection, composition and release for existing narration
    pub fn render(
        &mut self,
        audio: &Path,
        segments: &[RawSpeechSegment],
    ) -> PipelineResult<RenderReport> {
        let captions = self.caption_track(segments)?;

        self.enter(PipelineStage::SelectMedia)?;
        let media = self
            .parts
            .library
            .select(&self.video_urls, &self.music_urls, self.add_credits)
            .at(PipelineStage::SelectMedia)?;

        self.enter(PipelineStage::Compose)?;
        let mut caption_style = self.caption_style.clone();
        if caption_style.font_file.is_none() {
            caption_style.font_file = media.font.clone();
        }
        let job = RenderJob {
            narration_audio: audio.to_path_buf(),
            caption_cards: captions.cards.clone(),
            caption_style,
            background_video: media.background_video.clone(),
            background_music: media.background_music.clone(),
            credits: media.credits.clone(),
            output_path: self.output_path.clone(),
        };

        let mut resources = ResourceLifecycleManager::new();
        let composed = self
            .parts
            .compositor
            .compose(&job, &mut resources, &self.interrupt);
        let released = resources.release_all();

        let composition = match composed {
            Ok(report) => report,
            Err(e) => {
                if let Err(release_err) = &released {
                    warn!("Release after failed composition: {}", release_err);
                }
                return Err(PipelineError::new(PipelineStage::Compose, e));
            }
        };
        let summary = released.at(PipelineStage::Release)?;
        info!("Released {} handle(s)", summary.released);

        Ok(RenderReport {
            captions,
            media,
            composition,
        })
    }
}
