//! Pipeline Tests with Mock Collaborators
//!
//! Exercises stage ordering, retry and notification, stage tagging of
//! failures and release-on-failure without network access. The compositor
//! gets an FFmpeg path that does not exist, so composition always fails at
//! probing, after every source was opened and registered.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::core::captions::{RawSpeechSegment, RawWord};
use crate::core::ffmpeg::{FFmpegInfo, FFmpegRunner};
use crate::core::pipeline::{PipelineParts, PipelineStage, ShortsPipeline};
use crate::core::render::VideoCompositor;
use crate::core::settings::AppConfig;
use crate::core::sources::{
    AudioSynthesizer, MediaLibrary, Notifier, Post, PostSource, RetryPolicy, Transcriber,
};
use crate::core::types::InterruptFlag;
use crate::core::{CoreError, CoreResult, ErrorKind};

// =============================================================================
// Mocks
// =============================================================================

struct FlakyPosts {
    failures_left: usize,
    calls: Arc<AtomicUsize>,
}

impl PostSource for FlakyPosts {
    fn get_post(&mut self, _url: Option<&str>) -> CoreResult<Post> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(CoreError::Collaborator("reddit timed out".into()));
        }
        Ok(Post {
            id: "t3abc".into(),
            title: "AITA for skipping my BF's party".into(),
            body: "It started at 5pm (too early).".into(),
            url: "https://www.reddit.com/r/AmItheAsshole/comments/t3abc/x/".into(),
            subreddit: "AmItheAsshole".into(),
            author: "someone".into(),
        })
    }
}

#[derive(Default)]
struct FileSynth {
    texts: Arc<Mutex<Vec<String>>>,
}

impl AudioSynthesizer for FileSynth {
    fn synthesize(&mut self, text: &str, output: &Path) -> CoreResult<PathBuf> {
        self.texts.lock().unwrap().push(text.to_string());
        std::fs::create_dir_all(output.parent().unwrap())?;
        std::fs::write(output, b"RIFF-not-really")?;
        Ok(output.to_path_buf())
    }
}

struct FixedTranscript(Vec<RawSpeechSegment>);

impl Transcriber for FixedTranscript {
    fn align(&mut self, _audio: &Path) -> CoreResult<Vec<RawSpeechSegment>> {
        Ok(self.0.clone())
    }
}

#[derive(Default, Clone)]
struct RecordingNotifier {
    messages: Arc<Mutex<Vec<String>>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) -> CoreResult<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn timed_transcript() -> Vec<RawSpeechSegment> {
    let text = "Am I the asshole for skipping my boyfriend's party it started at 5 pm too early";
    let words = text
        .split(' ')
        .enumerate()
        .map(|(i, w)| RawWord::timed(w, i as f64 * 0.3, i as f64 * 0.3 + 0.25))
        .collect();
    vec![RawSpeechSegment::from_words(words)]
}

fn touch(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"not media").unwrap();
}

struct Harness {
    _temp: TempDir,
    config: AppConfig,
    post_calls: Arc<AtomicUsize>,
    synth_texts: Arc<Mutex<Vec<String>>>,
    notifier: RecordingNotifier,
    interrupt: InterruptFlag,
}

impl Harness {
    fn new(notify: bool) -> Self {
        let temp = TempDir::new().unwrap();
        let assets = temp.path().join("assets");
        touch(&assets.join("background_videos/gameplay.mp4"));
        touch(&assets.join("background_music/lofi.mp3"));

        let mut config = AppConfig {
            cache_dir: temp.path().join("cache"),
            assets_dir: assets,
            seed: Some(3),
            ..Default::default()
        };
        config.retry = RetryPolicy {
            enable: true,
            max_retries: 3,
            delay: 0.0,
            notify,
        };

        Self {
            _temp: temp,
            config,
            post_calls: Arc::new(AtomicUsize::new(0)),
            synth_texts: Arc::new(Mutex::new(Vec::new())),
            notifier: RecordingNotifier::default(),
            interrupt: InterruptFlag::new(),
        }
    }

    fn pipeline(&self, post_failures: usize, transcript: Vec<RawSpeechSegment>) -> ShortsPipeline {
        let runner = FFmpegRunner::new(FFmpegInfo {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
            ffprobe_path: PathBuf::from("/nonexistent/ffprobe"),
            version: "test".into(),
        });
        let parts = PipelineParts {
            post_source: Box::new(FlakyPosts {
                failures_left: post_failures,
                calls: self.post_calls.clone(),
            }),
            synthesizer: Box::new(FileSynth {
                texts: self.synth_texts.clone(),
            }),
            transcriber: Box::new(FixedTranscript(transcript)),
            notifier: Box::new(self.notifier.clone()),
            library: MediaLibrary::new(&self.config.assets_dir, self.config.seed).unwrap(),
            compositor: VideoCompositor::new(
                runner,
                self.config.composition_options(),
                self.config.scratch_root(),
            ),
        };
        ShortsPipeline::new(&self.config, parts, self.interrupt.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_flaky_post_source_recovers_within_retries() {
    let harness = Harness::new(true);
    let mut pipeline = harness.pipeline(2, timed_transcript());

    let post = pipeline.fetch_post(None).unwrap();
    assert_eq!(post.id, "t3abc");
    assert_eq!(harness.post_calls.load(Ordering::SeqCst), 3);
    assert!(harness.notifier.messages.lock().unwrap().is_empty());
}

#[test]
fn test_exhausted_retries_tagged_and_notified_once() {
    let harness = Harness::new(true);
    let mut pipeline = harness.pipeline(10, timed_transcript());

    let err = pipeline.run(None).unwrap_err();
    assert_eq!(err.stage, PipelineStage::FetchPost);
    assert_eq!(err.kind(), ErrorKind::Collaborator);
    assert!(err.to_string().starts_with("CollaboratorError during fetch_post"));
    assert_eq!(harness.post_calls.load(Ordering::SeqCst), 3);
    assert_eq!(harness.notifier.messages.lock().unwrap().len(), 1);
    assert!(harness.synth_texts.lock().unwrap().is_empty());
}

#[test]
fn test_prepared_script_is_saved_and_narrated() {
    let harness = Harness::new(false);
    let mut pipeline = harness.pipeline(0, timed_transcript());

    let post = pipeline.fetch_post(None).unwrap();
    let script = pipeline.prepare(&post).unwrap();
    assert_eq!(
        script,
        "Am I the asshole for skipping my boyfriend's party. It started at 5 pm too early."
    );
    assert_eq!(
        std::fs::read_to_string(harness.config.script_path()).unwrap(),
        script
    );

    let audio = pipeline.synthesize(&script).unwrap();
    assert_eq!(audio, harness.config.audio_path());
    assert_eq!(harness.synth_texts.lock().unwrap().as_slice(), [script]);
}

#[test]
fn test_caption_track_respects_card_policy() {
    let harness = Harness::new(false);
    let pipeline = harness.pipeline(0, Vec::new());

    let track = pipeline.caption_track(&timed_transcript()).unwrap();
    let max_chars = harness.config.video.chunk.max_chars;
    assert_eq!(track.normalize.input_words, 16);
    assert_eq!(track.chunk.cards, track.cards.len());
    assert!(track.cards.len() >= 3);
    for pair in track.cards.windows(2) {
        assert!(pair[0].display_end() <= pair[1].display_start() + 1e-9);
    }
    for card in &track.cards {
        assert!(card.char_len() <= max_chars, "{:?}", card.text());
    }
    let words: usize = track.cards.iter().map(|c| c.tokens().len()).sum();
    assert_eq!(words, 16);
}

#[test]
fn test_unanchored_transcript_fails_in_normalize() {
    let harness = Harness::new(false);
    let pipeline = harness.pipeline(0, Vec::new());
    let untimed = vec![RawSpeechSegment::from_words(vec![
        RawWord::untimed("no"),
        RawWord::untimed("timestamps"),
    ])];

    let err = pipeline.caption_track(&untimed).unwrap_err();
    assert_eq!(err.stage, PipelineStage::Normalize);
    assert_eq!(err.kind(), ErrorKind::Alignment);
}

#[test]
fn test_empty_transcript_fails_in_chunk() {
    let harness = Harness::new(false);
    let pipeline = harness.pipeline(0, Vec::new());

    let err = pipeline.caption_track(&[]).unwrap_err();
    assert_eq!(err.stage, PipelineStage::Chunk);
    assert_eq!(err.kind(), ErrorKind::Input);
}

#[test]
fn test_failed_composition_leaves_no_artifacts() {
    let harness = Harness::new(false);
    let mut pipeline = harness.pipeline(0, timed_transcript());

    let err = pipeline.run(None).unwrap_err();
    assert_eq!(err.stage, PipelineStage::Compose);
    assert_eq!(err.kind(), ErrorKind::Composition);

    let output = harness.config.output_path();
    assert!(!output.exists());
    assert!(!crate::core::fs::partial_path_for(&output).exists());
    let leftovers = std::fs::read_dir(harness.config.scratch_root())
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[test]
fn test_interrupt_stops_before_first_stage() {
    let harness = Harness::new(false);
    let mut pipeline = harness.pipeline(0, timed_transcript());
    harness.interrupt.raise();

    let err = pipeline.run(None).unwrap_err();
    assert_eq!(err.stage, PipelineStage::FetchPost);
    assert_eq!(err.kind(), ErrorKind::Interrupted);
    assert_eq!(harness.post_calls.load(Ordering::SeqCst), 0);
}
