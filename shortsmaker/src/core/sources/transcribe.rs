//! Transcribers
//!
//! [`TranscriptFile`] replays a WhisperX-style transcript from disk.
//! [`WhisperTranscriber`] runs whisper.cpp locally on the narration.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::Transcriber;
use crate::core::captions::audio::{extract_audio_for_transcription, wav_duration};
use crate::core::captions::whisper::{
    resolve_model_path, TranscriptionOptions, WhisperEngine, WhisperError,
};
use crate::core::captions::{load_transcript, save_transcript, RawSpeechSegment};
use crate::core::ffmpeg::FFmpegRunner;
use crate::core::resources::{ResourceLifecycleManager, ScratchDir};
use crate::core::{CoreError, CoreResult};

fn whisper_error(e: WhisperError) -> CoreError {
    match e {
        WhisperError::ModelNotFound(_)
        | WhisperError::ModelLoadError(_)
        | WhisperError::FeatureNotEnabled => CoreError::Config(e.to_string()),
        WhisperError::AudioNotFound(_) | WhisperError::AudioReadError(_) => {
            CoreError::Input(e.to_string())
        }
        WhisperError::TranscriptionError(_) => CoreError::Collaborator(e.to_string()),
    }
}

/// Reads segments from an existing transcript; the audio path is ignored
#[derive(Debug, Clone)]
pub struct TranscriptFile {
    path: PathBuf,
}

impl TranscriptFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Transcriber for TranscriptFile {
    fn align(&mut self, _audio: &Path) -> CoreResult<Vec<RawSpeechSegment>> {
        let segments = load_transcript(&self.path)?;
        info!(
            "Loaded {} transcript segment(s) from {}",
            segments.len(),
            self.path.display()
        );
        Ok(segments)
    }
}

/// Local whisper.cpp transcription
///
/// The model loads on first use. Each call converts the narration to 16 kHz
/// mono WAV in a scratch directory that is removed afterwards.
pub struct WhisperTranscriber {
    runner: FFmpegRunner,
    model_path: PathBuf,
    options: TranscriptionOptions,
    scratch_root: PathBuf,
    save_to: Option<PathBuf>,
    engine: Option<WhisperEngine>,
}

impl WhisperTranscriber {
    /// `model` is a size name (`base`, `large-v2`, ...) or a `.bin` path.
    pub fn new(
        runner: FFmpegRunner,
        model: &str,
        models_dir: &Path,
        options: TranscriptionOptions,
        scratch_root: &Path,
    ) -> CoreResult<Self> {
        let model_path = resolve_model_path(model, models_dir).map_err(whisper_error)?;
        Ok(Self {
            runner,
            model_path,
            options,
            scratch_root: scratch_root.to_path_buf(),
            save_to: None,
            engine: None,
        })
    }

    /// Also writes each transcript to `path`
    pub fn save_transcript_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_to = Some(path.into());
        self
    }

    /// Sets the initial prompt, usually the narration script
    pub fn set_prompt(&mut self, prompt: Option<String>) {
        self.options.initial_prompt = prompt;
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn engine(&mut self) -> CoreResult<&WhisperEngine> {
        if self.engine.is_none() {
            info!("Loading whisper model {}", self.model_path.display());
            let engine = WhisperEngine::new(&self.model_path, &self.options).map_err(whisper_error)?;
            self.engine = Some(engine);
        }
        self.engine
            .as_ref()
            .ok_or_else(|| CoreError::Config("whisper model not loaded".to_string()))
    }
}

impl Transcriber for WhisperTranscriber {
    fn align(&mut self, audio: &Path) -> CoreResult<Vec<RawSpeechSegment>> {
        std::fs::create_dir_all(&self.scratch_root)?;
        let scratch = ScratchDir::create(&self.scratch_root, "transcribe")?;
        let wav = scratch.join("narration_16k.wav");
        let mut resources = ResourceLifecycleManager::new();
        resources.register(scratch);

        extract_audio_for_transcription(&self.runner, audio, &wav)
            .map_err(|e| CoreError::Collaborator(e.to_string()))?;
        if let Ok(seconds) = wav_duration(&wav) {
            debug!("Transcribing {:.2}s of narration", seconds);
        }

        let options = self.options.clone();
        let segments = self
            .engine()?
            .transcribe_file(&wav, &options)
            .map_err(whisper_error)?;
        info!("Transcribed {} segment(s)", segments.len());

        if let Some(path) = &self.save_to {
            save_transcript(path, &segments)?;
        }
        resources.release_all()?;
        Ok(segments)
    }
}
