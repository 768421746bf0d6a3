//! Whisper Transcription Engine
//!
//! Local speech-to-text via whisper.cpp (whisper-rs) with token timestamps,
//! producing word-level segments in the same shape as WhisperX output.
//! Compiled in when the `whisper` feature is enabled; otherwise every entry
//! point returns [`WhisperError::FeatureNotEnabled`].

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::models::{RawSpeechSegment, RawWord};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during transcription
#[derive(Error, Debug)]
pub enum WhisperError {
    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    #[error("Failed to load model: {0}")]
    ModelLoadError(String),

    #[error("Audio file not found: {0}")]
    AudioNotFound(String),

    #[error("Failed to read audio: {0}")]
    AudioReadError(String),

    #[error("Transcription failed: {0}")]
    TranscriptionError(String),

    #[error("Whisper feature not enabled. Rebuild with --features whisper")]
    FeatureNotEnabled,
}

/// Result type for whisper operations
pub type WhisperResult<T> = Result<T, WhisperError>;

// =============================================================================
// Model Selection
// =============================================================================

/// Available Whisper model sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WhisperModel {
    Tiny,
    #[default]
    Base,
    Small,
    Medium,
    /// Matches WhisperX's `large-v2` default
    LargeV2,
    LargeV3,
}

impl WhisperModel {
    /// Returns the ggml filename for this model size
    pub fn filename(&self) -> &'static str {
        match self {
            WhisperModel::Tiny => "ggml-tiny.en.bin",
            WhisperModel::Base => "ggml-base.en.bin",
            WhisperModel::Small => "ggml-small.en.bin",
            WhisperModel::Medium => "ggml-medium.en.bin",
            WhisperModel::LargeV2 => "ggml-large-v2.bin",
            WhisperModel::LargeV3 => "ggml-large-v3.bin",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WhisperModel::Tiny => "tiny",
            WhisperModel::Base => "base",
            WhisperModel::Small => "small",
            WhisperModel::Medium => "medium",
            WhisperModel::LargeV2 => "large-v2",
            WhisperModel::LargeV3 => "large-v3",
        }
    }
}

impl std::str::FromStr for WhisperModel {
    type Err = WhisperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(WhisperModel::Tiny),
            "base" => Ok(WhisperModel::Base),
            "small" => Ok(WhisperModel::Small),
            "medium" => Ok(WhisperModel::Medium),
            "large" | "large-v2" => Ok(WhisperModel::LargeV2),
            "large-v3" => Ok(WhisperModel::LargeV3),
            _ => Err(WhisperError::ModelLoadError(format!(
                "Unknown model size: {}",
                s
            ))),
        }
    }
}

/// Options for transcription
#[derive(Debug, Clone)]
pub struct TranscriptionOptions {
    /// Language code, "auto" for detection
    pub language: String,
    /// Number of threads to use (0 = library default)
    pub threads: u32,
    /// Request GPU inference (`device: cuda` in configuration)
    pub use_gpu: bool,
    /// Script text used as the initial prompt to bias spelling
    pub initial_prompt: Option<String>,
}

impl Default for TranscriptionOptions {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            threads: 0,
            use_gpu: false,
            initial_prompt: None,
        }
    }
}

// =============================================================================
// Token to Word Assembly
// =============================================================================

/// One decoded token with its timing in seconds
#[derive(Debug, Clone, PartialEq)]
pub struct TimedToken {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub probability: f64,
}

fn is_special_token(text: &str) -> bool {
    let t = text.trim();
    (t.starts_with("[_") && t.ends_with(']')) || (t.starts_with("<|") && t.ends_with("|>"))
}

/// Joins sub-word tokens into words.
///
/// A token starting with whitespace opens a new word; the others continue the
/// current one. Word confidence is the lowest token probability.
pub fn tokens_to_words(tokens: &[TimedToken]) -> Vec<RawWord> {
    let mut words: Vec<RawWord> = Vec::new();
    for token in tokens.iter().filter(|t| !is_special_token(&t.text)) {
        let starts_word = token.text.starts_with(char::is_whitespace) || words.is_empty();
        let piece = token.text.trim();
        if piece.is_empty() {
            continue;
        }
        match words.last_mut() {
            Some(word) if !starts_word => {
                word.word.push_str(piece);
                word.end = Some(token.end);
                word.score = word.score.map(|s| s.min(token.probability));
            }
            _ => words.push(RawWord {
                word: piece.to_string(),
                start: Some(token.start),
                end: Some(token.end),
                score: Some(token.probability),
            }),
        }
    }
    words
}

// =============================================================================
// Whisper Engine - Feature-gated Implementation
// =============================================================================

#[cfg(feature = "whisper")]
mod engine_impl {
    use super::*;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    fn failed(e: impl std::fmt::Display) -> WhisperError {
        WhisperError::TranscriptionError(e.to_string())
    }

    /// Whisper transcription engine
    pub struct WhisperEngine {
        context: WhisperContext,
        model_name: String,
    }

    impl WhisperEngine {
        /// Loads a ggml model file
        pub fn new(model_path: &Path, options: &TranscriptionOptions) -> WhisperResult<Self> {
            if !model_path.exists() {
                return Err(WhisperError::ModelNotFound(
                    model_path.to_string_lossy().to_string(),
                ));
            }

            let mut params = WhisperContextParameters::default();
            params.use_gpu(options.use_gpu);
            let context = WhisperContext::new_with_params(&model_path.to_string_lossy(), params)
                .map_err(|e| WhisperError::ModelLoadError(e.to_string()))?;

            let model_name = model_path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "unknown".to_string());

            Ok(Self {
                context,
                model_name,
            })
        }

        pub fn model_name(&self) -> &str {
            &self.model_name
        }

        /// Transcribes 16kHz mono samples into word-timed speech segments
        pub fn transcribe(
            &self,
            samples: &[f32],
            options: &TranscriptionOptions,
        ) -> WhisperResult<Vec<RawSpeechSegment>> {
            let mut state = self.context.create_state().map_err(failed)?;

            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            if options.language != "auto" {
                params.set_language(Some(&options.language));
            }
            params.set_token_timestamps(true);
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_print_timestamps(false);
            if options.threads > 0 {
                params.set_n_threads(options.threads as i32);
            }
            if let Some(ref prompt) = options.initial_prompt {
                params.set_initial_prompt(prompt);
            }

            state.full(params, samples).map_err(failed)?;

            let num_segments = state.full_n_segments().map_err(failed)?;
            let mut segments = Vec::with_capacity(num_segments as usize);

            for i in 0..num_segments {
                let num_tokens = state.full_n_tokens(i).map_err(failed)?;
                let mut tokens = Vec::with_capacity(num_tokens as usize);
                for j in 0..num_tokens {
                    let text = state.full_get_token_text(i, j).map_err(failed)?;
                    let data = state.full_get_token_data(i, j).map_err(failed)?;
                    // whisper.cpp timestamps are centiseconds
                    tokens.push(TimedToken {
                        text,
                        start: data.t0 as f64 / 100.0,
                        end: data.t1 as f64 / 100.0,
                        probability: data.p as f64,
                    });
                }

                let text = state.full_get_segment_text(i).map_err(failed)?;
                let start = state.full_get_segment_t0(i).map_err(failed)? as f64 / 100.0;
                let end = state.full_get_segment_t1(i).map_err(failed)? as f64 / 100.0;

                segments.push(RawSpeechSegment {
                    text: text.trim().to_string(),
                    start: Some(start),
                    end: Some(end),
                    words: tokens_to_words(&tokens),
                });
            }

            Ok(segments)
        }

        /// Transcribes a 16kHz mono WAV file
        pub fn transcribe_file(
            &self,
            wav_path: &Path,
            options: &TranscriptionOptions,
        ) -> WhisperResult<Vec<RawSpeechSegment>> {
            if !wav_path.exists() {
                return Err(WhisperError::AudioNotFound(
                    wav_path.to_string_lossy().to_string(),
                ));
            }

            let samples = super::super::audio::load_audio_samples(wav_path)
                .map_err(|e| WhisperError::AudioReadError(e.to_string()))?;

            self.transcribe(&samples, options)
        }
    }
}

#[cfg(feature = "whisper")]
pub use engine_impl::WhisperEngine;

// =============================================================================
// Stub Implementation (when whisper feature is disabled)
// =============================================================================

#[cfg(not(feature = "whisper"))]
#[derive(Debug)]
pub struct WhisperEngine;

#[cfg(not(feature = "whisper"))]
impl WhisperEngine {
    pub fn new(_model_path: &Path, _options: &TranscriptionOptions) -> WhisperResult<Self> {
        Err(WhisperError::FeatureNotEnabled)
    }

    pub fn model_name(&self) -> &str {
        ""
    }

    pub fn transcribe(
        &self,
        _samples: &[f32],
        _options: &TranscriptionOptions,
    ) -> WhisperResult<Vec<RawSpeechSegment>> {
        Err(WhisperError::FeatureNotEnabled)
    }

    pub fn transcribe_file(
        &self,
        _wav_path: &Path,
        _options: &TranscriptionOptions,
    ) -> WhisperResult<Vec<RawSpeechSegment>> {
        Err(WhisperError::FeatureNotEnabled)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Checks if whisper transcription is available
pub fn is_whisper_available() -> bool {
    cfg!(feature = "whisper")
}

/// Returns the default model directory
pub fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shortsmaker")
        .join("models")
        .join("whisper")
}

/// Resolves a configured model name or path to a model file path
pub fn resolve_model_path(model: &str, models_dir: &Path) -> WhisperResult<PathBuf> {
    let as_path = Path::new(model);
    if as_path.extension().is_some_and(|e| e == "bin") {
        return Ok(as_path.to_path_buf());
    }
    let size: WhisperModel = model.parse()?;
    Ok(models_dir.join(size.filename()))
}

// =============================================================================
// Tests
// =============================================================================
