//! Audio Extraction Module
//!
//! Converts narration audio to 16kHz mono WAV for local transcription and
//! reads the resulting samples.

use std::ffi::OsString;
use std::path::Path;

use thiserror::Error;

use crate::core::ffmpeg::FFmpegRunner;

/// Sample rate expected by Whisper models
pub const TRANSCRIPTION_SAMPLE_RATE: u32 = 16_000;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during audio extraction
#[derive(Error, Debug)]
pub enum AudioExtractionError {
    /// FFmpeg returned non-zero or could not run
    #[error("FFmpeg execution failed: {0}")]
    FFmpegFailed(String),

    /// WAV file unreadable or in an unexpected format
    #[error("Invalid WAV: {0}")]
    InvalidWav(String),

    /// Input file not found
    #[error("Input file not found: {0}")]
    InputNotFound(String),

    /// Output directory does not exist
    #[error("Output directory does not exist: {0}")]
    OutputDirNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for audio extraction operations
pub type AudioResult<T> = Result<T, AudioExtractionError>;

// =============================================================================
// Extraction
// =============================================================================

/// Writes `input` as 16kHz mono 16-bit PCM WAV at `output_path`.
pub fn extract_audio_for_transcription(
    runner: &FFmpegRunner,
    input_path: &Path,
    output_path: &Path,
) -> AudioResult<()> {
    if !input_path.exists() {
        return Err(AudioExtractionError::InputNotFound(
            input_path.to_string_lossy().to_string(),
        ));
    }

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(AudioExtractionError::OutputDirNotFound(
                parent.to_string_lossy().to_string(),
            ));
        }
    }

    let args: Vec<OsString> = vec![
        "-i".into(),
        input_path.into(),
        "-ar".into(),
        TRANSCRIPTION_SAMPLE_RATE.to_string().into(),
        "-ac".into(),
        "1".into(),
        "-c:a".into(),
        "pcm_s16le".into(),
        "-y".into(),
        output_path.into(),
    ];
    runner
        .run(&args)
        .map_err(|e| AudioExtractionError::FFmpegFailed(e.to_string()))
}

/// Loads audio samples from a 16kHz mono WAV file as f32 in [-1.0, 1.0].
pub fn load_audio_samples(wav_path: &Path) -> AudioResult<Vec<f32>> {
    let reader = hound::WavReader::open(wav_path)
        .map_err(|e| AudioExtractionError::InvalidWav(format!("Failed to open WAV file: {}", e)))?;

    let spec = reader.spec();

    if spec.sample_rate != TRANSCRIPTION_SAMPLE_RATE {
        return Err(AudioExtractionError::InvalidWav(format!(
            "Expected 16kHz sample rate, got {} Hz",
            spec.sample_rate
        )));
    }

    if spec.channels != 1 {
        return Err(AudioExtractionError::InvalidWav(format!(
            "Expected mono audio, got {} channels",
            spec.channels
        )));
    }

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .into_samples::<i16>()
            .filter_map(Result::ok)
            .map(|s| s as f32 / 32768.0)
            .collect(),
        (hound::SampleFormat::Int, 32) => reader
            .into_samples::<i32>()
            .filter_map(Result::ok)
            .map(|s| s as f32 / 2147483648.0)
            .collect(),
        (hound::SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .filter_map(Result::ok)
            .map(|s| s.clamp(-1.0, 1.0))
            .collect(),
        (_, bits) => {
            return Err(AudioExtractionError::InvalidWav(format!(
                "Unsupported bit depth: {}",
                bits
            )));
        }
    };

    Ok(samples)
}

/// Duration in seconds of any WAV file, from its header
pub fn wav_duration(wav_path: &Path) -> AudioResult<f64> {
    let reader = hound::WavReader::open(wav_path)
        .map_err(|e| AudioExtractionError::InvalidWav(e.to_string()))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(AudioExtractionError::InvalidWav("zero sample rate".to_string()));
    }
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

// =============================================================================
// Tests
// =============================================================================
