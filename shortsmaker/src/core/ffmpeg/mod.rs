//! FFmpeg Integration Module
//!
//! Provides the FFmpeg functionality the pipeline relies on:
//! - Binary detection (explicit path, environment, common locations, PATH)
//! - Media probing via ffprobe
//! - Blocking command execution with progress parsing and interruption
//!
//! All codec work is delegated to the external `ffmpeg` binary.

mod detection;
mod runner;

pub use detection::*;
pub use runner::{
    calculate_encode_progress, parse_ffmpeg_progress_line, tail_lines, AudioStreamInfo,
    EncodeProgress, FFmpegProgressData, FFmpegRunner, MediaInfo, VideoStreamInfo,
};

use crate::core::CoreError;

/// FFmpeg-related error types
#[derive(Debug, thiserror::Error)]
pub enum FFmpegError {
    #[error("FFmpeg not found. Install FFmpeg or set SHORTSMAKER_FFMPEG_DIR.")]
    NotFound,

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid input file: {0}")]
    InvalidInput(String),

    #[error("FFprobe error: {0}")]
    ProbeError(String),

    #[error("Process error: {0}")]
    ProcessError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Interrupted while FFmpeg was running")]
    Interrupted,
}

pub type FFmpegResult<T> = Result<T, FFmpegError>;

impl From<FFmpegError> for CoreError {
    fn from(err: FFmpegError) -> Self {
        match err {
            FFmpegError::NotFound => CoreError::NotFound(err.to_string()),
            FFmpegError::Interrupted => CoreError::Interrupted,
            other => CoreError::Composition(other.to_string()),
        }
    }
}
