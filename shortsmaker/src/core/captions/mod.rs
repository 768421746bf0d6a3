//! Caption System Module
//!
//! Turns aligner output into timed caption cards:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Caption System                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  models.rs     - Transcript words, normalized words, cards      │
//! │  timing.rs     - WordTimingIndex (normalization & repair)       │
//! │  chunker.rs    - CaptionChunker (card grouping & pacing)        │
//! │  style.rs      - Caption look (font, colors, box, position)     │
//! │  transcript.rs - JSON/YAML transcript files                     │
//! │  audio.rs      - 16kHz mono extraction for transcription        │
//! │  whisper.rs    - Local Whisper transcription (feature-gated)    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use crate::core::captions::{load_transcript, CaptionChunker, WordTimingIndex};
//!
//! let raw = load_transcript(Path::new("transcript.json"))?;
//! let words = WordTimingIndex::default().normalize(&raw)?;
//! let cards = CaptionChunker::default().chunk(&words);
//! ```

pub mod audio;
mod chunker;
mod models;
mod style;
mod timing;
mod transcript;
pub mod whisper;

pub use chunker::{CaptionChunker, ChunkOptions};
pub use models::{
    CaptionCard, ChunkReport, NormalizeReport, RawSpeechSegment, RawWord, WordSegment,
};
pub use style::{
    random_caption_color, CaptionPosition, CaptionStyle, Color, FontSize, CAPTION_PALETTE,
};
pub use timing::{TimingOptions, WordTimingIndex};
pub use transcript::{load_transcript, parse_transcript, save_transcript};
