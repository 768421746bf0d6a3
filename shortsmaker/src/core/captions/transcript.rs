//! Transcript files
//!
//! Reads and writes aligner output. Three shapes are accepted, in JSON or
//! YAML:
//!
//! - a WhisperX result object: `{"segments": [{"text", "start", "end", "words": [...]}]}`
//! - a bare list of speech segments
//! - a flat word list: `[{"word", "start", "end"}]`

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::models::{RawSpeechSegment, RawWord};
use crate::core::fs::atomic_write_bytes;
use crate::core::{CoreError, CoreResult};

#[derive(Deserialize)]
#[serde(untagged)]
enum TranscriptShape {
    Result { segments: Vec<RawSpeechSegment> },
    // Before `Segments`: every segment field is optional, so a word list
    // would otherwise parse as a list of empty segments.
    Words(Vec<RawWord>),
    Segments(Vec<RawSpeechSegment>),
}

#[derive(Serialize)]
struct TranscriptOut<'a> {
    segments: &'a [RawSpeechSegment],
}

/// Parses transcript text; `yaml` selects the YAML reader.
pub fn parse_transcript(content: &str, yaml: bool) -> CoreResult<Vec<RawSpeechSegment>> {
    if content.trim().is_empty() {
        return Err(CoreError::Input("transcript is empty".to_string()));
    }

    let shape: TranscriptShape = if yaml {
        serde_yaml::from_str(content)
            .map_err(|e| CoreError::Input(format!("malformed YAML transcript: {}", e)))?
    } else {
        serde_json::from_str(content)
            .map_err(|e| CoreError::Input(format!("malformed JSON transcript: {}", e)))?
    };

    Ok(match shape {
        TranscriptShape::Result { segments } | TranscriptShape::Segments(segments) => segments,
        TranscriptShape::Words(words) if words.is_empty() => Vec::new(),
        TranscriptShape::Words(words) => vec![RawSpeechSegment::from_words(words)],
    })
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|e| e == "yml" || e == "yaml")
}

/// Loads a transcript file, choosing the format by extension.
pub fn load_transcript(path: &Path) -> CoreResult<Vec<RawSpeechSegment>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CoreError::Input(format!("cannot read transcript {}: {}", path.display(), e))
    })?;
    parse_transcript(&content, is_yaml(path))
}

/// Writes segments as a WhisperX-style result object.
pub fn save_transcript(path: &Path, segments: &[RawSpeechSegment]) -> CoreResult<()> {
    let out = TranscriptOut { segments };
    let bytes = if is_yaml(path) {
        serde_yaml::to_string(&out)?.into_bytes()
    } else {
        serde_json::to_vec_pretty(&out)?
    };
    atomic_write_bytes(path, &bytes)
}
