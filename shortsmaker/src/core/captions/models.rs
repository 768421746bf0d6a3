//! Caption Data Models
//!
//! Transcript input as produced by a forced-alignment model, the normalized
//! word sequence, and the caption cards built from it.

use serde::{Deserialize, Serialize};

use crate::core::TimeSec;

// =============================================================================
// Transcript Input
// =============================================================================

/// A word-level sub-segment as emitted by the aligner.
///
/// Any timestamp may be missing; short filler words are often left
/// unlocalized.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawWord {
    pub word: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
    /// Alignment confidence (0.0 - 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl RawWord {
    pub fn timed(word: &str, start: f64, end: f64) -> Self {
        Self {
            word: word.to_string(),
            start: Some(start),
            end: Some(end),
            score: None,
        }
    }

    pub fn untimed(word: &str) -> Self {
        Self {
            word: word.to_string(),
            ..Default::default()
        }
    }
}

/// One detected speech segment with its word-level sub-segments
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSpeechSegment {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
    #[serde(default)]
    pub words: Vec<RawWord>,
}

impl RawSpeechSegment {
    /// A segment holding only the given words
    pub fn from_words(words: Vec<RawWord>) -> Self {
        let text = words
            .iter()
            .map(|w| w.word.trim())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            text,
            start: words.first().and_then(|w| w.start),
            end: words.last().and_then(|w| w.end),
            words,
        }
    }
}

// =============================================================================
// Normalized Words
// =============================================================================

/// A caption-eligible token with a guaranteed `start <= end`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WordSegment {
    pub text: String,
    pub start: TimeSec,
    pub end: TimeSec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl WordSegment {
    pub fn new(text: &str, start: TimeSec, end: TimeSec) -> Self {
        Self {
            text: text.to_string(),
            start,
            end,
            confidence: None,
        }
    }

    pub fn duration(&self) -> TimeSec {
        self.end - self.start
    }

    /// Character count (not bytes)
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Converts back into the aligner's word format
    pub fn to_raw(&self) -> RawWord {
        RawWord {
            word: self.text.clone(),
            start: Some(self.start),
            end: Some(self.end),
            score: self.confidence,
        }
    }
}

/// Anomalies repaired while normalizing a transcript
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeReport {
    pub input_words: usize,
    pub dropped_empty: usize,
    pub dropped_unanchored: usize,
    pub interpolated: usize,
    pub merged_punctuation: usize,
    pub repaired_overlaps: usize,
}

impl NormalizeReport {
    /// Whether any repair was needed
    pub fn has_anomalies(&self) -> bool {
        self.dropped_empty
            + self.dropped_unanchored
            + self.interpolated
            + self.merged_punctuation
            + self.repaired_overlaps
            > 0
    }
}

// =============================================================================
// Caption Cards
// =============================================================================

/// A group of consecutive words displayed together.
///
/// Built only by the chunker and immutable afterwards.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CaptionCard {
    tokens: Vec<WordSegment>,
    display_start: TimeSec,
    display_end: TimeSec,
    text: String,
}

impl CaptionCard {
    pub(crate) fn new(tokens: Vec<WordSegment>, display_start: TimeSec, display_end: TimeSec) -> Self {
        let text = tokens
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            tokens,
            display_start,
            display_end,
            text,
        }
    }

    pub fn tokens(&self) -> &[WordSegment] {
        &self.tokens
    }

    pub fn display_start(&self) -> TimeSec {
        self.display_start
    }

    pub fn display_end(&self) -> TimeSec {
        self.display_end
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn duration(&self) -> TimeSec {
        self.display_end - self.display_start
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// End of the last spoken token
    pub fn spoken_end(&self) -> TimeSec {
        self.tokens.last().map(|t| t.end).unwrap_or(self.display_start)
    }

    /// Returns true if the card is visible at the given time
    pub fn is_visible_at(&self, time_sec: TimeSec) -> bool {
        time_sec >= self.display_start && time_sec < self.display_end
    }
}

/// Summary of chunking decisions
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkReport {
    pub cards: usize,
    /// Cards made of one token longer than `max_chars`
    pub oversized_single_token: usize,
    /// Cards whose display end was pushed out to the minimum duration
    pub extended_to_minimum: usize,
    /// Extended cards cut short by the next card's start
    pub clipped_by_next: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_word_deserializes_whisperx_shape() {
        let json = r#"[{"word": "Hello", "start": 0.1, "end": 0.4, "score": 0.93},
                       {"word": "uh"}]"#;
        let words: Vec<RawWord> = serde_json::from_str(json).unwrap();
        assert_eq!(words[0].start, Some(0.1));
        assert_eq!(words[0].score, Some(0.93));
        assert_eq!(words[1].start, None);
    }

    #[test]
    fn test_segment_from_words_joins_text() {
        let seg = RawSpeechSegment::from_words(vec![
            RawWord::timed(" Hello", 0.0, 0.5),
            RawWord::timed("world ", 0.6, 1.0),
        ]);
        assert_eq!(seg.text, "Hello world");
        assert_eq!(seg.start, Some(0.0));
        assert_eq!(seg.end, Some(1.0));
    }

    #[test]
    fn test_caption_card_text_and_visibility() {
        let card = CaptionCard::new(
            vec![WordSegment::new("Hello", 1.0, 1.4), WordSegment::new("there", 1.5, 1.9)],
            1.0,
            1.9,
        );
        assert_eq!(card.text(), "Hello there");
        assert_eq!(card.char_len(), 11);
        assert_eq!(card.spoken_end(), 1.9);
        assert!(card.is_visible_at(1.0));
        assert!(!card.is_visible_at(1.9));
    }

    #[test]
    fn test_report_anomalies() {
        let mut report = NormalizeReport {
            input_words: 3,
            ..Default::default()
        };
        assert!(!report.has_anomalies());
        report.dropped_empty = 1;
        assert!(report.has_anomalies());
    }
}
