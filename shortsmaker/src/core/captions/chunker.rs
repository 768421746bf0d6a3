//! Caption Chunker
//!
//! Greedily groups normalized words into caption cards. A word joins the
//! current card while the joined text stays within `max_chars` characters
//! (the separating space counts) and the card's span stays within
//! `max_duration`. Cards shorter than `min_duration` are held on screen
//! longer, up to the next card's start but never ending before their last
//! spoken word.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::models::{CaptionCard, ChunkReport, WordSegment};
use crate::core::TimeSec;

/// Card size policy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkOptions {
    /// Maximum characters per card, spaces included
    pub max_chars: usize,
    /// Maximum seconds between a card's first word start and last word end
    pub max_duration: TimeSec,
    /// Minimum on-screen time per card
    pub min_duration: TimeSec,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_chars: 24,
            max_duration: 2.5,
            min_duration: 0.4,
        }
    }
}

/// Groups words into timed caption cards
#[derive(Clone, Debug, Default)]
pub struct CaptionChunker {
    options: ChunkOptions,
}

impl CaptionChunker {
    pub fn new(options: ChunkOptions) -> Self {
        Self { options }
    }

    /// Convenience constructor matching the two primary limits
    pub fn with_limits(max_chars: usize, max_duration: TimeSec) -> Self {
        Self::new(ChunkOptions {
            max_chars,
            max_duration,
            ..Default::default()
        })
    }

    pub fn options(&self) -> &ChunkOptions {
        &self.options
    }

    pub fn chunk(&self, tokens: &[WordSegment]) -> Vec<CaptionCard> {
        self.chunk_with_report(tokens).0
    }

    /// Splits `tokens` into cards. Deterministic for identical input.
    pub fn chunk_with_report(&self, tokens: &[WordSegment]) -> (Vec<CaptionCard>, ChunkReport) {
        let mut report = ChunkReport::default();
        let groups = self.group(tokens, &mut report);

        let starts: Vec<TimeSec> = groups
            .iter()
            .map(|g| g.first().map(|t| t.start).unwrap_or(0.0))
            .collect();

        let mut cards = Vec::with_capacity(groups.len());
        for (i, group) in groups.into_iter().enumerate() {
            let display_start = starts[i];
            let spoken_end = group.last().map(|t| t.end).unwrap_or(display_start);
            let mut display_end = spoken_end.max(display_start);

            if display_end - display_start < self.options.min_duration {
                let wanted = display_start + self.options.min_duration;
                display_end = match starts.get(i + 1) {
                    Some(&next_start) if next_start < wanted => {
                        report.clipped_by_next += 1;
                        next_start.max(spoken_end)
                    }
                    _ => wanted,
                };
                report.extended_to_minimum += 1;
            }

            cards.push(CaptionCard::new(group, display_start, display_end));
        }

        report.cards = cards.len();
        debug!(
            cards = report.cards,
            oversized = report.oversized_single_token,
            extended = report.extended_to_minimum,
            "Chunked {} word(s)",
            tokens.len()
        );
        (cards, report)
    }

    fn group(&self, tokens: &[WordSegment], report: &mut ChunkReport) -> Vec<Vec<WordSegment>> {
        let max_chars = self.options.max_chars.max(1);
        let mut groups: Vec<Vec<WordSegment>> = Vec::new();
        let mut current: Vec<WordSegment> = Vec::new();
        let mut current_chars = 0usize;

        for token in tokens {
            let token_chars = token.char_len();

            if let Some(first) = current.first() {
                let fits_chars = current_chars + 1 + token_chars <= max_chars;
                let fits_time = token.end - first.start <= self.options.max_duration;
                if fits_chars && fits_time {
                    current_chars += 1 + token_chars;
                    current.push(token.clone());
                    continue;
                }
                groups.push(std::mem::take(&mut current));
            }

            if token_chars > max_chars {
                report.oversized_single_token += 1;
            }
            current_chars = token_chars;
            current.push(token.clone());
        }

        if !current.is_empty() {
            groups.push(current);
        }
        groups
    }
}
