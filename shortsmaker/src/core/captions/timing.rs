//! Word Timing Index
//!
//! Normalizes a forced-alignment transcript into a clean, monotonic sequence
//! of caption-eligible words:
//!
//! 1. flatten word sub-segments of every speech segment, in order
//! 2. trim text and drop empty tokens
//! 3. treat non-finite or negative timestamps as missing; a word with a single
//!    timestamp uses it for both ends; `start > end` is repaired to `end = start`
//! 4. merge punctuation-only tokens into the preceding word (or the next one
//!    when there is none)
//! 5. interpolate untimed runs between timed neighbours by character length;
//!    runs with a neighbour on one side only are paced at
//!    `fallback_chars_per_second`; runs with no neighbour are dropped
//! 6. stable sort by start and pull back ends that overlap the next word by
//!    more than `overlap_tolerance`
//!
//! The output is a fixed point: normalizing it again changes nothing.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::models::{NormalizeReport, RawSpeechSegment, WordSegment};
use crate::core::types::valid_timestamp;
use crate::core::{CoreError, CoreResult, TimeSec};

/// Tuning knobs for [`WordTimingIndex`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingOptions {
    /// Overlap (seconds) tolerated between consecutive words
    pub overlap_tolerance: f64,
    /// Reading pace used to size untimed runs anchored on one side only
    pub fallback_chars_per_second: f64,
}

impl Default for TimingOptions {
    fn default() -> Self {
        Self {
            overlap_tolerance: 0.0,
            fallback_chars_per_second: 15.0,
        }
    }
}

/// Working token: timing is either fully known or fully missing
#[derive(Clone, Debug)]
struct Token {
    text: String,
    span: Option<(TimeSec, TimeSec)>,
    confidence: Option<f64>,
}

impl Token {
    fn weight(&self) -> f64 {
        self.text.chars().count().max(1) as f64
    }
}

/// Normalizer for aligner output
#[derive(Clone, Debug, Default)]
pub struct WordTimingIndex {
    options: TimingOptions,
}

impl WordTimingIndex {
    pub fn new(options: TimingOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &TimingOptions {
        &self.options
    }

    /// Normalizes and discards the report
    pub fn normalize(&self, segments: &[RawSpeechSegment]) -> CoreResult<Vec<WordSegment>> {
        self.normalize_with_report(segments).map(|(words, _)| words)
    }

    /// Normalizes a transcript and reports every repair made.
    ///
    /// Empty input yields an empty sequence. Fails with
    /// [`CoreError::Alignment`] only when words with text exist but none of
    /// them could be anchored in time.
    pub fn normalize_with_report(
        &self,
        segments: &[RawSpeechSegment],
    ) -> CoreResult<(Vec<WordSegment>, NormalizeReport)> {
        let mut report = NormalizeReport::default();

        let tokens = collect_tokens(segments, &mut report);
        if tokens.is_empty() {
            if report.input_words > 0 {
                debug!(
                    "Transcript had {} word(s), all empty",
                    report.input_words
                );
            }
            return Ok((Vec::new(), report));
        }

        let tokens = merge_punctuation(tokens, &mut report);
        let candidate_count = tokens.len();
        let tokens = self.fill_gaps(tokens, &mut report);

        if tokens.is_empty() {
            return Err(CoreError::Alignment(format!(
                "none of {} word(s) carries a usable timestamp",
                candidate_count
            )));
        }

        let mut words: Vec<WordSegment> = tokens
            .into_iter()
            .filter_map(|t| {
                t.span.map(|(start, end)| WordSegment {
                    text: t.text,
                    start,
                    end,
                    confidence: t.confidence,
                })
            })
            .collect();

        // Vec::sort_by is stable
        words.sort_by(|a, b| a.start.total_cmp(&b.start));
        report.repaired_overlaps = repair_overlaps(&mut words, self.options.overlap_tolerance);

        if report.has_anomalies() {
            warn!(
                dropped_empty = report.dropped_empty,
                dropped_unanchored = report.dropped_unanchored,
                interpolated = report.interpolated,
                merged_punctuation = report.merged_punctuation,
                repaired_overlaps = report.repaired_overlaps,
                "Transcript needed repairs"
            );
        }

        Ok((words, report))
    }

    /// Assigns times to untimed runs; drops runs with no anchor at all.
    fn fill_gaps(&self, mut tokens: Vec<Token>, report: &mut NormalizeReport) -> Vec<Token> {
        let cps = if self.options.fallback_chars_per_second > 0.0 {
            self.options.fallback_chars_per_second
        } else {
            TimingOptions::default().fallback_chars_per_second
        };

        let mut i = 0;
        while i < tokens.len() {
            if tokens[i].span.is_some() {
                i += 1;
                continue;
            }
            let run_start = i;
            while i < tokens.len() && tokens[i].span.is_none() {
                i += 1;
            }
            let run_end = i;

            let before = run_start
                .checked_sub(1)
                .and_then(|p| tokens[p].span)
                .map(|(_, end)| end);
            let after = tokens.get(run_end).and_then(|t| t.span).map(|(start, _)| start);

            let run = &mut tokens[run_start..run_end];
            let total: f64 = run.iter().map(Token::weight).sum();

            let window = match (before, after) {
                // overlapping neighbours: the run sits at the later word's start
                (Some(lo), Some(hi)) => Some((lo.min(hi), hi)),
                (None, Some(hi)) => Some(((hi - total / cps).max(0.0), hi)),
                (Some(lo), None) => Some((lo, lo + total / cps)),
                (None, None) => None,
            };

            if let Some((lo, hi)) = window {
                spread(run, lo, hi, total);
                report.interpolated += run.len();
            }
        }

        let before = tokens.len();
        tokens.retain(|t| t.span.is_some());
        report.dropped_unanchored += before - tokens.len();
        tokens
    }
}

/// Flattens segments into tokens, dropping empty text and invalid timestamps.
fn collect_tokens(segments: &[RawSpeechSegment], report: &mut NormalizeReport) -> Vec<Token> {
    let mut tokens = Vec::new();
    for word in segments.iter().flat_map(|s| s.words.iter()) {
        report.input_words += 1;

        let text = word.word.trim();
        if text.is_empty() {
            report.dropped_empty += 1;
            continue;
        }

        let span = match (valid_timestamp(word.start), valid_timestamp(word.end)) {
            (Some(start), Some(end)) => Some((start, end.max(start))),
            (Some(t), None) | (None, Some(t)) => Some((t, t)),
            (None, None) => None,
        };

        tokens.push(Token {
            text: text.to_string(),
            span,
            confidence: word.score.filter(|s| s.is_finite()),
        });
    }
    tokens
}

fn is_punctuation_only(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| !c.is_alphanumeric() && !c.is_whitespace())
}

/// Folds punctuation-only tokens into their neighbour word.
fn merge_punctuation(tokens: Vec<Token>, report: &mut NormalizeReport) -> Vec<Token> {
    let mut merged: Vec<Token> = Vec::with_capacity(tokens.len());
    // Leading punctuation waiting for the first word
    let mut pending: Option<Token> = None;

    for token in tokens {
        if is_punctuation_only(&token.text) {
            if let Some(prev) = merged.last_mut() {
                prev.text.push_str(&token.text);
                if let (Some((ps, pe)), Some((_, te))) = (prev.span, token.span) {
                    prev.span = Some((ps, pe.max(te)));
                }
                report.merged_punctuation += 1;
            } else {
                pending = Some(match pending.take() {
                    Some(mut p) => {
                        p.text.push_str(&token.text);
                        p.span = union(p.span, token.span);
                        report.merged_punctuation += 1;
                        p
                    }
                    None => token,
                });
            }
            continue;
        }

        let mut token = token;
        if let Some(p) = pending.take() {
            token.text = format!("{}{}", p.text, token.text);
            if let (Some((ps, _)), Some((ts, te))) = (p.span, token.span) {
                token.span = Some((ps.min(ts), te));
            }
            report.merged_punctuation += 1;
        }
        merged.push(token);
    }

    // Nothing but punctuation: keep it as a token of its own
    if let Some(p) = pending {
        merged.push(p);
    }
    merged
}

fn union(a: Option<(f64, f64)>, b: Option<(f64, f64)>) -> Option<(f64, f64)> {
    match (a, b) {
        (Some((s1, e1)), Some((s2, e2))) => Some((s1.min(s2), e1.max(e2))),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

/// Spreads a run across `[lo, hi]` proportionally to character counts.
fn spread(run: &mut [Token], lo: TimeSec, hi: TimeSec, total_weight: f64) {
    let duration = (hi - lo).max(0.0);
    let mut acc = 0.0;
    for token in run.iter_mut() {
        let start = lo + duration * acc / total_weight;
        acc += token.weight();
        let end = lo + duration * acc / total_weight;
        token.span = Some((start, end.min(hi).max(start)));
    }
}

/// Pulls back ends that run past the next start by more than `tolerance`.
fn repair_overlaps(words: &mut [WordSegment], tolerance: f64) -> usize {
    let tolerance = tolerance.max(0.0);
    let mut repaired = 0;
    for i in 1..words.len() {
        let limit = words[i].start + tolerance;
        let prev = &mut words[i - 1];
        if prev.end > limit {
            prev.end = limit.max(prev.start);
            repaired += 1;
        }
    }
    repaired
}
