//! Composition Planning
//!
//! Decides the output timeline before anything is encoded: total duration,
//! which window of each background source is used, whether it loops, and
//! where the credits go.

use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::captions::{CaptionCard, CaptionStyle};
use crate::core::{CoreError, CoreResult, TimeSec};

// =============================================================================
// Options
// =============================================================================

/// Encoding and mixing options for the compositor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionOptions {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Linear gain applied to background music; narration always stays at 1.0
    pub music_gain: f64,
    /// Music fade-in and tail fade-out length in seconds
    pub music_fade: TimeSec,
    /// Background video fade-in/out length in seconds (0 disables)
    pub video_fade: TimeSec,
    /// Seconds kept clear of both ends of a background source when picking a window
    pub segment_margin: TimeSec,
    /// Silence before and after the narration
    pub narration_padding: TimeSec,
    /// Playback speed of the extra `<stem>_speed` output; 1.0 disables it
    pub speed_factor: f64,
    /// x264 constant rate factor
    pub crf: u8,
    /// x264 preset
    pub preset: String,
    pub audio_bitrate: String,
    /// Fixed seed for window selection; random when unset
    pub seed: Option<u64>,
}

impl Default for CompositionOptions {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            fps: 30,
            music_gain: 0.08,
            music_fade: 2.0,
            video_fade: 0.5,
            segment_margin: 20.0,
            narration_padding: 0.0,
            speed_factor: 1.0,
            crf: 23,
            preset: "medium".to_string(),
            audio_bitrate: "192k".to_string(),
            seed: None,
        }
    }
}

impl CompositionOptions {
    /// Validation problems, empty when usable
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            problems.push(format!(
                "output size must be positive and even, got {}x{}",
                self.width, self.height
            ));
        }
        if self.fps == 0 {
            problems.push("fps must be > 0".to_string());
        }
        if !(self.music_gain >= 0.0 && self.music_gain <= 1.0) {
            problems.push(format!("music_gain must be in [0, 1], got {}", self.music_gain));
        }
        for (name, value) in [
            ("music_fade", self.music_fade),
            ("video_fade", self.video_fade),
            ("segment_margin", self.segment_margin),
            ("narration_padding", self.narration_padding),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                problems.push(format!("{} must be >= 0, got {}", name, value));
            }
        }
        if !(self.speed_factor >= 0.5 && self.speed_factor <= 100.0) {
            problems.push(format!(
                "speed_factor must be within [0.5, 100], got {}",
                self.speed_factor
            ));
        }
        if self.crf > 51 {
            problems.push(format!("crf must be <= 51, got {}", self.crf));
        }
        problems
    }
}

// =============================================================================
// Job
// =============================================================================

/// Credits clip shown after the narration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreditsSource {
    pub video: PathBuf,
    /// Grayscale luma mask merged as alpha
    pub mask: Option<PathBuf>,
}

/// Everything one composition needs
#[derive(Clone, Debug)]
pub struct RenderJob {
    pub narration_audio: PathBuf,
    pub caption_cards: Vec<CaptionCard>,
    pub caption_style: CaptionStyle,
    pub background_video: PathBuf,
    pub background_music: PathBuf,
    pub credits: Option<CreditsSource>,
    pub output_path: PathBuf,
}

// =============================================================================
// Plan
// =============================================================================

/// A window of a background source.
///
/// `trim_start..trim_end` is measured on the source timeline, or on the
/// endlessly repeated source when `looped` is set.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MediaSegment {
    pub source: PathBuf,
    pub trim_start: TimeSec,
    pub trim_end: TimeSec,
    pub looped: bool,
}

impl MediaSegment {
    pub fn duration(&self) -> TimeSec {
        self.trim_end - self.trim_start
    }
}

/// Where the credits sit on the output timeline
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CreditsPlacement {
    pub video: PathBuf,
    pub mask: Option<PathBuf>,
    pub start: TimeSec,
    pub duration: TimeSec,
}

/// Resolved output timeline
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompositionPlan {
    pub total_duration: TimeSec,
    pub narration_duration: TimeSec,
    /// Offset of the narration (and captions) on the output timeline
    pub lead_in: TimeSec,
    pub video: MediaSegment,
    pub music: MediaSegment,
    pub credits: Option<CreditsPlacement>,
}

impl CompositionPlan {
    /// End of narration plus trailing padding
    pub fn narration_end(&self) -> TimeSec {
        self.lead_in + self.narration_duration
    }
}

/// Picks a `needed`-second window of a source lasting `source_duration`.
///
/// Long sources get a random offset that keeps `margin` seconds clear of both
/// ends when there is room for it. Short sources loop from their start.
pub fn select_segment<R: Rng + ?Sized>(
    source: &Path,
    source_duration: TimeSec,
    needed: TimeSec,
    margin: TimeSec,
    rng: &mut R,
) -> MediaSegment {
    if source_duration < needed {
        return MediaSegment {
            source: source.to_path_buf(),
            trim_start: 0.0,
            trim_end: needed,
            looped: true,
        };
    }

    let slack = source_duration - needed;
    let offset = if slack > 2.0 * margin {
        rng.gen_range(margin..=slack - margin)
    } else if slack > 0.0 {
        rng.gen_range(0.0..=slack)
    } else {
        0.0
    };

    MediaSegment {
        source: source.to_path_buf(),
        trim_start: offset,
        trim_end: offset + needed,
        looped: false,
    }
}

/// Probed durations of a job's inputs
#[derive(Clone, Debug, PartialEq)]
pub struct SourceDurations {
    pub narration: TimeSec,
    pub video: TimeSec,
    pub music: TimeSec,
    pub credits: Option<TimeSec>,
}

/// Lays out the output timeline.
///
/// Total = padding + narration + padding + credits. Both background sources
/// cover the whole total.
pub fn plan_composition<R: Rng + ?Sized>(
    job: &RenderJob,
    durations: &SourceDurations,
    options: &CompositionOptions,
    rng: &mut R,
) -> CoreResult<CompositionPlan> {
    let narration = durations.narration;
    if !(narration.is_finite() && narration > 0.0) {
        return Err(CoreError::Composition(format!(
            "narration {} has no usable duration",
            job.narration_audio.display()
        )));
    }
    for (what, d) in [("background video", durations.video), ("background music", durations.music)] {
        if !(d.is_finite() && d > 0.0) {
            return Err(CoreError::Composition(format!("{} has no usable duration", what)));
        }
    }

    let lead_in = options.narration_padding;
    let credits_start = lead_in + narration + options.narration_padding;
    let credits = match (&job.credits, durations.credits) {
        (Some(source), Some(d)) if d > 0.0 => Some(CreditsPlacement {
            video: source.video.clone(),
            mask: source.mask.clone(),
            start: credits_start,
            duration: d,
        }),
        _ => None,
    };
    let total_duration = credits_start + credits.as_ref().map_or(0.0, |c| c.duration);

    let video = select_segment(
        &job.background_video,
        durations.video,
        total_duration,
        options.segment_margin,
        rng,
    );
    let music = select_segment(
        &job.background_music,
        durations.music,
        total_duration,
        options.segment_margin,
        rng,
    );

    Ok(CompositionPlan {
        total_duration,
        narration_duration: narration,
        lead_in,
        video,
        music,
        credits,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn job(credits: bool) -> RenderJob {
        RenderJob {
            narration_audio: PathBuf::from("narration.wav"),
            caption_cards: Vec::new(),
            caption_style: CaptionStyle::default(),
            background_video: PathBuf::from("bg.mp4"),
            background_music: PathBuf::from("music.mp3"),
            credits: credits.then(|| CreditsSource {
                video: PathBuf::from("credits.mp4"),
                mask: None,
            }),
            output_path: PathBuf::from("out.mp4"),
        }
    }

    #[test]
    fn test_short_sources_loop_to_cover_narration() {
        let durations = SourceDurations {
            narration: 25.0,
            video: 10.0,
            music: 7.0,
            credits: None,
        };
        let plan = plan_composition(
            &job(false),
            &durations,
            &CompositionOptions::default(),
            &mut StdRng::seed_from_u64(1),
        )
        .unwrap();

        assert_eq!(plan.total_duration, 25.0);
        assert!(plan.video.looped);
        assert!(plan.music.looped);
        assert_eq!(plan.video.duration(), 25.0);
        assert_eq!(plan.music.duration(), 25.0);
    }

    #[test]
    fn test_long_source_window_respects_margin() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let seg = select_segment(Path::new("bg.mp4"), 300.0, 30.0, 20.0, &mut rng);
            assert!(!seg.looped);
            assert!(seg.trim_start >= 20.0);
            assert!(seg.trim_end <= 280.0);
            assert!((seg.duration() - 30.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_margin_dropped_when_source_too_short_for_it() {
        let mut rng = StdRng::seed_from_u64(3);
        let seg = select_segment(Path::new("bg.mp4"), 35.0, 30.0, 20.0, &mut rng);
        assert!(!seg.looped);
        assert!(seg.trim_start >= 0.0 && seg.trim_end <= 35.0);

        let exact = select_segment(Path::new("bg.mp4"), 30.0, 30.0, 20.0, &mut rng);
        assert_eq!(exact.trim_start, 0.0);
        assert!(!exact.looped);
    }

    #[test]
    fn test_same_seed_same_window() {
        let a = select_segment(Path::new("bg"), 600.0, 40.0, 20.0, &mut StdRng::seed_from_u64(9));
        let b = select_segment(Path::new("bg"), 600.0, 40.0, 20.0, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn test_credits_and_padding_extend_total() {
        let durations = SourceDurations {
            narration: 20.0,
            video: 120.0,
            music: 120.0,
            credits: Some(4.0),
        };
        let options = CompositionOptions {
            narration_padding: 1.0,
            ..Default::default()
        };
        let plan =
            plan_composition(&job(true), &durations, &options, &mut StdRng::seed_from_u64(5))
                .unwrap();

        assert_eq!(plan.lead_in, 1.0);
        let credits = plan.credits.unwrap();
        assert_eq!(credits.start, 22.0);
        assert_eq!(plan.total_duration, 26.0);
        assert!((plan.video.duration() - 26.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_narration_is_composition_error() {
        let durations = SourceDurations {
            narration: 0.0,
            video: 10.0,
            music: 10.0,
            credits: None,
        };
        let result = plan_composition(
            &job(false),
            &durations,
            &CompositionOptions::default(),
            &mut StdRng::seed_from_u64(0),
        );
        assert!(matches!(result, Err(CoreError::Composition(_))));
    }

    #[test]
    fn test_default_options_valid() {
        assert!(CompositionOptions::default().problems().is_empty());
        let bad = CompositionOptions {
            width: 1081,
            music_gain: 1.5,
            speed_factor: 0.0,
            ..Default::default()
        };
        assert_eq!(bad.problems().len(), 3);
    }
}
