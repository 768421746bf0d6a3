//! Composition Filter Graph
//!
//! Builds the `-filter_complex` graph and input arguments for one
//! composition. Input order is fixed:
//!
//! | index | stream            |
//! |-------|-------------------|
//! | 0     | narration audio   |
//! | 1     | background video  |
//! | 2     | background music  |
//! | 3     | credits video     |
//! | 4     | credits mask      |

use std::ffi::OsString;

use super::overlay::OverlayClip;
use super::plan::{CompositionOptions, CompositionPlan, MediaSegment};
use crate::core::types::format_seconds;

/// Label of the final video stream
pub const VIDEO_OUT: &str = "vout";
/// Label of the final audio stream
pub const AUDIO_OUT: &str = "aout";

const MIX_SAMPLE_RATE: u32 = 44_100;

/// `-ss/-t/-i` input arguments for a background segment
pub fn segment_input_args(segment: &MediaSegment) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    if segment.looped {
        args.push("-stream_loop".into());
        args.push("-1".into());
    } else if segment.trim_start > 0.0 {
        args.push("-ss".into());
        args.push(format_seconds(segment.trim_start).into());
    }
    args.push("-t".into());
    args.push(format_seconds(segment.duration()).into());
    args.push("-i".into());
    args.push(segment.source.clone().into());
    args
}

/// Every `-i` argument for a plan, in the fixed input order
pub fn input_args(plan: &CompositionPlan, narration: &std::path::Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-i".into(), narration.into()];
    args.extend(segment_input_args(&plan.video));
    args.extend(segment_input_args(&plan.music));
    if let Some(credits) = &plan.credits {
        args.push("-i".into());
        args.push(credits.video.clone().into());
        if let Some(mask) = &credits.mask {
            args.push("-i".into());
            args.push(mask.clone().into());
        }
    }
    args
}

/// Crop to the output aspect ratio around the center, then scale
fn frame_chain(options: &CompositionOptions) -> String {
    let aspect = options.width as f64 / options.height as f64;
    format!(
        "crop='min(iw,ih*{a:.6})':'min(ih,iw/{a:.6})',scale={w}:{h},setsar=1,fps={fps}",
        a = aspect,
        w = options.width,
        h = options.height,
        fps = options.fps
    )
}

fn background_video(plan: &CompositionPlan, options: &CompositionOptions) -> String {
    let mut chain = format!("[1:v]{},format=yuv420p", frame_chain(options));
    let fade = options.video_fade;
    if fade > 0.0 && plan.total_duration > 2.0 * fade {
        chain.push_str(&format!(
            ",fade=t=in:st=0:d={d},fade=t=out:st={st}:d={d}",
            d = format_seconds(fade),
            st = format_seconds(plan.total_duration - fade)
        ));
    }
    chain.push_str("[bg]");
    chain
}

fn caption_chain(overlays: &[OverlayClip]) -> String {
    let layers: Vec<String> = overlays
        .iter()
        .filter(|o| !o.is_noop())
        .filter_map(|o| o.layer.as_ref().map(|l| l.to_filter()))
        .collect();
    if layers.is_empty() {
        "[bg]null[captioned]".to_string()
    } else {
        format!("[bg]{}[captioned]", layers.join(","))
    }
}

fn credits_chain(plan: &CompositionPlan, options: &CompositionOptions) -> Vec<String> {
    let Some(credits) = &plan.credits else {
        return vec![format!("[captioned]null[{}]", VIDEO_OUT)];
    };

    let shift = format!("setpts=PTS-STARTPTS+{}/TB", format_seconds(credits.start));
    let mut parts = Vec::new();
    if credits.mask.is_some() {
        parts.push(format!(
            "[3:v]{},format=yuva420p[cv]",
            frame_chain(options)
        ));
        parts.push(format!("[4:v]{},format=gray[cm]", frame_chain(options)));
        parts.push(format!("[cv][cm]alphamerge,{}[credits]", shift));
    } else {
        parts.push(format!(
            "[3:v]{},format=yuv420p,{}[credits]",
            frame_chain(options),
            shift
        ));
    }
    parts.push(format!(
        "[captioned][credits]overlay=eof_action=pass:enable='gte(t,{})'[{}]",
        format_seconds(credits.start),
        VIDEO_OUT
    ));
    parts
}

fn narration_chain(plan: &CompositionPlan) -> String {
    let mut chain = format!("[0:a]aresample={}", MIX_SAMPLE_RATE);
    if plan.lead_in > 0.0 {
        let ms = (plan.lead_in * 1000.0).round() as u64;
        chain.push_str(&format!(",adelay={}:all=1", ms));
    }
    chain.push_str(&format!(
        ",apad=whole_dur={}[narration]",
        format_seconds(plan.total_duration)
    ));
    chain
}

fn music_chain(plan: &CompositionPlan, options: &CompositionOptions) -> String {
    let mut chain = format!(
        "[2:a]aresample={},volume={:.4}",
        MIX_SAMPLE_RATE, options.music_gain
    );
    let fade = options.music_fade.min(plan.total_duration / 2.0);
    if fade > 0.0 {
        chain.push_str(&format!(
            ",afade=t=in:st=0:d={d},afade=t=out:st={st}:d={d}",
            d = format_seconds(fade),
            st = format_seconds(plan.total_duration - fade)
        ));
    }
    chain.push_str("[music]");
    chain
}

/// Full filter graph for a plan.
///
/// The narration chain never carries a gain filter; only music is scaled,
/// and `amix` runs with `normalize=0` so mixing does not attenuate inputs.
pub fn build_filter_graph(
    plan: &CompositionPlan,
    overlays: &[OverlayClip],
    options: &CompositionOptions,
) -> String {
    let mut parts = vec![background_video(plan, options), caption_chain(overlays)];
    parts.extend(credits_chain(plan, options));
    parts.push(narration_chain(plan));
    parts.push(music_chain(plan, options));
    parts.push(format!(
        "[narration][music]amix=inputs=2:duration=first:dropout_transition=0:normalize=0[{}]",
        AUDIO_OUT
    ));
    parts.join(";\n")
}

/// Filter for the optional sped-up copy
pub fn speed_filter(factor: f64) -> String {
    format!(
        "[0:v]setpts=PTS/{f:.4}[{v}];[0:a]{atempo}[{a}]",
        f = factor,
        v = VIDEO_OUT,
        atempo = atempo_chain(factor),
        a = AUDIO_OUT
    )
}

/// `atempo` accepts 0.5-100 per instance; larger factors are chained
fn atempo_chain(factor: f64) -> String {
    let mut remaining = factor;
    let mut stages = Vec::new();
    while remaining > 2.0 {
        stages.push("atempo=2.0".to_string());
        remaining /= 2.0;
    }
    stages.push(format!("atempo={:.4}", remaining));
    stages.join(",")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::render::plan::CreditsPlacement;
    use std::path::{Path, PathBuf};

    fn segment(source: &str, start: f64, end: f64, looped: bool) -> MediaSegment {
        MediaSegment {
            source: PathBuf::from(source),
            trim_start: start,
            trim_end: end,
            looped,
        }
    }

    fn plan(credits: Option<CreditsPlacement>) -> CompositionPlan {
        CompositionPlan {
            total_duration: 25.0,
            narration_duration: 25.0,
            lead_in: 0.0,
            video: segment("bg.mp4", 0.0, 25.0, true),
            music: segment("music.mp3", 3.0, 28.0, false),
            credits,
        }
    }

    fn strs(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().to_string()).collect()
    }

    #[test]
    fn test_looped_segment_args() {
        let args = strs(&segment_input_args(&segment("bg.mp4", 0.0, 25.0, true)));
        assert_eq!(
            args,
            vec!["-stream_loop", "-1", "-t", "25.000000", "-i", "bg.mp4"]
        );
    }

    #[test]
    fn test_trimmed_segment_args() {
        let args = strs(&segment_input_args(&segment("m.mp3", 3.0, 28.0, false)));
        assert_eq!(
            args,
            vec!["-ss", "3.000000", "-t", "25.000000", "-i", "m.mp3"]
        );
    }

    #[test]
    fn test_input_order() {
        let p = plan(Some(CreditsPlacement {
            video: PathBuf::from("credits.mp4"),
            mask: Some(PathBuf::from("mask.mp4")),
            start: 25.0,
            duration: 4.0,
        }));
        let args = strs(&input_args(&p, Path::new("narration.wav")));
        let inputs: Vec<&str> = args
            .iter()
            .enumerate()
            .filter(|(i, _)| *i > 0 && args[i - 1] == "-i")
            .map(|(_, a)| a.as_str())
            .collect();
        assert_eq!(
            inputs,
            vec!["narration.wav", "bg.mp4", "music.mp3", "credits.mp4", "mask.mp4"]
        );
    }

    #[test]
    fn test_narration_is_never_attenuated() {
        let graph = build_filter_graph(&plan(None), &[], &CompositionOptions::default());
        let narration = graph
            .split(";\n")
            .find(|p| p.starts_with("[0:a]"))
            .unwrap();
        assert!(!narration.contains("volume"));
        assert!(narration.contains("apad=whole_dur=25.000000"));
        assert!(graph.contains("normalize=0"));
        assert!(graph.contains("[2:a]aresample=44100,volume=0.0800"));
    }

    #[test]
    fn test_music_fades_at_tail() {
        let graph = build_filter_graph(&plan(None), &[], &CompositionOptions::default());
        assert!(graph.contains("afade=t=out:st=23.000000:d=2.000000"));
    }

    #[test]
    fn test_no_captions_passes_video_through() {
        let graph = build_filter_graph(&plan(None), &[], &CompositionOptions::default());
        assert!(graph.contains("[bg]null[captioned]"));
        assert!(graph.contains("[captioned]null[vout]"));
        assert!(graph.contains("crop='min(iw,ih*0.562500)':'min(ih,iw/0.562500)',scale=1080:1920"));
    }

    #[test]
    fn test_credits_with_mask_use_alphamerge() {
        let p = plan(Some(CreditsPlacement {
            video: PathBuf::from("credits.mp4"),
            mask: Some(PathBuf::from("mask.mp4")),
            start: 25.0,
            duration: 4.0,
        }));
        let graph = build_filter_graph(&p, &[], &CompositionOptions::default());
        assert!(graph.contains("[cv][cm]alphamerge,setpts=PTS-STARTPTS+25.000000/TB[credits]"));
        assert!(graph.contains("overlay=eof_action=pass:enable='gte(t,25.000000)'[vout]"));
    }

    #[test]
    fn test_lead_in_delays_narration() {
        let mut p = plan(None);
        p.lead_in = 1.0;
        let graph = build_filter_graph(&p, &[], &CompositionOptions::default());
        assert!(graph.contains("adelay=1000:all=1"));
    }

    #[test]
    fn test_atempo_chain_splits_large_factors() {
        assert_eq!(atempo_chain(1.5), "atempo=1.5000");
        assert_eq!(atempo_chain(5.0), "atempo=2.0,atempo=2.0,atempo=1.2500");
        assert!(speed_filter(1.5).starts_with("[0:v]setpts=PTS/1.5000[vout]"));
    }
}
