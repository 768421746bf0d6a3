//! Video Compositor
//!
//! Runs one [`RenderJob`] end to end: opens every source read-only, probes
//! durations, plans the timeline, renders caption overlays, writes the filter
//! script and encodes with FFmpeg into a partial file beside the output. The
//! partial file is renamed over `output_path` only after a successful encode.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::filter_graph::{build_filter_graph, input_args, speed_filter, AUDIO_OUT, VIDEO_OUT};
use super::overlay::{FrameSize, OverlayClip, TimedOverlayRenderer};
use super::plan::{
    plan_composition, CompositionOptions, CompositionPlan, RenderJob, SourceDurations,
};
use crate::core::ffmpeg::{EncodeProgress, FFmpegError, FFmpegRunner};
use crate::core::fs::{
    atomic_replace, partial_path_for, prepare_output_path, remove_stale_output, suffixed_path,
};
use crate::core::resources::{ResourceLifecycleManager, ScratchDir, ScratchFile, SourceReader};
use crate::core::types::{format_seconds, InterruptFlag};
use crate::core::{CoreError, CoreResult, TimeSec};

/// Result of a finished composition
#[derive(Clone, Debug, Serialize)]
pub struct CompositionReport {
    pub output_path: PathBuf,
    pub duration_sec: TimeSec,
    pub file_size: u64,
    pub encoding_time_sec: f64,
    /// Visible caption overlays burned in
    pub overlays: usize,
    /// Sped-up copy, when requested
    pub speed_output: Option<PathBuf>,
    pub plan: CompositionPlan,
}

fn encode_error(err: FFmpegError) -> CoreError {
    match err {
        FFmpegError::Interrupted => CoreError::Interrupted,
        other => CoreError::Composition(other.to_string()),
    }
}

/// Logs encode progress in 10% steps
fn progress_logger(label: &'static str) -> impl FnMut(&EncodeProgress) {
    let mut next_step = 0u32;
    move |p: &EncodeProgress| {
        let step = (p.percent / 10.0).floor() as u32;
        if step >= next_step {
            info!(
                "{}: {:.0}% (frame {}, {:.1}s, eta {}s)",
                label, p.percent, p.frame, p.time_sec, p.eta_seconds
            );
            next_step = step + 1;
        }
    }
}

/// Composes narration, background media, captions and credits into one file
pub struct VideoCompositor {
    runner: FFmpegRunner,
    options: CompositionOptions,
    scratch_root: PathBuf,
    rng: StdRng,
}

impl VideoCompositor {
    /// `scratch_root` receives one scratch directory per job
    pub fn new(
        runner: FFmpegRunner,
        options: CompositionOptions,
        scratch_root: impl Into<PathBuf>,
    ) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            runner,
            options,
            scratch_root: scratch_root.into(),
            rng,
        }
    }

    pub fn options(&self) -> &CompositionOptions {
        &self.options
    }

    fn frame(&self) -> FrameSize {
        FrameSize::new(self.options.width, self.options.height)
    }

    fn open_source(
        what: &str,
        path: &Path,
        resources: &mut ResourceLifecycleManager,
    ) -> CoreResult<()> {
        let reader = SourceReader::open(path).map_err(|e| {
            CoreError::Composition(format!("cannot read {} {}: {}", what, path.display(), e))
        })?;
        resources.register(reader);
        Ok(())
    }

    fn probe(&self, what: &str, path: &Path) -> CoreResult<TimeSec> {
        self.runner.probe_duration(path).map_err(|e| {
            CoreError::Composition(format!("cannot probe {} {}: {}", what, path.display(), e))
        })
    }

    /// Composes `job` into `job.output_path`.
    ///
    /// Every handle opened here is registered with `resources`; the caller
    /// releases them (or drops the manager) whatever the outcome. On failure
    /// nothing is left at `output_path`.
    pub fn compose(
        &mut self,
        job: &RenderJob,
        resources: &mut ResourceLifecycleManager,
        interrupt: &InterruptFlag,
    ) -> CoreResult<CompositionReport> {
        interrupt.check()?;
        prepare_output_path(&job.output_path)?;
        let speed_requested = (self.options.speed_factor - 1.0).abs() > f64::EPSILON;
        let mut stale = vec![job.output_path.clone()];
        if speed_requested {
            stale.push(suffixed_path(&job.output_path, "speed"));
        }
        for path in &stale {
            if remove_stale_output(path)? {
                info!("Removed output of an earlier run: {}", path.display());
            }
        }

        let scratch = ScratchDir::create(&self.scratch_root, "render").map_err(|e| {
            CoreError::Resource(format!(
                "cannot create scratch directory in {}: {}",
                self.scratch_root.display(),
                e
            ))
        })?;
        let scratch_dir = scratch.path().to_path_buf();
        resources.register(scratch);

        // every source is opened before any work starts
        let mut sources: Vec<(&str, &Path)> = vec![
            ("narration", job.narration_audio.as_path()),
            ("background video", job.background_video.as_path()),
            ("background music", job.background_music.as_path()),
        ];
        if let Some(c) = &job.credits {
            sources.push(("credits video", c.video.as_path()));
            if let Some(mask) = &c.mask {
                sources.push(("credits mask", mask.as_path()));
            }
        }
        for (what, path) in &sources {
            Self::open_source(what, path, resources)?;
        }

        // (a) durations
        let narration = self.probe("narration", &job.narration_audio)?;
        let video = self.probe("background video", &job.background_video)?;
        let music = self.probe("background music", &job.background_music)?;
        let credits = match &job.credits {
            Some(c) => Some(self.probe("credits video", &c.video)?),
            None => None,
        };
        let durations = SourceDurations {
            narration,
            video,
            music,
            credits,
        };

        // (b)(c) background windows
        let plan = plan_composition(job, &durations, &self.options, &mut self.rng)?;
        info!(
            "Composing {:.2}s (narration {:.2}s, video looped: {}, music looped: {})",
            plan.total_duration, plan.narration_duration, plan.video.looped, plan.music.looped
        );
        interrupt.check()?;

        // (d) caption layers
        let style = job.caption_style.resolved(&mut self.rng);
        let mut renderer = TimedOverlayRenderer::new(self.frame(), &scratch_dir);
        let overlays: Vec<OverlayClip> = renderer
            .render_all(&job.caption_cards, &style, resources)?
            .into_iter()
            .map(|clip| clip.offset(plan.lead_in))
            .collect();
        let visible = overlays.iter().filter(|o| !o.is_noop()).count();
        debug!("Rendered {} caption overlays ({} visible)", overlays.len(), visible);

        let graph = build_filter_graph(&plan, &overlays, &self.options);
        let script = scratch_dir.join("filter_graph.txt");
        std::fs::write(&script, graph.as_bytes())?;
        resources.register(ScratchFile::new(&script));

        // (e) encode into a partial file, then rename
        let partial = partial_path_for(&job.output_path);
        resources.register(ScratchFile::new(&partial));
        let log = scratch_dir.join("ffmpeg_compose.log");
        resources.register(ScratchFile::new(&log));

        let mut args = input_args(&plan, &job.narration_audio);
        args.extend(self.output_args(&script, plan.total_duration, &partial));

        let started = Instant::now();
        self.runner
            .run_with_progress(
                &args,
                plan.total_duration,
                &log,
                interrupt,
                progress_logger("compose"),
            )
            .map_err(encode_error)?;
        let encoding_time_sec = started.elapsed().as_secs_f64();

        atomic_replace(&job.output_path, &partial)?;
        info!(
            "Wrote {} in {:.1}s",
            job.output_path.display(),
            encoding_time_sec
        );

        // the sped-up copy is optional; only an interrupt fails the job here
        let speed_output = if speed_requested {
            match self.speed_up(&job.output_path, &plan, &scratch_dir, resources, interrupt) {
                Ok(path) => Some(path),
                Err(CoreError::Interrupted) => {
                    remove_stale_output(&job.output_path)?;
                    return Err(CoreError::Interrupted);
                }
                Err(e) => {
                    warn!("Speed adjustment failed, keeping {}: {}", job.output_path.display(), e);
                    None
                }
            }
        } else {
            None
        };

        let file_size = std::fs::metadata(&job.output_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(CompositionReport {
            output_path: job.output_path.clone(),
            duration_sec: plan.total_duration,
            file_size,
            encoding_time_sec,
            overlays: visible,
            speed_output,
            plan,
        })
    }

    fn output_args(&self, script: &Path, total: TimeSec, partial: &Path) -> Vec<OsString> {
        vec![
            "-filter_complex_script".into(),
            script.into(),
            "-map".into(),
            format!("[{}]", VIDEO_OUT).into(),
            "-map".into(),
            format!("[{}]", AUDIO_OUT).into(),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            self.options.preset.clone().into(),
            "-crf".into(),
            self.options.crf.to_string().into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-r".into(),
            self.options.fps.to_string().into(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            self.options.audio_bitrate.clone().into(),
            "-t".into(),
            format_seconds(total).into(),
            "-movflags".into(),
            "+faststart".into(),
            "-progress".into(),
            "pipe:1".into(),
            "-nostats".into(),
            "-y".into(),
            partial.into(),
        ]
    }

    /// Writes `<stem>_speed.<ext>` played back `speed_factor` times faster
    fn speed_up(
        &self,
        source: &Path,
        plan: &CompositionPlan,
        scratch_dir: &Path,
        resources: &mut ResourceLifecycleManager,
        interrupt: &InterruptFlag,
    ) -> CoreResult<PathBuf> {
        let factor = self.options.speed_factor;
        let output = suffixed_path(source, "speed");
        let partial = partial_path_for(&output);
        resources.register(ScratchFile::new(&partial));
        let log = scratch_dir.join("ffmpeg_speed.log");
        resources.register(ScratchFile::new(&log));

        let args: Vec<OsString> = vec![
            "-i".into(),
            source.into(),
            "-filter_complex".into(),
            speed_filter(factor).into(),
            "-map".into(),
            format!("[{}]", VIDEO_OUT).into(),
            "-map".into(),
            format!("[{}]", AUDIO_OUT).into(),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            self.options.preset.clone().into(),
            "-crf".into(),
            self.options.crf.to_string().into(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            self.options.audio_bitrate.clone().into(),
            "-progress".into(),
            "pipe:1".into(),
            "-nostats".into(),
            "-y".into(),
            (&partial).into(),
        ];

        self.runner
            .run_with_progress(
                &args,
                plan.total_duration / factor,
                &log,
                interrupt,
                progress_logger("speed"),
            )
            .map_err(encode_error)?;
        atomic_replace(&output, &partial)?;
        info!("Wrote {} ({}x)", output.display(), factor);
        Ok(output)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::captions::{CaptionChunker, CaptionStyle, WordSegment};
    use crate::core::ffmpeg::{detect_ffmpeg, FFmpegInfo};
    use crate::core::resources::HandleKind;
    use std::process::Command;
    use tempfile::TempDir;

    fn fake_runner() -> FFmpegRunner {
        FFmpegRunner::new(FFmpegInfo {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
            ffprobe_path: PathBuf::from("/nonexistent/ffprobe"),
            version: "test".to_string(),
        })
    }

    fn job(dir: &Path) -> RenderJob {
        RenderJob {
            narration_audio: dir.join("narration.wav"),
            caption_cards: Vec::new(),
            caption_style: CaptionStyle::default(),
            background_video: dir.join("bg.mp4"),
            background_music: dir.join("music.wav"),
            credits: None,
            output_path: dir.join("out").join("short.mp4"),
        }
    }

    #[test]
    fn test_unreadable_background_fails_without_output() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("narration.wav"), b"RIFF").unwrap();
        let job = job(temp.path());

        let mut compositor =
            VideoCompositor::new(fake_runner(), CompositionOptions::default(), temp.path());
        let mut resources = ResourceLifecycleManager::new();
        let result = compositor.compose(&job, &mut resources, &InterruptFlag::new());

        let err = result.unwrap_err();
        assert!(matches!(err, CoreError::Composition(_)));
        assert!(err.to_string().contains("background video"));
        resources.release_all().unwrap();
        assert!(!job.output_path.exists());
        assert!(!partial_path_for(&job.output_path).exists());
        // only the output directory remains; the scratch dir is gone
        let leftovers: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("render-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_interrupt_before_start() {
        let temp = TempDir::new().unwrap();
        let interrupt = InterruptFlag::new();
        interrupt.raise();
        let mut compositor =
            VideoCompositor::new(fake_runner(), CompositionOptions::default(), temp.path());
        let mut resources = ResourceLifecycleManager::new();
        let result = compositor.compose(&job(temp.path()), &mut resources, &interrupt);
        assert!(matches!(result, Err(CoreError::Interrupted)));
        assert_eq!(resources.live_count(), 0);
    }

    #[test]
    fn test_failed_job_removes_output_of_earlier_run() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("narration.wav"), b"RIFF").unwrap();
        let job = job(temp.path());
        std::fs::create_dir_all(job.output_path.parent().unwrap()).unwrap();
        std::fs::write(&job.output_path, b"previous run").unwrap();

        let mut compositor =
            VideoCompositor::new(fake_runner(), CompositionOptions::default(), temp.path());
        let mut resources = ResourceLifecycleManager::new();
        let err = compositor
            .compose(&job, &mut resources, &InterruptFlag::new())
            .unwrap_err();
        resources.release_all().unwrap();

        assert!(matches!(err, CoreError::Composition(_)));
        assert!(!job.output_path.exists());
    }

    /// ffprobe reports 5 s for everything; ffmpeg writes its last argument
    /// unless that is the sped-up copy, which fails.
    #[cfg(unix)]
    fn scripted_runner(dir: &Path) -> FFmpegRunner {
        use std::os::unix::fs::PermissionsExt;

        let write_script = |name: &str, body: &str| {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        };
        let ffprobe = write_script(
            "ffprobe",
            "echo '{\"format\": {\"duration\": \"5.0\"}, \"streams\": []}'\n",
        );
        let ffmpeg = write_script(
            "ffmpeg",
            "for last; do :; done\n\
             case \"$last\" in *_speed*) echo 'speed pass failed' >&2; exit 1;; esac\n\
             printf 'encoded' > \"$last\"\n",
        );
        FFmpegRunner::new(FFmpegInfo {
            ffmpeg_path: ffmpeg,
            ffprobe_path: ffprobe,
            version: "scripted".to_string(),
        })
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_speed_pass_keeps_main_output() {
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        for name in ["narration.wav", "bg.mp4", "music.wav"] {
            std::fs::write(temp.path().join(name), b"media").unwrap();
        }
        let job = job(temp.path());
        let speed_copy = suffixed_path(&job.output_path, "speed");
        std::fs::create_dir_all(job.output_path.parent().unwrap()).unwrap();
        std::fs::write(&speed_copy, b"previous run").unwrap();

        let options = CompositionOptions {
            speed_factor: 1.5,
            seed: Some(1),
            ..Default::default()
        };
        let mut compositor = VideoCompositor::new(scripted_runner(&bin), options, temp.path());
        let mut resources = ResourceLifecycleManager::new();
        let report = compositor
            .compose(&job, &mut resources, &InterruptFlag::new())
            .unwrap();
        resources.release_all().unwrap();

        assert_eq!(report.speed_output, None);
        assert_eq!(std::fs::read_to_string(&job.output_path).unwrap(), "encoded");
        assert!(!speed_copy.exists());
        assert!(!partial_path_for(&speed_copy).exists());
        assert!(!partial_path_for(&job.output_path).exists());
    }

    fn has_encoder_support(ffmpeg: &Path) -> bool {
        let Ok(out) = Command::new(ffmpeg).args(["-hide_banner", "-encoders"]).output() else {
            return false;
        };
        String::from_utf8_lossy(&out.stdout).contains("libx264")
    }

    fn has_filter(ffmpeg: &Path, name: &str) -> bool {
        let Ok(out) = Command::new(ffmpeg).args(["-hide_banner", "-filters"]).output() else {
            return false;
        };
        String::from_utf8_lossy(&out.stdout)
            .lines()
            .any(|l| l.split_whitespace().nth(1) == Some(name))
    }

    fn lavfi(ffmpeg: &Path, source: &str, out: &Path) -> bool {
        Command::new(ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-f", "lavfi", "-i", source, "-y"])
            .arg(out)
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_compose_loops_short_sources_to_narration_length() {
        let Ok(info) = detect_ffmpeg(None) else {
            println!("FFmpeg not found, skipping");
            return;
        };
        if !has_encoder_support(&info.ffmpeg_path) {
            println!("libx264 not available, skipping");
            return;
        }
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let ok = lavfi(
            &info.ffmpeg_path,
            "sine=frequency=440:duration=3",
            &dir.join("narration.wav"),
        ) && lavfi(
            &info.ffmpeg_path,
            "testsrc=duration=1:size=320x240:rate=30",
            &dir.join("bg.mp4"),
        ) && lavfi(
            &info.ffmpeg_path,
            "sine=frequency=220:duration=0.7",
            &dir.join("music.wav"),
        );
        if !ok {
            println!("Could not generate fixtures, skipping");
            return;
        }

        let mut job = job(dir);
        let font = Path::new("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf");
        if has_filter(&info.ffmpeg_path, "drawtext") && font.is_file() {
            job.caption_style.font_file = Some(font.to_path_buf());
            let tokens = vec![
                WordSegment::new("Hello", 0.2, 0.6),
                WordSegment::new("world", 0.8, 1.3),
            ];
            job.caption_cards = CaptionChunker::default().chunk(&tokens);
        }

        let runner = FFmpegRunner::new(info);
        let options = CompositionOptions {
            width: 180,
            height: 320,
            preset: "ultrafast".to_string(),
            seed: Some(1),
            ..Default::default()
        };
        let mut compositor = VideoCompositor::new(runner.clone(), options, dir);
        let mut resources = ResourceLifecycleManager::new();
        let report = compositor
            .compose(&job, &mut resources, &InterruptFlag::new())
            .unwrap();
        assert!(report.plan.video.looped);
        assert!(report.plan.music.looped);

        resources.release_all().unwrap();
        assert_eq!(resources.live_count_of(HandleKind::RenderSurface), 0);
        assert!(!partial_path_for(&job.output_path).exists());

        let duration = runner.probe_duration(&job.output_path).unwrap();
        assert!((duration - 3.0).abs() < 0.15, "duration was {}", duration);
    }
}
