//! FFmpeg Runner Module
//!
//! Executes FFmpeg/FFprobe commands. Every call blocks the current thread;
//! long encodes report progress through `-progress pipe:1` and poll an
//! [`InterruptFlag`] between progress lines.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{FFmpegError, FFmpegInfo, FFmpegResult};
use crate::core::process::{configure_std_command, ChildGuard};
use crate::core::types::InterruptFlag;

/// Lines of encoder stderr included in failure messages
const STDERR_TAIL_LINES: usize = 20;

// =============================================================================
// Media Information
// =============================================================================

/// Media information extracted by FFprobe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration_sec: f64,
    /// Video stream info (if present)
    pub video: Option<VideoStreamInfo>,
    /// Audio stream info (if present)
    pub audio: Option<AudioStreamInfo>,
    /// Container format
    pub format: String,
    /// File size in bytes
    pub size_bytes: u64,
}

/// Video stream information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoStreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
}

/// Audio stream information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    pub sample_rate: u32,
    pub channels: u8,
    pub codec: String,
}

// =============================================================================
// Progress
// =============================================================================

/// Accumulated key/value pairs from one `-progress` block
#[derive(Debug, Clone, Default)]
pub struct FFmpegProgressData {
    pub frame: u64,
    pub fps: f32,
    pub time_sec: f64,
    pub speed: Option<f32>,
    pub finished: bool,
}

/// Progress snapshot reported to callers
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeProgress {
    pub frame: u64,
    /// 0.0 - 100.0
    pub percent: f32,
    pub time_sec: f64,
    pub eta_seconds: u64,
}

/// Parses one line of `-progress` output into `data`.
///
/// Returns `true` when the line closes a progress block.
pub fn parse_ffmpeg_progress_line(line: &str, data: &mut FFmpegProgressData) -> bool {
    let line = line.trim();

    if let Some(value) = line.strip_prefix("frame=") {
        data.frame = value.trim().parse().unwrap_or(data.frame);
    } else if let Some(value) = line.strip_prefix("fps=") {
        data.fps = value.trim().parse().unwrap_or(data.fps);
    } else if let Some(value) = line.strip_prefix("out_time_us=") {
        if let Ok(us) = value.trim().parse::<u64>() {
            data.time_sec = us as f64 / 1_000_000.0;
        }
    } else if let Some(value) = line.strip_prefix("out_time_ms=") {
        // out_time_ms is in microseconds despite the name
        if let Ok(us) = value.trim().parse::<u64>() {
            data.time_sec = us as f64 / 1_000_000.0;
        }
    } else if let Some(value) = line.strip_prefix("speed=") {
        data.speed = value.trim().strip_suffix('x').and_then(|s| s.trim().parse().ok());
    } else if let Some(value) = line.strip_prefix("progress=") {
        data.finished = value.trim() == "end";
        return true;
    }
    false
}

/// Converts accumulated progress into a percentage and ETA
pub fn calculate_encode_progress(data: &FFmpegProgressData, total_duration_sec: f64) -> EncodeProgress {
    let percent = if data.finished {
        100.0
    } else if total_duration_sec > 0.0 {
        ((data.time_sec / total_duration_sec) * 100.0).clamp(0.0, 100.0) as f32
    } else {
        0.0
    };

    let remaining = (total_duration_sec - data.time_sec).max(0.0);
    let eta_seconds = match data.speed {
        Some(speed) if speed > 0.0 => (remaining / speed as f64) as u64,
        _ => 0,
    };

    EncodeProgress {
        frame: data.frame,
        percent,
        time_sec: data.time_sec,
        eta_seconds,
    }
}

/// Last `n` lines of a log file; empty when the file cannot be read.
pub fn tail_lines(path: &Path, n: usize) -> String {
    let Ok(bytes) = std::fs::read(path) else {
        return String::new();
    };
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

// =============================================================================
// Runner
// =============================================================================

/// FFmpeg runner for blocking command execution
#[derive(Clone)]
pub struct FFmpegRunner {
    info: Arc<FFmpegInfo>,
}

impl FFmpegRunner {
    /// Create a new FFmpegRunner from detected FFmpeg installation
    pub fn new(info: FFmpegInfo) -> Self {
        Self {
            info: Arc::new(info),
        }
    }

    /// Get the FFmpeg info
    pub fn info(&self) -> &FFmpegInfo {
        &self.info
    }

    fn ffmpeg_command(&self) -> Command {
        let mut cmd = Command::new(&self.info.ffmpeg_path);
        configure_std_command(&mut cmd);
        cmd.args(["-hide_banner", "-nostdin"]);
        cmd
    }

    /// Probe media file to get information
    pub fn probe(&self, input: &Path) -> FFmpegResult<MediaInfo> {
        if !input.is_file() {
            return Err(FFmpegError::InvalidInput(format!(
                "Input file does not exist: {}",
                input.display()
            )));
        }

        let mut cmd = Command::new(&self.info.ffprobe_path);
        configure_std_command(&mut cmd);
        let output = cmd
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(input)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FFmpegError::ProbeError(format!(
                "FFprobe failed on {}: {}",
                input.display(),
                stderr.trim()
            )));
        }

        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    /// Duration of a media file; fails when ffprobe reports none.
    pub fn probe_duration(&self, input: &Path) -> FFmpegResult<f64> {
        let info = self.probe(input)?;
        if info.duration_sec.is_finite() && info.duration_sec > 0.0 {
            Ok(info.duration_sec)
        } else {
            Err(FFmpegError::ProbeError(format!(
                "No usable duration for {}",
                input.display()
            )))
        }
    }

    /// Runs ffmpeg to completion, capturing stderr for the error message.
    pub fn run<I, S>(&self, args: I) -> FFmpegResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = self.ffmpeg_command();
        cmd.args(args).stdin(Stdio::null());
        debug!("Running {:?}", cmd);

        let output = cmd.output()?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
        Err(FFmpegError::ExecutionFailed(format!(
            "{}: {}",
            output.status, tail
        )))
    }

    /// Runs a long encode, streaming `-progress pipe:1` output.
    ///
    /// `args` must already contain `-progress pipe:1`. Encoder stderr goes to
    /// `stderr_log`; its tail is part of the error on failure. The child is
    /// killed as soon as `interrupt` is raised.
    pub fn run_with_progress<I, S, F>(
        &self,
        args: I,
        total_duration_sec: f64,
        stderr_log: &Path,
        interrupt: &InterruptFlag,
        mut on_progress: F,
    ) -> FFmpegResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
        F: FnMut(&EncodeProgress),
    {
        let log = File::create(stderr_log)?;
        let mut cmd = self.ffmpeg_command();
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(log));
        debug!("Running {:?}", cmd);

        let mut guard = ChildGuard::new(cmd.spawn()?, "ffmpeg");
        let stdout = guard
            .child_mut()
            .and_then(|child| child.stdout.take())
            .ok_or_else(|| FFmpegError::ExecutionFailed("stdout not captured".to_string()))?;

        let mut data = FFmpegProgressData::default();
        for line in BufReader::new(stdout).lines() {
            if interrupt.is_raised() {
                guard.kill();
                return Err(FFmpegError::Interrupted);
            }
            let line = line?;
            if parse_ffmpeg_progress_line(&line, &mut data) {
                on_progress(&calculate_encode_progress(&data, total_duration_sec));
            }
        }

        let status = guard.wait()?;
        if interrupt.is_raised() {
            return Err(FFmpegError::Interrupted);
        }
        if !status.success() {
            return Err(FFmpegError::ExecutionFailed(format!(
                "{}: {}",
                status,
                tail_lines(stderr_log, STDERR_TAIL_LINES)
            )));
        }
        Ok(())
    }
}

// =============================================================================
// FFprobe Parsing
// =============================================================================

#[derive(Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    size: Option<String>,
    format_name: Option<String>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u8>,
    duration: Option<String>,
}

/// Parse FFprobe JSON output
fn parse_probe_output(json_str: &str) -> FFmpegResult<MediaInfo> {
    let probe: ProbeOutput = serde_json::from_str(json_str)
        .map_err(|e| FFmpegError::ParseError(format!("Failed to parse FFprobe output: {}", e)))?;
    let format = probe
        .format
        .ok_or_else(|| FFmpegError::ParseError("Missing format info".to_string()))?;

    let parse_f64 = |s: &Option<String>| s.as_deref().and_then(|v| v.parse::<f64>().ok());

    // Some containers only carry duration on the stream
    let duration_sec = parse_f64(&format.duration)
        .or_else(|| probe.streams.iter().find_map(|s| parse_f64(&s.duration)))
        .unwrap_or(0.0);

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .map(|s| VideoStreamInfo {
            width: s.width.unwrap_or(0),
            height: s.height.unwrap_or(0),
            fps: s.r_frame_rate.as_deref().and_then(parse_frame_rate).unwrap_or(30.0),
            codec: s.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
        });

    let audio = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .map(|s| AudioStreamInfo {
            sample_rate: s
                .sample_rate
                .as_deref()
                .and_then(|v| v.parse().ok())
                .unwrap_or(44100),
            channels: s.channels.unwrap_or(2),
            codec: s.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
        });

    Ok(MediaInfo {
        duration_sec,
        video,
        audio,
        format: format.format_name.unwrap_or_else(|| "unknown".to_string()),
        size_bytes: format
            .size
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
    })
}

/// "30/1" or "30000/1001" or "25"
fn parse_frame_rate(s: &str) -> Option<f64> {
    match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den > 0.0).then(|| num / den)
        }
        None => s.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output_video() {
        let json = r#"{
            "format": {
                "duration": "10.5",
                "size": "1048576",
                "format_name": "mov,mp4,m4a,3gp,3g2,mj2"
            },
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "h264",
                    "width": 1920,
                    "height": 1080,
                    "r_frame_rate": "30/1",
                    "pix_fmt": "yuv420p"
                },
                {
                    "codec_type": "audio",
                    "codec_name": "aac",
                    "sample_rate": "48000",
                    "channels": 2
                }
            ]
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.duration_sec, 10.5);
        assert_eq!(info.size_bytes, 1048576);

        let video = info.video.unwrap();
        assert_eq!((video.width, video.height), (1920, 1080));
        assert_eq!(video.fps, 30.0);

        let audio = info.audio.unwrap();
        assert_eq!(audio.sample_rate, 48000);
        assert_eq!(audio.codec, "aac");
    }

    #[test]
    fn test_parse_probe_duration_from_stream() {
        let json = r#"{
            "format": { "format_name": "wav" },
            "streams": [ { "codec_type": "audio", "duration": "3.25" } ]
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.duration_sec, 3.25);
        assert!(info.video.is_none());
    }

    #[test]
    fn test_parse_probe_output_rejects_garbage() {
        assert!(matches!(
            parse_probe_output("not json"),
            Err(FFmpegError::ParseError(_))
        ));
        assert!(matches!(
            parse_probe_output(r#"{"streams": []}"#),
            Err(FFmpegError::ParseError(_))
        ));
    }

    #[test]
    fn test_parse_fractional_framerate() {
        let fps = parse_frame_rate("30000/1001").unwrap();
        assert!((fps - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("1/0"), None);
    }

    #[test]
    fn test_parse_ffmpeg_progress_complete_block() {
        let mut data = FFmpegProgressData::default();
        let block = [
            "frame=150",
            "fps=60.0",
            "out_time_us=5000000",
            "speed=2.0x",
            "progress=continue",
        ];
        let mut boundaries = 0;
        for line in block {
            if parse_ffmpeg_progress_line(line, &mut data) {
                boundaries += 1;
            }
        }
        assert_eq!(boundaries, 1);
        assert_eq!(data.frame, 150);
        assert_eq!(data.time_sec, 5.0);
        assert_eq!(data.speed, Some(2.0));
        assert!(!data.finished);

        let progress = calculate_encode_progress(&data, 20.0);
        assert_eq!(progress.percent, 25.0);
        assert_eq!(progress.eta_seconds, 7);
    }

    #[test]
    fn test_progress_end_reports_complete() {
        let mut data = FFmpegProgressData::default();
        assert!(parse_ffmpeg_progress_line("progress=end", &mut data));
        assert_eq!(calculate_encode_progress(&data, 0.0).percent, 100.0);
    }

    #[test]
    fn test_progress_ignores_na_values() {
        let mut data = FFmpegProgressData {
            frame: 10,
            ..Default::default()
        };
        parse_ffmpeg_progress_line("frame=N/A", &mut data);
        parse_ffmpeg_progress_line("speed=N/A", &mut data);
        assert_eq!(data.frame, 10);
        assert_eq!(data.speed, None);
    }

    #[test]
    fn test_tail_lines() {
        let temp = tempfile::TempDir::new().unwrap();
        let log = temp.path().join("encode.log");
        std::fs::write(&log, "a\nb\n\nc\nd\n").unwrap();
        assert_eq!(tail_lines(&log, 2), "c\nd");
        assert_eq!(tail_lines(&temp.path().join("missing.log"), 2), "");
    }
}
