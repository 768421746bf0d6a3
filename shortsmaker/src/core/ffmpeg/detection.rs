//! FFmpeg Detection Module
//!
//! Handles detection and validation of FFmpeg/FFprobe binaries.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use super::{FFmpegError, FFmpegResult};
use crate::core::process::configure_std_command;

/// Environment variable pointing at a directory holding ffmpeg and ffprobe
pub const FFMPEG_DIR_ENV: &str = "SHORTSMAKER_FFMPEG_DIR";

/// Information about detected FFmpeg installation
#[derive(Debug, Clone)]
pub struct FFmpegInfo {
    /// Path to ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// Path to ffprobe binary
    pub ffprobe_path: PathBuf,
    /// FFmpeg version string
    pub version: String,
}

/// Detect FFmpeg.
///
/// Lookup order: `dir` (from configuration), `SHORTSMAKER_FFMPEG_DIR`, common
/// install locations, then every entry of `PATH`.
pub fn detect_ffmpeg(dir: Option<&Path>) -> FFmpegResult<FFmpegInfo> {
    let mut preferred = Vec::new();
    if let Some(dir) = dir {
        preferred.push(dir.to_path_buf());
    }
    if let Some(dir) = std::env::var_os(FFMPEG_DIR_ENV) {
        preferred.push(PathBuf::from(dir));
    }

    let ffmpeg_path = locate_in(&preferred, "ffmpeg").ok_or(FFmpegError::NotFound)?;
    let ffprobe_path = locate_in(&preferred, "ffprobe").ok_or(FFmpegError::NotFound)?;
    let version = get_ffmpeg_version(&ffmpeg_path)?;

    debug!(
        "Detected FFmpeg {} at {}",
        version,
        ffmpeg_path.display()
    );

    Ok(FFmpegInfo {
        ffmpeg_path,
        ffprobe_path,
        version,
    })
}

/// Finds an executable by name in common locations and `PATH`.
pub fn locate_binary(name: &str) -> Option<PathBuf> {
    locate_in(&[], name)
}

fn locate_in(preferred: &[PathBuf], name: &str) -> Option<PathBuf> {
    let file_name = executable_name(name);

    preferred
        .iter()
        .cloned()
        .chain(get_common_ffmpeg_paths())
        .chain(path_entries())
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
}

fn executable_name(name: &str) -> String {
    #[cfg(target_os = "windows")]
    {
        format!("{name}.exe")
    }
    #[cfg(not(target_os = "windows"))]
    {
        name.to_string()
    }
}

fn path_entries() -> Vec<PathBuf> {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).collect())
        .unwrap_or_default()
}

/// Get common FFmpeg installation paths for the current platform
fn get_common_ffmpeg_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from(r"C:\ffmpeg\bin"));
        paths.push(PathBuf::from(r"C:\Program Files\ffmpeg\bin"));

        if let Ok(programdata) = std::env::var("ProgramData") {
            paths.push(PathBuf::from(programdata).join("chocolatey").join("bin"));
        }
        if let Ok(userprofile) = std::env::var("USERPROFILE") {
            paths.push(PathBuf::from(userprofile).join("scoop").join("shims"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/opt/homebrew/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
        paths.push(PathBuf::from("/opt/local/bin")); // MacPorts
    }

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
        paths.push(PathBuf::from("/snap/bin"));
    }

    paths
}

/// Get FFmpeg version string
fn get_ffmpeg_version(ffmpeg_path: &Path) -> FFmpegResult<String> {
    let mut cmd = Command::new(ffmpeg_path);
    configure_std_command(&mut cmd);
    let output = cmd
        .arg("-version")
        .output()
        .map_err(FFmpegError::ProcessError)?;

    if !output.status.success() {
        return Err(FFmpegError::ExecutionFailed(
            "Failed to get FFmpeg version".to_string(),
        ));
    }

    let output_str = String::from_utf8_lossy(&output.stdout);
    parse_version_line(&output_str)
        .ok_or_else(|| FFmpegError::ParseError("Could not parse FFmpeg version".to_string()))
}

/// Parses "ffmpeg version X.Y.Z ..." from `-version` output.
fn parse_version_line(output: &str) -> Option<String> {
    let first_line = output.lines().next()?;
    let version = first_line
        .strip_prefix("ffmpeg version ")
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or(first_line);
    Some(version.to_string())
}

/// Validate that FFmpeg binaries are functional
pub fn validate_ffmpeg(info: &FFmpegInfo) -> FFmpegResult<()> {
    for (label, path) in [("FFmpeg", &info.ffmpeg_path), ("FFprobe", &info.ffprobe_path)] {
        let mut cmd = Command::new(path);
        configure_std_command(&mut cmd);
        let output = cmd.arg("-version").output()?;
        if !output.status.success() {
            return Err(FFmpegError::ExecutionFailed(format!(
                "{label} binary is not functional"
            )));
        }
    }
    Ok(())
}
