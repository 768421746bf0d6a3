//! Background Media Library
//!
//! Picks background video, music and caption fonts from the assets
//! directory. An empty video or music directory is filled by downloading one
//! of the configured URLs with `yt-dlp`.
//!
//! Layout under `assets_dir`:
//!
//! ```text
//! background_videos/   *.mp4 *.mov *.mkv *.webm
//! background_music/    *.mp3 *.m4a *.wav *.ogg *.opus *.flac
//! fonts/               *.ttf *.otf
//! credits/             credits.mp4 [credits_mask.mp4]
//! ```

use std::path::{Path, PathBuf};
use std::process::Command;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info};

use crate::core::ffmpeg::locate_binary;
use crate::core::fs::list_files_with_extensions;
use crate::core::process::configure_std_command;
use crate::core::render::CreditsSource;
use crate::core::{CoreError, CoreResult};

pub const CREDITS_FILE: &str = "credits.mp4";
pub const CREDITS_MASK_FILE: &str = "credits_mask.mp4";

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "webm"];
const MUSIC_EXTENSIONS: &[&str] = &["mp3", "m4a", "wav", "ogg", "opus", "flac"];
const FONT_EXTENSIONS: &[&str] = &["ttf", "otf"];

/// Media chosen for one job
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MediaSelection {
    pub background_video: PathBuf,
    pub background_music: PathBuf,
    /// `None` when the fonts directory is empty; captions then use the font family
    pub font: Option<PathBuf>,
    pub credits: Option<CreditsSource>,
}

/// Downloads `url` into `dir` with yt-dlp.
///
/// Video is merged to MP4; with `audio_only` the best audio stream is
/// extracted to MP3.
pub fn download_with_ytdlp(url: &str, dir: &Path, audio_only: bool) -> CoreResult<()> {
    let ytdlp = locate_binary("yt-dlp")
        .ok_or_else(|| CoreError::NotFound("yt-dlp not found in PATH".to_string()))?;
    std::fs::create_dir_all(dir)?;

    let mut cmd = Command::new(&ytdlp);
    configure_std_command(&mut cmd);
    if audio_only {
        cmd.args(["-f", "bestaudio", "-x", "--audio-format", "mp3"]);
    } else {
        cmd.args([
            "-f",
            "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best",
            "--merge-output-format",
            "mp4",
        ]);
    }
    if let Some(ffmpeg_dir) = locate_binary("ffmpeg").and_then(|p| p.parent().map(Path::to_path_buf)) {
        cmd.arg("--ffmpeg-location").arg(ffmpeg_dir);
    }
    cmd.args(["--restrict-filenames", "--no-playlist", "-o"])
        .arg(dir.join("%(title)s.%(ext)s"))
        .arg(url);

    info!("Downloading {} into {}", url, dir.display());
    let output = cmd
        .output()
        .map_err(|e| CoreError::Collaborator(format!("Failed to run yt-dlp: {}", e)))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        return Err(CoreError::Collaborator(format!(
            "yt-dlp failed for {}: {}",
            url,
            tail.into_iter().rev().collect::<Vec<_>>().join("\n")
        )));
    }
    Ok(())
}

/// Random access to the assets directory
pub struct MediaLibrary {
    assets_dir: PathBuf,
    rng: StdRng,
}

impl MediaLibrary {
    pub fn new(assets_dir: &Path, seed: Option<u64>) -> CoreResult<Self> {
        if !assets_dir.is_dir() {
            return Err(CoreError::NotFound(format!(
                "assets directory {} not found",
                assets_dir.display()
            )));
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            assets_dir: assets_dir.to_path_buf(),
            rng,
        })
    }

    pub fn video_dir(&self) -> PathBuf {
        self.assets_dir.join("background_videos")
    }

    pub fn music_dir(&self) -> PathBuf {
        self.assets_dir.join("background_music")
    }

    pub fn fonts_dir(&self) -> PathBuf {
        self.assets_dir.join("fonts")
    }

    pub fn credits_dir(&self) -> PathBuf {
        self.assets_dir.join("credits")
    }

    pub fn pick_background_video(&mut self, urls: &[String]) -> CoreResult<PathBuf> {
        let dir = self.video_dir();
        self.pick_or_download(&dir, VIDEO_EXTENSIONS, urls, false, "background video")
    }

    pub fn pick_background_music(&mut self, urls: &[String]) -> CoreResult<PathBuf> {
        let dir = self.music_dir();
        self.pick_or_download(&dir, MUSIC_EXTENSIONS, urls, true, "background music")
    }

    pub fn pick_font(&mut self) -> CoreResult<Option<PathBuf>> {
        let fonts = list_files_with_extensions(&self.fonts_dir(), FONT_EXTENSIONS)?;
        Ok(fonts.choose(&mut self.rng).cloned())
    }

    /// Credits clip and optional mask, if present
    pub fn credits(&self) -> Option<CreditsSource> {
        let dir = self.credits_dir();
        let video = dir.join(CREDITS_FILE);
        if !video.is_file() {
            return None;
        }
        let mask = Some(dir.join(CREDITS_MASK_FILE)).filter(|m| m.is_file());
        Some(CreditsSource { video, mask })
    }

    /// Picks everything a render job needs
    pub fn select(
        &mut self,
        video_urls: &[String],
        music_urls: &[String],
        with_credits: bool,
    ) -> CoreResult<MediaSelection> {
        let selection = MediaSelection {
            background_video: self.pick_background_video(video_urls)?,
            background_music: self.pick_background_music(music_urls)?,
            font: self.pick_font()?,
            credits: if with_credits { self.credits() } else { None },
        };
        debug!("Media selection: {:?}", selection);
        Ok(selection)
    }

    fn pick_or_download(
        &mut self,
        dir: &Path,
        extensions: &[&str],
        urls: &[String],
        audio_only: bool,
        what: &str,
    ) -> CoreResult<PathBuf> {
        let mut files = list_files_with_extensions(dir, extensions)?;
        if files.is_empty() {
            if let Some(url) = urls.choose(&mut self.rng) {
                download_with_ytdlp(url, dir, audio_only)?;
                files = list_files_with_extensions(dir, extensions)?;
            }
        }
        files.choose(&mut self.rng).cloned().ok_or_else(|| {
            CoreError::NotFound(format!("no {} found in {}", what, dir.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    fn library_with_assets() -> (TempDir, MediaLibrary) {
        let temp = TempDir::new().unwrap();
        let assets = temp.path();
        touch(&assets.join("background_videos/minecraft.mp4"));
        touch(&assets.join("background_videos/subway.MOV"));
        touch(&assets.join("background_videos/notes.txt"));
        touch(&assets.join("background_music/lofi.mp3"));
        touch(&assets.join("fonts/Roboto.ttf"));
        let library = MediaLibrary::new(assets, Some(11)).unwrap();
        (temp, library)
    }

    #[test]
    fn test_missing_assets_dir() {
        let temp = TempDir::new().unwrap();
        let result = MediaLibrary::new(&temp.path().join("nope"), None);
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[test]
    fn test_select_picks_matching_files() {
        let (temp, mut library) = library_with_assets();
        let selection = library.select(&[], &[], true).unwrap();

        assert!(selection.background_video.starts_with(temp.path().join("background_videos")));
        assert_ne!(
            selection.background_video.extension().unwrap(),
            "txt"
        );
        assert_eq!(selection.background_music.file_name().unwrap(), "lofi.mp3");
        assert_eq!(selection.font.unwrap().file_name().unwrap(), "Roboto.ttf");
        assert!(selection.credits.is_none());
    }

    #[test]
    fn test_seeded_selection_is_repeatable() {
        let (temp, mut a) = library_with_assets();
        let mut b = MediaLibrary::new(temp.path(), Some(11)).unwrap();
        for _ in 0..5 {
            assert_eq!(
                a.pick_background_video(&[]).unwrap(),
                b.pick_background_video(&[]).unwrap()
            );
        }
    }

    #[test]
    fn test_empty_dir_without_urls_is_not_found() {
        let temp = TempDir::new().unwrap();
        let mut library = MediaLibrary::new(temp.path(), Some(1)).unwrap();
        assert!(matches!(
            library.pick_background_music(&[]),
            Err(CoreError::NotFound(_))
        ));
        assert_eq!(library.pick_font().unwrap(), None);
    }

    #[test]
    fn test_credits_with_and_without_mask() {
        let (temp, library) = library_with_assets();
        assert!(library.credits().is_none());

        touch(&temp.path().join("credits").join(CREDITS_FILE));
        let credits = library.credits().unwrap();
        assert!(credits.mask.is_none());

        touch(&temp.path().join("credits").join(CREDITS_MASK_FILE));
        let credits = library.credits().unwrap();
        assert_eq!(
            credits.mask.unwrap(),
            temp.path().join("credits").join(CREDITS_MASK_FILE)
        );
        assert_eq!(credits.video, temp.path().join("credits").join(CREDITS_FILE));
    }
}
