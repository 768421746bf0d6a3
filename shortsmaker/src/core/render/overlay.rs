//! Timed Overlay Renderer
//!
//! Turns caption cards into drawtext layers. Each visible card gets its own
//! rendering surface: a scratch text file holding the wrapped card text,
//! read by drawtext through `textfile=`. Surfaces are registered with the
//! job's [`ResourceLifecycleManager`] and removed when the job ends.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::core::captions::{CaptionCard, CaptionPosition, CaptionStyle};
use crate::core::resources::{ResourceLifecycleManager, ScratchFile};
use crate::core::types::format_seconds;
use crate::core::{CoreError, CoreResult, TimeSec};

/// Average glyph width as a fraction of font size, used for line wrapping
const AVERAGE_GLYPH_WIDTH: f64 = 0.55;

// =============================================================================
// Escaping
// =============================================================================

/// Escapes a value placed inside a filtergraph option.
///
/// `:` and `,` separate options and filters, `\` escapes; Windows paths
/// contain both.
pub(crate) fn escape_filter_value(raw: &str) -> String {
    raw.replace('\\', r"\\")
        .replace(':', r"\:")
        .replace(',', r"\,")
        .replace('\'', r"\'")
}

// =============================================================================
// Frame
// =============================================================================

/// Output frame size in pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width divided by height
    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }
}

impl Default for FrameSize {
    /// 9:16 vertical 1080p
    fn default() -> Self {
        Self::new(1080, 1920)
    }
}

// =============================================================================
// Layers & Clips
// =============================================================================

/// One drawtext filter instance, kept as ordered parameters
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DrawTextLayer {
    params: Vec<(&'static str, String)>,
}

impl DrawTextLayer {
    fn new() -> Self {
        Self { params: Vec::new() }
    }

    fn set(&mut self, name: &'static str, value: impl Into<String>) {
        self.params.push((name, value.into()));
    }

    /// Value of one drawtext parameter, if present
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// All parameters in emission order
    pub fn params(&self) -> &[(&'static str, String)] {
        &self.params
    }

    /// `drawtext=k=v:k=v...`
    pub fn to_filter(&self) -> String {
        let body = self
            .params
            .iter()
            .map(|(n, v)| format!("{}={}", n, v))
            .collect::<Vec<_>>()
            .join(":");
        format!("drawtext={}", body)
    }
}

/// A rendered caption card, ready for the compositor
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OverlayClip {
    /// `None` for no-op overlays
    pub layer: Option<DrawTextLayer>,
    pub start: TimeSec,
    pub end: TimeSec,
    pub position: CaptionPosition,
    /// Rendering surface backing the layer
    pub surface: Option<PathBuf>,
}

impl OverlayClip {
    /// Zero-duration overlay that draws nothing
    pub fn noop(at: TimeSec, position: CaptionPosition) -> Self {
        Self {
            layer: None,
            start: at,
            end: at,
            position,
            surface: None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.layer.is_none() || self.end <= self.start
    }

    pub fn duration(&self) -> TimeSec {
        (self.end - self.start).max(0.0)
    }

    /// Shifts the display window, e.g. for a narration lead-in
    pub fn offset(mut self, by: TimeSec) -> Self {
        self.start += by;
        self.end += by;
        if let Some(layer) = self.layer.as_mut() {
            for (name, value) in layer.params.iter_mut() {
                if *name == "enable" {
                    *value = enable_expression(self.start, self.end);
                }
            }
        }
        self
    }
}

fn enable_expression(start: TimeSec, end: TimeSec) -> String {
    format!(
        "'gte(t,{})*lt(t,{})'",
        format_seconds(start),
        format_seconds(end)
    )
}

// =============================================================================
// Layout
// =============================================================================

/// Greedy word wrap at `max_chars` characters per line.
///
/// Words longer than a line keep a line of their own.
pub fn wrap_text(text: &str, max_chars: usize) -> String {
    let max_chars = max_chars.max(1);
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
        } else if current.chars().count() + 1 + word.chars().count() <= max_chars {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines.join("\n")
}

/// drawtext `x`/`y` expressions placing the text block
fn position_expressions(position: &CaptionPosition) -> (String, String) {
    let centered_x = "(w-text_w)/2".to_string();
    match position {
        CaptionPosition::LowerThird => (centered_x, "h*2/3-text_h/2".to_string()),
        CaptionPosition::Center => (centered_x, "(h-text_h)/2".to_string()),
        CaptionPosition::Top => (centered_x, "h/10".to_string()),
        CaptionPosition::Bottom => (centered_x, "h*9/10-text_h".to_string()),
        CaptionPosition::Custom {
            x_percent,
            y_percent,
        } => (
            format!("w*{:.4}-text_w/2", x_percent / 100.0),
            format!("h*{:.4}-text_h/2", y_percent / 100.0),
        ),
    }
}

// =============================================================================
// Renderer
// =============================================================================

/// Renders caption cards into timed drawtext overlays
pub struct TimedOverlayRenderer {
    frame: FrameSize,
    surface_dir: PathBuf,
    rendered: usize,
}

impl TimedOverlayRenderer {
    /// Surfaces are written under `surface_dir`, normally the job scratch dir.
    pub fn new(frame: FrameSize, surface_dir: impl Into<PathBuf>) -> Self {
        Self {
            frame,
            surface_dir: surface_dir.into(),
            rendered: 0,
        }
    }

    pub fn frame(&self) -> FrameSize {
        self.frame
    }

    pub fn surface_dir(&self) -> &Path {
        &self.surface_dir
    }

    /// Characters per wrapped line for a given font size
    pub fn chars_per_line(&self, style: &CaptionStyle) -> usize {
        let font_px = style.font_size.to_pixels(self.frame.width) as f64;
        let line_px = style.wrap_width * self.frame.width as f64;
        ((line_px / (AVERAGE_GLYPH_WIDTH * font_px)).floor() as usize).max(1)
    }

    /// Builds the drawtext parameters for a surface, without touching disk
    pub fn layer_for(
        &self,
        surface: &Path,
        start: TimeSec,
        end: TimeSec,
        style: &CaptionStyle,
    ) -> DrawTextLayer {
        let mut layer = DrawTextLayer::new();

        match &style.font_file {
            Some(file) => layer.set("fontfile", escape_filter_value(&file.to_string_lossy())),
            None => layer.set("font", escape_filter_value(&style.font_family)),
        }
        layer.set("textfile", escape_filter_value(&surface.to_string_lossy()));
        layer.set("expansion", "none");
        layer.set(
            "fontsize",
            style.font_size.to_pixels(self.frame.width).to_string(),
        );
        layer.set("fontcolor", style.color.to_ffmpeg());

        if style.stroke_width > 0 {
            layer.set("borderw", style.stroke_width.to_string());
            layer.set("bordercolor", style.stroke_color.to_ffmpeg());
        }

        if style.box_opacity > 0.0 {
            layer.set("box", "1");
            layer.set(
                "boxcolor",
                style.box_color.with_opacity(style.box_opacity).to_ffmpeg(),
            );
            layer.set("boxborderw", style.box_padding.to_string());
        }

        layer.set("line_spacing", style.line_spacing.to_string());

        let (x, y) = position_expressions(&style.position);
        layer.set("x", x);
        layer.set("y", y);
        layer.set("enable", enable_expression(start, end));
        layer
    }

    /// Renders one card.
    ///
    /// Writes the surface and registers it with `resources`. Cards with no
    /// visible text become a zero-duration no-op overlay and allocate nothing.
    pub fn render(
        &mut self,
        card: &CaptionCard,
        style: &CaptionStyle,
        resources: &mut ResourceLifecycleManager,
    ) -> CoreResult<OverlayClip> {
        let text = card.text().trim();
        if text.is_empty() || card.display_end() <= card.display_start() {
            debug!("Card at {:.3}s renders as no-op", card.display_start());
            return Ok(OverlayClip::noop(card.display_start(), style.position.clone()));
        }

        let wrapped = wrap_text(text, self.chars_per_line(style));
        let surface = self
            .surface_dir
            .join(format!("caption_{:04}.txt", self.rendered));
        std::fs::write(&surface, wrapped.as_bytes()).map_err(|e| {
            CoreError::Resource(format!(
                "cannot allocate caption surface {}: {}",
                surface.display(),
                e
            ))
        })?;
        resources.register(ScratchFile::surface(&surface));
        self.rendered += 1;

        let layer = self.layer_for(&surface, card.display_start(), card.display_end(), style);
        Ok(OverlayClip {
            layer: Some(layer),
            start: card.display_start(),
            end: card.display_end(),
            position: style.position.clone(),
            surface: Some(surface),
        })
    }

    /// Renders every card in order
    pub fn render_all(
        &mut self,
        cards: &[CaptionCard],
        style: &CaptionStyle,
        resources: &mut ResourceLifecycleManager,
    ) -> CoreResult<Vec<OverlayClip>> {
        cards
            .iter()
            .map(|card| self.render(card, style, resources))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::captions::{CaptionChunker, Color, FontSize, WordSegment};
    use crate::core::resources::HandleKind;
    use tempfile::TempDir;

    fn cards(words: &[(&str, f64, f64)]) -> Vec<CaptionCard> {
        let tokens: Vec<WordSegment> = words
            .iter()
            .map(|(t, s, e)| WordSegment::new(t, *s, *e))
            .collect();
        CaptionChunker::default().chunk(&tokens)
    }

    fn layer(style: &CaptionStyle) -> DrawTextLayer {
        TimedOverlayRenderer::new(FrameSize::default(), "/tmp").layer_for(
            Path::new("/tmp/caption_0000.txt"),
            1.0,
            2.0,
            style,
        )
    }

    #[test]
    fn test_wrap_text() {
        assert_eq!(wrap_text("one two three", 7), "one two\nthree");
        assert_eq!(wrap_text("extraordinary ok", 5), "extraordinary\nok");
        assert_eq!(wrap_text("", 10), "");
    }

    #[test]
    fn test_render_writes_and_registers_surface() {
        let temp = TempDir::new().unwrap();
        let mut resources = ResourceLifecycleManager::new();
        let mut renderer = TimedOverlayRenderer::new(FrameSize::default(), temp.path());
        let card = &cards(&[("Hello", 0.0, 0.5), ("world", 0.6, 1.0)])[0];

        let clip = renderer
            .render(card, &CaptionStyle::default(), &mut resources)
            .unwrap();

        let surface = clip.surface.clone().unwrap();
        assert_eq!(std::fs::read_to_string(&surface).unwrap(), "Hello world");
        assert_eq!(resources.live_count_of(HandleKind::RenderSurface), 1);
        assert_eq!(clip.start, 0.0);
        assert_eq!(clip.end, 1.0);

        resources.release_all().unwrap();
        assert!(!surface.exists());
    }

    #[test]
    fn test_enable_window_uses_microseconds() {
        let l = layer(&CaptionStyle::default());
        assert_eq!(l.param("enable"), Some("'gte(t,1.000000)*lt(t,2.000000)'"));
    }

    #[test]
    fn test_default_style_parameters() {
        let l = layer(&CaptionStyle::default());
        assert_eq!(l.param("font"), Some("Sans"));
        assert_eq!(l.param("fontsize"), Some("65"));
        assert_eq!(l.param("fontcolor"), Some("0xFFFFFF@1.000"));
        assert_eq!(l.param("borderw"), Some("2"));
        assert_eq!(l.param("boxcolor"), Some("0x000000@0.400"));
        assert_eq!(l.param("x"), Some("(w-text_w)/2"));
        assert_eq!(l.param("y"), Some("h*2/3-text_h/2"));
        assert!(l.to_filter().starts_with("drawtext=font=Sans:textfile="));
    }

    #[test]
    fn test_each_option_changes_only_its_parameter() {
        let base = layer(&CaptionStyle::default());
        let changed = layer(&CaptionStyle {
            color: Color::rgb(255, 255, 0),
            ..Default::default()
        });
        let diff: Vec<&str> = base
            .params()
            .iter()
            .zip(changed.params())
            .filter(|(a, b)| a != b)
            .map(|(a, _)| a.0)
            .collect();
        assert_eq!(diff, vec!["fontcolor"]);

        let moved = layer(&CaptionStyle {
            position: CaptionPosition::Top,
            ..Default::default()
        });
        let diff: Vec<&str> = base
            .params()
            .iter()
            .zip(moved.params())
            .filter(|(a, b)| a != b)
            .map(|(a, _)| a.0)
            .collect();
        assert_eq!(diff, vec!["y"]);
    }

    #[test]
    fn test_zero_box_opacity_disables_box() {
        let l = layer(&CaptionStyle {
            box_opacity: 0.0,
            stroke_width: 0,
            ..Default::default()
        });
        assert!(l.param("box").is_none());
        assert!(l.param("borderw").is_none());
    }

    #[test]
    fn test_font_file_takes_precedence() {
        let l = layer(&CaptionStyle {
            font_file: Some(PathBuf::from("C:\\fonts\\a,b.ttf")),
            font_size: FontSize::Pixels(48),
            ..Default::default()
        });
        assert!(l.param("font").is_none());
        assert_eq!(l.param("fontfile"), Some(r"C\:\\fonts\\a\,b.ttf"));
        assert_eq!(l.param("fontsize"), Some("48"));
    }

    #[test]
    fn test_custom_position() {
        let l = layer(&CaptionStyle {
            position: CaptionPosition::Custom {
                x_percent: 50.0,
                y_percent: 25.0,
            },
            ..Default::default()
        });
        assert_eq!(l.param("x"), Some("w*0.5000-text_w/2"));
        assert_eq!(l.param("y"), Some("h*0.2500-text_h/2"));
    }

    #[test]
    fn test_empty_card_is_noop_without_surface() {
        let temp = TempDir::new().unwrap();
        let mut resources = ResourceLifecycleManager::new();
        let mut renderer = TimedOverlayRenderer::new(FrameSize::default(), temp.path());
        let card = CaptionCard::new(vec![WordSegment::new("  ", 3.0, 3.5)], 3.0, 3.5);

        let clip = renderer
            .render(&card, &CaptionStyle::default(), &mut resources)
            .unwrap();
        assert!(clip.is_noop());
        assert_eq!(clip.duration(), 0.0);
        assert_eq!(resources.live_count(), 0);
    }

    #[test]
    fn test_offset_moves_enable_window() {
        let temp = TempDir::new().unwrap();
        let mut resources = ResourceLifecycleManager::new();
        let mut renderer = TimedOverlayRenderer::new(FrameSize::default(), temp.path());
        let card = &cards(&[("Hi", 0.0, 1.0)])[0];
        let clip = renderer
            .render(card, &CaptionStyle::default(), &mut resources)
            .unwrap()
            .offset(1.0);
        assert_eq!(clip.start, 1.0);
        assert_eq!(
            clip.layer.unwrap().param("enable"),
            Some("'gte(t,1.000000)*lt(t,2.000000)'")
        );
    }

    #[test]
    fn test_chars_per_line() {
        let renderer = TimedOverlayRenderer::new(FrameSize::default(), "/tmp");
        // 864px line / (0.55 * 65px) = 24.2
        assert_eq!(renderer.chars_per_line(&CaptionStyle::default()), 24);
    }
}
