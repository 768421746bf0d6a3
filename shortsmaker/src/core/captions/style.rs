//! Caption Styling
//!
//! Visual options for caption overlays. Every option maps to exactly one
//! drawtext parameter; see `render::overlay`.

use std::fmt;
use std::path::PathBuf;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

// =============================================================================
// Color
// =============================================================================

/// RGBA color value (0-255 for each component).
///
/// Serialized as `#RRGGBB`, `#RRGGBBAA` or a handful of names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    /// Creates a new color from RGBA components
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Creates an opaque color from RGB components
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }

    pub const fn white() -> Self {
        Self::rgb(255, 255, 255)
    }

    pub const fn black() -> Self {
        Self::rgb(0, 0, 0)
    }

    /// Returns the same color with the alpha replaced by `opacity` (0.0 - 1.0)
    pub fn with_opacity(self, opacity: f64) -> Self {
        let a = (opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self { a, ..self }
    }

    /// Converts to hex string (e.g., "FFFFFF" or "FFFFFFFF" with alpha)
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        } else {
            format!("{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
        }
    }

    /// FFmpeg color syntax: `0xRRGGBB@alpha`
    pub fn to_ffmpeg(&self) -> String {
        format!(
            "0x{:02X}{:02X}{:02X}@{:.3}",
            self.r,
            self.g,
            self.b,
            self.a as f64 / 255.0
        )
    }

    fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        let named = match s.to_ascii_lowercase().as_str() {
            "white" => Some(Self::white()),
            "black" => Some(Self::black()),
            "yellow" => Some(Self::rgb(255, 255, 0)),
            "red" => Some(Self::rgb(255, 0, 0)),
            _ => None,
        };
        if let Some(c) = named {
            return Ok(c);
        }

        let hex = s
            .strip_prefix('#')
            .or_else(|| s.strip_prefix("0x"))
            .unwrap_or(s);
        let byte = |i: usize| {
            hex.get(i..i + 2)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| format!("invalid color '{}'", s))
        };
        match hex.len() {
            6 => Ok(Self::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Ok(Self::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => Err(format!("invalid color '{}'", s)),
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::white()
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        format!("#{}", c.to_hex())
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.to_hex())
    }
}

/// Bright, high-contrast colors a video may draw its caption color from
pub const CAPTION_PALETTE: &[Color] = &[
    Color::rgb(255, 255, 255),
    Color::rgb(255, 235, 59),
    Color::rgb(0, 229, 255),
    Color::rgb(118, 255, 3),
    Color::rgb(255, 64, 129),
    Color::rgb(255, 145, 0),
    Color::rgb(224, 64, 251),
    Color::rgb(29, 233, 182),
];

/// Picks one palette color
pub fn random_caption_color<R: Rng + ?Sized>(rng: &mut R) -> Color {
    CAPTION_PALETTE
        .choose(rng)
        .copied()
        .unwrap_or_else(Color::white)
}

// =============================================================================
// Positioning & Size
// =============================================================================

/// Where a caption sits on screen
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptionPosition {
    /// Centered horizontally, two thirds down
    #[default]
    LowerThird,
    Center,
    Top,
    Bottom,
    /// Percentages (0-100) of the frame, measured to the text center
    Custom { x_percent: f64, y_percent: f64 },
}

/// Font size as absolute pixels or a fraction of output width
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FontSize {
    Pixels(u32),
    WidthFraction(f64),
}

impl Default for FontSize {
    fn default() -> Self {
        Self::WidthFraction(0.06)
    }
}

impl FontSize {
    /// Resolves to pixels for a frame `width` wide; never below 1
    pub fn to_pixels(&self, width: u32) -> u32 {
        match self {
            FontSize::Pixels(px) => (*px).max(1),
            FontSize::WidthFraction(f) => ((width as f64 * f).round() as u32).max(1),
        }
    }
}

// =============================================================================
// Caption Style
// =============================================================================

/// Caption text style
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionStyle {
    /// Fontconfig family name, used when no font file is set
    pub font_family: String,
    /// Explicit font file; takes precedence over `font_family`
    pub font_file: Option<PathBuf>,
    pub font_size: FontSize,
    pub color: Color,
    /// Draw the text color from [`CAPTION_PALETTE`] instead of `color`
    pub random_color: bool,
    pub stroke_color: Color,
    /// Outline width in pixels (0 disables)
    pub stroke_width: u32,
    /// Background box opacity; 0 disables the box
    pub box_opacity: f64,
    pub box_color: Color,
    pub box_padding: u32,
    pub position: CaptionPosition,
    /// Line wrap width as a fraction of output width
    pub wrap_width: f64,
    /// Extra pixels between wrapped lines
    pub line_spacing: i32,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            font_family: "Sans".to_string(),
            font_file: None,
            font_size: FontSize::default(),
            color: Color::white(),
            random_color: false,
            stroke_color: Color::black(),
            stroke_width: 2,
            box_opacity: 0.4,
            box_color: Color::black(),
            box_padding: 12,
            position: CaptionPosition::LowerThird,
            wrap_width: 0.8,
            line_spacing: 4,
        }
    }
}

impl CaptionStyle {
    /// Validation problems, empty when the style is usable
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        match self.font_size {
            FontSize::Pixels(0) => problems.push("font_size pixels must be > 0".to_string()),
            FontSize::WidthFraction(f) if !(f > 0.0 && f <= 1.0) => {
                problems.push(format!("font_size width_fraction must be in (0, 1], got {}", f))
            }
            _ => {}
        }
        if !(0.0..=1.0).contains(&self.box_opacity) {
            problems.push(format!("box_opacity must be in [0, 1], got {}", self.box_opacity));
        }
        if !(self.wrap_width > 0.0 && self.wrap_width <= 1.0) {
            problems.push(format!("wrap_width must be in (0, 1], got {}", self.wrap_width));
        }
        if let CaptionPosition::Custom { x_percent, y_percent } = self.position {
            if !(0.0..=100.0).contains(&x_percent) || !(0.0..=100.0).contains(&y_percent) {
                problems.push("custom position percentages must be within 0-100".to_string());
            }
        }
        if self.font_family.trim().is_empty() && self.font_file.is_none() {
            problems.push("either font_family or font_file must be set".to_string());
        }
        problems
    }

    /// Returns a copy whose `color` is resolved from the palette when
    /// `random_color` is set.
    pub fn resolved<R: Rng + ?Sized>(&self, rng: &mut R) -> Self {
        let mut style = self.clone();
        if style.random_color {
            style.color = random_caption_color(rng);
            style.random_color = false;
        }
        style
    }
}
